//! Randomized PromQL query generation.
//!
//! Every query reads a bounded, randomly chosen subset of the hosts the write path populates.  The
//! subset is expressed as a regex alternation over `hostN` values whose size is bounded by the
//! configured read series per request.  On top of the selector, the query takes one of three
//! shapes picked from a weighted table:
//!
//! ```text
//! 0.0 ─────────── 0.5 ───────── 0.8 ───── 1.0
//!  (a - b) / 2^20    rate(a[km])*1000   a
//! ```
//!
//! All randomness is drawn from an [Entropy] handed in by the caller, so a query is a pure
//! function of the entropy stream.

use std::collections::VecDeque;

use guacamole::combinators::*;
use guacamole::Guacamole;

use crate::series::{SeriesSpace, HOST_LABEL, SERIES_ID_LABEL};

/// Probability that a host is part of the alternation.
const HOST_INCLUSION_PROBABILITY: f64 = 0.7;
/// Probability that a query additionally filters on the series id label.
const SERIES_FILTER_PROBABILITY: f64 = 0.5;
/// Largest rate window, in minutes.
const MAX_RATE_WINDOW_MIN: usize = 10;

////////////////////////////////////////////// Entropy /////////////////////////////////////////////

/// A source of random draws.
pub trait Entropy {
    /// A uniform draw in `[0, 1)`.
    fn unit(&mut self) -> f64;

    /// A uniform draw in `[0, limit)`.  Returns 0 when `limit` is 0.
    fn below(&mut self, limit: usize) -> usize {
        if limit == 0 {
            return 0;
        }
        ((self.unit() * limit as f64) as usize).min(limit - 1)
    }
}

impl Entropy for Guacamole {
    fn unit(&mut self) -> f64 {
        any::<f64>(self)
    }

    fn below(&mut self, limit: usize) -> usize {
        if limit == 0 {
            return 0;
        }
        uniform(0, limit)(self)
    }
}

/// Replays a fixed script of unit draws, cycling when it runs out.
#[derive(Clone, Debug)]
pub struct ScriptedEntropy {
    script: Vec<f64>,
    offset: usize,
}

impl ScriptedEntropy {
    /// Draws must lie in `[0, 1)`.  An empty script always draws 0.
    pub fn new(script: Vec<f64>) -> Self {
        Self { script, offset: 0 }
    }
}

impl Entropy for ScriptedEntropy {
    fn unit(&mut self) -> f64 {
        if self.script.is_empty() {
            return 0.0;
        }
        let draw = self.script[self.offset % self.script.len()];
        self.offset += 1;
        draw
    }
}

/////////////////////////////////////////////// Shapes /////////////////////////////////////////////

type Constructor = fn(&QueryGenerator, &mut dyn Entropy) -> String;

/// The shape of a query.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QueryShape {
    /// `(a - b) / (1024*1024)`; models memory deltas.
    DifferenceRatio,
    /// `rate(a[km]) * 1000`.
    Rate,
    /// A bare selector.
    Selector,
}

/// Cumulative probability thresholds.  The first entry whose threshold exceeds the draw wins.
const SHAPES: [(f64, QueryShape, Constructor); 3] = [
    (
        0.5,
        QueryShape::DifferenceRatio,
        QueryGenerator::difference_ratio,
    ),
    (0.8, QueryShape::Rate, QueryGenerator::rate),
    (1.0, QueryShape::Selector, QueryGenerator::selector_query),
];

/// The table row selected by a unit draw.  Draws past the last threshold take the last row.
fn shape_row(draw: f64) -> &'static (f64, QueryShape, Constructor) {
    SHAPES
        .iter()
        .find(|(threshold, _, _)| draw < *threshold)
        .unwrap_or(&SHAPES[SHAPES.len() - 1])
}

impl QueryShape {
    /// The shape selected by a unit draw.
    pub fn for_draw(draw: f64) -> Self {
        shape_row(draw).1
    }

    /// The cumulative threshold table, for auditing.
    pub fn thresholds() -> Vec<(f64, QueryShape)> {
        SHAPES
            .iter()
            .map(|(threshold, shape, _)| (*threshold, *shape))
            .collect()
    }
}

////////////////////////////////////////// QueryGenerator //////////////////////////////////////////

/// Builds queries over the hosts `host0 .. host{read_series_per_request - 1}`.
#[derive(Clone, Debug)]
pub struct QueryGenerator {
    metric_names: Vec<String>,
    read_series_per_request: usize,
}

impl QueryGenerator {
    pub fn new(space: &SeriesSpace) -> Self {
        Self {
            metric_names: space.metric_names().to_vec(),
            read_series_per_request: space.read_series_per_request() as usize,
        }
    }

    /// Generate one query.
    pub fn generate(&self, entropy: &mut dyn Entropy) -> String {
        let (_, _, constructor) = shape_row(entropy.unit());
        constructor(self, entropy)
    }

    fn difference_ratio(&self, entropy: &mut dyn Entropy) -> String {
        let minuend = self.selector_query(entropy);
        let subtrahend = self.selector_query(entropy);
        format!("({minuend} - {subtrahend}) / (1024*1024)")
    }

    fn rate(&self, entropy: &mut dyn Entropy) -> String {
        let selector = self.selector_query(entropy);
        let window = 1 + entropy.below(MAX_RATE_WINDOW_MIN);
        format!("rate({selector}[{window}m]) * 1000")
    }

    /// A single-metric selector over a random subset of hosts, optionally excluding series whose
    /// id starts with a random digit.
    pub fn selector_query(&self, entropy: &mut dyn Entropy) -> String {
        let metric = if self.metric_names.len() > 1 {
            &self.metric_names[entropy.below(self.metric_names.len())]
        } else {
            &self.metric_names[0]
        };
        let boundary = entropy.below(self.read_series_per_request);
        let hosts = self.select_hosts(boundary, entropy);
        if entropy.unit() < SERIES_FILTER_PROBABILITY {
            let digit = entropy.below(10);
            format!("{metric}{{{HOST_LABEL}=~\"{hosts}\",{SERIES_ID_LABEL}!~\"{digit}.*\"}}")
        } else {
            format!("{metric}{{{HOST_LABEL}=~\"{hosts}\"}}")
        }
    }

    /// Split `[0, read_series_per_request)` at `boundary`, combine each half independently and
    /// join the non-empty results.  A boundary past the end is clamped.
    pub fn select_hosts(&self, boundary: usize, entropy: &mut dyn Entropy) -> String {
        let boundary = boundary.min(self.read_series_per_request);
        let halves = [
            combine_hosts(0, boundary, entropy),
            combine_hosts(boundary, self.read_series_per_request, entropy),
        ];
        halves
            .into_iter()
            .filter(|half| !half.is_empty())
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// Each host in `[start, end)` joins the alternation with probability 0.7, at the front or the
/// back with equal odds.  Empty when no host is chosen.
pub fn combine_hosts(start: usize, end: usize, entropy: &mut dyn Entropy) -> String {
    let mut hosts = VecDeque::new();
    for index in start..end {
        if entropy.unit() >= HOST_INCLUSION_PROBABILITY {
            continue;
        }
        let host = format!("host{index}");
        if entropy.unit() < 0.5 {
            hosts.push_front(host);
        } else {
            hosts.push_back(host);
        }
    }
    hosts.into_iter().collect::<Vec<_>>().join("|")
}
