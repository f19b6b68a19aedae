//! Service-level thresholds a run is judged against.

use crate::driver::{RunSummary, Scenario};

/// A quantity observed over a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum ThresholdMetric {
    /// Fraction of write checks that passed.
    #[serde(rename = "write_success_rate")]
    WriteSuccessRate,
    /// 99.9th percentile write latency in milliseconds.
    #[serde(rename = "write_latency_p999_ms")]
    WriteLatencyP999,
    /// Fraction of read checks that passed.
    #[serde(rename = "read_success_rate")]
    ReadSuccessRate,
    /// Mean read latency in milliseconds.
    #[serde(rename = "read_latency_avg_ms")]
    ReadLatencyAvg,
}

impl ThresholdMetric {
    pub fn scenario(&self) -> Scenario {
        match self {
            ThresholdMetric::WriteSuccessRate | ThresholdMetric::WriteLatencyP999 => {
                Scenario::Write
            }
            ThresholdMetric::ReadSuccessRate | ThresholdMetric::ReadLatencyAvg => Scenario::Read,
        }
    }

    pub fn observe(&self, summary: &RunSummary) -> Option<f64> {
        match self {
            ThresholdMetric::WriteSuccessRate => summary.write.success_rate(),
            ThresholdMetric::WriteLatencyP999 => summary.write.latency_p999_ms,
            ThresholdMetric::ReadSuccessRate => summary.read.success_rate(),
            ThresholdMetric::ReadLatencyAvg => summary.read.latency_avg_ms,
        }
    }
}

impl std::fmt::Display for ThresholdMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ThresholdMetric::WriteSuccessRate => write!(f, "checks{{type:write}} rate"),
            ThresholdMetric::WriteLatencyP999 => write!(f, "write latency p(99.9)"),
            ThresholdMetric::ReadSuccessRate => write!(f, "checks{{type:read}} rate"),
            ThresholdMetric::ReadLatencyAvg => write!(f, "read latency avg"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum Condition {
    #[serde(rename = "gt")]
    GreaterThan(f64),
    #[serde(rename = "lt")]
    LessThan(f64),
}

impl Condition {
    pub fn holds(&self, observed: f64) -> bool {
        match self {
            Condition::GreaterThan(bound) => observed > *bound,
            Condition::LessThan(bound) => observed < *bound,
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Condition::GreaterThan(bound) => write!(f, "> {bound}"),
            Condition::LessThan(bound) => write!(f, "< {bound}"),
        }
    }
}

///////////////////////////////////////////// Threshold ////////////////////////////////////////////

#[derive(Clone, Copy, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Threshold {
    pub metric: ThresholdMetric,
    pub condition: Condition,
}

/// The declared service levels.
pub fn sla_thresholds() -> Vec<Threshold> {
    vec![
        Threshold {
            metric: ThresholdMetric::WriteSuccessRate,
            condition: Condition::GreaterThan(0.999),
        },
        Threshold {
            metric: ThresholdMetric::WriteLatencyP999,
            condition: Condition::LessThan(10_000.0),
        },
        Threshold {
            metric: ThresholdMetric::ReadSuccessRate,
            condition: Condition::GreaterThan(0.999),
        },
        Threshold {
            metric: ThresholdMetric::ReadLatencyAvg,
            condition: Condition::LessThan(2_000.0),
        },
    ]
}

/// The verdict on one threshold.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ThresholdResult {
    pub threshold: Threshold,
    /// `None` when the run produced no samples for the metric, or it was skipped.
    pub observed: Option<f64>,
    pub passed: bool,
    /// Write thresholds of a dry run are not evaluated.
    #[serde(default)]
    pub skipped: bool,
}

impl std::fmt::Display for ThresholdResult {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.skipped {
            return write!(
                f,
                "skipped: {} {} (dry run, nothing was sent)",
                self.threshold.metric, self.threshold.condition
            );
        }
        let verdict = if self.passed { "ok" } else { "FAILED" };
        match self.observed {
            Some(observed) => write!(
                f,
                "{}: {} {} (observed {:.4})",
                verdict, self.threshold.metric, self.threshold.condition, observed
            ),
            None => write!(
                f,
                "{}: {} {} (no samples)",
                verdict, self.threshold.metric, self.threshold.condition
            ),
        }
    }
}

/// Judge a run.  Metrics without samples pass, as do write metrics of a dry run.
pub fn evaluate(thresholds: &[Threshold], summary: &RunSummary) -> Vec<ThresholdResult> {
    thresholds
        .iter()
        .map(|threshold| {
            let skipped = summary.dry_run && threshold.metric.scenario() == Scenario::Write;
            let observed = if skipped {
                None
            } else {
                threshold.metric.observe(summary)
            };
            ThresholdResult {
                threshold: *threshold,
                observed,
                passed: observed.map_or(true, |o| threshold.condition.holds(o)),
                skipped,
            }
        })
        .collect()
}
