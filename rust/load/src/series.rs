//! The synthetic series space.
//!
//! Every series under test is identified by an integer in `[0, total_series)`.  The space is cut
//! into `batches_per_cycle` contiguous slots of `write_series_per_request` ids each; a write
//! request always carries exactly one slot.  Labels are not stored anywhere.  They are a pure
//! function of the series id, expressed as a [LabelTemplate] whose values may reference the id
//! through `${series_id}` placeholders.  The remote-write client expands the template per series;
//! [LabelTemplate::expand] is the reference expansion used to answer "what labels does series N
//! carry?" without going over the wire.

use std::collections::BTreeMap;

use crate::config::LoadConfig;
use crate::Error;

/// The metric name used when no other names are configured.
pub const DEFAULT_METRIC_NAME: &str = "load_generated_metric";
/// Number of distinct values the host label takes.  Series ids collide onto hosts modulo this.
pub const HOST_CARDINALITY: u64 = 2500;

pub const METRIC_NAME_LABEL: &str = "__name__";
pub const HOST_LABEL: &str = "host";
pub const SERIES_ID_LABEL: &str = "series_id";
pub const REPLICA_LABEL: &str = "__replica__";

/// The concrete labels of one series.
pub type LabelBinding = BTreeMap<String, String>;

/////////////////////////////////////////// LabelTemplate //////////////////////////////////////////

/// A mapping from label name to a value expression.
///
/// Values are literal text interleaved with placeholders.  Three placeholder forms exist:
/// `${series_id}`, `${series_id%N}` and `${series_id/N}`.  Anything else between `${` and `}` is
/// kept verbatim.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct LabelTemplate {
    labels: BTreeMap<String, String>,
}

impl LabelTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace one label.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    /// Expand every placeholder for the given series.
    pub fn expand(&self, series_id: u64) -> LabelBinding {
        self.labels
            .iter()
            .map(|(name, value)| (name.clone(), expand_value(value, series_id)))
            .collect()
    }
}

fn expand_value(value: &str, series_id: u64) -> String {
    let mut output = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };
        match evaluate_placeholder(&after[..end], series_id) {
            Some(expanded) => output.push_str(&expanded),
            None => output.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }
    output.push_str(rest);
    output
}

fn evaluate_placeholder(expr: &str, series_id: u64) -> Option<String> {
    let operand = expr.trim().strip_prefix(SERIES_ID_LABEL)?.trim_start();
    if operand.is_empty() {
        return Some(series_id.to_string());
    }
    let mut chars = operand.chars();
    let op = chars.next()?;
    let divisor: u64 = chars.as_str().trim().parse().ok()?;
    if divisor == 0 {
        return None;
    }
    match op {
        '%' => Some((series_id % divisor).to_string()),
        '/' => Some((series_id / divisor).to_string()),
        _ => None,
    }
}

//////////////////////////////////////////// SeriesSpace ///////////////////////////////////////////

/// The universe of synthetic series and its partition into write batches.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SeriesSpace {
    write_request_rate: u64,
    write_series_per_request: u64,
    read_series_per_request: u64,
    metric_names: Vec<String>,
}

impl SeriesSpace {
    /// Create the series space.  The total is `write_request_rate * write_series_per_request`, so
    /// it always divides into whole batches.
    pub fn new(
        write_request_rate: u64,
        write_series_per_request: u64,
        read_series_per_request: u64,
        metric_names: Vec<String>,
    ) -> Result<Self, Error> {
        if write_request_rate == 0 {
            return Err(Error::InvalidRequest(
                "write request rate must be at least 1".to_string(),
            ));
        }
        if write_series_per_request == 0 {
            return Err(Error::InvalidRequest(
                "write series per request must be at least 1".to_string(),
            ));
        }
        if read_series_per_request == 0 {
            return Err(Error::InvalidRequest(
                "read series per request must be at least 1".to_string(),
            ));
        }
        if metric_names.is_empty() {
            return Err(Error::InvalidRequest(
                "at least one metric name is required".to_string(),
            ));
        }
        if metric_names.iter().any(|name| name.trim().is_empty()) {
            return Err(Error::InvalidRequest(format!(
                "metric names must not be blank: {metric_names:?}"
            )));
        }
        if write_request_rate
            .checked_mul(write_series_per_request)
            .is_none()
        {
            return Err(Error::InvalidRequest(format!(
                "{write_request_rate} requests of {write_series_per_request} series overflows"
            )));
        }
        Ok(Self {
            write_request_rate,
            write_series_per_request,
            read_series_per_request,
            metric_names,
        })
    }

    /// The series space a load configuration describes.
    pub fn from_config(config: &LoadConfig) -> Result<Self, Error> {
        Self::new(
            config.write_request_rate,
            config.write_series_per_request,
            config.read_series_per_request,
            config.metric_names.clone(),
        )
    }

    pub fn total_series(&self) -> u64 {
        self.write_request_rate * self.write_series_per_request
    }

    pub fn write_series_per_request(&self) -> u64 {
        self.write_series_per_request
    }

    pub fn read_series_per_request(&self) -> u64 {
        self.read_series_per_request
    }

    /// Number of write batches it takes to cover every series once.
    pub fn batches_per_cycle(&self) -> u64 {
        self.total_series() / self.write_series_per_request
    }

    pub fn metric_names(&self) -> &[String] {
        &self.metric_names
    }

    /// The batch slot a series id belongs to.  Ids past the end wrap.
    pub fn slot_of(&self, series_id: u64) -> u64 {
        (series_id / self.write_series_per_request) % self.batches_per_cycle()
    }

    /// Metric names are assigned per slot so that a series id always carries the same name.
    pub fn metric_name_for_slot(&self, slot: u64) -> &str {
        let index = (slot % self.metric_names.len() as u64) as usize;
        &self.metric_names[index]
    }

    /// The label template shared by every series of a slot.  Replica labels are added by the
    /// batch builder.
    pub fn label_template(&self, slot: u64) -> LabelTemplate {
        LabelTemplate::new()
            .with(METRIC_NAME_LABEL, self.metric_name_for_slot(slot))
            .with(HOST_LABEL, format!("host${{series_id%{HOST_CARDINALITY}}}"))
            .with(SERIES_ID_LABEL, "${series_id}")
    }

    /// The labels of one series.
    pub fn label_binding(&self, series_id: u64) -> LabelBinding {
        self.label_template(self.slot_of(series_id))
            .expand(series_id)
    }
}

////////////////////////////////////////////// tests ///////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> SeriesSpace {
        SeriesSpace::new(10, 1000, 100, vec![DEFAULT_METRIC_NAME.to_string()]).unwrap()
    }

    #[test]
    fn totals() {
        let space = space();
        assert_eq!(10_000, space.total_series());
        assert_eq!(10, space.batches_per_cycle());
        assert_eq!(100, space.read_series_per_request());
    }

    #[test]
    fn rejects_degenerate_spaces() {
        assert!(SeriesSpace::new(0, 1000, 100, vec!["m".to_string()]).is_err());
        assert!(SeriesSpace::new(1, 0, 100, vec!["m".to_string()]).is_err());
        assert!(SeriesSpace::new(1, 1000, 0, vec!["m".to_string()]).is_err());
        assert!(SeriesSpace::new(1, 1000, 100, vec![]).is_err());
        assert!(SeriesSpace::new(1, 1000, 100, vec!["".to_string(), "cpu".to_string()]).is_err());
        assert!(SeriesSpace::new(u64::MAX, 2, 100, vec!["m".to_string()]).is_err());
    }

    #[test]
    fn label_binding_of_series() {
        let binding = space().label_binding(7_501);
        assert_eq!(Some("load_generated_metric"), binding.get("__name__").map(String::as_str));
        assert_eq!(Some("host1"), binding.get("host").map(String::as_str));
        assert_eq!(Some("7501"), binding.get("series_id").map(String::as_str));
        assert_eq!(3, binding.len());
    }

    #[test]
    fn label_binding_is_pure() {
        let space = space();
        for id in [0, 1, 2499, 2500, 9_999, 10_000, 1 << 40] {
            assert_eq!(space.label_binding(id), space.label_binding(id));
        }
    }

    #[test]
    fn hosts_collide() {
        let space = space();
        assert_eq!(
            space.label_binding(42).get("host"),
            space.label_binding(42 + HOST_CARDINALITY).get("host")
        );
        assert_ne!(
            space.label_binding(42).get("series_id"),
            space.label_binding(42 + HOST_CARDINALITY).get("series_id")
        );
    }

    #[test]
    fn metric_names_follow_slots() {
        let space = SeriesSpace::new(
            4,
            10,
            10,
            vec!["cpu".to_string(), "mem".to_string(), "disk".to_string()],
        )
        .unwrap();
        assert_eq!("cpu", space.label_binding(0)["__name__"]);
        assert_eq!("cpu", space.label_binding(9)["__name__"]);
        assert_eq!("mem", space.label_binding(10)["__name__"]);
        assert_eq!("disk", space.label_binding(25)["__name__"]);
        assert_eq!("cpu", space.label_binding(35)["__name__"]);
        // Past the end the slot wraps back to the start.
        assert_eq!("cpu", space.label_binding(40)["__name__"]);
    }

    #[test]
    fn placeholder_expansion() {
        assert_eq!("12", expand_value("${series_id}", 12));
        assert_eq!("host2", expand_value("host${series_id%10}", 12));
        assert_eq!("x1y", expand_value("x${series_id/10}y", 12));
        assert_eq!("a${other}b", expand_value("a${other}b", 12));
        assert_eq!("${series_id%0}", expand_value("${series_id%0}", 12));
        assert_eq!("open${series_id", expand_value("open${series_id", 12));
        assert_eq!("12-12", expand_value("${series_id}-${series_id}", 12));
        assert_eq!("plain", expand_value("plain", 12));
    }
}
