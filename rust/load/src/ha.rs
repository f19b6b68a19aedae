//! High-availability replica fan-out.
//!
//! An HA pair (or triple, ...) of scraping agents sends the same samples once per replica.  The
//! scheduler hands out one raw iteration per request, so with N replicas every logical batch is
//! seen N times in a row, each time under a different replica tag, before the next batch starts.

use std::num::NonZeroU64;

/// A raw iteration split into the batch it selects and the replica sending it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct HaIteration {
    /// Selects the data batch.
    pub logical: u64,
    /// Index of the simulated replica in `[0, ha_replicas)`.
    pub replica: u64,
}

impl HaIteration {
    pub fn resolve(raw_iteration: u64, ha_replicas: NonZeroU64) -> Self {
        Self {
            logical: raw_iteration / ha_replicas.get(),
            replica: raw_iteration % ha_replicas.get(),
        }
    }

    /// The value of the replica label.
    pub fn replica_tag(&self) -> String {
        format!("replica_{}", self.replica)
    }
}
