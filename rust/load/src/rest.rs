use uuid::Uuid;

use crate::driver::ScenarioSummary;
use crate::provision::Plan;

/// The status of a tsdb-load run.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Status {
    /// The UUID of the run.
    pub run_id: Uuid,
    /// The capacity plan the run follows.
    pub plan: Plan,
    /// Whether both scenarios have run to completion.
    pub finished: bool,
    /// Whether writes are discarded instead of sent.
    #[serde(default)]
    pub dry_run: bool,
    /// Seconds since the run started.
    pub elapsed_secs: f64,
    /// Tallies of the write scenario.
    pub write: ScenarioSummary,
    /// Tallies of the read scenario.
    pub read: ScenarioSummary,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "tsdb-load run {}", self.run_id)?;
        writeln!(f, "=========================================================")?;
        writeln!(f)?;
        writeln!(f, "{}", self.plan)?;
        writeln!(f)?;
        if self.finished {
            writeln!(f, "Finished after {:.0}s.", self.elapsed_secs)?;
        } else {
            writeln!(f, "Running for {:.0}s.", self.elapsed_secs)?;
        }
        if self.dry_run {
            writeln!(f, "Dry run: write requests are not sent.")?;
        }
        for (name, summary) in [("write", &self.write), ("read", &self.read)] {
            writeln!(
                f,
                "{name}: {} iterations, {} dropped, {} passed, {} failed",
                summary.iterations, summary.dropped, summary.passed, summary.failed
            )?;
        }
        Ok(())
    }
}
