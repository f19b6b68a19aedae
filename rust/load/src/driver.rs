//! The load driver: arrival-rate scheduling of the write and read paths.
//!
//! Each scenario runs a loop that draws Poisson inter-arrival gaps for the rate its [Schedule]
//! dictates at that instant.  Every arrival takes the next value of the scenario's iteration
//! counter and is handed to a worker from a fixed-size pool.  When the pool is exhausted the
//! arrival is dropped rather than queued, so a slow backend shows up as dropped iterations instead
//! of a silently lower request rate.
//!
//! The iteration counter lives in the scheduling loop.  Workers receive it by value; nothing the
//! workers run mutates shared state other than the check tallies.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use guacamole::combinators::*;
use guacamole::Guacamole;
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::LoadConfig;
use crate::ha::HaIteration;
use crate::provision::Plan;
use crate::query::{Entropy, QueryGenerator};
use crate::read::{QueryClient, QueryResponse};
use crate::rest::Status;
use crate::series::SeriesSpace;
use crate::write::{Clock, RemoteWrite, WriteBatchBuilder, WriteResponse};
use crate::{Error, Metrics};

/// Longest the scheduler sleeps before looking at the schedule again.  Arrivals are memoryless, so
/// abandoning a long gap and drawing a fresh one does not bias the rate.
const MAX_IDLE: Duration = Duration::from_secs(1);
/// Significant figures kept by the latency histograms.
const LATENCY_SIGFIG: u8 = 3;

/////////////////////////////////////////////// Stage //////////////////////////////////////////////

/// Move linearly from the previous stage's target to `target` over `duration_secs`.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Stage {
    pub duration_secs: u64,
    /// Requests per second at the end of the stage.
    pub target: f64,
}

///////////////////////////////////////////// Schedule /////////////////////////////////////////////

/// A piecewise-linear request rate over time, starting from zero.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Schedule {
    pub stages: Vec<Stage>,
}

impl Schedule {
    /// Hold `target` for `duration`.
    pub fn constant(target: f64, duration: Duration) -> Self {
        Self {
            stages: vec![
                Stage {
                    duration_secs: 0,
                    target,
                },
                Stage {
                    duration_secs: duration.as_secs(),
                    target,
                },
            ],
        }
    }

    /// Ramp up to `target`, hold it, then ramp back down to zero.  Durations are in minutes.
    pub fn ramping(target: f64, ramp_up_min: u64, hold_min: u64, ramp_down_min: u64) -> Self {
        Self {
            stages: vec![
                Stage {
                    duration_secs: ramp_up_min.saturating_mul(60),
                    target,
                },
                Stage {
                    duration_secs: hold_min.saturating_mul(60),
                    target,
                },
                Stage {
                    duration_secs: ramp_down_min.saturating_mul(60),
                    target: 0.0,
                },
            ],
        }
    }

    pub fn total_duration(&self) -> Duration {
        Duration::from_secs(self.stages.iter().map(|s| s.duration_secs).sum())
    }

    /// The target rate `elapsed` into the schedule, or `None` once the schedule is over.
    pub fn rate_at(&self, elapsed: Duration) -> Option<f64> {
        let mut remaining = elapsed.as_secs_f64();
        let mut from = 0.0;
        for stage in self.stages.iter() {
            let duration = stage.duration_secs as f64;
            if remaining < duration {
                return Some(from + (stage.target - from) * remaining / duration);
            }
            remaining -= duration;
            from = stage.target;
        }
        None
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let stages = self
            .stages
            .iter()
            .filter(|s| s.duration_secs > 0)
            .map(|s| format!("to {}/s over {}s", s.target, s.duration_secs))
            .collect::<Vec<_>>();
        write!(f, "{}", stages.join(", "))
    }
}

///////////////////////////////////////////// Scenario /////////////////////////////////////////////

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum Scenario {
    #[serde(rename = "write")]
    Write,
    #[serde(rename = "read")]
    Read,
}

impl Scenario {
    pub fn name(&self) -> &'static str {
        match self {
            Scenario::Write => "write",
            Scenario::Read => "read",
        }
    }
}

////////////////////////////////////////////// Checks //////////////////////////////////////////////

/// Outcome tallies of one scenario.  Latencies are kept in microseconds.
struct Checks {
    iterations: AtomicU64,
    dropped: AtomicU64,
    passed: AtomicU64,
    failed: AtomicU64,
    latencies_us: Mutex<Histogram<u64>>,
}

impl Checks {
    fn new() -> Result<Self, Error> {
        let latencies_us = Histogram::new(LATENCY_SIGFIG)
            .map_err(|err| Error::Internal(format!("could not build latency histogram: {err:?}")))?;
        Ok(Self {
            iterations: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            passed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            latencies_us: Mutex::new(latencies_us),
        })
    }

    fn record(&self, passed: bool, latency: Option<Duration>) {
        if passed {
            self.passed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(latency) = latency {
            let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
            if let Err(err) = self.latencies_us.lock().record(micros) {
                tracing::warn!("could not record latency of {micros}us: {err:?}");
            }
        }
    }

    fn summary(&self) -> ScenarioSummary {
        let (latency_avg_ms, latency_p999_ms) = {
            let latencies = self.latencies_us.lock();
            if latencies.len() == 0 {
                (None, None)
            } else {
                (
                    Some(latencies.mean() / 1e3),
                    Some(latencies.value_at_quantile(0.999) as f64 / 1e3),
                )
            }
        };
        ScenarioSummary {
            iterations: self.iterations.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            passed: self.passed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            latency_avg_ms,
            latency_p999_ms,
        }
    }
}

/// Outcome of one scenario.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ScenarioSummary {
    /// Arrivals handed to a worker.
    pub iterations: u64,
    /// Arrivals that found no free worker.
    pub dropped: u64,
    pub passed: u64,
    pub failed: u64,
    pub latency_avg_ms: Option<f64>,
    pub latency_p999_ms: Option<f64>,
}

impl ScenarioSummary {
    /// Fraction of checks that passed, if any ran.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.passed + self.failed;
        if total == 0 {
            None
        } else {
            Some(self.passed as f64 / total as f64)
        }
    }
}

//////////////////////////////////////////// RunSummary ////////////////////////////////////////////

#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    /// True when the run was stopped before its schedule ended.
    pub interrupted: bool,
    /// True when the write client sent nothing, so write outcomes are not evidence of anything.
    #[serde(default)]
    pub dry_run: bool,
    pub write: ScenarioSummary,
    pub read: ScenarioSummary,
}

//////////////////////////////////////////// LoadDriver ////////////////////////////////////////////

/// Drives both scenarios against a write client and a query client.
pub struct LoadDriver {
    run_id: Uuid,
    plan: Plan,
    ha_replicas: NonZeroU64,
    builder: WriteBatchBuilder,
    generator: QueryGenerator,
    write_client: Arc<dyn RemoteWrite>,
    query_client: Arc<dyn QueryClient>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    write_checks: Checks,
    read_checks: Checks,
    seed: u64,
    done: AtomicBool,
    finished: AtomicBool,
    started: Mutex<Option<(Instant, DateTime<Utc>)>>,
}

impl std::fmt::Debug for LoadDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("LoadDriver")
            .field("run_id", &self.run_id)
            .field("plan", &self.plan)
            .field("write_client", &self.write_client)
            .field("query_client", &self.query_client)
            .finish_non_exhaustive()
    }
}

impl LoadDriver {
    pub fn new(
        config: &LoadConfig,
        write_client: Arc<dyn RemoteWrite>,
        query_client: Arc<dyn QueryClient>,
        clock: Arc<dyn Clock>,
        seed: u64,
    ) -> Result<Self, Error> {
        config.validate()?;
        let space = SeriesSpace::from_config(config)?;
        let plan = Plan::for_space(config, &space);
        let ha_replicas = NonZeroU64::new(config.ha_replicas)
            .ok_or_else(|| Error::Config("ha_replicas must be at least 1".to_string()))?;
        Ok(Self {
            run_id: Uuid::new_v4(),
            plan,
            ha_replicas,
            generator: QueryGenerator::new(&space),
            builder: WriteBatchBuilder::new(space),
            write_client,
            query_client,
            clock,
            metrics: Metrics::new(),
            write_checks: Checks::new()?,
            read_checks: Checks::new()?,
            seed,
            done: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            started: Mutex::new(None),
        })
    }

    /// Replace the planned schedules.
    pub fn with_schedules(mut self, write: Schedule, read: Schedule) -> Self {
        self.plan.write_schedule = write;
        self.plan.read_schedule = read;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Ask the scheduling loops to stop.  In-flight iterations still complete.
    pub fn stop(&self) {
        self.done.store(true, Ordering::Relaxed);
    }

    /// One write iteration: pick the replica and batch, store it, check the answer.
    pub async fn write_once(&self, iteration: u64) -> Result<(), Error> {
        let ha = HaIteration::resolve(iteration, self.ha_replicas);
        let batch = self.builder.build(ha, self.clock.now());
        let start = Instant::now();
        let res = self
            .write_client
            .store(&batch)
            .await
            .and_then(WriteResponse::check);
        self.record(Scenario::Write, res.is_ok(), Some(start.elapsed()));
        if let Err(err) = &res {
            tracing::warn!(
                iteration,
                min_series_id = batch.min_series_id,
                replica = %batch.replica_tag,
                "write failed: {err}"
            );
        }
        res
    }

    /// One read iteration: generate a query, issue it, check the answer.
    pub async fn read_once<E: Entropy + Send>(&self, entropy: &mut E) -> Result<(), Error> {
        let query = self.generator.generate(entropy);
        let time = self.clock.now().timestamp();
        let start = Instant::now();
        let res = self
            .query_client
            .query(&query, time)
            .await
            .and_then(QueryResponse::check);
        self.record(Scenario::Read, res.is_ok(), Some(start.elapsed()));
        if let Err(err) = &res {
            tracing::warn!(query = %query, "read failed: {err}");
        }
        res
    }

    fn checks(&self, scenario: Scenario) -> &Checks {
        match scenario {
            Scenario::Write => &self.write_checks,
            Scenario::Read => &self.read_checks,
        }
    }

    fn record(&self, scenario: Scenario, passed: bool, latency: Option<Duration>) {
        self.checks(scenario).record(passed, latency);
        self.metrics.record_check(scenario, passed, latency);
    }

    /// Run both scenarios to the end of their schedules (or until [LoadDriver::stop]).
    pub async fn run(self: &Arc<Self>) -> RunSummary {
        *self.started.lock() = Some((Instant::now(), self.clock.now()));
        let mut guac = Guacamole::new(self.seed);
        let write_seed = any::<u64>(&mut guac);
        let read_seed = any::<u64>(&mut guac);
        tracing::info!(run_id = %self.run_id, "starting load\n{}", self.plan);
        tokio::join!(
            self.run_scenario(
                Scenario::Write,
                self.plan.write_schedule.clone(),
                self.plan.write_workers,
                write_seed,
            )
            .instrument(tracing::info_span!("scenario", name = "write")),
            self.run_scenario(
                Scenario::Read,
                self.plan.read_schedule.clone(),
                self.plan.read_workers,
                read_seed,
            )
            .instrument(tracing::info_span!("scenario", name = "read")),
        );
        self.finished.store(true, Ordering::Relaxed);
        let summary = self.summary();
        tracing::info!(
            run_id = %self.run_id,
            write_passed = summary.write.passed,
            write_failed = summary.write.failed,
            read_passed = summary.read.passed,
            read_failed = summary.read.failed,
            "load finished"
        );
        summary
    }

    async fn run_scenario(
        self: &Arc<Self>,
        scenario: Scenario,
        schedule: Schedule,
        workers: u64,
        seed: u64,
    ) {
        let mut guac = Guacamole::new(seed);
        let pool = Arc::new(Semaphore::new(workers as usize));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let this = Arc::clone(self);
        let reaper = tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                let task: tokio::task::JoinHandle<Result<(), Error>> = task;
                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        tracing::debug!("{} iteration failed: {err}", scenario.name());
                    }
                    Err(err) => {
                        tracing::error!("{} iteration panicked: {err:?}", scenario.name());
                        this.record(scenario, false, None);
                    }
                }
            }
        });
        let checks = self.checks(scenario);
        let start = Instant::now();
        let mut next_op = start;
        let mut iteration = 0u64;
        while !self.done.load(Ordering::Relaxed) {
            let Some(rate) = schedule.rate_at(next_op - start) else {
                break;
            };
            let gap = if rate > 0.0 {
                interarrival_duration(rate)(&mut guac)
            } else {
                Duration::MAX
            };
            let fire = gap <= MAX_IDLE;
            next_op += gap.min(MAX_IDLE);
            let now = Instant::now();
            if next_op > now {
                tokio::time::sleep(next_op - now).await;
            }
            if !fire {
                continue;
            }
            if self.done.load(Ordering::Relaxed) || schedule.rate_at(next_op - start).is_none() {
                break;
            }
            let Ok(permit) = Arc::clone(&pool).try_acquire_owned() else {
                checks.dropped.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_dropped(scenario);
                tracing::debug!("no free {} worker; dropping iteration", scenario.name());
                continue;
            };
            checks.iterations.fetch_add(1, Ordering::Relaxed);
            let this = Arc::clone(self);
            let task = match scenario {
                Scenario::Write => {
                    let current = iteration;
                    iteration += 1;
                    tokio::spawn(async move {
                        let _permit = permit;
                        this.write_once(current).await
                    })
                }
                Scenario::Read => {
                    let mut entropy = Guacamole::new(any::<u64>(&mut guac));
                    tokio::spawn(async move {
                        let _permit = permit;
                        this.read_once(&mut entropy).await
                    })
                }
            };
            // NOTE:  The reaper only goes away when tx is dropped, so this cannot fail.
            if let Err(err) = tx.send(task) {
                tracing::error!("failed to send task to reaper: {err:?}");
            }
        }
        drop(tx);
        if let Err(err) = reaper.await {
            tracing::error!("{} reaper failed: {err:?}", scenario.name());
        }
    }

    /// Tallies so far.
    pub fn summary(&self) -> RunSummary {
        let (elapsed_secs, started_at) = match *self.started.lock() {
            Some((start, started_at)) => (start.elapsed().as_secs_f64(), started_at),
            None => (0.0, self.clock.now()),
        };
        RunSummary {
            run_id: self.run_id,
            started_at,
            elapsed_secs,
            interrupted: self.done.load(Ordering::Relaxed),
            dry_run: self.write_client.is_dry_run(),
            write: self.write_checks.summary(),
            read: self.read_checks.summary(),
        }
    }

    /// The live status document.
    pub fn status(&self) -> Status {
        let summary = self.summary();
        Status {
            run_id: self.run_id,
            plan: self.plan.clone(),
            finished: self.finished.load(Ordering::Relaxed),
            dry_run: summary.dry_run,
            elapsed_secs: summary.elapsed_secs,
            write: summary.write,
            read: summary.read,
        }
    }
}
