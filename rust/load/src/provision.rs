//! Rate-to-capacity arithmetic.
//!
//! The constants are empirical: one write worker keeps up with roughly 8500 series per request
//! rate, and a query takes up to five worker-seconds under load.

use crate::config::LoadConfig;
use crate::driver::Schedule;
use crate::series::SeriesSpace;
use crate::Error;

/// Series one write worker sustains.
pub const SERIES_PER_WRITE_WORKER: u64 = 8500;
/// Workers provisioned per query per second.
pub const READ_WORKERS_PER_QPS: u64 = 5;

/// Write workers needed for the given number of series.
pub fn write_worker_pool_size(total_series: u64) -> u64 {
    total_series.div_ceil(SERIES_PER_WRITE_WORKER)
}

/// Read workers needed for the given query rate.
pub fn read_worker_pool_size(read_request_rate: u64) -> u64 {
    read_request_rate * READ_WORKERS_PER_QPS
}

/// Effective write request rate once every HA replica sends its copy.
pub fn write_target_rate(write_request_rate: u64, ha_replicas: u64) -> u64 {
    write_request_rate * ha_replicas
}

/////////////////////////////////////////////// Plan ///////////////////////////////////////////////

/// Everything the scheduler needs to know about capacity, derived from the configuration.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Plan {
    pub total_series: u64,
    pub batches_per_cycle: u64,
    pub ha_replicas: u64,
    pub write_target_rate: u64,
    pub read_target_rate: u64,
    pub write_workers: u64,
    pub read_workers: u64,
    pub write_schedule: Schedule,
    pub read_schedule: Schedule,
}

impl Plan {
    /// Validate the configuration and plan for its series space.
    pub fn from_config(config: &LoadConfig) -> Result<Self, Error> {
        config.validate()?;
        let space = SeriesSpace::from_config(config)?;
        Ok(Self::for_space(config, &space))
    }

    /// Plan for a series space built from `config`.  The configuration must have passed
    /// [LoadConfig::validate].
    pub fn for_space(config: &LoadConfig, space: &SeriesSpace) -> Self {
        let total_series = space.total_series();
        let write_target_rate = write_target_rate(config.write_request_rate, config.ha_replicas);
        let read_target_rate = config.read_request_rate;
        Self {
            total_series,
            batches_per_cycle: space.batches_per_cycle(),
            ha_replicas: config.ha_replicas,
            write_target_rate,
            read_target_rate,
            write_workers: write_worker_pool_size(total_series).max(1),
            read_workers: read_worker_pool_size(read_target_rate).max(1),
            write_schedule: Schedule::ramping(
                write_target_rate as f64,
                config.ramp_up_min,
                config.hold_min(),
                config.ramp_down_min,
            ),
            read_schedule: Schedule::ramping(
                read_target_rate as f64,
                config.ramp_up_min,
                config.hold_min(),
                config.ramp_down_min,
            ),
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "total series:      {}", self.total_series)?;
        writeln!(f, "batches per cycle: {}", self.batches_per_cycle)?;
        writeln!(f, "HA replicas:       {}", self.ha_replicas)?;
        writeln!(
            f,
            "write:             {} req/s with {} workers; {}",
            self.write_target_rate, self.write_workers, self.write_schedule
        )?;
        write!(
            f,
            "read:              {} req/s with {} workers; {}",
            self.read_target_rate, self.read_workers, self.read_schedule
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_workers() {
        assert_eq!(0, write_worker_pool_size(0));
        assert_eq!(1, write_worker_pool_size(1));
        assert_eq!(1, write_worker_pool_size(8500));
        assert_eq!(2, write_worker_pool_size(8501));
        assert_eq!(118, write_worker_pool_size(1_000_000));
    }

    #[test]
    fn read_workers() {
        assert_eq!(50, read_worker_pool_size(10));
        assert_eq!(5, read_worker_pool_size(1));
    }

    #[test]
    fn ha_fan_out() {
        assert_eq!(10, write_target_rate(10, 1));
        assert_eq!(30, write_target_rate(10, 3));
    }

    #[test]
    fn plan() {
        let config: LoadConfig = serde_json::from_value(serde_json::json!({
            "write_hostname": "w",
            "read_hostname": "r",
            "write_request_rate": 10,
            "write_series_per_request": 1000,
            "read_request_rate": 4,
            "ha_replicas": 2,
            "duration_min": 60,
            "ramp_up_min": 10,
            "ramp_down_min": 5,
        }))
        .unwrap();
        let plan = Plan::from_config(&config).unwrap();
        assert_eq!(10_000, plan.total_series);
        assert_eq!(10, plan.batches_per_cycle);
        assert_eq!(20, plan.write_target_rate);
        assert_eq!(2, plan.write_workers);
        assert_eq!(20, plan.read_workers);
        assert_eq!(3600, plan.write_schedule.total_duration().as_secs());
        assert_eq!(Some(20.0), plan.write_schedule.rate_at(std::time::Duration::from_secs(600)));
        assert_eq!(Some(4.0), plan.read_schedule.rate_at(std::time::Duration::from_secs(1200)));
    }

    #[test]
    fn overflowing_fan_out_is_an_error() {
        let config: LoadConfig = serde_json::from_value(serde_json::json!({
            "write_hostname": "w",
            "read_hostname": "r",
            "write_request_rate": 4_000_000_000u64,
            "write_series_per_request": 1,
            "ha_replicas": 8_000_000_000u64,
        }))
        .unwrap();
        assert!(matches!(Plan::from_config(&config), Err(Error::Config(_))));
    }
}
