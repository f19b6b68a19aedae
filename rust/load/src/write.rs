//! The write path: turning an iteration into a concrete remote-write batch.

use chrono::{DateTime, Utc};

use crate::ha::HaIteration;
use crate::series::{LabelTemplate, SeriesSpace, REPLICA_LABEL};
use crate::Error;

/////////////////////////////////////////////// Clock //////////////////////////////////////////////

/// A source of wall-clock time.  Injected so batches and queries can be built at a fixed instant.
pub trait Clock: std::fmt::Debug + Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock stopped at one instant.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

//////////////////////////////////////////// WriteBatch ////////////////////////////////////////////

/// A description of one remote-write request.
///
/// The batch carries the half-open id range `[min_series_id, max_series_id)` rather than the
/// series themselves; the remote-write client materializes one sample per id by expanding the
/// label template.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct WriteBatch {
    /// Sample timestamp in milliseconds since the epoch.
    pub time_ms: i64,
    /// Sample value.  Seconds since the epoch, which grows like a counter and compresses like one.
    pub sample_value: f64,
    pub min_series_id: u64,
    pub max_series_id: u64,
    pub label_template: LabelTemplate,
    pub replica_tag: String,
}

impl WriteBatch {
    /// Lower bound of the sample values.  Every series receives the same value.
    pub fn value_min(&self) -> f64 {
        self.sample_value
    }

    /// Upper bound of the sample values.
    pub fn value_max(&self) -> f64 {
        self.sample_value
    }

    pub fn series_count(&self) -> u64 {
        self.max_series_id - self.min_series_id
    }
}

///////////////////////////////////////// WriteBatchBuilder ////////////////////////////////////////

/// Maps iterations onto batches that cyclically tile the series space.
#[derive(Clone, Debug)]
pub struct WriteBatchBuilder {
    space: SeriesSpace,
}

impl WriteBatchBuilder {
    pub fn new(space: SeriesSpace) -> Self {
        Self { space }
    }

    pub fn space(&self) -> &SeriesSpace {
        &self.space
    }

    /// Build the batch for one (logical iteration, replica) at the given instant.
    pub fn build(&self, iteration: HaIteration, now: DateTime<Utc>) -> WriteBatch {
        let per_request = self.space.write_series_per_request();
        let slot = iteration.logical % self.space.batches_per_cycle();
        let min_series_id = slot * per_request;
        let replica_tag = iteration.replica_tag();
        let label_template = self
            .space
            .label_template(slot)
            .with(REPLICA_LABEL, replica_tag.clone());
        WriteBatch {
            time_ms: now.timestamp_millis(),
            sample_value: now.timestamp() as f64,
            min_series_id,
            max_series_id: min_series_id + per_request,
            label_template,
            replica_tag,
        }
    }
}

//////////////////////////////////////////// RemoteWrite ///////////////////////////////////////////

/// What a remote-write endpoint answered.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WriteResponse {
    pub status: u16,
    pub body: String,
}

impl WriteResponse {
    /// Classify the response.  200 and 202 are the only successes.
    pub fn check(self) -> Result<(), Error> {
        match self.status {
            200 | 202 => Ok(()),
            status => Err(Error::WriteFailed {
                status,
                body: self.body,
            }),
        }
    }
}

/// A remote-write client.  Encoding the batch onto the wire is the implementor's business.
#[async_trait::async_trait]
pub trait RemoteWrite: std::fmt::Debug + Send + Sync {
    async fn store(&self, batch: &WriteBatch) -> Result<WriteResponse, Error>;

    /// True when batches never leave the process, so write outcomes say nothing about a backend.
    fn is_dry_run(&self) -> bool {
        false
    }
}

////////////////////////////////////////// NopRemoteWrite //////////////////////////////////////////

/// A remote-write client that sends nothing and always answers 200.  Useful to exercise the
/// scheduler and read path without an ingestion endpoint.
#[derive(Debug, Default)]
pub struct NopRemoteWrite;

#[async_trait::async_trait]
impl RemoteWrite for NopRemoteWrite {
    async fn store(&self, batch: &WriteBatch) -> Result<WriteResponse, Error> {
        tracing::debug!(
            min_series_id = batch.min_series_id,
            max_series_id = batch.max_series_id,
            replica = %batch.replica_tag,
            time_ms = batch.time_ms,
            "nop store"
        );
        Ok(WriteResponse {
            status: 200,
            body: String::new(),
        })
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::num::NonZeroU64;

    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;
    use crate::series::DEFAULT_METRIC_NAME;

    fn builder(rate: u64, per_request: u64) -> WriteBatchBuilder {
        WriteBatchBuilder::new(
            SeriesSpace::new(rate, per_request, 100, vec![DEFAULT_METRIC_NAME.to_string()])
                .unwrap(),
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_123).unwrap()
    }

    #[test]
    fn single_batch_with_two_replicas() {
        let builder = builder(1, 1000);
        let two = NonZeroU64::new(2).unwrap();
        let expected = [(0, "replica_0"), (0, "replica_1"), (1, "replica_0")];
        for (raw, (logical, tag)) in expected.into_iter().enumerate() {
            let ha = HaIteration::resolve(raw as u64, two);
            assert_eq!(logical, ha.logical);
            let batch = builder.build(ha, now());
            assert_eq!(0, batch.min_series_id);
            assert_eq!(1000, batch.max_series_id);
            assert_eq!(tag, batch.replica_tag);
            assert_eq!(Some(tag), batch.label_template.get(REPLICA_LABEL));
        }
    }

    #[test]
    fn time_and_value_come_from_now() {
        let batch = builder(3, 10).build(
            HaIteration {
                logical: 4,
                replica: 0,
            },
            now(),
        );
        assert_eq!(1_700_000_000_123, batch.time_ms);
        assert_eq!(1_700_000_000.0, batch.sample_value);
        assert_eq!(batch.value_min(), batch.value_max());
        assert_eq!(10, batch.min_series_id);
        assert_eq!(20, batch.max_series_id);
        assert_eq!(10, batch.series_count());
        assert_eq!(Some("${series_id}"), batch.label_template.get("series_id"));
    }

    #[test]
    fn classification() {
        for status in [200, 202] {
            assert!(WriteResponse {
                status,
                body: String::new()
            }
            .check()
            .is_ok());
        }
        for status in [201, 204, 400, 429, 500, 503] {
            let err = WriteResponse {
                status,
                body: "nope".to_string(),
            }
            .check()
            .unwrap_err();
            assert!(matches!(err, Error::WriteFailed { status: s, .. } if s == status));
        }
    }

    #[tokio::test]
    async fn nop_store_succeeds() {
        let batch = builder(1, 5).build(
            HaIteration {
                logical: 0,
                replica: 0,
            },
            now(),
        );
        let resp = NopRemoteWrite.store(&batch).await.unwrap();
        assert!(resp.check().is_ok());
        assert!(NopRemoteWrite.is_dry_run());
    }

    proptest! {
        #[test]
        fn batches_tile_the_space(rate in 1u64..40, per_request in 1u64..200, start in 0u64..10_000) {
            let builder = builder(rate, per_request);
            let cycle = builder.space().batches_per_cycle();
            let mut seen = BTreeSet::new();
            let mut covered = 0;
            for logical in start..start + cycle {
                let ha = HaIteration { logical, replica: 0 };
                let batch = builder.build(ha, now());
                prop_assert!(seen.insert(batch.min_series_id));
                covered += batch.series_count();
                let again = builder.build(HaIteration { logical: logical + cycle, replica: 0 }, now());
                prop_assert_eq!(batch.min_series_id, again.min_series_id);
                prop_assert_eq!(batch.max_series_id, again.max_series_id);
            }
            prop_assert_eq!(builder.space().total_series(), covered);
            let mut expected_min = 0;
            for min in seen {
                prop_assert_eq!(expected_min, min);
                expected_min += per_request;
            }
        }
    }
}
