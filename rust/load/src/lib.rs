//! tsdb-load is a synthetic load generator for Prometheus-compatible time-series backends.
//!
//! It runs two scenarios side by side.  The write scenario sends remote-write batches that
//! cyclically tile a fixed space of synthetic series, optionally duplicated across simulated HA
//! replicas.  The read scenario issues randomized PromQL instant queries over a bounded subset of
//! the same series and checks that the answers have the expected shape.
//!
//! The pieces that decide *what* is sent are pure and deterministic given their inputs:
//!
//! - [series::SeriesSpace] names the series and their labels.
//! - [ha::HaIteration] splits a raw iteration into a batch and a replica.
//! - [write::WriteBatchBuilder] turns an iteration and an instant into a [write::WriteBatch].
//! - [query::QueryGenerator] turns an entropy stream into a query string.
//! - [provision] sizes the worker pools from the target rates.
//!
//! The [driver::LoadDriver] decides *when*: it owns the iteration counters and the clock, and
//! hands both to the pure pieces as plain values.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{MatchedPath, Request, State};
use axum::http::header::{HeaderMap, ACCEPT};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod driver;
pub mod ha;
pub mod opentelemetry_config;
pub mod provision;
pub mod query;
pub mod read;
pub mod rest;
pub mod series;
pub mod thresholds;
pub mod write;

use driver::{LoadDriver, RunSummary, Scenario};

/////////////////////////////////////////////// Error //////////////////////////////////////////////

/// Errors that can occur in the load generator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),
    /// A value handed to the library was invalid.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The remote-write endpoint answered with something other than 200 or 202.
    #[error("write failed with status {status}: {}", body.trim())]
    WriteFailed { status: u16, body: String },
    /// The query endpoint answered with something other than 200.
    #[error("read failed with status {status}: {}", body.trim())]
    ReadFailed { status: u16, body: String },
    /// The query endpoint answered 200 with a body of the wrong shape.
    #[error("unexpected query response: {0}")]
    UnexpectedResponse(String),
    /// The request never got an answer.
    #[error("transport error: {0}")]
    Transport(String),
    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::http::Response<axum::body::Body> {
        let status = match self {
            Error::Config(_) | Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string() + "\n").into_response()
    }
}

////////////////////////////////////////////// Metrics /////////////////////////////////////////////

#[derive(Debug)]
pub struct Metrics {
    /// The number of remote-write requests issued, successful or not.
    write_requests: Counter<u64>,
    /// The number of queries issued, successful or not.
    read_requests: Counter<u64>,
    /// Check outcomes, tagged with the scenario type and pass/fail.
    checks: Counter<u64>,
    /// Arrivals that found every worker of their scenario busy.
    dropped_iterations: Counter<u64>,
    write_latency: Histogram<f64>,
    read_latency: Histogram<f64>,
}

impl Metrics {
    pub fn new() -> Self {
        let meter = global::meter("tsdb-load");
        Self {
            write_requests: meter.u64_counter("write_requests").build(),
            read_requests: meter.u64_counter("read_requests").build(),
            checks: meter.u64_counter("checks").build(),
            dropped_iterations: meter.u64_counter("dropped_iterations").build(),
            write_latency: meter.f64_histogram("write_latency_ms").build(),
            read_latency: meter.f64_histogram("read_latency_ms").build(),
        }
    }

    pub(crate) fn record_check(&self, scenario: Scenario, passed: bool, latency: Option<Duration>) {
        let (requests, histogram) = match scenario {
            Scenario::Write => (&self.write_requests, &self.write_latency),
            Scenario::Read => (&self.read_requests, &self.read_latency),
        };
        requests.add(1, &[]);
        self.checks.add(
            1,
            &[
                KeyValue::new("type", scenario.name()),
                KeyValue::new("result", if passed { "pass" } else { "fail" }),
            ],
        );
        if let Some(latency) = latency {
            histogram.record(latency.as_secs_f64() * 1e3, &[]);
        }
    }

    pub(crate) fn record_dropped(&self, scenario: Scenario) {
        self.dropped_iterations
            .add(1, &[KeyValue::new("scenario", scenario.name())]);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

//////////////////////////////////////////// entrypoint ////////////////////////////////////////////

#[derive(Clone, Debug)]
struct AppState {
    driver: Arc<LoadDriver>,
}

async fn readme(headers: HeaderMap, State(state): State<AppState>) -> impl IntoResponse {
    let wants_json = headers
        .get(ACCEPT)
        .and_then(|x| x.to_str().ok())
        .map(|x| x.contains("application/json"))
        .unwrap_or(false);
    if wants_json {
        Json(state.driver.status()).into_response()
    } else {
        state.driver.status().to_string().into_response()
    }
}

/// The status router for a driver.
pub fn status_router(driver: Arc<LoadDriver>) -> Router {
    Router::new()
        .route("/", get(readme))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let matched_path = request
                    .extensions()
                    .get::<MatchedPath>()
                    .map(MatchedPath::as_str);
                tracing::info_span!(
                    "http_request",
                    method = ?request.method(),
                    matched_path,
                )
            }),
        )
        .with_state(AppState { driver })
}

/// Run one load test to completion (or Ctrl-C) and return its summary.
///
/// Tracing must already be initialized; see [init_tracing].
pub async fn entrypoint(
    config: &config::LoadConfig,
    write_client: Arc<dyn write::RemoteWrite>,
    seed: u64,
) -> Result<RunSummary, Error> {
    let query_client = Arc::new(read::HttpQueryClient::new(
        read::QueryClientOptions::from_config(config),
    )?);
    let driver = Arc::new(LoadDriver::new(
        config,
        Arc::clone(&write_client),
        query_client,
        Arc::new(write::SystemClock),
        seed,
    )?);
    tracing::info!(
        run_id = %driver.run_id(),
        write_url = %config.write_url(),
        read_url = %config.read_base_url(),
        scrape_interval_seconds = config.scrape_interval_seconds,
        "configured load"
    );
    if write_client.is_dry_run() {
        tracing::warn!(
            write_url = %config.write_url(),
            write_token_set = !config.write_token.is_empty(),
            "dry run: write requests are not sent and write thresholds are not evaluated"
        );
    }
    let server = match config.status_port {
        Some(port) => {
            let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
                .await
                .map_err(|err| Error::Config(format!("cannot bind status port {port}: {err}")))?;
            let app = status_router(Arc::clone(&driver));
            Some(tokio::task::spawn(async move {
                if let Err(err) = axum::serve(listener, app).await {
                    tracing::error!("status server failed: {err:?}");
                }
            }))
        }
        None => None,
    };
    let runner = {
        let driver = Arc::clone(&driver);
        tokio::task::spawn(async move { driver.run().await })
    };
    let stopper = {
        let driver = Arc::clone(&driver);
        tokio::task::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted; waiting for in-flight iterations");
                driver.stop();
            }
        })
    };
    let summary = runner
        .await
        .map_err(|err| Error::Internal(format!("load driver failed: {err:?}")))?;
    stopper.abort();
    if let Some(server) = server {
        server.abort();
    }
    Ok(summary)
}

/// Initialize logging and, when configured, OTLP export.
pub fn init_tracing(config: &config::LoadConfig) {
    opentelemetry_config::init_otel_tracing(&config.service_name, config.otel_endpoint.as_deref());
}
