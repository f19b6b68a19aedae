//! Run a load test against a Prometheus-compatible backend.

use std::sync::Arc;

use clap::Parser;

use tsdb_load::config::{LoadConfig, DEFAULT_CONFIG_PATH};
use tsdb_load::provision::Plan;
use tsdb_load::thresholds::{evaluate, sla_thresholds};
use tsdb_load::write::NopRemoteWrite;

/// Exit status when the run completes but a threshold fails.
const THRESHOLDS_FAILED: i32 = 99;

#[derive(Parser, Debug)]
struct Args {
    /// YAML file layered under the TSDB_LOAD_* environment.
    #[arg(long)]
    config: Option<String>,
    /// Print the provisioning plan and exit.
    #[arg(long)]
    plan: bool,
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let path = args
        .config
        .or_else(|| std::env::var("CONFIG_PATH").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = match LoadConfig::load_from_path(&path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };
    if args.plan {
        match Plan::from_config(&config) {
            Ok(plan) => println!("{plan}"),
            Err(err) => {
                eprintln!("{err}");
                std::process::exit(1);
            }
        }
        return;
    }
    tsdb_load::init_tracing(&config);
    let seed = args
        .seed
        .unwrap_or_else(|| chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64);
    let summary = match tsdb_load::entrypoint(&config, Arc::new(NopRemoteWrite), seed).await {
        Ok(summary) => summary,
        Err(err) => {
            tracing::error!("load test failed: {err}");
            eprintln!("{err}");
            std::process::exit(1);
        }
    };
    let results = evaluate(&sla_thresholds(), &summary);
    println!(
        "run {} finished after {:.0}s{}",
        summary.run_id,
        summary.elapsed_secs,
        if summary.interrupted {
            " (interrupted)"
        } else {
            ""
        }
    );
    if summary.dry_run {
        println!(
            "dry run: nothing was sent to {}; write thresholds are skipped",
            config.write_url()
        );
    }
    for result in results.iter() {
        tracing::info!(passed = result.passed, "threshold {result}");
        println!("{result}");
    }
    if results.iter().any(|r| !r.passed) {
        std::process::exit(THRESHOLDS_FAILED);
    }
}
