//! Autoscaler daemon and CLI, grounded on `paradigm-contributor/src/main.rs`'s
//! CLI + logging + main-loop shape.

mod config;
mod health;

use anyhow::{anyhow, Result};
use autoscaler_core::control::{Clock, HttpStreamControl, RealClock, StreamControl};
use autoscaler_core::controller::{AdapterFactory, Controller};
use autoscaler_core::decision::Direction;
use autoscaler_core::engine::DecisionEngine;
use autoscaler_core::math::{new_shard_count, Amount};
use autoscaler_core::metrics::HttpMetricSource;
use autoscaler_core::planner::ResizePlanner;
use autoscaler_core::policy::ScalingPolicy;
use autoscaler_core::topology::Topology;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "autoscaler")]
#[command(about = "Shard/partition autoscaler for a streaming service")]
struct Args {
    /// file:// / http(s):// / s3:// location of the scaling policy config
    #[arg(long)]
    config_file_url: String,

    /// Base URL of the metric source API
    #[arg(long, default_value = "http://127.0.0.1:9000")]
    metrics_url: String,

    /// Base URL of the stream control plane API
    #[arg(long, default_value = "http://127.0.0.1:9001")]
    control_url: String,

    /// Don't fail /health when an engine has aborted with a fatal error
    #[arg(long)]
    suppress_abort_on_fatal: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Shared manual-mode overrides documented in spec.md §6: `count | pct`
/// override the config-derived amount, `min-shards`/`max-shards` override
/// the configured bounds, and `wait-for-completion` controls whether each
/// split/merge waits for the stream to return to ACTIVE before the next.
#[derive(clap::Args)]
struct ScaleArgs {
    stream: String,
    #[arg(long, conflicts_with = "pct")]
    count: Option<i64>,
    #[arg(long)]
    pct: Option<i64>,
    #[arg(long)]
    min_shards: Option<i64>,
    #[arg(long)]
    max_shards: Option<i64>,
    /// Split this specific shard instead of running the full resize plan.
    #[arg(long)]
    shard_id: Option<String>,
    #[arg(long)]
    wait_for_completion: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon: start one decision engine per configured stream
    /// and serve the health endpoint.
    Run {
        #[arg(long, default_value_t = 8099)]
        port: u16,
    },
    /// Force an immediate scale-up of a stream.
    ScaleUp {
        #[command(flatten)]
        args: ScaleArgs,
    },
    /// Force an immediate scale-down of a stream.
    ScaleDown {
        #[command(flatten)]
        args: ScaleArgs,
    },
    /// Resize a stream to an explicit target shard count.
    Resize {
        stream: String,
        target: i64,
        #[arg(long)]
        min_shards: Option<i64>,
        #[arg(long)]
        max_shards: Option<i64>,
        #[arg(long)]
        wait_for_completion: bool,
    },
    /// Run one decision-engine iteration and print its report.
    Report { stream: String },
}

struct HttpAdapterFactory {
    metrics_url: String,
    control_url: String,
    clock: Arc<dyn Clock>,
}

impl AdapterFactory for HttpAdapterFactory {
    type Metrics = HttpMetricSource;
    type Control = HttpStreamControl;

    fn metric_source(&self, _policy: &ScalingPolicy) -> Arc<Self::Metrics> {
        Arc::new(HttpMetricSource::new(self.metrics_url.clone()))
    }

    fn stream_control(&self, _policy: &ScalingPolicy) -> Arc<Self::Control> {
        Arc::new(HttpStreamControl::new(self.control_url.clone(), self.clock.clone()))
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn find_policy(policies: &[ScalingPolicy], stream: &str) -> Result<ScalingPolicy> {
    policies
        .iter()
        .find(|p| p.stream_name == stream)
        .cloned()
        .ok_or_else(|| anyhow!("no scaling policy configured for stream {stream}"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "operation failed");
            ExitCode::from(2)
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let policies = config::load(&args.config_file_url).await?;
    info!(streams = policies.len(), "loaded scaling policy configuration");

    let clock: Arc<dyn Clock> = Arc::new(RealClock);
    let control = Arc::new(HttpStreamControl::new(args.control_url.clone(), clock.clone()));
    let metrics = Arc::new(HttpMetricSource::new(args.metrics_url.clone()));

    match args.command {
        Command::Run { port } => run_daemon(policies, args.metrics_url, args.control_url, args.suppress_abort_on_fatal, port, clock).await,
        Command::ScaleUp { args } => {
            let policy = find_policy(&policies, &args.stream)?;
            manual_scale(policy, metrics, control, Direction::Up, args).await
        }
        Command::ScaleDown { args } => {
            let policy = find_policy(&policies, &args.stream)?;
            manual_scale(policy, metrics, control, Direction::Down, args).await
        }
        Command::Resize {
            stream,
            target,
            min_shards,
            max_shards,
            wait_for_completion,
        } => {
            let policy = find_policy(&policies, &stream)?;
            let min = min_shards.unwrap_or(policy.min_shards);
            let max = max_shards.unwrap_or(policy.max_shards);
            manual_resize_to(&policy, control, target, min, max, wait_for_completion).await
        }
        Command::Report { stream } => {
            let policy = find_policy(&policies, &stream)?;
            manual_report(policy, metrics, control).await
        }
    }
}

async fn run_daemon(
    policies: Vec<ScalingPolicy>,
    metrics_url: String,
    control_url: String,
    suppress_abort_on_fatal: bool,
    port: u16,
    clock: Arc<dyn Clock>,
) -> Result<()> {
    let mut controller = Controller::new(suppress_abort_on_fatal);
    let status = controller.status_handle();
    let factory = HttpAdapterFactory {
        metrics_url,
        control_url,
        clock,
    };
    controller.spawn(policies, factory).await;

    let health_state = health::HealthState {
        statuses: status,
        suppress_abort_on_fatal,
    };
    let app = health::router(health_state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "health endpoint listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    controller.shutdown().await;
    Ok(())
}

async fn manual_scale(
    policy: ScalingPolicy,
    metrics: Arc<HttpMetricSource>,
    control: Arc<HttpStreamControl>,
    direction: Direction,
    args: ScaleArgs,
) -> Result<()> {
    let _ = metrics;

    if let Some(shard_id) = &args.shard_id {
        return manual_split(&policy, control, shard_id, args.wait_for_completion).await;
    }

    let description = control.describe(&policy.stream_name).await?;
    let current = description.open_shard_count as i64;
    let amount: Amount = if let Some(count) = args.count {
        Amount::Count(count)
    } else if let Some(pct) = args.pct {
        Amount::Pct(pct)
    } else {
        let spec = match direction {
            Direction::Up => &policy.up,
            Direction::Down => &policy.down,
        };
        spec.amount()?
    };
    let min = args.min_shards.unwrap_or(policy.min_shards);
    let max = args.max_shards.unwrap_or(policy.max_shards);
    let target = new_shard_count(current, amount, direction, Some(min), Some(max));
    manual_resize_to(&policy, control, target, min, max, args.wait_for_completion).await
}

/// `--shard-id` manual-mode override: split one named shard directly
/// instead of running the full resize plan.
async fn manual_split(
    policy: &ScalingPolicy,
    control: Arc<HttpStreamControl>,
    shard_id: &str,
    wait_for_completion: bool,
) -> Result<()> {
    let shards = control.list_open_shards(&policy.stream_name).await?;
    let target_shard = shards
        .iter()
        .find(|s| s.id == shard_id)
        .ok_or_else(|| anyhow!("shard {shard_id} is not an open shard of {}", policy.stream_name))?;
    let split_hash = target_shard.start + target_shard.width() / 2;
    let (left, right) = control
        .split(&policy.stream_name, shard_id, split_hash, wait_for_completion)
        .await?;
    info!(stream = %policy.stream_name, shard_id, left = %left.id, right = %right.id, "manual split complete");
    Ok(())
}

async fn manual_resize_to(
    policy: &ScalingPolicy,
    control: Arc<HttpStreamControl>,
    target: i64,
    min_shards: i64,
    max_shards: i64,
    wait_for_completion: bool,
) -> Result<()> {
    let shards = control.list_open_shards(&policy.stream_name).await?;
    let hash_space_max = shards.iter().map(|s| s.end).max().unwrap_or(0);
    let topology = Topology::from_raw(shards, hash_space_max);
    let planner = ResizePlanner::new(control.as_ref());
    let outcome = planner
        .resize(&policy.stream_name, topology, target, min_shards, max_shards, wait_for_completion)
        .await?;
    info!(stream = %policy.stream_name, ?outcome, "manual resize complete");
    Ok(())
}

async fn manual_report(
    policy: ScalingPolicy,
    metrics: Arc<HttpMetricSource>,
    control: Arc<HttpStreamControl>,
) -> Result<()> {
    let mut engine = DecisionEngine::new(policy, metrics, control).await?;
    let report = engine.run_iteration(chrono::Utc::now()).await?;
    match report {
        Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
        None => println!("no action required"),
    }
    Ok(())
}
