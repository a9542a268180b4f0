//! Courier delivery pipeline.
//!
//! Reads newline-delimited JSON submissions from stdin, prints each
//! submission outcome, and streams status updates for every accepted job as
//! JSON lines on stdout. Logs go to stderr.
//!
//! ```text
//! {"id":"welcome-1","recipient":"ada@example.com","subject":"Hi","body":"Welcome","priority":"high"}
//! ```
//!
//! On end of input the process waits until the queue has drained. Ctrl+C or
//! SIGTERM shut it down immediately.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use courier_core::{JobId, JobSpec, RealClock, StatusUpdate, SubmitOutcome};
use courier_service::{Config, DispatchService};
use serde::Serialize;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    task::JoinSet,
};
use tracing::{info, warn};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
const WATCHER_GRACE_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Serialize)]
struct OutcomeLine<'a> {
    id: &'a JobId,
    outcome: SubmitOutcome,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log)?;

    info!(
        processing_interval_ms = config.processing_interval_ms,
        max_concurrent = config.max_concurrent,
        max_retries = config.max_retries,
        backends = config.backends.len(),
        "Configuration loaded"
    );

    let service = Arc::new(DispatchService::from_config(&config, Arc::new(RealClock)));
    let mut watchers = JoinSet::new();

    let drained = tokio::select! {
        result = read_submissions(&service, &mut watchers) => {
            result?;
            info!("Input closed, waiting for queue to drain");
            tokio::select! {
                () = wait_for_drain(&service) => {
                    info!("Queue drained");
                    true
                },
                () = shutdown_signal() => {
                    info!("Shutdown signal received while draining");
                    false
                },
            }
        }
        () = shutdown_signal() => {
            info!("Shutdown signal received");
            false
        }
    };

    service.shutdown().await;

    if drained {
        let flush = async { while watchers.join_next().await.is_some() {} };
        if tokio::time::timeout(WATCHER_GRACE_PERIOD, flush).await.is_err() {
            warn!("Status watchers still running after grace period");
        }
    }
    watchers.abort_all();

    for stats in service.circuit_stats() {
        info!(
            backend = %stats.name,
            state = %stats.state,
            failures = stats.failure_count,
            successes = stats.success_count,
            "Final circuit state"
        );
    }

    info!("Courier shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing(default_filter: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{default_filter},courier=debug")))
        .context("Invalid RUST_LOG filter")?;

    let fmt_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

/// Submits every stdin line and spawns a status watcher per accepted job.
async fn read_submissions(
    service: &Arc<DispatchService>,
    watchers: &mut JoinSet<()>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let spec: JobSpec = match serde_json::from_str(line) {
            Ok(spec) => spec,
            Err(e) => {
                warn!(error = %e, "Skipping malformed submission");
                continue;
            },
        };

        let id = spec.id.clone();
        let outcome = match service.submit(spec).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(job_id = %id, error = %e, "Submission failed");
                continue;
            },
        };
        print_line(&OutcomeLine { id: &id, outcome })?;

        if outcome == SubmitOutcome::Queued {
            let subscription = service.subscribe(id).await?;
            watchers.spawn(watch_status(subscription));
        }
    }

    Ok(())
}

async fn watch_status(mut subscription: courier_service::StatusSubscription) {
    while let Some(update) = subscription.next().await {
        let terminal = update.status.is_terminal();
        if let Err(e) = print_line::<StatusUpdate>(&update) {
            warn!(error = %e, "Failed to print status update");
        }
        if terminal {
            break;
        }
    }
}

async fn wait_for_drain(service: &DispatchService) {
    let mut poll = tokio::time::interval(DRAIN_POLL_INTERVAL);
    loop {
        poll.tick().await;
        if service.is_drained() {
            return;
        }
    }
}

fn print_line<T: Serialize>(value: &T) -> Result<()> {
    let line = serde_json::to_string(value).context("Failed to serialize output")?;
    println!("{line}");
    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        () = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
