mod api_util;
mod duration;
mod routes;

use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand};
use panwatch::{
    config::DEFAULT_API_BASE,
    search::{ResultType, SearchClient, SearchRequest, SourceType},
    ApiConfig, FileStore, HttpProber, MonitorHandle, StatusSnapshot, SystemClock,
};
use routes::AppState;
use serde::Serialize;
use std::{future::Future, io, path::PathBuf, sync::Arc, time::Duration};
use tokio::time::{interval_at, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ApiConfig::new(&cli.api_base).with_timeout(cli.timeout);

    match cli.command {
        Command::Status => print_json(&open_monitor(cli.data_dir, &config)?.status().await),
        Command::Check => print_json(&open_monitor(cli.data_dir, &config)?.check_now().await),
        Command::Clear => {
            open_monitor(cli.data_dir, &config)?.clear_history().await;
            println!("Status history cleared");
            Ok(())
        }
        Command::Watch { interval } => {
            let monitor = open_monitor(cli.data_dir, &config)?;
            watch(&monitor, interval).await
        }
        Command::Serve { address, interval } => {
            let monitor = open_monitor(cli.data_dir, &config)?;
            let search = SearchClient::new(&config).context("Couldn't create HTTP client")?;
            serve(AppState { monitor, search }, &address, interval).await
        }
        Command::Search {
            keyword,
            res,
            src,
            plugins,
            refresh,
        } => {
            let request = SearchRequest {
                refresh: refresh.then_some(true),
                res,
                src,
                plugins,
                ..SearchRequest::new(keyword)
            };
            let client = SearchClient::new(&config).context("Couldn't create HTTP client")?;
            print_json(&client.search_get(&request).await?)
        }
    }
}

fn open_monitor(data_dir: Option<PathBuf>, config: &ApiConfig) -> Result<MonitorHandle> {
    let store = data_dir.map_or_else(FileStore::default_location, |dir| FileStore::new(dir));
    info!("Status history at {}", store.slot_path().display());
    let prober = HttpProber::new(config).context("Couldn't create HTTP client")?;
    info!("Probing {}", prober.url());
    Ok(MonitorHandle::new(
        Arc::new(prober),
        Arc::new(store),
        Arc::new(SystemClock),
    ))
}

async fn watch(monitor: &MonitorHandle, interval: Duration) -> Result<()> {
    ensure!(!interval.is_zero(), "Interval must be greater than zero");
    monitor.start_monitoring(interval).await;
    // Report just after each probe is due so the newest result is usually in.
    let mut reports = interval_at(
        Instant::now() + interval + Duration::from_millis(500),
        interval,
    );
    loop {
        tokio::select! {
            _ = reports.tick() => log_status(&monitor.status().await),
            signal = tokio::signal::ctrl_c() => {
                signal.context("Couldn't listen for Ctrl-C")?;
                break;
            }
        }
    }
    monitor.stop_monitoring().await;
    Ok(())
}

async fn serve(state: AppState, address: &str, interval: Duration) -> Result<()> {
    ensure!(!interval.is_zero(), "Interval must be greater than zero");
    state.monitor.start_monitoring(interval).await;
    let app = routes::router(state.clone());

    info!("Binding to {}", address);
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .with_context(|| format!("Couldn't bind {address}"))?;
    info!("Starting status server");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_on(tokio::signal::ctrl_c()))
        .await
        .context("Status server failed")?;
    state.monitor.stop_monitoring().await;
    Ok(())
}

/// Resolves once `signal` fires. A listener that fails to install resolves at once.
async fn shutdown_on(signal: impl Future<Output = io::Result<()>>) {
    match signal.await {
        Ok(()) => info!("Shutting down"),
        Err(e) => warn!("Couldn't listen for Ctrl-C, shutting down: {e}"),
    }
}

fn log_status(snapshot: &StatusSnapshot) {
    let current = &snapshot.current_status;
    if current.is_healthy {
        info!(
            "API online, {}ms, uptime {:.2}% over {} checks",
            current.response_time_ms,
            snapshot.uptime_rounded(),
            snapshot.history.len()
        );
    } else {
        warn!(
            "API offline: {}, uptime {:.2}% over {} checks",
            current.error.as_deref().unwrap_or("unknown error"),
            snapshot.uptime_rounded(),
            snapshot.history.len()
        );
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Base URL of the monitored API
    #[arg(long, env = "PANWATCH_API_BASE", default_value = DEFAULT_API_BASE)]
    api_base: String,

    /// Directory holding the status history
    #[arg(long, env = "PANWATCH_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Request timeout, e.g. "30s" or "500ms"
    #[arg(long, default_value = "30s", value_parser = duration::parse_duration)]
    timeout: Duration,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the current status, history and uptime
    Status,
    /// Probe the API once and record the result
    Check,
    /// Forget all recorded checks
    Clear,
    /// Probe periodically and log the status until interrupted
    Watch {
        /// Time between probes
        #[arg(short, long, default_value = "30s", value_parser = duration::parse_duration)]
        interval: Duration,
    },
    /// Probe periodically and serve the status over HTTP
    Serve {
        /// Listening address
        #[arg(short, long, default_value = "0.0.0.0:8080")]
        address: String,

        /// Time between probes
        #[arg(short, long, default_value = "30s", value_parser = duration::parse_duration)]
        interval: Duration,
    },
    /// Search the API for share links
    Search {
        keyword: String,

        /// Result shape: all, results or merge
        #[arg(long)]
        res: Option<ResultType>,

        /// Source: all, tg or plugin
        #[arg(long)]
        src: Option<SourceType>,

        /// Plugins to query, comma separated
        #[arg(long, value_delimiter = ',')]
        plugins: Option<Vec<String>>,

        /// Bypass the API's cache
        #[arg(long)]
        refresh: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_signal_listener_still_shuts_down() {
        shutdown_on(std::future::ready(Err(io::Error::other("no signal driver")))).await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_the_signal() {
        let pending = shutdown_on(std::future::pending::<io::Result<()>>());
        assert!(tokio::time::timeout(Duration::from_secs(60), pending)
            .await
            .is_err());
    }
}
