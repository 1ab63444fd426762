//! Drishti console - headless client for the drishti traffic inspector
//!
//! Usage:
//!   drishti watch               Follow the live connection stream
//!   drishti watch -s URL        Use a specific backend
//!   drishti watch -f port=8080  Start with a filter active

use anyhow::Result;
use clap::{Parser, Subcommand};
use drishti_console::filters::{default_filters, to_query_string};
use drishti_console::notify::NoticeLog;
use drishti_console::{
    Config, CursorPaginationWindow, Event, EventBus, FilterStateStore, HttpBackend,
    LiveUpdateCoordinator, MemoryLocation, Metric, TimeSeriesWindower, Topic,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "drishti")]
#[command(author = "Drishti Team")]
#[command(version)]
#[command(about = "Headless console for the drishti traffic inspector", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the live connection stream and log state changes
    Watch {
        /// Backend URL (overrides the config file)
        #[arg(short, long, env = "DRISHTI_SERVER")]
        server: Option<String>,

        /// Chart metric to follow
        #[arg(short, long, default_value = "connections_per_service")]
        metric: String,

        /// Initial filter as name=value, repeatable
        #[arg(short, long = "filter")]
        filters: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},drishti_console=info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    drishti_console::config::ensure_dirs()?;

    match cli.command {
        Commands::Watch {
            server,
            metric,
            filters,
        } => watch(server, metric, filters).await?,
    }

    Ok(())
}

async fn watch(server: Option<String>, metric: String, filters: Vec<String>) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(server) = server {
        config.server_url = server;
    }
    let metric = Metric::parse(&metric)
        .ok_or_else(|| anyhow::anyhow!("unknown metric: {}", metric))?;

    let bus = Arc::new(EventBus::new());
    let backend = HttpBackend::new(&config.server_url);

    let location = Arc::new(MemoryLocation::from_pairs(parse_filters(&filters)?));
    let store = Arc::new(FilterStateStore::new(
        default_filters(),
        location.clone(),
        bus.clone(),
    ));
    store.init_from_external();

    let window = Arc::new(CursorPaginationWindow::new(backend.clone(), bus.clone()));
    let windower = Arc::new(TimeSeriesWindower::new(backend, bus.clone()));
    let notices = NoticeLog::new();

    // Bus callbacks are synchronous; forward events into the async loop
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    for topic in [
        Topic::ConnectionsFilters,
        Topic::ConnectionUpdates,
        Topic::TimelineUpdates,
        Topic::Notifications,
    ] {
        let tx = tx.clone();
        bus.register(topic, move |event| {
            let _ = tx.send(event.clone());
        });
    }

    windower.set_filters(store.query_params()).await;
    if metric == Metric::default() {
        windower.load().await;
    } else {
        windower.set_metric(metric).await;
    }
    window.set_filters(store.query_params()).await;

    let live = LiveUpdateCoordinator::new(bus.clone(), config.websocket_url());
    let mut status = live.status();
    live.start();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let status = *status.borrow();
            tracing::info!(status = status.as_str(), "live capture status");
        }
    });

    tracing::info!(server = %config.server_url, "console running, press Ctrl+C to stop");

    loop {
        let event = tokio::select! {
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        };

        match event {
            Event::FiltersChanged(update) => {
                for (name, value) in &update {
                    tracing::info!(filter = %name, value = ?value, "filter changed");
                }
                let params = store.query_params();
                tracing::info!(query = %to_query_string(&params), "active query");
                window.set_filters(params.clone()).await;
                windower.set_filters(params).await;
            }
            Event::ConnectionUpdates(range) => {
                windower.fit_to(range);
                tracing::info!(
                    rows = window.len(),
                    from = %range.from,
                    to = %range.to,
                    "connection window updated"
                );
            }
            Event::TimelineUpdates(range) => {
                window.apply_timeline_range(range).await;
            }
            Event::Notification(frame) => {
                if let Some(notice) = notices.handle(&frame) {
                    println!(
                        "[{}] {}: {}",
                        notice.severity.as_str(),
                        notice.title,
                        notice.description
                    );
                }
                window.handle_notification(&frame).await;
                windower.handle_notification(&frame).await;
            }
            Event::PulseTimeline(pulse) => windower.pulse(pulse.duration),
            Event::PulseConnectionsView(pulse) => window.pulse(pulse.duration),
        }
    }

    Ok(())
}

fn parse_filters(pairs: &[String]) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .ok_or_else(|| anyhow::anyhow!("invalid filter (expected name=value): {}", pair))
        })
        .collect()
}
