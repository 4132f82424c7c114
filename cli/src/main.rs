//! feedgen: keyword feed generator for Bluesky.
//!
//! Usage:
//! ```bash
//! FEEDGEN_PUBLISHER_DID=did:plc:… feedgen serve
//! feedgen cursor show
//! feedgen cursor set 1725911162329308
//! feedgen cursor reset
//! feedgen evict
//! ```
//!
//! All settings come from environment variables; see `config.rs`.

mod config;
mod http;
mod storage;
mod telemetry;

use std::env;
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use feedgen_core::checkpoint::{Checkpoint, CheckpointStore};
use feedgen_core::feed::FeedService;
use feedgen_core::retention::RetentionSweeper;
use feedgen_core::rules::FeedRegistry;
use feedgen_core::store::PostStore;
use feedgen_jetstream::{SubscriberBuilder, SubscriberConfig};

use crate::config::Config;
use crate::http::AppState;
use crate::storage::Storage;
use crate::telemetry::{init_tracing, LogConfig};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("serve");

    let result = match command {
        "serve" => with_config(cmd_serve).await,
        "cursor" => match args.get(2).map(String::as_str) {
            Some("show") => with_config(cmd_cursor_show).await,
            Some("reset") => with_config(cmd_cursor_reset).await,
            Some("set") => match args.get(3) {
                Some(raw) => {
                    let raw = raw.clone();
                    with_config(|config| cmd_cursor_set(config, raw)).await
                }
                None => Err(anyhow::anyhow!("cursor set needs a position")),
            },
            _ => {
                print_usage();
                process::exit(1);
            }
        },
        "evict" => with_config(cmd_evict).await,
        "version" | "--version" | "-V" => {
            println!("feedgen {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("feedgen {}", env!("CARGO_PKG_VERSION"));
    println!("Keyword feed generator for Bluesky, fed by Jetstream\n");
    println!("USAGE:");
    println!("    feedgen [COMMAND]\n");
    println!("COMMANDS:");
    println!("    serve                 Ingest Jetstream and serve feeds (default)");
    println!("    cursor show           Print the stored stream checkpoint");
    println!("    cursor set <POSITION> Overwrite the checkpoint (may move it backward)");
    println!("    cursor reset          Delete the checkpoint; next start is at the live edge");
    println!("    evict                 Run one retention pass now");
    println!("    version               Print version");
    println!("    help                  Print this help\n");
    println!("ENVIRONMENT:");
    println!("    FEEDGEN_PUBLISHER_DID  DID that published the feed (required for serve)");
    println!("    DATABASE_URL           sqlite:./feedgen.db | postgres://… | memory");
    println!("    PORT, FEEDGEN_HOSTNAME, FEEDGEN_FIREHOSE_URL, FEEDGEN_FEED_NAME,");
    println!("    FEEDGEN_FEEDS_PATH, FEEDGEN_RETENTION_MAX_AGE_HOURS, FEEDGEN_RETENTION_MAX_ROWS,");
    println!("    FEEDGEN_RETENTION_INTERVAL_SECS, FEEDGEN_RECONNECT_DELAY_SECS,");
    println!("    FEEDGEN_CHECKPOINT_INTERVAL_SECS, FEEDGEN_LOG_JSON, RUST_LOG");
}

/// Load config, start logging, then run `cmd`.
async fn with_config<F, Fut>(cmd: F) -> anyhow::Result<()>
where
    F: FnOnce(Config) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let config = Config::from_env()?;
    init_tracing(&LogConfig {
        json: config.log_json,
        ..LogConfig::default()
    });
    cmd(config).await
}

fn stream_id() -> String {
    SubscriberConfig::default().stream_id
}

// ─── serve ───────────────────────────────────────────────────────────────────

async fn cmd_serve(config: Config) -> anyhow::Result<()> {
    let publisher = config.require_publisher_did()?;
    let registry = Arc::new(FeedRegistry::new(&config.feeds()?)?);
    info!(publisher, feeds = ?registry.feed_ids(), "feeds loaded");

    let storage = Storage::open(&config.backend).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    let cancel = CancellationToken::new();

    let mut subscriber = SubscriberBuilder::new()
        .firehose_url(&config.firehose_url)
        .registry(registry.clone())
        .posts(storage.posts.clone())
        .checkpoints(storage.checkpoints.clone())
        .reconnect_delay(config.reconnect_delay)
        .checkpoint_interval(config.checkpoint_interval)
        .build()?;
    let subscriber_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { subscriber.run(cancel).await }
    });

    let sweeper = RetentionSweeper::new(
        storage.posts.clone(),
        config.retention,
        config.retention_interval,
    );
    let sweeper_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { sweeper.run(cancel).await }
    });

    tokio::spawn(shutdown_signal(cancel.clone()));

    let app = http::router(AppState {
        feeds: FeedService::new(registry, storage.posts.clone()),
        service_did: config.service_did(),
        hostname: config.hostname.clone(),
    });
    info!(%addr, firehose = %config.firehose_url, "starting HTTP server");

    let shutdown = cancel.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await;

    // The server may also stop on its own error; take the workers down with it.
    cancel.cancel();
    let stats = subscriber_task.await.context("subscriber task panicked")?;
    let passes = sweeper_task.await.context("sweeper task panicked")?;
    info!(
        events = stats.events_received,
        matched = stats.posts_matched,
        sweeps = passes,
        "shutdown complete"
    );

    served.context("HTTP server failed")
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
        _ = cancel.cancelled() => return,
    }
    cancel.cancel();
}

// ─── cursor ──────────────────────────────────────────────────────────────────

async fn cmd_cursor_show(config: Config) -> anyhow::Result<()> {
    let storage = Storage::open(&config.backend).await?;
    let stream = stream_id();

    match storage.checkpoints.load(&stream).await? {
        Some(cp) => {
            let event_time = i64::try_from(cp.position / 1_000)
                .ok()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
            let saved_at = Utc.timestamp_opt(cp.updated_at, 0).single();
            println!("stream:     {}", cp.stream_id);
            println!("position:   {}", cp.position);
            if let Some(t) = event_time {
                println!("event time: {}", t.to_rfc3339());
            }
            if let Some(t) = saved_at {
                println!("saved at:   {}", t.to_rfc3339());
            }
        }
        None => println!("no checkpoint for '{stream}'; the next start reads from the live edge"),
    }
    Ok(())
}

async fn cmd_cursor_set(config: Config, raw: String) -> anyhow::Result<()> {
    let position: u64 = match raw.trim().parse() {
        Ok(p) if p > 0 => p,
        _ => bail!("position must be a positive integer (Jetstream time_us), got '{raw}'"),
    };

    let storage = Storage::open(&config.backend).await?;
    let checkpoint = Checkpoint::new(stream_id(), position);
    storage.checkpoints.force_set(&checkpoint).await?;
    info!(position, "checkpoint overridden by operator");
    println!("checkpoint '{}' set to {position}", checkpoint.stream_id);
    Ok(())
}

async fn cmd_cursor_reset(config: Config) -> anyhow::Result<()> {
    let storage = Storage::open(&config.backend).await?;
    let stream = stream_id();
    storage.checkpoints.delete(&stream).await?;
    info!(stream = %stream, "checkpoint deleted by operator");
    println!("checkpoint '{stream}' deleted");
    Ok(())
}

// ─── evict ───────────────────────────────────────────────────────────────────

async fn cmd_evict(config: Config) -> anyhow::Result<()> {
    let storage = Storage::open(&config.backend).await?;
    let sweeper = RetentionSweeper::new(
        storage.posts.clone(),
        config.retention,
        config.retention_interval,
    );
    let deleted = sweeper.run_once().await?;
    let remaining = storage.posts.count().await?;
    println!("evicted {deleted} posts; {remaining} remain");
    Ok(())
}
