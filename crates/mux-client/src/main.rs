//! h2mux stress driver
//!
//! Fires many concurrent exchanges through a pool of loopback sessions,
//! optionally closing the pool while they are in flight, and checks that
//! every dispatched exchange was resolved exactly once.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::Parser;
use http::Request;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mux_client::session::{echo_responder, LoopbackFactory};
use mux_client::{ConnectionPool, Exchange};
use mux_core::config::{self, ClientConfig};
use mux_core::{ExchangeError, PoolError};

#[derive(Parser)]
#[command(name = "mux-stress")]
#[command(about = "Drive concurrent exchanges through multiplexed loopback connections")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of exchanges (overrides config)
    #[arg(short, long)]
    exchanges: Option<usize>,

    /// Maximum number of connections (overrides config)
    #[arg(long)]
    connections: Option<usize>,

    /// Close the pool after this many exchanges were dispatched
    #[arg(long)]
    close_after: Option<usize>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// How a single exchange ended
enum Outcome {
    Completed,
    Aborted,
    TimedOut,
    Failed(ExchangeError),
    Rejected(PoolError),
}

#[derive(Default)]
struct Summary {
    completed: usize,
    aborted: usize,
    timed_out: usize,
    failed: usize,
    rejected: usize,
}

impl Summary {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Completed => self.completed += 1,
            Outcome::Aborted => self.aborted += 1,
            Outcome::TimedOut => self.timed_out += 1,
            Outcome::Failed(_) => self.failed += 1,
            Outcome::Rejected(_) => self.rejected += 1,
        }
    }

    fn total(&self) -> usize {
        self.completed + self.aborted + self.timed_out + self.failed + self.rejected
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let mut config: ClientConfig = match &args.config {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => config::load_config_or_default(&config::default_config_path())
            .context("Failed to load default config")?,
    };

    if let Some(exchanges) = args.exchanges {
        config.stress.exchanges = exchanges;
    }
    if let Some(connections) = args.connections {
        config.pool.max_connections = connections;
    }
    if args.close_after.is_some() {
        config.stress.close_after = args.close_after;
    }
    config.validate()?;

    tracing::info!(
        "Driving {} exchanges over at most {} connections",
        config.stress.exchanges,
        config.pool.max_connections
    );

    let factory = Arc::new(LoopbackFactory::new(
        config.pool.max_concurrent_streams,
        config.stress.response_delay,
        echo_responder(),
    ));
    let pool = ConnectionPool::new(config.pool.clone(), factory);

    let started = Instant::now();
    let dispatched = Arc::new(AtomicUsize::new(0));
    let mut tasks = Vec::with_capacity(config.stress.exchanges);

    for index in 0..config.stress.exchanges {
        let pool = Arc::clone(&pool);
        let dispatched = Arc::clone(&dispatched);
        let timeout = config.stress.response_timeout;
        let close_after = config.stress.close_after;

        tasks.push(tokio::spawn(async move {
            let request = Request::post(format!("https://loopback/stress/{}", index))
                .body(Bytes::from(format!("exchange {}", index)))
                .context("Failed to build request")?;
            let exchange = Exchange::new(request);

            if let Err(error) = pool.send(&exchange) {
                return Ok((exchange, Outcome::Rejected(error)));
            }
            let count = dispatched.fetch_add(1, Ordering::SeqCst) + 1;
            if close_after == Some(count) {
                tracing::info!("Closing pool after {} dispatched exchanges", count);
                pool.close();
            }

            let outcome = match tokio::time::timeout(timeout, exchange.response()).await {
                Ok(Ok(_)) => Outcome::Completed,
                Ok(Err(ExchangeError::Aborted(_))) => Outcome::Aborted,
                Ok(Err(error)) => Outcome::Failed(error),
                Err(_) => {
                    exchange.abort(ExchangeError::TimedOut);
                    Outcome::TimedOut
                }
            };
            anyhow::Ok((exchange, outcome))
        }));
    }

    let mut summary = Summary::default();
    let mut unresolved = 0;
    for result in futures::future::join_all(tasks).await {
        let (exchange, outcome) = result.context("Exchange task panicked")??;
        match &outcome {
            Outcome::Failed(error) => tracing::debug!("{} failed: {}", exchange.id(), error),
            Outcome::Rejected(error) => tracing::debug!("{} rejected: {}", exchange.id(), error),
            _ => {}
        }
        let dispatched = !matches!(outcome, Outcome::Rejected(_));
        if dispatched && !exchange.is_resolved() {
            tracing::error!("{} was never resolved", exchange.id());
            unresolved += 1;
        }
        summary.record(&outcome);
    }

    pool.close();

    println!("Exchanges:  {}", summary.total());
    println!("  completed {}", summary.completed);
    println!("  aborted   {}", summary.aborted);
    println!("  timed out {}", summary.timed_out);
    println!("  failed    {}", summary.failed);
    println!("  rejected  {}", summary.rejected);
    println!("Releases:   {}", pool.release_count());
    println!("Elapsed:    {:?}", started.elapsed());

    if unresolved > 0 {
        bail!("{} exchanges were left unresolved", unresolved);
    }
    Ok(())
}
