//! Hermes Broker Binary
//!
//! Topic-routed message broker untuk `hermes://` sessions.
//!
//! Usage:
//!   cargo run --release --bin hermes_server -- --bind 0.0.0.0:9999
//!
//! Log level lewat `RUST_LOG` (default: info).

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::Parser;
use hermes::network::Broker;
use tracing_subscriber::EnvFilter;

/// Hermes Broker - Low-Latency Topic Router
#[derive(Debug, Parser)]
#[command(name = "hermes_server", version)]
struct Args {
    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0:9999")]
    bind: SocketAddr,

    /// Interval log statistik dalam detik (0 = mati)
    #[arg(long, default_value_t = 5)]
    stats_interval: u64,
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut broker = match Broker::bind(args.bind) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(bind = %args.bind, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    if args.stats_interval > 0 {
        broker = broker.with_stats_interval(Duration::from_secs(args.stats_interval));
    }

    if let Err(e) = broker.run(&SHUTDOWN) {
        tracing::error!(error = %e, "broker error");
        std::process::exit(1);
    }
}
