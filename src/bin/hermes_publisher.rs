//! Hermes Heartbeat Publisher
//!
//! Publish `Heartbeat` dengan rate tetap dan log throughput setiap 1000 pesan.
//!
//! Usage:
//!   cargo run --release --bin hermes_publisher -- --address hermes://127.0.0.1:9999 --rate 100

use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use clap::Parser;
use hermes::protocol::Heartbeat;
use hermes::{Session, SessionConfig};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "hermes_publisher", version)]
struct Args {
    /// Transport address (default dari HERMES_ADDRESS)
    #[arg(short, long)]
    address: Option<String>,

    /// Topic tujuan
    #[arg(short, long, default_value = "hermes.drone.1.hb")]
    topic: String,

    /// Node ID yang dikirim di heartbeat
    #[arg(short, long, default_value_t = 1)]
    node_id: u32,

    /// Pesan per detik
    #[arg(short, long, default_value_t = 100)]
    rate: u32,

    /// Berhenti setelah N pesan (0 = jalan terus)
    #[arg(short, long, default_value_t = 0)]
    count: u64,

    /// Kapasitas buffer pool dalam bytes (default dari HERMES_POOL_SIZE)
    #[arg(long)]
    pool_size: Option<usize>,
}

/// Wall-clock timestamp in microseconds, sebanding antar proses
#[inline(always)]
fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = SessionConfig::from_env();
    if let Some(address) = args.address {
        config.address = address;
    }
    if let Some(pool_size) = args.pool_size {
        config.pool_size = pool_size;
    }

    let session = match Session::from_config(&config) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to create session");
            std::process::exit(1);
        }
    };

    info!(
        node_id = args.node_id,
        rate_hz = args.rate,
        topic = %args.topic,
        "heartbeat publisher starting"
    );

    let interval = Duration::from_secs_f64(1.0 / f64::from(args.rate.max(1)));
    let clock = Instant::now();
    let mut msg = Heartbeat {
        node_id: args.node_id,
        ..Default::default()
    };
    let mut sent = 0u64;

    while args.count == 0 || sent < args.count {
        msg.timestamp_us = now_us();
        msg.cpu_usage = (sent % 100) as f32;

        if let Err(e) = session.publish(&args.topic, &msg) {
            warn!(error = %e, "publish failed");
        }
        sent += 1;

        if sent % 1000 == 0 {
            let elapsed = clock.elapsed().as_secs_f64();
            info!(
                total = sent,
                msg_per_sec = sent as f64 / elapsed,
                "publisher progress"
            );
        }

        thread::sleep(interval);
    }

    info!(total = sent, stats = ?session.stats(), "publisher done");
}
