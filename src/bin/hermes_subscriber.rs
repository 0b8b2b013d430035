//! Hermes Heartbeat Subscriber - Latency & Jitter Analysis
//!
//! Subscribe ke heartbeat dan ukur latency end-to-end:
//! - Avg / Min / Max per 100 pesan
//! - Jitter (σ) via Welford's online variance
//! - Percentile report di akhir run
//! - Optional CSV log `message_index,latency_us` untuk charting
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin hermes_subscriber -- --address hermes://127.0.0.1:9999 --duration 60
//! ```

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use clap::Parser;
use hermes::protocol::Heartbeat;
use hermes::{Session, SessionConfig};
use parking_lot::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "hermes_subscriber", version)]
struct Args {
    /// Transport address (default dari HERMES_ADDRESS)
    #[arg(short, long)]
    address: Option<String>,

    /// Topic yang di-subscribe
    #[arg(short, long, default_value = "hermes.drone.1.hb")]
    topic: String,

    /// Durasi test dalam detik (0 = jalan terus)
    #[arg(short, long, default_value_t = 60)]
    duration: u64,

    /// Tulis raw latency ke file CSV
    #[arg(long)]
    csv: Option<PathBuf>,
}

/// Wall-clock timestamp in microseconds
#[inline(always)]
fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Latency statistics dengan online variance (Welford)
#[derive(Default)]
struct LatencyStats {
    count: u64,
    sum_us: u64,
    min_us: u64,
    max_us: u64,
    mean: f64,
    m2: f64,
    // Disimpan untuk percentile di akhir run
    samples: Vec<u64>,
    log: Option<BufWriter<File>>,
}

impl LatencyStats {
    fn record(&mut self, latency_us: u64) {
        self.count += 1;
        self.sum_us += latency_us;
        self.max_us = self.max_us.max(latency_us);
        if self.count == 1 || latency_us < self.min_us {
            self.min_us = latency_us;
        }

        let x = latency_us as f64;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);

        if self.samples.len() < 1_000_000 {
            self.samples.push(latency_us);
        }

        if let Some(log) = self.log.as_mut() {
            if let Err(e) = writeln!(log, "{},{}", self.count, latency_us) {
                warn!(error = %e, "CSV write failed, disabling log");
                self.log = None;
            }
        }
    }

    fn jitter_us(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        (self.m2 / self.count as f64).sqrt()
    }

    fn percentile(&self, sorted: &[u64], p: f64) -> u64 {
        if sorted.is_empty() {
            return 0;
        }
        let idx = ((sorted.len() as f64 * p / 100.0) as usize).min(sorted.len() - 1);
        sorted[idx]
    }

    fn report(&mut self, elapsed: Duration) {
        if self.count == 0 {
            info!("no samples collected");
            return;
        }

        let mut sorted = self.samples.clone();
        sorted.sort_unstable();

        info!(
            samples = self.count,
            secs = elapsed.as_secs_f64(),
            msg_per_sec = self.count as f64 / elapsed.as_secs_f64(),
            avg_us = self.sum_us / self.count,
            min_us = self.min_us,
            max_us = self.max_us,
            jitter_us = self.jitter_us(),
            p50_us = self.percentile(&sorted, 50.0),
            p90_us = self.percentile(&sorted, 90.0),
            p99_us = self.percentile(&sorted, 99.0),
            p999_us = self.percentile(&sorted, 99.9),
            "latency report"
        );

        if let Some(log) = self.log.as_mut() {
            if let Err(e) = log.flush() {
                warn!(error = %e, "CSV flush failed");
            }
        }
    }
}

fn open_csv(path: &PathBuf) -> io::Result<BufWriter<File>> {
    let mut log = BufWriter::new(File::create(path)?);
    writeln!(log, "message_index,latency_us")?;
    Ok(log)
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

    let mut stats = LatencyStats::default();
    if let Some(path) = &args.csv {
        match open_csv(path) {
            Ok(log) => stats.log = Some(log),
            Err(e) => {
                error!(path = %path.display(), error = %e, "cannot open CSV log");
                std::process::exit(1);
            }
        }
    }
    let stats = Arc::new(Mutex::new(stats));

    let session = match Session::from_config(&config) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to create session");
            error!("make sure the broker is running: cargo run --release --bin hermes_server");
            std::process::exit(1);
        }
    };

    let handler_stats = Arc::clone(&stats);
    let subscribed = session.subscribe(&args.topic, move |hb: &Heartbeat| {
        let latency_us = now_us().saturating_sub(hb.timestamp_us);

        let mut stats = handler_stats.lock();
        stats.record(latency_us);

        if stats.count % 100 == 0 {
            info!(
                count = stats.count,
                avg_us = stats.sum_us / stats.count,
                max_us = stats.max_us,
                min_us = stats.min_us,
                jitter_us = stats.jitter_us(),
                "heartbeat latency"
            );
        }
    });
    if let Err(e) = subscribed {
        error!(error = %e, "subscribe failed");
        std::process::exit(1);
    }

    info!(topic = %args.topic, duration_secs = args.duration, "listening for heartbeats");

    let start = Instant::now();
    while args.duration == 0 || start.elapsed() < Duration::from_secs(args.duration) {
        thread::sleep(Duration::from_millis(100));
    }

    // Tutup dulu supaya tidak ada handler yang jalan saat report
    let session_stats = session.stats();
    session.close();

    stats.lock().report(start.elapsed());
    info!(?session_stats, "subscriber done");
}
