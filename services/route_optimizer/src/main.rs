//! Scheduled cost → route optimization.
//!
//! Reads the cost matrix file on a fixed cadence, optimizes, stamps the
//! result, and publishes it atomically (write to a temp file, then rename)
//! so readers never observe a torn matrix.

use anyhow::{Context, Result};
use clap::Parser;
use routing::{CostMatrix, RouteMatrix};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "route_optimizer")]
struct Args {
    /// Cost matrix input file.
    #[arg(long, default_value = "cost_matrix.bin")]
    cost_matrix: PathBuf,

    /// Route matrix output file.
    #[arg(long, default_value = "route_matrix.bin")]
    route_matrix: PathBuf,

    /// Seconds between optimizer runs.
    #[arg(long, default_value_t = 1)]
    interval_seconds: u64,

    /// Disjoint source-relay ranges optimized in parallel.
    #[arg(long, default_value_t = 8)]
    segments: usize,

    /// Run once and exit.
    #[arg(long)]
    once: bool,
}

fn run_once(args: &Args) -> Result<()> {
    let started = Instant::now();

    let cost_matrix = CostMatrix::load(&args.cost_matrix)
        .with_context(|| format!("failed to load cost matrix {}", args.cost_matrix.display()))?;

    let mut route_matrix = routing::optimize(&cost_matrix, args.segments);
    route_matrix.created_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    publish(&route_matrix, &args.route_matrix)?;

    info!(
        relays = route_matrix.num_relays(),
        entries = route_matrix.entries.len(),
        elapsed = ?started.elapsed(),
        "published route matrix"
    );

    Ok(())
}

/// Temp file + rename so readers always see a complete matrix.
fn publish(route_matrix: &RouteMatrix, path: &Path) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    route_matrix
        .save(&temp_path)
        .with_context(|| format!("failed to write {}", temp_path.display()))?;
    std::fs::rename(&temp_path, path)
        .with_context(|| format!("failed to publish {}", path.display()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    if args.once {
        return run_once(&args);
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval_seconds.max(1)));
    loop {
        ticker.tick().await;
        if let Err(e) = run_once(&args) {
            // A missing or torn cost matrix is expected while the pinger is
            // warming up; keep the previous route matrix in service.
            warn!("optimizer iteration failed: {e:#}");
        }
    }
}
