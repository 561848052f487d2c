//! ACER demo
//!
//! Builds a synthetic stock-tick stream, indexes it and runs a two-variable
//! sequence query against it.

use acer_index::config::Config;
use acer_index::{AcerIndex, CompareOp, Constraint, EventSchema, Pattern};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "acer")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Index a synthetic event stream and run a pattern query")]
struct Cli {
    /// Config file (default: search standard locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of events to generate
    #[arg(short, long, default_value = "200000")]
    events: usize,

    /// Number of event types
    #[arg(short, long, default_value = "20")]
    types: usize,

    /// Pattern time window
    #[arg(short, long, default_value = "100")]
    window: i64,

    /// Pattern to run, as JSON (default: a two-variable sequence)
    #[arg(short, long)]
    pattern: Option<PathBuf>,

    /// Seed for the synthetic stream
    #[arg(long, default_value = "42")]
    seed: u64,
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| {
            format!("acer={0},acer_index={0}", config.logging.level)
        }),
    );
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config);

    tracing::info!("ACER v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Data directory: {:?}", config.index.data_dir);

    let schema = EventSchema::new(
        "stock",
        &[
            ("ticker", "TYPE"),
            ("open", "DOUBLE.2"),
            ("volume", "INT"),
            ("name", "CHAR[8]"),
            ("time", "TIMESTAMP"),
        ],
    )?;
    let mut index = AcerIndex::create(config.index.clone(), schema, &["open", "volume"])?;

    // Demo: write a synthetic stream
    let types = cli.types.max(2);
    let mut rng = StdRng::seed_from_u64(cli.seed);
    let mut ts = 0i64;
    let started = Instant::now();
    for _ in 0..cli.events {
        ts += rng.gen_range(1..=10);
        let ticker = rng.gen_range(0..types);
        let row = format!(
            "T{},{:.2},{},n{},{}",
            ticker,
            rng.gen_range(50.0..200.0),
            rng.gen_range(1..1000),
            ticker,
            ts
        );
        index.insert(&row, false)?;
    }
    tracing::info!(
        "Inserted {} events in {:.2?}",
        cli.events,
        started.elapsed()
    );
    tracing::info!("Index stats: {}", index.stats());

    // Demo: query
    let pattern = match &cli.pattern {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => default_pattern(cli.window),
    };

    let started = Instant::now();
    let candidates = index.query(&pattern)?;
    tracing::info!(
        candidates = candidates.len(),
        elapsed = ?started.elapsed(),
        "Pattern query complete"
    );

    Ok(())
}

fn default_pattern(window: i64) -> Pattern {
    Pattern::sequence(window)
        .variable("a", "T0")
        .variable("b", "T1")
        .constraint(
            Constraint::new("a", "open")
                .compare(CompareOp::Ge, 100.0)
                .compare(CompareOp::Le, 120.0),
        )
        .constraint(Constraint::new("b", "volume").compare(CompareOp::Gt, 900.0))
}
