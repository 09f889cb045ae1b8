//! Overhead CLI
//!
//! Watches the sky around a reference point through the OpenSky API and keeps
//! daily sighting statistics in a local state file.

use clap::{Parser, Subcommand};
use overhead::{
    clock::{Clock, SystemClock},
    collector::{PollerBuilder, Snapshot},
    config::{AuthSettings, PollerConfig},
    geo::Coordinates,
    location::FixedLocation,
    metadata::MetadataCache,
    stats::StatsTracker,
    storage::{FileStore, StateStore},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "overhead")]
#[command(about = "Shows which aircraft are flying overhead", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the state file (settings, daily count, history)
    #[arg(short, long, global = true, default_value = "overhead_state.json")]
    state_file: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll continuously and log the aircraft overhead
    Watch {
        /// Reference latitude (defaults to Madrid)
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,

        /// Reference longitude
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,

        /// Name shown for the reference point
        #[arg(long)]
        place: Option<String>,

        /// Search radius in kilometers
        #[arg(long, default_value = "3.0")]
        radius_km: f64,

        /// OAuth2 client id
        #[arg(long, env = "OPENSKY_CLIENT_ID")]
        client_id: Option<String>,

        /// OAuth2 client secret
        #[arg(long, env = "OPENSKY_CLIENT_SECRET", hide_env_values = true)]
        client_secret: Option<String>,

        /// Basic auth username
        #[arg(long, env = "OPENSKY_USERNAME")]
        username: Option<String>,

        /// Basic auth password
        #[arg(long, env = "OPENSKY_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// HTTP request timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Show today's count and the sighting history
    Stats,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Watch {
            lat,
            lon,
            place,
            radius_km,
            client_id,
            client_secret,
            username,
            password,
            timeout,
        } => {
            let reference = lat.zip(lon).map(|(lat, lon)| Coordinates::new(lat, lon));
            let auth = AuthSettings::from_parts(username, password, client_id, client_secret);
            let config = PollerConfig {
                radius_km,
                ..Default::default()
            };

            run_watch(
                &cli.state_file,
                reference,
                place,
                auth,
                config,
                Duration::from_secs(timeout),
            )
            .await?;
        }

        Commands::Stats => {
            show_stats(&cli.state_file)?;
        }
    }

    Ok(())
}

async fn run_watch(
    state_file: &Path,
    reference: Option<Coordinates>,
    place: Option<String>,
    auth: AuthSettings,
    config: PollerConfig,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Starting overhead watch");
    tracing::info!("State file: {}", state_file.display());
    tracing::info!(
        "Reference: {} ({})",
        reference.unwrap_or(config.default_location),
        place.as_deref().unwrap_or("default")
    );
    tracing::info!("Radius: {} km", config.radius_km);

    let store = Arc::new(FileStore::open(state_file)?);
    let location = Arc::new(FixedLocation::new(reference, place));

    let poller = Arc::new(
        PollerBuilder::new()
            .store(store)
            .location(location)
            .config(config)
            .timeout(timeout)
            .auth(auth)
            .build()?,
    );

    let settings = poller.auth_settings();
    tracing::info!(
        "Auth: {}, polling every {}s",
        match (&settings.client, &settings.basic) {
            (Some(_), _) => "client credentials",
            (None, Some(_)) => "basic",
            (None, None) => "anonymous",
        },
        poller.interval().as_secs()
    );

    let handle = Arc::clone(&poller).spawn();

    // Log every published snapshot
    let report_handle = {
        let mut snapshots = handle.snapshot();
        let cache = Arc::clone(poller.metadata_cache());
        tokio::spawn(async move {
            while snapshots.changed().await.is_ok() {
                let snapshot = snapshots.borrow_and_update().clone();
                log_snapshot(&snapshot, &cache);
            }
        })
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        result = report_handle => {
            if let Err(e) = result {
                tracing::error!("Reporter error: {}", e);
            }
        }
    }

    handle.stop().await;

    let final_stats = poller.stats().snapshot();
    let snapshot = poller.snapshot();
    tracing::info!("Final statistics:");
    tracing::info!("  Cycles: {}", final_stats.cycles);
    tracing::info!("  Successful: {}", final_stats.successes);
    tracing::info!("  Rate limited: {}", final_stats.rate_limited);
    tracing::info!("  Failed: {}", final_stats.failures);
    tracing::info!("  Skipped: {}", final_stats.skipped);
    tracing::info!("  Aircraft today: {}", snapshot.daily_count);
    tracing::info!("  Metadata cached: {}", poller.metadata_cache().len());

    Ok(())
}

fn log_snapshot(snapshot: &Snapshot, cache: &MetadataCache) {
    tracing::info!(
        "{} aircraft overhead, {} today",
        snapshot.aircraft.len(),
        snapshot.daily_count
    );

    for aircraft in &snapshot.aircraft {
        match cache.aircraft_type(&aircraft.icao24) {
            Some(kind) => tracing::info!("  {} - {}", aircraft, kind),
            None => tracing::info!("  {}", aircraft),
        }
    }
}

fn show_stats(state_file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = StateStore::new(Arc::new(FileStore::open(state_file)?));
    let today = SystemClock.today();
    let tracker = StatsTracker::load(&store, &today, PollerConfig::default().history_limit);

    println!("Sighting Statistics");
    println!("===================");
    println!("Date: {}", today);
    println!("Aircraft today: {}", tracker.daily_count());
    println!();

    let history: Vec<_> = tracker.history().collect();
    if history.is_empty() {
        println!("No sightings recorded");
        return Ok(());
    }

    println!("Recent sightings:");
    for entry in history {
        println!("  {}", entry);
    }

    Ok(())
}
