//! Access point geolocation crawler CLI
//!
//! Crawls the vendor geolocation service outward from a seed and serves
//! queries over the accumulated trajectories.

use aptrace::{
    classify,
    client::{LocatorClient, LocatorConfig},
    crawler::{Crawler, CrawlerConfig},
    frontier::FrontierQueue,
    ingest::Ingestor,
    scan::AirportScanner,
    store::Store,
    tools,
    types::{Bssid, Position},
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "aptrace")]
#[command(about = "Wi-Fi access point geolocation crawler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Connection pool size
    #[arg(long, default_value = "8")]
    pool_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the identifier space until the frontier drains
    Crawl {
        /// Concurrent worker loops
        #[arg(short, long, default_value = "1")]
        workers: usize,

        /// Seconds each worker waits between iterations
        #[arg(short, long, default_value = "5")]
        pace: u64,

        /// Override the service endpoint
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Show the stored trajectory of one device
    Query {
        /// Device identifier (colon-hex, e.g. "a0:1c:8d:f5:27:81")
        bssid: String,
    },

    /// Devices seen within an area and time window, with full trajectories
    Area {
        /// Latitude of the search center
        #[arg(long)]
        lat: f64,

        /// Longitude of the search center
        #[arg(long)]
        lon: f64,

        /// Radius in meters
        #[arg(long)]
        radius: f64,

        /// Window start (RFC 3339, e.g. "2025-09-13T14:00:00Z")
        #[arg(long)]
        start: String,

        /// Window end, exclusive
        #[arg(long)]
        end: String,

        /// Keep only devices classified as mobile
        #[arg(long)]
        mobile_only: bool,
    },

    /// List discovered devices
    Devices {
        #[arg(short, long, default_value = "100")]
        limit: i64,

        #[arg(short, long, default_value = "0")]
        offset: i64,
    },

    /// Show the most recent position of each given device
    Latest {
        /// Device identifiers
        bssids: Vec<String>,
    },

    /// Delete a device and its entire observation history
    Purge {
        bssid: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = Store::connect(&cli.database_url, cli.pool_size).await?;
    store.init_schema().await?;

    match cli.command {
        Commands::Crawl {
            workers,
            pace,
            endpoint,
        } => {
            run_crawler(store, workers, pace, endpoint).await?;
        }

        Commands::Query { bssid } => {
            query_device(&store, &bssid).await?;
        }

        Commands::Area {
            lat,
            lon,
            radius,
            start,
            end,
            mobile_only,
        } => {
            query_area(&store, lat, lon, radius, &start, &end, mobile_only).await?;
        }

        Commands::Devices { limit, offset } => {
            list_devices(&store, limit, offset).await?;
        }

        Commands::Latest { bssids } => {
            latest_positions(&store, &bssids).await?;
        }

        Commands::Purge { bssid } => {
            let bssid: Bssid = bssid.parse()?;
            if store.purge_device(bssid).await? {
                println!("Purged {} and its observation history", bssid);
            } else {
                println!("No device {} in the store", bssid);
            }
        }
    }

    Ok(())
}

async fn run_crawler(
    store: Store,
    workers: usize,
    pace: u64,
    endpoint: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("starting crawler with {} worker(s), pace {}s", workers, pace);

    let mut locator_config = LocatorConfig::default();
    if let Some(endpoint) = endpoint {
        tracing::info!("using endpoint override: {}", endpoint);
        locator_config = locator_config.with_endpoint(endpoint);
    }

    let client = LocatorClient::new(locator_config)?;
    let frontier = FrontierQueue::new(store.clone());
    let ingestor = Ingestor::new(store.clone(), frontier.clone());

    let crawler = Crawler::new(
        client,
        store.clone(),
        frontier.clone(),
        ingestor,
        Box::new(AirportScanner::new()),
        CrawlerConfig {
            workers,
            pace: Duration::from_secs(pace),
            ..Default::default()
        },
    );
    let stats = crawler.stats();

    // Periodic stats reporting
    let stats_handle = {
        let stats = stats.clone();
        let store = store.clone();
        let frontier = frontier.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                interval.tick().await;
                let s = stats.snapshot();
                let devices = store.device_count().await.unwrap_or(-1);
                let queued = frontier.len().await.unwrap_or(-1);
                tracing::info!(
                    "stats: resolutions={}, devices={}, queued={}, pings={}, empty={}, errors={}, last={}ms",
                    s.resolutions,
                    devices,
                    queued,
                    s.pings_written,
                    s.empty_results,
                    s.errors,
                    s.last_resolution_ms
                );
            }
        })
    };

    let crawler = Arc::new(crawler);
    let crawl_handle = {
        let crawler = Arc::clone(&crawler);
        tokio::spawn(async move { crawler.run().await })
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C, shutting down...");
            crawler.stop();
        }
        result = crawl_handle => {
            match result {
                Ok(Err(e)) => tracing::error!("crawler error: {}", e),
                Err(e) => tracing::error!("crawler task failed: {}", e),
                _ => {}
            }
        }
    }

    stats_handle.abort();

    let final_stats = stats.snapshot();
    let devices = store.device_count().await.unwrap_or(-1);
    tracing::info!("final statistics:");
    tracing::info!("  Resolutions: {}", final_stats.resolutions);
    tracing::info!("  Devices known: {}", devices);
    tracing::info!("  Pings written: {}", final_stats.pings_written);
    tracing::info!("  Empty results: {}", final_stats.empty_results);
    tracing::info!("  Errors: {}", final_stats.errors);

    Ok(())
}

async fn query_device(store: &Store, bssid: &str) -> Result<(), Box<dyn std::error::Error>> {
    let bssid: Bssid = bssid.parse()?;
    let points = store.trajectory(bssid).await?;

    if points.is_empty() {
        println!("No observations for {}", bssid);
        return Ok(());
    }

    println!("Device {}: {} observations", bssid, points.len());
    println!(
        "Classified {}",
        if classify::is_static(&points) {
            "static"
        } else {
            "mobile"
        }
    );
    println!();

    for point in &points {
        println!(
            "{}  {:.6}, {:.6}",
            point.recorded_at, point.latitude, point.longitude
        );
    }

    Ok(())
}

async fn query_area(
    store: &Store,
    lat: f64,
    lon: f64,
    radius: f64,
    start: &str,
    end: &str,
    mobile_only: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = parse_time(start)?;
    let end = parse_time(end)?;

    let mut trajectories = store
        .trajectories_in_area(Position::new(lat, lon), radius, start, end)
        .await?;

    if mobile_only {
        classify::retain_mobile(&mut trajectories);
    }

    if trajectories.is_empty() {
        println!("No devices matched");
        return Ok(());
    }

    println!("{} device(s) matched", trajectories.len());
    println!();

    for trajectory in &trajectories {
        let label = if classify::is_static(&trajectory.points) {
            "static"
        } else {
            "mobile"
        };
        println!(
            "{} ({}, {} observations)",
            trajectory.bssid,
            label,
            trajectory.points.len()
        );
        for point in &trajectory.points {
            println!(
                "  {}  {:.6}, {:.6}",
                point.recorded_at, point.latitude, point.longitude
            );
        }
        println!();
    }

    Ok(())
}

async fn list_devices(
    store: &Store,
    limit: i64,
    offset: i64,
) -> Result<(), Box<dyn std::error::Error>> {
    let (total, devices) = store.list_devices(limit, offset).await?;

    println!(
        "Devices {}..{} of {}",
        offset,
        offset + devices.len() as i64,
        total
    );
    println!();

    for device in &devices {
        println!(
            "{}  first seen {}  last seen {}",
            device.bssid, device.first_seen_at, device.last_seen_at
        );
    }

    Ok(())
}

async fn latest_positions(
    store: &Store,
    bssids: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut parsed = Vec::with_capacity(bssids.len());
    for raw in bssids {
        parsed.push(raw.parse::<Bssid>()?);
    }

    let call = tools::ToolCall::LatestPositions(tools::LatestQuery { bssids: parsed });
    let output = tools::dispatch(store, &call).await?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}
