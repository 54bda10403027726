use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use proxy_vet::{
    init_logger, AnonymityLevel, Config, MaxMindGeoLookup, PeriodicScan, Protocol, ProxyFilter,
    ScanPipeline, ScanSession, StatisticsStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Concurrent proxy verification with rolling quality statistics
#[derive(Parser)]
#[command(name = "proxy-vet")]
#[command(about = "Concurrent proxy verification with rolling quality statistics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database file path, overrides the configuration
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate, verify and persist candidates once
    Scan {
        /// Address to exclude from this scan's results (can specify multiple)
        #[arg(short, long)]
        blacklist: Vec<String>,
    },
    /// List proven proxies from the database
    Query {
        /// Two-letter country code
        #[arg(long)]
        country: Option<String>,
        /// Maximum latency in seconds
        #[arg(long)]
        max_latency: Option<f64>,
        /// Minimum anonymity (transparent, anonymous, elite or 1-3)
        #[arg(long)]
        min_anonymity: Option<AnonymityLevel>,
        /// Protocol the proxy must support, any of several (can specify multiple)
        #[arg(short, long)]
        protocol: Vec<Protocol>,
    },
    /// Scan repeatedly until interrupted
    Watch {
        /// Seconds between scans, overrides the configuration
        #[arg(short, long)]
        interval: Option<u64>,
        /// Address to exclude from every scan's results (can specify multiple)
        #[arg(short, long)]
        blacklist: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config = config.with_db_path(database);
    }

    let store = StatisticsStore::open(&config.db_path)
        .await?
        .with_min_successful_checks(config.min_successful_checks);

    match cli.command {
        Commands::Scan { blacklist } => {
            let pipeline = ScanPipeline::from_config(&config, store);
            let session = new_session(&config, &blacklist);

            let cancel = session.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, finishing the current chunk");
                    cancel.cancel();
                }
            });

            let report = pipeline.run(&session).await?;
            println!("Candidates: {}", report.candidates);
            println!("Verified:   {}", report.verified);
            println!("Persisted:  {}", report.persisted);
            if report.persistence_failures > 0 {
                println!("Failed:     {}", report.persistence_failures);
            }
        }
        Commands::Query {
            country,
            max_latency,
            min_anonymity,
            protocol,
        } => {
            if let Some(latency) = max_latency {
                if !latency.is_finite() || latency < 0.0 {
                    return Err(anyhow!("Invalid max latency: {}", latency));
                }
            }

            let filter = ProxyFilter {
                country: country.map(|c| c.to_uppercase()),
                max_latency,
                min_anonymity,
                protocols: protocol,
            };
            let records = store.query(&filter).await?;

            if records.is_empty() {
                println!("No proxies found.");
            } else {
                for record in &records {
                    println!("{}", record);
                }
                println!("\nTotal: {} proxies", records.len());
            }
        }
        Commands::Watch {
            interval,
            blacklist,
        } => {
            let interval = interval
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.scan_interval());
            if interval.is_zero() {
                return Err(anyhow!("Interval must be at least 1 second"));
            }

            let pipeline = Arc::new(ScanPipeline::from_config(&config, store));
            let config = Arc::new(config);
            let blacklist = Arc::new(blacklist);
            let periodic = PeriodicScan::new(interval);

            let stop = periodic.stop_handle();
            tokio::spawn({
                let stop = stop.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("Interrupted, finishing the current chunk");
                        stop.cancel();
                    }
                }
            });

            info!("Scanning every {}s, press Ctrl-C to stop", interval.as_secs());
            let stats = periodic
                .run(|| {
                    let pipeline = Arc::clone(&pipeline);
                    let config = Arc::clone(&config);
                    let blacklist = Arc::clone(&blacklist);
                    let cancel = stop.child_token();
                    async move {
                        let session = new_session(&config, &blacklist).with_cancel(cancel);
                        match pipeline.run(&session).await {
                            Ok(report) => info!("Scheduled scan: {}", report),
                            Err(e) => error!("Scheduled scan failed: {}", e),
                        }
                    }
                })
                .await;

            println!(
                "Stopped after {} scans ({} skipped while busy)",
                stats.launched, stats.skipped
            );
        }
    }

    Ok(())
}

fn new_session(config: &Config, blacklist: &[String]) -> ScanSession {
    if config.geo_database_credential.is_none() && !config.geo_city_database.exists() {
        warn!(
            "{} not found and no MAXMIND_LICENSE_KEY set",
            config.geo_city_database.display()
        );
    }
    let geo = MaxMindGeoLookup::open_or_unavailable(
        &config.geo_city_database,
        config.geo_asn_database.as_deref(),
    );

    let session = ScanSession::new(geo);
    for address in blacklist {
        session.blacklist(address.clone());
    }
    session
}
