//! Binary entrypoint for the Lorawatch CLI.
//!
//! Commands:
//! - `run [--interval <secs>]` - continuous monitoring until SIGINT/SIGTERM
//! - `once` - run a single monitoring cycle; exit 0 on full success, 1 otherwise
//! - `init` - create a starter `config.toml`
//! - `probe` - check the radio link and InfluxDB health, print a JSON summary
//!
//! See the library crate docs for module-level details: `lorawatch::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use std::time::Duration;

use lorawatch::config::Config;
use lorawatch::metrics;
use lorawatch::monitor::{Monitor, ShutdownFlag};
use lorawatch::sink::InfluxSink;

#[derive(Parser)]
#[command(name = "lorawatch")]
#[command(about = "A LoRa sensor monitoring daemon with daily logs and InfluxDB storage")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run continuous monitoring cycles
    Run {
        /// Monitoring interval in seconds
        #[arg(short, long, default_value_t = 300)]
        interval: u64,
    },
    /// Run a single monitoring cycle and exit 0/1
    Once,
    /// Initialize a new configuration file
    Init,
    /// Check radio and database connectivity
    Probe,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config early to configure logging (except for Init which writes it)
    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Run { interval } => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            info!("Starting Lorawatch v{}", env!("CARGO_PKG_VERSION"));

            #[cfg(feature = "serial")]
            {
                let radio = lorawatch::radio::LoraModem::open(&config.radio).await?;
                let sink = InfluxSink::new(config.influxdb.clone());
                if !sink.health().await {
                    anyhow::bail!("InfluxDB health check failed: {}", config.influxdb.url);
                }
                info!("InfluxDB connection established successfully");

                let shutdown = ShutdownFlag::new();
                shutdown.arm_ctrl_c();

                let mut monitor = Monitor::new(config, radio, sink);
                monitor
                    .run_continuous(Duration::from_secs(interval), &shutdown)
                    .await;
                info!("Session stats: {:?}", metrics::snapshot());
            }

            #[cfg(not(feature = "serial"))]
            {
                let _ = config;
                anyhow::bail!(
                    "Serial support not compiled in. Rebuild with: cargo build --features serial"
                );
            }
        }
        Commands::Once => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            info!("Starting Lorawatch v{} (single cycle)", env!("CARGO_PKG_VERSION"));

            #[cfg(feature = "serial")]
            {
                let radio = lorawatch::radio::LoraModem::open(&config.radio).await?;
                let sink = InfluxSink::new(config.influxdb.clone());
                if !sink.health().await {
                    anyhow::bail!("InfluxDB health check failed: {}", config.influxdb.url);
                }
                info!("InfluxDB connection established successfully");

                let mut monitor = Monitor::new(config, radio, sink);
                let ok = monitor.run_single_cycle().await?;
                std::process::exit(if ok { 0 } else { 1 });
            }

            #[cfg(not(feature = "serial"))]
            {
                let _ = config;
                anyhow::bail!(
                    "Serial support not compiled in. Rebuild with: cargo build --features serial"
                );
            }
        }
        Commands::Init => {
            if tokio::fs::try_exists(&cli.config).await.unwrap_or(false) {
                anyhow::bail!(
                    "Configuration file {} already exists; refusing to overwrite",
                    cli.config
                );
            }
            info!("Initializing new configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
            println!(
                "Created {}. Set influxdb.token (or INFLUXDB_TOKEN) before running.",
                cli.config
            );
        }
        Commands::Probe => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };

            let sink = InfluxSink::new(config.influxdb.clone());
            let influxdb_ok = sink.health().await;

            #[cfg(feature = "serial")]
            let radio_ok = match lorawatch::radio::LoraModem::open(&config.radio).await {
                Ok(_) => true,
                Err(e) => {
                    log::warn!("Radio probe failed: {}", e);
                    false
                }
            };
            #[cfg(not(feature = "serial"))]
            let radio_ok = false;

            let status_ok = radio_ok && influxdb_ok;
            let payload = serde_json::json!({
                "status": if status_ok { "ok" } else { "degraded" },
                "radio_port": config.radio.port,
                "radio_ok": radio_ok,
                "influxdb_url": config.influxdb.url,
                "influxdb_ok": influxdb_ok,
                "device_id": config.device.id,
            });
            println!("{}", payload);
            std::process::exit(if status_ok { 0 } else { 1 });
        }
    }

    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config.as_ref().and_then(|c| c.logging.file.clone());
    if let Some(ref file) = log_file {
        if let Ok(f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
        {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));

            // If stdout is a terminal, mirror log lines to the console too;
            // under a service manager stdout is redirected and stays quiet.
            let is_tty = atty::is(atty::Stream::Stdout);

            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());

                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }

                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        } else {
            builder.format(|fmt, record| {
                writeln!(
                    fmt,
                    "{} [{}] {}",
                    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                    record.level(),
                    record.args()
                )
            });
        }
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
