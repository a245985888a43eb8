use clap::Parser;
use jbdread::{BleTransport, Config, Monitor, TelemetryStore};
use std::path::PathBuf;

/// Poll a JBD/Xiaoxiang BMS over BLE and log its telemetry.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// TOML config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// BLE advertising name of the BMS
    #[arg(long)]
    device: Option<String>,

    /// Path of the CSV history log
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Seconds between poll cycles
    #[arg(long)]
    interval: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(device) = args.device {
        config.device_name = device;
    }
    if let Some(log_file) = args.log_file {
        config.log_file = log_file;
    }
    if let Some(interval) = args.interval {
        config.poll_interval_secs = interval;
    }

    log::info!(
        "monitoring {}, logging to {}",
        config.device_name,
        config.log_file.display()
    );

    let (store, reader) = TelemetryStore::open(&config.log_file);
    let transport = BleTransport::new(&config.device_name);
    let mut monitor = Monitor::new(transport, config, store);

    tokio::select! {
        result = monitor.run() => result,
        _ = tokio::signal::ctrl_c() => {
            let stats = reader.latest().stats;
            log::info!(
                "stopping: {} readings accepted, {} rejected",
                stats.accepted,
                stats.rejected
            );
            Ok(())
        }
    }
}
