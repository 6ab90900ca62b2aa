use anyhow::Context;
use clap::{Parser, ValueEnum};
use fixlink::fix::gpsd::DEFAULT_GPSD_ADDR;
use fixlink::link::udp::UdpPeripheral;
use fixlink::telemetry::LinkMetrics;
use fixlink::{FramingMode, LinkConfig};
use generator::profile::WalkConfig;
use log::{info, warn};
use status::model::latest_fix;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use workflow::config::{DeviceConfig, SourceConfig, DEFAULT_ADVERTISE_TO};
use workflow::runner::Runner;
use workflow::source::DeviceSource;

mod generator;
mod status;
mod workflow;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SourceKind {
    Gpsd,
    Nmea,
    Simulated,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Framing {
    Legacy,
    Terminated,
}

impl From<Framing> for FramingMode {
    fn from(framing: Framing) -> Self {
        match framing {
            Framing::Legacy => FramingMode::Legacy,
            Framing::Terminated => FramingMode::Terminated,
        }
    }
}

#[derive(Parser)]
#[command(author, version, about = "Tracker driver: pushes position fixes over the radio link")]
struct Args {
    /// Load the whole device config from YAML; the link and source flags are then ignored
    #[arg(long)]
    config: Option<PathBuf>,
    /// Name advertised to viewers
    #[arg(long, default_value = "NetGuardian")]
    name: String,
    #[arg(long, value_enum, default_value_t = SourceKind::Gpsd)]
    source: SourceKind,
    #[arg(long, default_value = DEFAULT_GPSD_ADDR)]
    gpsd_addr: String,
    /// NMEA 0183 file or serial device, required with `--source nmea`
    #[arg(long)]
    nmea_path: Option<PathBuf>,
    /// Seed for `--source simulated`
    #[arg(long, default_value_t = 0)]
    seed: u64,
    #[arg(long, default_value_t = 5)]
    interval_secs: u64,
    /// Delay between the frames of one message
    #[arg(long, default_value_t = 100)]
    pacing_ms: u64,
    #[arg(long, value_enum, default_value_t = Framing::Terminated)]
    framing: Framing,
    /// Local address of the emulated radio
    #[arg(long, default_value = "0.0.0.0:0")]
    bind: SocketAddr,
    /// Where advertisements are sent (the viewer's listen address)
    #[arg(long, default_value = DEFAULT_ADVERTISE_TO)]
    advertise_to: SocketAddr,
    /// Serve the read-only status view on this address
    #[arg(long)]
    http: Option<SocketAddr>,
    /// Acquire and send a single fix, then exit
    #[arg(long, default_value_t = false)]
    once: bool,
}

impl Args {
    fn to_config(&self) -> anyhow::Result<DeviceConfig> {
        let source = match self.source {
            SourceKind::Gpsd => SourceConfig::Gpsd {
                address: self.gpsd_addr.clone(),
            },
            SourceKind::Nmea => SourceConfig::Nmea {
                path: self
                    .nmea_path
                    .clone()
                    .context("--source nmea needs --nmea-path")?,
            },
            SourceKind::Simulated => SourceConfig::Simulated(WalkConfig {
                seed: self.seed,
                step_secs: self.interval_secs as f64,
                ..Default::default()
            }),
        };
        let link = LinkConfig {
            device_name: self.name.clone(),
            framing: self.framing.into(),
            pacing_ms: self.pacing_ms,
            ..LinkConfig::default()
        };
        let mut config = DeviceConfig::from_args(link, source, self.interval_secs);
        config.radio.bind = self.bind;
        config.radio.advertise_to = self.advertise_to;
        config.http = self.http;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => DeviceConfig::load(path)?,
        None => args.to_config()?,
    };
    config.validate().context("validating the device config")?;

    let metrics = Arc::new(LinkMetrics::new());
    let (publisher, latest) = latest_fix();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if let Some(addr) = config.http {
        status::bridge::serve(addr, latest, metrics.clone(), shutdown_rx.clone())?;
    }

    let source = DeviceSource::open(&config.source).await?;
    let peripheral = UdpPeripheral::bind(
        config.radio.bind,
        &config.link.device_name,
        config.radio.advertise_to,
        config.radio.advertise_interval(),
    )
    .await
    .context("binding the radio socket")?;
    let mut runner = Runner::new(source, peripheral, &config, metrics.clone(), publisher);

    if args.once {
        let outcome = runner.tick().await?;
        println!(
            "{:?} ({} subscribed viewers)",
            outcome,
            runner.sender().peripheral().subscriber_count()
        );
        return Ok(());
    }

    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl+C received, stopping");
                let _ = shutdown_tx.send(true);
            }
            Err(err) => {
                warn!("cannot listen for Ctrl+C: {}", err);
                // keep the sender alive so the driver keeps running
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });

    info!(
        "driving {:?} every {}s",
        config.link.device_name, config.interval_secs
    );
    runner.run(config.interval(), shutdown_rx).await?;

    let snapshot = metrics.snapshot();
    info!(
        "sent {} messages ({} frames), {} send failures",
        snapshot.messages_sent, snapshot.frames_sent, snapshot.send_failures
    );
    Ok(())
}
