use anyhow::{bail, Context};
use clap::Parser;
use config::ViewerConfig;
use fixlink::link::udp::UdpCentral;
use fixlink::telemetry::LinkMetrics;
use log::{info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use viewer::{Exit, OutputFormat};

mod config;
mod viewer;

#[derive(Parser)]
#[command(author, version, about = "Finds a tracker, subscribes to its fixes and prints them")]
struct Args {
    /// Load the viewer config from YAML; the other flags except --json are then ignored
    #[arg(long)]
    config: Option<PathBuf>,
    /// Advertised name to look for (substring match)
    #[arg(long, default_value = "NetGuardian")]
    name: String,
    /// Address the emulated radio listens on
    #[arg(long, default_value = "0.0.0.0:47800")]
    listen: SocketAddr,
    /// Give up scanning after this many seconds
    #[arg(long, default_value_t = 300)]
    deadline_secs: u64,
    /// Print each fix as one JSON object per line
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ViewerConfig::load(path)?,
        None => ViewerConfig::from_args(&args.name, args.listen, args.deadline_secs),
    };
    config.validate().context("validating the viewer config")?;

    let mut central = UdpCentral::bind(config.listen)
        .await
        .with_context(|| format!("listening on {}", config.listen))?
        .with_supervision_timeout(config.supervision());
    let metrics = Arc::new(LinkMetrics::new());
    let format = if args.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };
    let shutdown = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("cannot listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    let exit = viewer::run(
        &mut central,
        &config,
        viewer::printer(format),
        metrics.clone(),
        shutdown,
    )
    .await;

    let snapshot = metrics.snapshot();
    info!(
        "received {} frames, decoded {} fixes, {} decode errors, {} stalls",
        snapshot.frames_received,
        snapshot.messages_decoded,
        snapshot.decode_errors,
        snapshot.framing_stalls
    );
    match exit {
        Exit::Cancelled => Ok(()),
        Exit::DiscoveryTimeout => bail!(
            "no device advertising {:?} within {:?}",
            config.link.device_name,
            config.scan.deadline()
        ),
    }
}
