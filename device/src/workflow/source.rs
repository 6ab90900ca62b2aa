use crate::generator::profile::SimulatedWalk;
use crate::workflow::config::SourceConfig;
use anyhow::Context;
use fixlink::fix::{FixSource, GpsdSource, NmeaSource, RawSample};
use fixlink::prelude::AcquisitionError;
use log::info;
use tokio::fs::File;
use tokio::io::BufReader;

/// The receiver backing a device, chosen by configuration.
pub enum DeviceSource {
    Simulated(SimulatedWalk),
    Gpsd(GpsdSource),
    Nmea(NmeaSource<BufReader<File>>),
}

impl DeviceSource {
    pub async fn open(config: &SourceConfig) -> anyhow::Result<Self> {
        let source = match config {
            SourceConfig::Simulated(walk) => {
                info!("using a simulated walk (seed {})", walk.seed);
                DeviceSource::Simulated(SimulatedWalk::new(walk.clone()))
            }
            SourceConfig::Gpsd { address } => DeviceSource::Gpsd(
                GpsdSource::connect(address)
                    .await
                    .with_context(|| format!("connecting to gpsd at {}", address))?,
            ),
            SourceConfig::Nmea { path } => {
                let file = File::open(path)
                    .await
                    .with_context(|| format!("opening NMEA stream {}", path.display()))?;
                info!("reading NMEA sentences from {}", path.display());
                DeviceSource::Nmea(NmeaSource::new(BufReader::new(file)))
            }
        };
        Ok(source)
    }
}

impl FixSource for DeviceSource {
    async fn next_sample(&mut self) -> Result<RawSample, AcquisitionError> {
        match self {
            DeviceSource::Simulated(walk) => walk.next_sample().await,
            DeviceSource::Gpsd(gpsd) => gpsd.next_sample().await,
            DeviceSource::Nmea(nmea) => nmea.next_sample().await,
        }
    }
}
