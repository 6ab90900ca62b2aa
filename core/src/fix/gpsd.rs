use crate::fix::{FixQuality, FixSource, RawSample};
use crate::prelude::AcquisitionError;
use log::{debug, info};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

pub const DEFAULT_GPSD_ADDR: &str = "127.0.0.1:2947";

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true}\n";
const POLL_COMMAND: &[u8] = b"?POLL;\n";

/// Reports read while waiting for a poll response before giving up.
const MAX_REPORTS_PER_POLL: usize = 64;

/// Fix source backed by a gpsd daemon, polled once per sample.
pub struct GpsdSource {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    line: String,
}

#[derive(Debug, Deserialize)]
struct Report {
    class: String,
    #[serde(default)]
    tpv: Vec<TpvReport>,
}

#[derive(Debug, Deserialize)]
struct TpvReport {
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
    speed: Option<f64>,
    track: Option<f64>,
}

impl GpsdSource {
    pub async fn connect(addr: &str) -> Result<Self, AcquisitionError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|err| AcquisitionError::Unavailable(format!("gpsd at {}: {}", addr, err)))?;
        let (read_half, mut writer) = stream.into_split();
        writer.write_all(WATCH_COMMAND).await?;
        info!("connected to gpsd at {}", addr);
        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
            line: String::new(),
        })
    }

    async fn read_report(&mut self) -> Result<Report, AcquisitionError> {
        self.line.clear();
        if self.reader.read_line(&mut self.line).await? == 0 {
            return Err(AcquisitionError::Unavailable(
                "gpsd closed the connection".into(),
            ));
        }
        serde_json::from_str(self.line.trim())
            .map_err(|err| AcquisitionError::Malformed(format!("gpsd report: {}", err)))
    }
}

impl FixSource for GpsdSource {
    async fn next_sample(&mut self) -> Result<RawSample, AcquisitionError> {
        self.writer.write_all(POLL_COMMAND).await?;
        for _ in 0..MAX_REPORTS_PER_POLL {
            let report = self.read_report().await?;
            if report.class == "POLL" {
                return Ok(sample_from_poll(&report));
            }
            debug!("skipping gpsd {} report", report.class);
        }
        Err(AcquisitionError::Malformed(
            "gpsd never answered the poll".into(),
        ))
    }
}

fn sample_from_poll(report: &Report) -> RawSample {
    let Some(tpv) = report.tpv.first() else {
        return RawSample::without_fix(FixQuality::NoData);
    };
    let quality = FixQuality::from_mode(tpv.mode);
    match (tpv.lat, tpv.lon) {
        (Some(latitude), Some(longitude)) => RawSample {
            latitude,
            longitude,
            quality,
            speed: tpv.speed,
            track: tpv.track,
            timestamp: None,
        },
        _ if quality.is_usable() => RawSample::without_fix(FixQuality::NoFix),
        _ => RawSample::without_fix(quality),
    }
}
