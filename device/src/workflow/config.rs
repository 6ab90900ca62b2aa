use crate::generator::profile::WalkConfig;
use anyhow::{ensure, Context};
use fixlink::fix::gpsd::DEFAULT_GPSD_ADDR;
use fixlink::fix::DuplicatePolicy;
use fixlink::link::udp::DEFAULT_ADVERTISE_INTERVAL;
use fixlink::LinkConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where the viewer listens for advertisements by default.
pub const DEFAULT_ADVERTISE_TO: &str = "127.0.0.1:47800";

/// Which receiver feeds the driver loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    Simulated(WalkConfig),
    Gpsd { address: String },
    Nmea { path: PathBuf },
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Gpsd {
            address: DEFAULT_GPSD_ADDR.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    pub bind: SocketAddr,
    pub advertise_to: SocketAddr,
    pub advertise_interval_ms: u64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 0)),
            advertise_to: SocketAddr::from(([127, 0, 0, 1], 47800)),
            advertise_interval_ms: DEFAULT_ADVERTISE_INTERVAL.as_millis() as u64,
        }
    }
}

impl RadioConfig {
    pub fn advertise_interval(&self) -> Duration {
        Duration::from_millis(self.advertise_interval_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub link: LinkConfig,
    /// Seconds between fix acquisitions.
    pub interval_secs: u64,
    pub source: SourceConfig,
    pub radio: RadioConfig,
    pub duplicate_policy: DuplicatePolicy,
    /// Address of the read-only status view; disabled when absent.
    pub http: Option<SocketAddr>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            interval_secs: 5,
            source: SourceConfig::default(),
            radio: RadioConfig::default(),
            duplicate_policy: DuplicatePolicy::Allow,
            http: None,
        }
    }
}

impl DeviceConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading device config {}", path_ref.display()))?;
        let config: DeviceConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing device config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_args(link: LinkConfig, source: SourceConfig, interval_secs: u64) -> Self {
        Self {
            link,
            interval_secs,
            source,
            ..Default::default()
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.link.validate()?;
        ensure!(self.interval_secs > 0, "interval_secs must be at least 1");
        ensure!(
            self.radio.advertise_interval_ms > 0,
            "radio.advertise_interval_ms must be at least 1"
        );
        if let SourceConfig::Simulated(walk) = &self.source {
            walk.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixlink::FramingMode;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_the_reference_device() {
        let cfg = DeviceConfig::default();
        assert_eq!(cfg.interval(), Duration::from_secs(5));
        assert_eq!(cfg.link.device_name, "NetGuardian");
        assert_eq!(cfg.link.mtu, 20);
        assert_eq!(cfg.link.framing, FramingMode::Terminated);
        assert_eq!(cfg.radio.advertise_to.to_string(), DEFAULT_ADVERTISE_TO);
        cfg.validate().unwrap();
    }

    #[test]
    fn config_from_args_keeps_the_link_settings() {
        let link = LinkConfig {
            framing: FramingMode::Legacy,
            ..LinkConfig::default()
        };
        let cfg = DeviceConfig::from_args(link, SourceConfig::Simulated(WalkConfig::default()), 2);
        assert_eq!(cfg.link.framing, FramingMode::Legacy);
        assert_eq!(cfg.interval_secs, 2);
        assert!(matches!(cfg.source, SourceConfig::Simulated(_)));
    }

    #[test]
    fn config_load_reads_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"interval_secs: 1\n\
              link:\n  device_name: Tracker-7\n  framing: legacy\n\
              source:\n  kind: nmea\n  path: /dev/ttyUSB0\n\
              http: 127.0.0.1:9000\n",
        )
        .unwrap();
        let path = temp.into_temp_path();
        let cfg = DeviceConfig::load(&path).unwrap();
        assert_eq!(cfg.interval_secs, 1);
        assert_eq!(cfg.link.device_name, "Tracker-7");
        assert_eq!(cfg.link.framing, FramingMode::Legacy);
        assert_eq!(cfg.link.mtu, 20);
        assert_eq!(
            cfg.source,
            SourceConfig::Nmea {
                path: PathBuf::from("/dev/ttyUSB0")
            }
        );
        assert_eq!(cfg.http, Some(SocketAddr::from(([127, 0, 0, 1], 9000))));
    }

    #[test]
    fn simulated_source_reads_walk_overrides() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"source:\n  kind: simulated\n  seed: 7\n  dropout: 0.0\n")
            .unwrap();
        let path = temp.into_temp_path();
        let cfg = DeviceConfig::load(&path).unwrap();
        let SourceConfig::Simulated(walk) = cfg.source else {
            panic!("expected a simulated source");
        };
        assert_eq!(walk.seed, 7);
        assert_eq!(walk.dropout, 0.0);
        assert_eq!(walk.speed_mps, 1.2);
    }

    #[test]
    fn validate_rejects_a_zero_interval() {
        let cfg = DeviceConfig {
            interval_secs: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_an_infinite_walk_jitter() {
        let cfg = DeviceConfig {
            source: SourceConfig::Simulated(WalkConfig {
                turn_jitter_deg: f64::INFINITY,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_reports_the_path_on_failure() {
        let err = DeviceConfig::load("/nonexistent/device.yaml").unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/device.yaml"));
    }
}
