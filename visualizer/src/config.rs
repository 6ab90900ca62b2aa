use anyhow::{ensure, Context};
use fixlink::link::ScanPolicy;
use fixlink::LinkConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub link: LinkConfig,
    pub scan: ScanPolicy,
    /// Where advertisements and frames arrive.
    pub listen: SocketAddr,
    pub connect_timeout_secs: u64,
    pub subscribe_timeout_secs: u64,
    /// Silence after which a connected tracker counts as gone.
    pub supervision_secs: u64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            scan: ScanPolicy::default(),
            listen: SocketAddr::from(([0, 0, 0, 0], 47800)),
            connect_timeout_secs: 10,
            subscribe_timeout_secs: 10,
            supervision_secs: 10,
        }
    }
}

impl ViewerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading viewer config {}", path_ref.display()))?;
        let config: ViewerConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing viewer config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_args(device_name: &str, listen: SocketAddr, deadline_secs: u64) -> Self {
        Self {
            link: LinkConfig {
                device_name: device_name.to_string(),
                ..LinkConfig::default()
            },
            scan: ScanPolicy {
                deadline_secs,
                ..ScanPolicy::default()
            },
            listen,
            ..Default::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_secs(self.subscribe_timeout_secs)
    }

    pub fn supervision(&self) -> Duration {
        Duration::from_secs(self.supervision_secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.link.validate()?;
        ensure!(self.scan.sweep_window_secs > 0, "scan.sweep_window_secs must be at least 1");
        ensure!(self.connect_timeout_secs > 0, "connect_timeout_secs must be at least 1");
        ensure!(self.subscribe_timeout_secs > 0, "subscribe_timeout_secs must be at least 1");
        ensure!(self.supervision_secs > 0, "supervision_secs must be at least 1");
        Ok(())
    }
}
