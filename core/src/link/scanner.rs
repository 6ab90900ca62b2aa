use crate::link::schedule::RetryBudget;
use crate::link::{Central, DeviceHandle};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time;

/// Discovery budget: total deadline, length of one sweep, and the pause
/// after a sweep that found nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanPolicy {
    pub deadline_secs: u64,
    pub sweep_window_secs: u64,
    pub retry_interval_secs: u64,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            deadline_secs: 300,
            sweep_window_secs: 5,
            retry_interval_secs: 5,
        }
    }
}

impl ScanPolicy {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn sweep_window(&self) -> Duration {
        Duration::from_secs(self.sweep_window_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

/// Sweeps until a device whose advertised name contains `name` is heard or
/// the policy deadline passes. Returns the first match of the sweep that
/// found one; `None` means discovery timed out.
pub async fn find_device<C: Central>(
    central: &mut C,
    name: &str,
    policy: &ScanPolicy,
) -> Option<DeviceHandle> {
    let budget = RetryBudget::start(policy.deadline(), policy.retry_interval());
    let mut sweeps = 0u32;

    while !budget.is_exhausted() {
        sweeps += 1;
        info!(
            "scanning for {:?} (sweep {}, {}s left)",
            name,
            sweeps,
            budget.remaining().as_secs()
        );
        let window = budget.clamp(policy.sweep_window());
        match time::timeout_at(budget.deadline(), central.sweep(window)).await {
            Ok(Ok(devices)) => {
                if let Some(device) = devices.into_iter().find(|d| d.name.contains(name)) {
                    info!("found {} ({})", device.name, device.address);
                    return Some(device);
                }
            }
            Ok(Err(err)) => warn!("discovery sweep failed: {}", err),
            Err(_) => break,
        }
        if !budget.pause().await {
            break;
        }
    }

    warn!(
        "no device matching {:?} after {} sweeps in {:?}",
        name,
        sweeps,
        policy.deadline()
    );
    None
}
