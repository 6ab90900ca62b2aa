//! Radio link seams and the protocol pieces built on them.
//!
//! ```text
//!  device                               viewer
//!  ┌──────────────┐                     ┌──────────────┐
//!  │ FrameSender  │                     │ find_device  │
//!  └──────┬───────┘                     │ Session      │
//!         │ Peripheral                  └──────┬───────┘
//!         ▼                                    │ Central / Link
//!  ┌──────────────┐   advertise / notify ┌─────▼────────┐
//!  │ udp/loopback │ ───────────────────▶ │ udp/loopback │
//!  └──────────────┘                      └──────────────┘
//! ```
//!
//! The protocol only needs four radio primitives: advertise a name, connect,
//! subscribe to one notification characteristic, and push frames. Backends
//! implement [`Peripheral`], [`Central`] and [`Link`]; `udp` emulates the
//! radio with datagrams on a host, `loopback` keeps everything in memory.

pub mod loopback;
pub mod scanner;
pub mod schedule;
pub mod session;
pub mod transport;
pub mod udp;

pub use scanner::{find_device, ScanPolicy};
pub use schedule::RetryBudget;
pub use session::Session;
pub use transport::FrameSender;

use crate::prelude::RadioError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Service advertised by the tracker.
pub const SERVICE_UUID: u128 = 0x6e400001_b5a3_f393_e0a9_e50e24dcca9e;
/// Characteristic carrying fix frames as notifications.
pub const NOTIFY_CHARACTERISTIC: u128 = 0x6e400002_b5a3_f393_e0a9_e50e24dcca9e;

/// A device heard advertising during a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceHandle {
    pub name: String,
    /// Backend-specific address (socket address, MAC, ...).
    pub address: String,
}

/// Device-side radio: pushes one notification frame to subscribed peers.
#[allow(async_fn_in_trait)]
pub trait Peripheral {
    async fn notify(&mut self, frame: &[u8]) -> Result<(), RadioError>;
}

/// Viewer-side radio: discovers and connects to peripherals.
#[allow(async_fn_in_trait)]
pub trait Central {
    type Link: Link;

    /// Listens for advertisements for `window`, returning every device heard.
    async fn sweep(&mut self, window: Duration) -> Result<Vec<DeviceHandle>, RadioError>;

    async fn connect(&mut self, device: &DeviceHandle) -> Result<Self::Link, RadioError>;
}

/// An established connection to one peripheral.
#[allow(async_fn_in_trait)]
pub trait Link {
    async fn subscribe(&mut self, characteristic: u128) -> Result<(), RadioError>;

    /// Waits for the next notification frame. `Ok(None)` means the link is
    /// gone. Must be cancel safe.
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, RadioError>;

    async fn disconnect(&mut self) -> Result<(), RadioError>;
}
