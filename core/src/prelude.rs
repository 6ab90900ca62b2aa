use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest payload carried by one notification frame.
pub const MTU: usize = 20;

/// Largest frame a link may carry. A notification datagram is one opcode
/// byte plus the frame and must fit in 512 bytes.
pub const MAX_MTU: usize = 511;

/// One radio-layer payload unit.
pub type Frame = Vec<u8>;

/// A validated position fix, the unit carried by one message on the link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixRecord {
    pub latitude: f64,
    pub longitude: f64,
    /// Ground speed in m/s; `None` when the receiver did not report one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Course over ground in degrees, `[0, 360)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<f64>,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

impl FixRecord {
    pub fn new(
        latitude: f64,
        longitude: f64,
        speed: Option<f64>,
        track: Option<f64>,
        timestamp: f64,
    ) -> Self {
        Self {
            latitude,
            longitude,
            speed,
            track,
            timestamp,
        }
    }

    /// Checks the numeric ranges every record on the wire must respect.
    pub fn validate(&self) -> Result<(), CodecError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(CodecError::InvalidRecord(format!(
                "latitude {} outside [-90, 90]",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(CodecError::InvalidRecord(format!(
                "longitude {} outside [-180, 180]",
                self.longitude
            )));
        }
        if let Some(speed) = self.speed {
            if !speed.is_finite() || speed < 0.0 {
                return Err(CodecError::InvalidRecord(format!(
                    "speed {} is not a non-negative number",
                    speed
                )));
            }
        }
        if let Some(track) = self.track {
            if !track.is_finite() || !(0.0..360.0).contains(&track) {
                return Err(CodecError::InvalidRecord(format!(
                    "track {} outside [0, 360)",
                    track
                )));
            }
        }
        if !self.timestamp.is_finite() || self.timestamp < 0.0 {
            return Err(CodecError::InvalidRecord(format!(
                "timestamp {} is not a non-negative number",
                self.timestamp
            )));
        }
        Ok(())
    }
}

/// How a message boundary is signalled to the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FramingMode {
    /// End of message is a frame shorter than the MTU, nothing else. A payload
    /// whose length is a multiple of the MTU never terminates.
    Legacy,
    /// Same as `Legacy`, plus a zero-length frame after a full final frame.
    #[default]
    Terminated,
}

/// Link parameters shared by the device and the viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub device_name: String,
    pub mtu: usize,
    pub framing: FramingMode,
    pub pacing_ms: u64,
    pub max_message_len: usize,
    pub idle_timeout_ms: Option<u64>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device_name: "NetGuardian".into(),
            mtu: MTU,
            framing: FramingMode::Terminated,
            pacing_ms: 100,
            max_message_len: 512,
            idle_timeout_ms: Some(10_000),
        }
    }
}

impl LinkConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mtu == 0 || self.mtu > MAX_MTU {
            return Err(ConfigError::Invalid(format!(
                "mtu must be within 1..={}, got {}",
                MAX_MTU, self.mtu
            )));
        }
        if self.max_message_len < self.mtu {
            return Err(ConfigError::Invalid(format!(
                "max_message_len {} is smaller than one frame",
                self.max_message_len
            )));
        }
        if self.device_name.is_empty() {
            return Err(ConfigError::Invalid("device_name is empty".into()));
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid link configuration: {0}")]
    Invalid(String),
}

/// Failure to obtain a sample from the positioning receiver.
#[derive(thiserror::Error, Debug)]
pub enum AcquisitionError {
    #[error("fix source unavailable: {0}")]
    Unavailable(String),
    #[error("malformed fix report: {0}")]
    Malformed(String),
    #[error("fix source i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors of the wire encoding. On the encode side these indicate a bug.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("payload is not UTF-8")]
    NotUtf8,
    #[error("unsupported payload version {0:?}")]
    UnsupportedVersion(String),
    #[error("expected field {expected:?}, found {found:?}")]
    UnexpectedField { expected: &'static str, found: String },
    #[error("missing field {0:?}")]
    MissingField(&'static str),
    #[error("field {field:?} has invalid number {value:?}")]
    InvalidNumber { field: &'static str, value: String },
    #[error("trailing field {0:?}")]
    TrailingField(String),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Failure reported by a radio backend.
#[derive(thiserror::Error, Debug)]
pub enum RadioError {
    #[error("radio i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("not connected")]
    NotConnected,
    #[error("not subscribed to notifications")]
    NotSubscribed,
    #[error("peer refused: {0}")]
    Refused(String),
    #[error("unknown characteristic {0:032x}")]
    UnknownCharacteristic(u128),
    #[error("invalid device address {0:?}")]
    InvalidAddress(String),
    #[error("radio failure: {0}")]
    Failure(String),
}

/// Failure while handing a message to the radio.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("frame {frame} of {total} failed, message aborted: {source}")]
    SendFailure {
        frame: usize,
        total: usize,
        #[source]
        source: RadioError,
    },
    #[error("frame {index} is {len} bytes, larger than the {mtu}-byte MTU")]
    Oversized { index: usize, len: usize, mtu: usize },
}

/// Failure to establish or use a session with a discovered device.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("connecting to {device} failed: {source}")]
    Connect {
        device: String,
        #[source]
        source: RadioError,
    },
    #[error("subscribing to notifications failed: {0}")]
    Subscribe(#[source] RadioError),
    #[error("{phase} timed out after {after:?}")]
    Timeout {
        phase: &'static str,
        after: Duration,
    },
    #[error("session is not connected")]
    NotConnected,
    #[error("session has no notification callback")]
    NotSubscribed,
    #[error("link failure: {0}")]
    Link(#[from] RadioError),
}

/// Per-message receive failure. The reassembler is back to idle when one is returned.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ReassemblyError {
    #[error("message decode failed: {0}")]
    Decode(#[from] CodecError),
    #[error("frame of {len} bytes exceeds the {mtu}-byte MTU")]
    Oversized { len: usize, mtu: usize },
    #[error("message exceeds {limit} bytes")]
    Overflow { limit: usize },
}

/// The consumer failed while handling a delivered record.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("consumer panicked: {0}")]
    ConsumerPanicked(String),
}
