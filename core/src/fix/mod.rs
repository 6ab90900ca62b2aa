//! Fix acquisition and the quality gate.
//!
//! A [`FixSource`] yields raw samples tagged with the receiver's fix quality;
//! [`FixGate`] turns the usable ones into [`FixRecord`]s. Which source backs
//! a device is a configuration choice: gpsd over TCP, an NMEA 0183 text
//! stream, or anything else implementing the trait.

pub mod gpsd;
pub mod nmea;

pub use gpsd::GpsdSource;
pub use nmea::NmeaSource;

use crate::prelude::{AcquisitionError, FixRecord};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Receiver fix quality, ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FixQuality {
    NoData,
    NoFix,
    TwoD,
    ThreeD,
}

impl FixQuality {
    /// Maps the gpsd / NMEA GSA mode number.
    pub fn from_mode(mode: u8) -> Self {
        match mode {
            1 => FixQuality::NoFix,
            2 => FixQuality::TwoD,
            3 => FixQuality::ThreeD,
            _ => FixQuality::NoData,
        }
    }

    pub fn is_usable(self) -> bool {
        self >= FixQuality::TwoD
    }
}

/// One unfiltered sample from a positioning receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub latitude: f64,
    pub longitude: f64,
    pub quality: FixQuality,
    pub speed: Option<f64>,
    pub track: Option<f64>,
    /// Receiver time in Unix seconds, when the source provides one.
    pub timestamp: Option<f64>,
}

impl RawSample {
    pub fn without_fix(quality: FixQuality) -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            quality,
            speed: None,
            track: None,
            timestamp: None,
        }
    }
}

/// A positioning receiver.
#[allow(async_fn_in_trait)]
pub trait FixSource {
    /// Returns the receiver's current sample.
    async fn next_sample(&mut self) -> Result<RawSample, AcquisitionError>;
}

/// What to do with a sample whose timestamp is not newer than the last emitted one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    #[default]
    Allow,
    Suppress,
}

/// Binary quality gate between the receiver and the encoder.
pub struct FixGate {
    policy: DuplicatePolicy,
    last_emitted: Option<f64>,
}

impl FixGate {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            policy,
            last_emitted: None,
        }
    }

    /// Returns a record iff the sample carries at least a 2D fix.
    ///
    /// Low quality is the common case while the receiver acquires satellites
    /// and is not an error. Samples claiming a fix with impossible
    /// coordinates are treated as having none.
    pub fn observe(&mut self, sample: &RawSample) -> Option<FixRecord> {
        if !sample.quality.is_usable() {
            debug!("no usable fix ({:?})", sample.quality);
            return None;
        }
        if !valid_coordinates(sample.latitude, sample.longitude) {
            warn!(
                "{:?} sample with invalid coordinates {}, {}",
                sample.quality, sample.latitude, sample.longitude
            );
            return None;
        }

        let timestamp = sample
            .timestamp
            .filter(|t| t.is_finite() && *t >= 0.0)
            .unwrap_or_else(unix_now);
        if self.policy == DuplicatePolicy::Suppress
            && self.last_emitted.is_some_and(|last| timestamp <= last)
        {
            debug!("suppressing fix at {} (not newer than last emitted)", timestamp);
            return None;
        }

        self.last_emitted = Some(timestamp);
        Some(FixRecord {
            latitude: sample.latitude,
            longitude: sample.longitude,
            speed: sample.speed.filter(|s| s.is_finite() && *s >= 0.0),
            track: sample.track.and_then(normalize_track),
            timestamp,
        })
    }

    pub fn last_emitted(&self) -> Option<f64> {
        self.last_emitted
    }
}

impl Default for FixGate {
    fn default() -> Self {
        Self::new(DuplicatePolicy::Allow)
    }
}

fn valid_coordinates(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}

fn normalize_track(track: f64) -> Option<f64> {
    if !track.is_finite() {
        return None;
    }
    let normalized = track.rem_euclid(360.0);
    // rem_euclid rounds tiny negative angles up to exactly 360.
    Some(if normalized >= 360.0 { 0.0 } else { normalized })
}

/// Wall-clock time in Unix seconds.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
