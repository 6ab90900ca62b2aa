use fixlink::fix::{FixQuality, FixSource, RawSample};
use anyhow::ensure;
use fixlink::prelude::AcquisitionError;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const METERS_PER_DEGREE: f64 = 111_320.0;
const MAX_LATITUDE: f64 = 89.9;
const MAX_TURN_JITTER: f64 = 180.0;

/// Configuration for the synthetic track used on the bench.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkConfig {
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub speed_mps: f64,
    pub heading_deg: f64,
    /// Largest random heading change per step, in degrees.
    pub turn_jitter_deg: f64,
    /// Probability that a step reports no fix.
    pub dropout: f64,
    pub seed: u64,
    /// Simulated time between samples.
    pub step_secs: f64,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            origin_lat: 37.7749,
            origin_lon: -122.4194,
            speed_mps: 1.2,
            heading_deg: 90.0,
            turn_jitter_deg: 15.0,
            dropout: 0.1,
            seed: 0,
            step_secs: 5.0,
        }
    }
}

impl WalkConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("origin_lat", self.origin_lat),
            ("origin_lon", self.origin_lon),
            ("speed_mps", self.speed_mps),
            ("heading_deg", self.heading_deg),
            ("turn_jitter_deg", self.turn_jitter_deg),
            ("step_secs", self.step_secs),
        ] {
            ensure!(value.is_finite(), "simulated {} must be finite, got {}", name, value);
        }
        ensure!(
            (0.0..=1.0).contains(&self.dropout),
            "simulated dropout {} outside [0, 1]",
            self.dropout
        );
        ensure!(self.speed_mps >= 0.0, "simulated speed_mps must not be negative");
        ensure!(self.step_secs >= 0.0, "simulated step_secs must not be negative");
        ensure!(
            self.turn_jitter_deg.abs() <= MAX_TURN_JITTER,
            "simulated turn_jitter_deg {} outside [-180, 180]",
            self.turn_jitter_deg
        );
        Ok(())
    }
}

/// Seeded random walk standing in for a satellite receiver.
///
/// Samples carry no timestamp so the gate stamps them with wall-clock time.
pub struct SimulatedWalk {
    config: WalkConfig,
    rng: StdRng,
    latitude: f64,
    longitude: f64,
    heading: f64,
}

impl SimulatedWalk {
    pub fn new(config: WalkConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            latitude: config.origin_lat.clamp(-MAX_LATITUDE, MAX_LATITUDE),
            longitude: wrap_longitude(config.origin_lon),
            heading: config.heading_deg.rem_euclid(360.0),
            config,
        }
    }

    pub fn step(&mut self) -> RawSample {
        if self.rng.gen_bool(self.config.dropout.clamp(0.0, 1.0)) {
            return RawSample::without_fix(FixQuality::NoFix);
        }

        // min() also maps NaN to the cap
        let jitter = self.config.turn_jitter_deg.abs().min(MAX_TURN_JITTER);
        if jitter > 0.0 {
            self.heading = (self.heading + self.rng.gen_range(-jitter..=jitter)).rem_euclid(360.0);
        }
        let speed = self.config.speed_mps.max(0.0);
        let distance = speed * self.config.step_secs.max(0.0);
        let radians = self.heading.to_radians();
        let north = distance * radians.cos();
        let east = distance * radians.sin();
        self.latitude =
            (self.latitude + north / METERS_PER_DEGREE).clamp(-MAX_LATITUDE, MAX_LATITUDE);
        self.longitude = wrap_longitude(
            self.longitude + east / (METERS_PER_DEGREE * self.latitude.to_radians().cos()),
        );

        RawSample {
            latitude: self.latitude,
            longitude: self.longitude,
            quality: FixQuality::ThreeD,
            speed: Some(speed),
            track: Some(self.heading),
            timestamp: None,
        }
    }
}

impl FixSource for SimulatedWalk {
    async fn next_sample(&mut self) -> Result<RawSample, AcquisitionError> {
        Ok(self.step())
    }
}

fn wrap_longitude(longitude: f64) -> f64 {
    (longitude + 180.0).rem_euclid(360.0) - 180.0
}
