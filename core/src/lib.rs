//! Transport core for moving position fixes from a tracker to a viewer.
//!
//! Fixes are gated on receiver quality, encoded into a compact text payload,
//! split into MTU-sized frames and pushed over a notification radio with no
//! acknowledgment. The receiving side reassembles frames using only their
//! length as the end-of-message signal and hands decoded records to a
//! consumer callback.

pub mod codec;
pub mod fix;
pub mod framing;
pub mod link;
pub mod prelude;
pub mod telemetry;

pub use prelude::{FixRecord, Frame, FramingMode, LinkConfig, MAX_MTU, MTU};
