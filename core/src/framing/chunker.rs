//! Splitting an encoded payload into radio frames.
//!
//! The receiver treats a frame shorter than the MTU as the end of a message.
//! When the payload length is an exact multiple of the MTU the last data
//! frame is full, and under [`FramingMode::Legacy`] the receiver cannot tell
//! it apart from a middle frame: it keeps waiting for a frame that never
//! comes. [`FramingMode::Terminated`] closes such messages with a zero-length
//! frame. Every other payload is framed identically in both modes.

use crate::prelude::{Frame, FramingMode};

/// Splits `payload` into frames of `mtu` bytes plus a shorter remainder.
///
/// An `mtu` of zero is treated as one; [`crate::LinkConfig::validate`]
/// rejects it before it gets here.
pub fn chunk(payload: &[u8], mtu: usize, mode: FramingMode) -> Vec<Frame> {
    let mtu = mtu.max(1);
    let mut frames: Vec<Frame> = payload.chunks(mtu).map(<[u8]>::to_vec).collect();
    if mode == FramingMode::Terminated && needs_terminator(payload.len(), mtu) {
        frames.push(Frame::new());
    }
    frames
}

/// Whether a payload of `len` bytes ends on a full frame.
pub fn needs_terminator(len: usize, mtu: usize) -> bool {
    len % mtu.max(1) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_into_full_frames_and_remainder() {
        let payload: Vec<u8> = (0..53).collect();
        let frames = chunk(&payload, 20, FramingMode::Legacy);
        let sizes: Vec<usize> = frames.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![20, 20, 13]);
        assert_eq!(frames.concat(), payload);
    }

    #[test]
    fn terminated_mode_matches_legacy_off_the_boundary() {
        let payload = vec![7u8; 53];
        assert_eq!(
            chunk(&payload, 20, FramingMode::Legacy),
            chunk(&payload, 20, FramingMode::Terminated)
        );
    }

    #[test]
    fn legacy_mode_ends_multiple_of_mtu_on_a_full_frame() {
        let payload = vec![1u8; 40];
        let frames = chunk(&payload, 20, FramingMode::Legacy);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == 20));
    }

    #[test]
    fn terminated_mode_appends_empty_frame_on_the_boundary() {
        let payload = vec![1u8; 40];
        let frames = chunk(&payload, 20, FramingMode::Terminated);
        assert_eq!(frames.len(), 3);
        assert!(frames[2].is_empty());
        assert_eq!(frames.concat(), payload);
    }

    #[test]
    fn every_legacy_frame_fits_the_mtu() {
        for len in 1..=100usize {
            let payload = vec![0xAB; len];
            let frames = chunk(&payload, 20, FramingMode::Legacy);
            assert!(frames.iter().all(|f| (1..=20).contains(&f.len())));
            assert_eq!(frames.concat(), payload);
        }
    }

    #[test]
    fn empty_payload() {
        assert!(chunk(&[], 20, FramingMode::Legacy).is_empty());
        assert_eq!(chunk(&[], 20, FramingMode::Terminated), vec![Frame::new()]);
    }
}
