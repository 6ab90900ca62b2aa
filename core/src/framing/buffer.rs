use crate::prelude::ReassemblyError;

/// Bounded accumulation buffer for the one message in flight.
pub struct ReassemblyBuffer {
    bytes: Vec<u8>,
    max_capacity: usize,
}

impl ReassemblyBuffer {
    pub fn with_capacity(max_capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(max_capacity),
            max_capacity,
        }
    }

    /// Appends a frame, refusing to grow past the configured bound.
    pub fn append(&mut self, frame: &[u8]) -> Result<(), ReassemblyError> {
        if self.bytes.len() + frame.len() > self.max_capacity {
            return Err(ReassemblyError::Overflow {
                limit: self.max_capacity,
            });
        }
        self.bytes.extend_from_slice(frame);
        Ok(())
    }

    pub fn contents(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn reset(&mut self) {
        self.bytes.clear();
    }
}
