use serde::Serialize;
use std::sync::Mutex;

/// Frame and message counters for both ends of the link.
pub struct LinkMetrics {
    inner: Mutex<MetricsSnapshot>,
}

/// Point-in-time copy of the link counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub frames_sent: u64,
    pub messages_sent: u64,
    pub send_failures: u64,
    pub frames_received: u64,
    pub messages_decoded: u64,
    pub decode_errors: u64,
    pub framing_stalls: u64,
    pub dispatch_errors: u64,
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot::default()),
        }
    }

    fn bump(&self, update: impl FnOnce(&mut MetricsSnapshot)) {
        if let Ok(mut metrics) = self.inner.lock() {
            update(&mut metrics);
        }
    }

    pub fn record_frame_sent(&self) {
        self.bump(|m| m.frames_sent += 1);
    }

    pub fn record_message_sent(&self) {
        self.bump(|m| m.messages_sent += 1);
    }

    pub fn record_send_failure(&self) {
        self.bump(|m| m.send_failures += 1);
    }

    pub fn record_frame_received(&self) {
        self.bump(|m| m.frames_received += 1);
    }

    pub fn record_decoded(&self) {
        self.bump(|m| m.messages_decoded += 1);
    }

    pub fn record_decode_error(&self) {
        self.bump(|m| m.decode_errors += 1);
    }

    pub fn record_stall(&self) {
        self.bump(|m| m.framing_stalls += 1);
    }

    pub fn record_dispatch_error(&self) {
        self.bump(|m| m.dispatch_errors += 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        if let Ok(metrics) = self.inner.lock() {
            *metrics
        } else {
            MetricsSnapshot::default()
        }
    }
}

impl Default for LinkMetrics {
    fn default() -> Self {
        Self::new()
    }
}
