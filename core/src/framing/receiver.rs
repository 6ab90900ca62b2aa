use crate::framing::dispatcher::Dispatcher;
use crate::framing::reassembler::{ReassemblyState, Reassembler};
use crate::prelude::LinkConfig;
use crate::telemetry::log::LogManager;
use crate::telemetry::metrics::LinkMetrics;
use std::sync::Arc;
use std::time::Instant;

/// Receiver-side pipeline: reassembles notification frames and dispatches
/// decoded records. Every per-message failure is logged, counted and
/// absorbed here; nothing propagates to the event loop.
pub struct Receiver {
    reassembler: Reassembler,
    dispatcher: Dispatcher,
    metrics: Arc<LinkMetrics>,
    logger: LogManager,
}

impl Receiver {
    pub fn new(config: &LinkConfig, dispatcher: Dispatcher, metrics: Arc<LinkMetrics>) -> Self {
        Self {
            reassembler: Reassembler::from_config(config),
            dispatcher,
            metrics,
            logger: LogManager::new("receiver"),
        }
    }

    /// Notification callback for [`crate::link::session::Session::subscribe`].
    pub fn on_notification(&mut self, frame: &[u8]) {
        self.on_notification_at(frame, Instant::now());
    }

    pub fn on_notification_at(&mut self, frame: &[u8], now: Instant) {
        self.metrics.record_frame_received();
        if self.reassembler.expire(now).is_some() {
            self.metrics.record_stall();
        }

        let record = match self.reassembler.feed(frame, now) {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(err) => {
                self.metrics.record_decode_error();
                self.logger.warn(&format!("dropping message: {}", err));
                return;
            }
        };

        self.metrics.record_decoded();
        self.logger.detail(&format!(
            "decoded fix {:.6},{:.6} at {}",
            record.latitude, record.longitude, record.timestamp
        ));
        if let Err(err) = self.dispatcher.dispatch(record) {
            self.metrics.record_dispatch_error();
            self.logger.warn(&format!("delivery failed: {}", err));
        }
    }

    pub fn state(&self) -> ReassemblyState {
        self.reassembler.state()
    }

    pub fn delivered(&self) -> u64 {
        self.dispatcher.delivered()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use crate::framing::chunker::chunk;
    use crate::prelude::{FixRecord, FramingMode, MTU};
    use std::sync::Mutex;
    use std::time::Duration;

    fn collecting_receiver(
        config: &LinkConfig,
    ) -> (Receiver, Arc<Mutex<Vec<FixRecord>>>, Arc<LinkMetrics>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let metrics = Arc::new(LinkMetrics::new());
        let dispatcher = Dispatcher::new(move |record| sink.lock().unwrap().push(record));
        (Receiver::new(config, dispatcher, metrics.clone()), seen, metrics)
    }

    fn frames_for(record: &FixRecord) -> Vec<Vec<u8>> {
        chunk(&encode(record).unwrap(), MTU, FramingMode::Terminated)
    }

    #[test]
    fn delivers_each_message_once_in_order() {
        let (mut receiver, seen, metrics) = collecting_receiver(&LinkConfig::default());
        let first = FixRecord::new(10.0, 20.0, Some(0.5), None, 100.0);
        let second = FixRecord::new(10.5, 20.5, None, Some(45.0), 105.0);

        for frame in frames_for(&first).iter().chain(frames_for(&second).iter()) {
            receiver.on_notification(frame);
        }

        assert_eq!(*seen.lock().unwrap(), vec![first, second]);
        assert_eq!(metrics.snapshot().messages_decoded, 2);
        assert_eq!(receiver.delivered(), 2);
    }

    #[test]
    fn stale_partial_message_is_dropped_before_the_next_one() {
        let (mut receiver, seen, metrics) = collecting_receiver(&LinkConfig::default());
        let start = Instant::now();
        receiver.on_notification_at(&[b'v'; MTU], start);

        let record = FixRecord::new(1.0, 2.0, None, None, 3.0);
        let later = start + Duration::from_secs(30);
        for frame in frames_for(&record) {
            receiver.on_notification_at(&frame, later);
        }

        assert_eq!(*seen.lock().unwrap(), vec![record]);
        assert_eq!(metrics.snapshot().framing_stalls, 1);
        assert_eq!(metrics.snapshot().decode_errors, 0);
    }

    #[test]
    fn panicking_consumer_does_not_disturb_framing() {
        let metrics = Arc::new(LinkMetrics::new());
        let mut calls = 0;
        let dispatcher = Dispatcher::new(move |_record| {
            calls += 1;
            if calls == 1 {
                panic!("consumer failure");
            }
        });
        let mut receiver = Receiver::new(&LinkConfig::default(), dispatcher, metrics.clone());

        for ts in [1.0, 2.0] {
            for frame in frames_for(&FixRecord::new(0.0, 0.0, None, None, ts)) {
                receiver.on_notification(&frame);
            }
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_decoded, 2);
        assert_eq!(snapshot.dispatch_errors, 1);
        assert_eq!(receiver.delivered(), 1);
        assert_eq!(receiver.state(), ReassemblyState::Idle);
    }
}
