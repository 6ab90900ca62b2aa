use crate::link::Peripheral;
use crate::prelude::{Frame, LinkConfig, TransportError};
use crate::telemetry::log::LogManager;
use crate::telemetry::metrics::LinkMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

/// Device-side sender: pushes the frames of one message in order, paced,
/// with no acknowledgment. A message counts as sent once its last frame has
/// been handed to the radio.
pub struct FrameSender<P> {
    peripheral: P,
    mtu: usize,
    pacing: Duration,
    metrics: Arc<LinkMetrics>,
    logger: LogManager,
}

impl<P: Peripheral> FrameSender<P> {
    pub fn new(peripheral: P, config: &LinkConfig, metrics: Arc<LinkMetrics>) -> Self {
        Self {
            peripheral,
            mtu: config.mtu,
            pacing: config.pacing(),
            metrics,
            logger: LogManager::new("sender"),
        }
    }

    pub fn peripheral(&self) -> &P {
        &self.peripheral
    }

    /// Sends one message. A radio failure aborts the remaining frames.
    pub async fn send_message(&mut self, frames: &[Frame]) -> Result<(), TransportError> {
        if let Some((index, frame)) = frames.iter().enumerate().find(|(_, f)| f.len() > self.mtu) {
            return Err(TransportError::Oversized {
                index,
                len: frame.len(),
                mtu: self.mtu,
            });
        }

        let total = frames.len();
        for (index, frame) in frames.iter().enumerate() {
            if index > 0 {
                time::sleep(self.pacing).await;
            }
            if let Err(source) = self.peripheral.notify(frame).await {
                self.metrics.record_send_failure();
                return Err(TransportError::SendFailure {
                    frame: index,
                    total,
                    source,
                });
            }
            self.metrics.record_frame_sent();
        }

        self.metrics.record_message_sent();
        self.logger
            .detail(&format!("message of {} frames handed to the radio", total));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::loopback::LoopbackRadio;
    use crate::prelude::RadioError;
    use tokio::time::Instant;

    fn frames() -> Vec<Frame> {
        vec![vec![1; 20], vec![2; 20], vec![3; 13]]
    }

    #[tokio::test(start_paused = true)]
    async fn frames_are_sent_in_order_and_paced() {
        let radio = LoopbackRadio::new("tracker");
        let metrics = Arc::new(LinkMetrics::new());
        let mut sender = FrameSender::new(radio.peripheral(), &LinkConfig::default(), metrics.clone());

        let started = Instant::now();
        sender.send_message(&frames()).await.unwrap();

        let sent = radio.sent_frames();
        assert_eq!(
            sent.iter().map(|(_, f)| f.clone()).collect::<Vec<_>>(),
            frames()
        );
        let offsets: Vec<Duration> = sent.iter().map(|(at, _)| *at - started).collect();
        assert_eq!(
            offsets,
            vec![
                Duration::ZERO,
                Duration::from_millis(100),
                Duration::from_millis(200)
            ]
        );
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.frames_sent, 3);
        assert_eq!(snapshot.messages_sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn radio_failure_aborts_the_rest_of_the_message() {
        let radio = LoopbackRadio::new("tracker");
        radio.fail_after(1);
        let metrics = Arc::new(LinkMetrics::new());
        let mut sender = FrameSender::new(radio.peripheral(), &LinkConfig::default(), metrics.clone());

        let result = sender.send_message(&frames()).await;
        assert!(matches!(
            result,
            Err(TransportError::SendFailure {
                frame: 1,
                total: 3,
                source: RadioError::Failure(_)
            })
        ));
        assert_eq!(radio.sent_frames().len(), 1);
        assert_eq!(metrics.snapshot().send_failures, 1);
        assert_eq!(metrics.snapshot().messages_sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_does_not_affect_later_messages() {
        let radio = LoopbackRadio::new("tracker");
        let metrics = Arc::new(LinkMetrics::new());
        let mut sender = FrameSender::new(radio.peripheral(), &LinkConfig::default(), metrics);

        radio.fail_after(0);
        assert!(sender.send_message(&frames()).await.is_err());
        radio.recover();
        sender.send_message(&frames()).await.unwrap();
        assert_eq!(radio.sent_frames().len(), 3);
    }

    #[tokio::test]
    async fn oversized_frames_are_refused_up_front() {
        let radio = LoopbackRadio::new("tracker");
        let mut sender = FrameSender::new(
            radio.peripheral(),
            &LinkConfig::default(),
            Arc::new(LinkMetrics::new()),
        );

        let result = sender.send_message(&[vec![0; 5], vec![0; 21]]).await;
        assert!(matches!(
            result,
            Err(TransportError::Oversized { index: 1, len: 21, mtu: 20 })
        ));
        assert!(radio.sent_frames().is_empty());
    }
}
