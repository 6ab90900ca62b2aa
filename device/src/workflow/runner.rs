use crate::status::model::FixPublisher;
use crate::workflow::config::DeviceConfig;
use anyhow::Context;
use fixlink::codec;
use fixlink::fix::{FixGate, FixSource};
use fixlink::framing::chunk;
use fixlink::link::{FrameSender, Peripheral};
use fixlink::telemetry::{LinkMetrics, LogManager};
use fixlink::LinkConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

/// What one driver tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Sent,
    NoFix,
    /// The encoded fix is longer than the receiver's buffer and was dropped.
    Oversized,
    AcquisitionFailed,
    SendFailed,
}

/// Device driver loop: source, gate, encoder, chunker, sender.
///
/// One message is sent or aborted before the next tick starts.
pub struct Runner<S, P> {
    source: S,
    gate: FixGate,
    sender: FrameSender<P>,
    link: LinkConfig,
    publisher: FixPublisher,
    logger: LogManager,
}

impl<S: FixSource, P: Peripheral> Runner<S, P> {
    pub fn new(
        source: S,
        peripheral: P,
        config: &DeviceConfig,
        metrics: Arc<LinkMetrics>,
        publisher: FixPublisher,
    ) -> Self {
        Self {
            source,
            gate: FixGate::new(config.duplicate_policy),
            sender: FrameSender::new(peripheral, &config.link, metrics),
            link: config.link.clone(),
            publisher,
            logger: LogManager::new("driver"),
        }
    }

    /// Acquires one sample and, when it passes the gate, sends it.
    ///
    /// Acquisition and radio failures are logged and reported in the outcome.
    /// An encoding failure means the gate let an invalid record through and
    /// is returned as an error.
    pub async fn tick(&mut self) -> anyhow::Result<TickOutcome> {
        let sample = match self.source.next_sample().await {
            Ok(sample) => sample,
            Err(err) => {
                self.logger.warn(&format!("fix acquisition failed: {}", err));
                return Ok(TickOutcome::AcquisitionFailed);
            }
        };
        let Some(record) = self.gate.observe(&sample) else {
            return Ok(TickOutcome::NoFix);
        };

        let payload = codec::encode(&record).context("encoding a gated fix")?;
        if payload.len() > self.link.max_message_len {
            self.logger.warn(&format!(
                "dropping a {} byte fix, receivers buffer at most {}",
                payload.len(),
                self.link.max_message_len
            ));
            return Ok(TickOutcome::Oversized);
        }
        let frames = chunk(&payload, self.link.mtu, self.link.framing);
        self.publisher.publish(record.clone());

        match self.sender.send_message(&frames).await {
            Ok(()) => {
                self.logger.record(&format!(
                    "sent fix {:.6},{:.6} ({} bytes, {} frames)",
                    record.latitude,
                    record.longitude,
                    payload.len(),
                    frames.len()
                ));
                Ok(TickOutcome::Sent)
            }
            Err(err) => {
                self.logger.warn(&format!("send failed: {}", err));
                Ok(TickOutcome::SendFailed)
            }
        }
    }

    /// Ticks every `interval` until `shutdown` becomes true or its sender
    /// goes away. A tick in progress is abandoned on shutdown.
    pub async fn run(
        &mut self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            let step = tokio::select! {
                _ = shutdown.changed() => None,
                outcome = async {
                    ticker.tick().await;
                    self.tick().await
                } => Some(outcome),
            };
            match step {
                Some(outcome) => {
                    outcome?;
                }
                None => break,
            }
        }
        self.logger.record("driver loop stopped");
        Ok(())
    }

    pub fn sender(&self) -> &FrameSender<P> {
        &self.sender
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::model::{latest_fix, LatestFix};
    use fixlink::fix::{FixQuality, RawSample};
    use fixlink::link::loopback::{LoopbackPeripheral, LoopbackRadio};
    use fixlink::prelude::AcquisitionError;
    use fixlink::FixRecord;
    use std::collections::VecDeque;

    /// Replays queued results, then repeats `fallback`.
    struct ScriptedSource {
        queue: VecDeque<Result<RawSample, AcquisitionError>>,
        fallback: RawSample,
    }

    impl FixSource for ScriptedSource {
        async fn next_sample(&mut self) -> Result<RawSample, AcquisitionError> {
            self.queue
                .pop_front()
                .unwrap_or_else(|| Ok(self.fallback.clone()))
        }
    }

    fn reference_sample() -> RawSample {
        RawSample {
            latitude: 37.7749,
            longitude: -122.4194,
            quality: FixQuality::ThreeD,
            speed: Some(1.2),
            track: Some(90.0),
            timestamp: Some(1_700_000_000.0),
        }
    }

    fn runner(
        radio: &LoopbackRadio,
        queue: Vec<Result<RawSample, AcquisitionError>>,
    ) -> (Runner<ScriptedSource, LoopbackPeripheral>, LatestFix, Arc<LinkMetrics>) {
        runner_with(radio, queue, &DeviceConfig::default())
    }

    fn runner_with(
        radio: &LoopbackRadio,
        queue: Vec<Result<RawSample, AcquisitionError>>,
        config: &DeviceConfig,
    ) -> (Runner<ScriptedSource, LoopbackPeripheral>, LatestFix, Arc<LinkMetrics>) {
        let (publisher, latest) = latest_fix();
        let metrics = Arc::new(LinkMetrics::new());
        let source = ScriptedSource {
            queue: queue.into(),
            fallback: reference_sample(),
        };
        let runner = Runner::new(
            source,
            radio.peripheral(),
            config,
            metrics.clone(),
            publisher,
        );
        (runner, latest, metrics)
    }

    #[tokio::test(start_paused = true)]
    async fn usable_fix_is_sent_and_published() {
        let radio = LoopbackRadio::new("NetGuardian");
        let (mut runner, latest, metrics) = runner(&radio, vec![]);

        assert_eq!(runner.tick().await.unwrap(), TickOutcome::Sent);

        let frames: Vec<Vec<u8>> = radio.sent_frames().into_iter().map(|(_, f)| f).collect();
        assert_eq!(
            frames.concat(),
            b"v1;la=37.7749;lo=-122.4194;sp=1.2;tr=90;ts=1700000000".to_vec()
        );
        assert_eq!(frames.len(), 3);
        assert_eq!(
            latest.current(),
            Some(FixRecord::new(37.7749, -122.4194, Some(1.2), Some(90.0), 1_700_000_000.0))
        );
        assert_eq!(metrics.snapshot().messages_sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_fix_sends_nothing() {
        let radio = LoopbackRadio::new("NetGuardian");
        let (mut runner, latest, _) =
            runner(&radio, vec![Ok(RawSample::without_fix(FixQuality::NoFix))]);

        assert_eq!(runner.tick().await.unwrap(), TickOutcome::NoFix);
        assert!(radio.sent_frames().is_empty());
        assert_eq!(latest.current(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn payload_longer_than_the_receive_buffer_is_not_sent() {
        let radio = LoopbackRadio::new("NetGuardian");
        let mut config = DeviceConfig::default();
        config.link.max_message_len = 40;
        let (mut runner, latest, metrics) = runner_with(&radio, vec![], &config);

        // the reference fix encodes to 53 bytes
        assert_eq!(runner.tick().await.unwrap(), TickOutcome::Oversized);
        assert!(radio.sent_frames().is_empty());
        assert_eq!(latest.current(), None);
        assert_eq!(metrics.snapshot().messages_sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn acquisition_failure_is_survivable() {
        let radio = LoopbackRadio::new("NetGuardian");
        let (mut runner, _, _) = runner(
            &radio,
            vec![Err(AcquisitionError::Unavailable("gpsd down".into()))],
        );

        assert_eq!(runner.tick().await.unwrap(), TickOutcome::AcquisitionFailed);
        assert_eq!(runner.tick().await.unwrap(), TickOutcome::Sent);
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_does_not_stop_the_driver() {
        let radio = LoopbackRadio::new("NetGuardian");
        let (mut runner, _, metrics) = runner(&radio, vec![]);

        radio.fail_after(1);
        assert_eq!(runner.tick().await.unwrap(), TickOutcome::SendFailed);
        radio.recover();
        assert_eq!(runner.tick().await.unwrap(), TickOutcome::Sent);
        assert_eq!(metrics.snapshot().send_failures, 1);
        assert_eq!(metrics.snapshot().messages_sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_on_the_interval_until_shutdown() {
        let radio = LoopbackRadio::new("NetGuardian");
        let (mut runner, _, metrics) = runner(&radio, vec![]);
        let (tx, rx) = watch::channel(false);

        let (result, _) = tokio::join!(runner.run(Duration::from_secs(5), rx), async {
            time::sleep(Duration::from_secs(12)).await;
            tx.send(true).unwrap();
        });
        result.unwrap();

        // ticks at 0 s, 5 s and 10 s
        assert_eq!(metrics.snapshot().messages_sent, 3);
        assert_eq!(radio.sent_frames().len(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn run_returns_when_the_shutdown_sender_is_dropped() {
        let radio = LoopbackRadio::new("NetGuardian");
        let (mut runner, _, _) = runner(&radio, vec![]);
        let (tx, rx) = watch::channel(false);
        drop(tx);

        runner.run(Duration::from_secs(5), rx).await.unwrap();
    }
}
