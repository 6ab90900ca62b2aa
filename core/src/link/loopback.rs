//! In-memory radio connecting one peripheral to one central.
//!
//! Deterministic under a paused tokio clock, with knobs to hide the device,
//! refuse or stall connections, fail sends and drop the link. The radio also
//! keeps the last [`SENT_HISTORY`] frames handed to it, so tests can check
//! what went out and when.

use crate::link::{Central, DeviceHandle, Link, Peripheral, NOTIFY_CHARACTERISTIC};
use crate::prelude::RadioError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

/// Frames kept by [`LoopbackRadio::sent_frames`]; older ones are dropped.
pub const SENT_HISTORY: usize = 1024;

#[derive(Default)]
struct Shared {
    silent: bool,
    hidden_sweeps: usize,
    sweeps: usize,
    refuse_connect: bool,
    connect_delay: Option<Duration>,
    successes_before_failure: Option<usize>,
    subscriber: Option<mpsc::UnboundedSender<Vec<u8>>>,
    sent: VecDeque<(Instant, Vec<u8>)>,
}

/// Handle to both ends of an in-memory radio. Clones share state.
#[derive(Clone)]
pub struct LoopbackRadio {
    device: DeviceHandle,
    shared: Arc<Mutex<Shared>>,
}

impl LoopbackRadio {
    pub fn new(name: &str) -> Self {
        Self {
            device: DeviceHandle {
                name: name.to_string(),
                address: format!("loopback:{}", name),
            },
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, Shared> {
        // A panic while holding the lock only happens inside a failing test.
        match self.shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn peripheral(&self) -> LoopbackPeripheral {
        LoopbackPeripheral {
            radio: self.clone(),
        }
    }

    pub fn central(&self) -> LoopbackCentral {
        LoopbackCentral {
            radio: self.clone(),
        }
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    /// Stops advertising entirely.
    pub fn go_silent(&self) {
        self.state().silent = true;
    }

    /// The next `sweeps` sweeps will not hear the device.
    pub fn hide_for_sweeps(&self, sweeps: usize) {
        self.state().hidden_sweeps = sweeps;
    }

    pub fn sweeps(&self) -> usize {
        self.state().sweeps
    }

    pub fn refuse_connections(&self) {
        self.state().refuse_connect = true;
    }

    pub fn delay_connect(&self, delay: Duration) {
        self.state().connect_delay = Some(delay);
    }

    /// Lets `count` more notifications through, then fails every send.
    pub fn fail_after(&self, count: usize) {
        self.state().successes_before_failure = Some(count);
    }

    pub fn recover(&self) {
        self.state().successes_before_failure = None;
    }

    /// Drops the link as if the peer walked out of range.
    pub fn sever(&self) {
        self.state().subscriber = None;
    }

    pub fn is_subscribed(&self) -> bool {
        self.state().subscriber.is_some()
    }

    /// The most recent frames the peripheral handed to the radio, oldest
    /// first, with their send times.
    pub fn sent_frames(&self) -> Vec<(Instant, Vec<u8>)> {
        self.state().sent.iter().cloned().collect()
    }
}

pub struct LoopbackPeripheral {
    radio: LoopbackRadio,
}

impl Peripheral for LoopbackPeripheral {
    async fn notify(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        let mut state = self.radio.state();
        if let Some(remaining) = state.successes_before_failure.as_mut() {
            if *remaining == 0 {
                return Err(RadioError::Failure("injected send failure".into()));
            }
            *remaining -= 1;
        }
        if state.sent.len() == SENT_HISTORY {
            state.sent.pop_front();
        }
        state.sent.push_back((Instant::now(), frame.to_vec()));
        let receiver_gone = state
            .subscriber
            .as_ref()
            .is_some_and(|subscriber| subscriber.send(frame.to_vec()).is_err());
        if receiver_gone {
            state.subscriber = None;
        }
        Ok(())
    }
}

pub struct LoopbackCentral {
    radio: LoopbackRadio,
}

impl Central for LoopbackCentral {
    type Link = LoopbackLink;

    async fn sweep(&mut self, window: Duration) -> Result<Vec<DeviceHandle>, RadioError> {
        time::sleep(window).await;
        let mut state = self.radio.state();
        state.sweeps += 1;
        if state.silent {
            return Ok(Vec::new());
        }
        if state.hidden_sweeps > 0 {
            state.hidden_sweeps -= 1;
            return Ok(Vec::new());
        }
        Ok(vec![self.radio.device.clone()])
    }

    async fn connect(&mut self, device: &DeviceHandle) -> Result<LoopbackLink, RadioError> {
        if device != &self.radio.device {
            return Err(RadioError::InvalidAddress(device.address.clone()));
        }
        let (delay, refuse) = {
            let state = self.radio.state();
            (state.connect_delay, state.refuse_connect)
        };
        if let Some(delay) = delay {
            time::sleep(delay).await;
        }
        if refuse {
            return Err(RadioError::Refused("connection refused".into()));
        }
        Ok(LoopbackLink {
            radio: self.radio.clone(),
            frames: None,
        })
    }
}

pub struct LoopbackLink {
    radio: LoopbackRadio,
    frames: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl Link for LoopbackLink {
    async fn subscribe(&mut self, characteristic: u128) -> Result<(), RadioError> {
        if characteristic != NOTIFY_CHARACTERISTIC {
            return Err(RadioError::UnknownCharacteristic(characteristic));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.radio.state().subscriber = Some(tx);
        self.frames = Some(rx);
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, RadioError> {
        let frames = self.frames.as_mut().ok_or(RadioError::NotSubscribed)?;
        Ok(frames.recv().await)
    }

    async fn disconnect(&mut self) -> Result<(), RadioError> {
        self.radio.state().subscriber = None;
        self.frames = None;
        Ok(())
    }
}
