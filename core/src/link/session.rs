use crate::link::{Central, DeviceHandle, Link, NOTIFY_CHARACTERISTIC};
use crate::prelude::SessionError;
use log::{info, warn};
use std::time::Duration;
use tokio::time;

/// Callback receiving each notification frame.
pub type NotifyFn = Box<dyn FnMut(&[u8]) + Send>;

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// A connection to one device plus its notification subscription.
///
/// Frames are delivered by [`Session::pump`] on the caller's task, so the
/// callback never runs concurrently with itself. Failures are reported and
/// never retried here.
pub struct Session<L> {
    link: Option<L>,
    device: DeviceHandle,
    notify: Option<NotifyFn>,
}

impl<L: Link> Session<L> {
    pub async fn connect<C>(
        central: &mut C,
        device: &DeviceHandle,
        timeout: Duration,
    ) -> Result<Self, SessionError>
    where
        C: Central<Link = L>,
    {
        let link = match time::timeout(timeout, central.connect(device)).await {
            Ok(Ok(link)) => link,
            Ok(Err(source)) => {
                return Err(SessionError::Connect {
                    device: device.name.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(SessionError::Timeout {
                    phase: "connect",
                    after: timeout,
                })
            }
        };
        info!("connected to {} ({})", device.name, device.address);
        Ok(Self {
            link: Some(link),
            device: device.clone(),
            notify: None,
        })
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Subscribes to the fix characteristic and registers `notify_fn`.
    pub async fn subscribe<F>(&mut self, notify_fn: F, timeout: Duration) -> Result<(), SessionError>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let link = self.link.as_mut().ok_or(SessionError::NotConnected)?;
        match time::timeout(timeout, link.subscribe(NOTIFY_CHARACTERISTIC)).await {
            Ok(Ok(())) => {}
            Ok(Err(source)) => return Err(SessionError::Subscribe(source)),
            Err(_) => {
                return Err(SessionError::Timeout {
                    phase: "subscribe",
                    after: timeout,
                })
            }
        }
        self.notify = Some(Box::new(notify_fn));
        info!("subscribed to notifications from {}", self.device.name);
        Ok(())
    }

    /// Waits for one notification and hands it to the callback.
    ///
    /// Returns `Ok(false)` when the link has been lost; the session is then
    /// disconnected. Cancel safe.
    pub async fn pump(&mut self) -> Result<bool, SessionError> {
        let link = self.link.as_mut().ok_or(SessionError::NotConnected)?;
        let notify = self.notify.as_mut().ok_or(SessionError::NotSubscribed)?;
        match link.next_frame().await? {
            Some(frame) => {
                notify(&frame);
                Ok(true)
            }
            None => {
                warn!("link to {} lost", self.device.name);
                self.link = None;
                self.notify = None;
                Ok(false)
            }
        }
    }

    /// Releases the link. Does nothing when already disconnected.
    pub async fn disconnect(&mut self) {
        self.notify = None;
        let Some(mut link) = self.link.take() else {
            return;
        };
        match time::timeout(DISCONNECT_TIMEOUT, link.disconnect()).await {
            Ok(Ok(())) => info!("disconnected from {}", self.device.name),
            Ok(Err(err)) => warn!("disconnecting from {} failed: {}", self.device.name, err),
            Err(_) => warn!("disconnecting from {} timed out", self.device.name),
        }
    }
}
