//! Radio emulation over UDP datagrams.
//!
//! Every datagram is one opcode byte followed by its body:
//!
//! | op   | name       | body                   | direction          |
//! |------|------------|------------------------|--------------------|
//! | 0x01 | ADVERTISE  | device name (UTF-8)    | device -> viewer   |
//! | 0x02 | CONNECT    | empty                  | viewer -> device   |
//! | 0x03 | CONNECTED  | empty                  | device -> viewer   |
//! | 0x04 | SUBSCRIBE  | characteristic, 16B BE | viewer -> device   |
//! | 0x05 | SUBSCRIBED | characteristic, 16B BE | device -> viewer   |
//! | 0x06 | NOTIFY     | one frame              | device -> viewer   |
//! | 0x07 | DISCONNECT | empty                  | either             |
//! | 0x08 | KEEPALIVE  | empty                  | viewer -> device   |
//!
//! Delivery is as unreliable as the datagrams carrying it. Requests are
//! resent until answered; notifications are never resent. A subscribed
//! viewer sends keepalives while it listens, and the device forgets viewers
//! it has not heard from within its peer timeout.

use crate::link::{Central, DeviceHandle, Link, Peripheral, NOTIFY_CHARACTERISTIC};
use crate::prelude::{RadioError, MAX_MTU};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

pub const MAX_DATAGRAM: usize = MAX_MTU + 1;
pub const DEFAULT_ADVERTISE_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_SUPERVISION_TIMEOUT: Duration = Duration::from_secs(10);

const ADVERTISE: u8 = 0x01;
const CONNECT: u8 = 0x02;
const CONNECTED: u8 = 0x03;
const SUBSCRIBE: u8 = 0x04;
const SUBSCRIBED: u8 = 0x05;
const NOTIFY: u8 = 0x06;
const DISCONNECT: u8 = 0x07;
const KEEPALIVE: u8 = 0x08;

const RESEND_INTERVAL: Duration = Duration::from_millis(500);
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(2);

// One spare byte so an oversized datagram shows up as too long instead of
// arriving silently truncated.
const RECV_BUF: usize = MAX_DATAGRAM + 1;

fn packet(op: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(op);
    out.extend_from_slice(body);
    out
}

fn split(datagram: &[u8]) -> Option<(u8, &[u8])> {
    if datagram.len() > MAX_DATAGRAM {
        debug!("dropping a datagram longer than {} bytes", MAX_DATAGRAM);
        return None;
    }
    datagram.split_first().map(|(op, body)| (*op, body))
}

fn read_uuid(body: &[u8]) -> Option<u128> {
    <[u8; 16]>::try_from(body).ok().map(u128::from_be_bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerState {
    Connected,
    Subscribed,
}

#[derive(Debug, Clone, Copy)]
struct Peer {
    state: PeerState,
    last_seen: Instant,
}

impl Peer {
    fn new(state: PeerState) -> Self {
        Self {
            state,
            last_seen: Instant::now(),
        }
    }
}

type PeerTable = Arc<Mutex<HashMap<SocketAddr, Peer>>>;

fn lock(peers: &PeerTable) -> MutexGuard<'_, HashMap<SocketAddr, Peer>> {
    match peers.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Drops peers not heard from within `timeout`.
fn evict_silent(peers: &PeerTable, timeout: Duration) {
    let now = Instant::now();
    lock(peers).retain(|addr, peer| {
        let alive = now.duration_since(peer.last_seen) <= timeout;
        if !alive {
            info!("viewer {} silent for {:?}, dropping it", addr, timeout);
        }
        alive
    });
}

/// Device side. Advertises its name to one address and answers control
/// requests from any peer.
pub struct UdpPeripheral {
    socket: Arc<UdpSocket>,
    peers: PeerTable,
    peer_timeout: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl UdpPeripheral {
    pub async fn bind(
        bind: SocketAddr,
        name: &str,
        advertise_to: SocketAddr,
        interval: Duration,
    ) -> Result<Self, RadioError> {
        let socket = Arc::new(UdpSocket::bind(bind).await?);
        let peers = PeerTable::default();
        info!(
            "advertising {:?} from {} to {} every {:?}",
            name,
            socket.local_addr()?,
            advertise_to,
            interval
        );
        let tasks = vec![
            tokio::spawn(advertise(
                socket.clone(),
                name.to_string(),
                advertise_to,
                interval,
            )),
            tokio::spawn(serve_control(socket.clone(), peers.clone())),
        ];
        Ok(Self {
            socket,
            peers,
            peer_timeout: DEFAULT_SUPERVISION_TIMEOUT,
            tasks,
        })
    }

    /// Silence after which a viewer is dropped from the peer table.
    pub fn with_peer_timeout(mut self, timeout: Duration) -> Self {
        self.peer_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RadioError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn subscriber_count(&self) -> usize {
        evict_silent(&self.peers, self.peer_timeout);
        lock(&self.peers)
            .values()
            .filter(|peer| peer.state == PeerState::Subscribed)
            .count()
    }
}

impl Drop for UdpPeripheral {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Peripheral for UdpPeripheral {
    /// Sends the frame to every live subscriber. With no subscribers the
    /// frame is dropped, as a radio notification would be. A failed send
    /// to one viewer is logged and does not hold back the others.
    async fn notify(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        evict_silent(&self.peers, self.peer_timeout);
        let subscribers: Vec<SocketAddr> = lock(&self.peers)
            .iter()
            .filter(|(_, peer)| peer.state == PeerState::Subscribed)
            .map(|(addr, _)| *addr)
            .collect();
        let datagram = packet(NOTIFY, frame);
        for peer in subscribers {
            if let Err(err) = self.socket.send_to(&datagram, peer).await {
                warn!("notification to {} failed: {}", peer, err);
            }
        }
        Ok(())
    }
}

async fn advertise(socket: Arc<UdpSocket>, name: String, target: SocketAddr, interval: Duration) {
    let datagram = packet(ADVERTISE, name.as_bytes());
    let mut ticker = time::interval(interval.max(Duration::from_millis(1)));
    loop {
        ticker.tick().await;
        if let Err(err) = socket.send_to(&datagram, target).await {
            debug!("advertisement to {} failed: {}", target, err);
        }
    }
}

async fn serve_control(socket: Arc<UdpSocket>, peers: PeerTable) {
    let mut buf = [0u8; RECV_BUF];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(err) => {
                warn!("control socket receive failed: {}", err);
                time::sleep(RECV_ERROR_BACKOFF).await;
                continue;
            }
        };
        let Some((op, body)) = split(&buf[..len]) else {
            continue;
        };
        if let Some(peer) = lock(&peers).get_mut(&from) {
            peer.last_seen = Instant::now();
        }
        let reply = match op {
            CONNECT => {
                lock(&peers)
                    .entry(from)
                    .or_insert_with(|| Peer::new(PeerState::Connected));
                info!("viewer {} connected", from);
                Some(packet(CONNECTED, &[]))
            }
            SUBSCRIBE => match read_uuid(body) {
                Some(NOTIFY_CHARACTERISTIC) => {
                    lock(&peers).insert(from, Peer::new(PeerState::Subscribed));
                    info!("viewer {} subscribed", from);
                    Some(packet(SUBSCRIBED, body))
                }
                _ => {
                    warn!("viewer {} asked for an unknown characteristic", from);
                    None
                }
            },
            DISCONNECT => {
                if lock(&peers).remove(&from).is_some() {
                    info!("viewer {} disconnected", from);
                }
                None
            }
            KEEPALIVE => None,
            other => {
                debug!("ignoring opcode {:#04x} from {}", other, from);
                None
            }
        };
        if let Some(reply) = reply {
            if let Err(err) = socket.send_to(&reply, from).await {
                warn!("reply to {} failed: {}", from, err);
            }
        }
    }
}

/// Viewer side. One socket both hears advertisements and carries the links
/// made from them.
pub struct UdpCentral {
    socket: Arc<UdpSocket>,
    supervision: Duration,
}

impl UdpCentral {
    pub async fn bind(addr: SocketAddr) -> Result<Self, RadioError> {
        let socket = UdpSocket::bind(addr).await?;
        info!("listening for advertisements on {}", socket.local_addr()?);
        Ok(Self {
            socket: Arc::new(socket),
            supervision: DEFAULT_SUPERVISION_TIMEOUT,
        })
    }

    /// Silence after which a link is considered lost.
    pub fn with_supervision_timeout(mut self, timeout: Duration) -> Self {
        self.supervision = timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RadioError> {
        Ok(self.socket.local_addr()?)
    }
}

impl Central for UdpCentral {
    type Link = UdpLink;

    async fn sweep(&mut self, window: Duration) -> Result<Vec<DeviceHandle>, RadioError> {
        let deadline = Instant::now() + window;
        let mut buf = [0u8; RECV_BUF];
        let mut heard: Vec<DeviceHandle> = Vec::new();
        while let Ok(received) = time::timeout_at(deadline, self.socket.recv_from(&mut buf)).await
        {
            let (len, from) = received?;
            if let Some((ADVERTISE, body)) = split(&buf[..len]) {
                let device = DeviceHandle {
                    name: String::from_utf8_lossy(body).into_owned(),
                    address: from.to_string(),
                };
                if !heard.contains(&device) {
                    debug!("heard {} at {}", device.name, device.address);
                    heard.push(device);
                }
            }
        }
        Ok(heard)
    }

    /// Resends CONNECT until the device answers; callers bound the wait.
    async fn connect(&mut self, device: &DeviceHandle) -> Result<UdpLink, RadioError> {
        let peer: SocketAddr = device
            .address
            .parse()
            .map_err(|_| RadioError::InvalidAddress(device.address.clone()))?;
        let mut link = UdpLink {
            socket: self.socket.clone(),
            peer,
            supervision: self.supervision,
            last_heard: Instant::now(),
            keepalive_at: Instant::now(),
            subscribed: false,
        };
        link.request(&packet(CONNECT, &[]), CONNECTED).await?;
        Ok(link)
    }
}

pub struct UdpLink {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    supervision: Duration,
    last_heard: Instant,
    keepalive_at: Instant,
    subscribed: bool,
}

impl UdpLink {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn keepalive_interval(&self) -> Duration {
        KEEPALIVE_INTERVAL.min(self.supervision / 3)
    }

    /// Sends `datagram` every resend interval until the peer answers with
    /// `expect`, returning the answer's body.
    async fn request(&mut self, datagram: &[u8], expect: u8) -> Result<Vec<u8>, RadioError> {
        let mut buf = [0u8; RECV_BUF];
        loop {
            self.socket.send_to(datagram, self.peer).await?;
            let resend_at = Instant::now() + RESEND_INTERVAL;
            while let Ok(received) =
                time::timeout_at(resend_at, self.socket.recv_from(&mut buf)).await
            {
                let (len, from) = received?;
                if from != self.peer {
                    continue;
                }
                self.last_heard = Instant::now();
                if let Some((op, body)) = split(&buf[..len]) {
                    if op == expect {
                        return Ok(body.to_vec());
                    }
                }
            }
        }
    }
}

impl Link for UdpLink {
    async fn subscribe(&mut self, characteristic: u128) -> Result<(), RadioError> {
        if characteristic != NOTIFY_CHARACTERISTIC {
            return Err(RadioError::UnknownCharacteristic(characteristic));
        }
        let body = characteristic.to_be_bytes();
        let echoed = self.request(&packet(SUBSCRIBE, &body), SUBSCRIBED).await?;
        if read_uuid(&echoed) != Some(characteristic) {
            return Err(RadioError::Refused(format!(
                "{} confirmed a different characteristic",
                self.peer
            )));
        }
        self.subscribed = true;
        self.keepalive_at = Instant::now() + self.keepalive_interval();
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, RadioError> {
        if !self.subscribed {
            return Err(RadioError::NotSubscribed);
        }
        let mut buf = [0u8; RECV_BUF];
        loop {
            if Instant::now() >= self.keepalive_at {
                if let Err(err) = self.socket.send_to(&packet(KEEPALIVE, &[]), self.peer).await {
                    debug!("keepalive to {} failed: {}", self.peer, err);
                }
                self.keepalive_at = Instant::now() + self.keepalive_interval();
            }
            let silent_until = self.last_heard + self.supervision;
            let wake = silent_until.min(self.keepalive_at);
            let Ok(received) = time::timeout_at(wake, self.socket.recv_from(&mut buf)).await else {
                if Instant::now() < silent_until {
                    continue;
                }
                warn!("{} silent for {:?}", self.peer, self.supervision);
                self.subscribed = false;
                return Ok(None);
            };
            let (len, from) = received?;
            if from != self.peer {
                continue;
            }
            // adverts from the peer count as signs of life
            self.last_heard = Instant::now();
            match split(&buf[..len]) {
                Some((NOTIFY, frame)) => return Ok(Some(frame.to_vec())),
                Some((DISCONNECT, _)) => {
                    self.subscribed = false;
                    return Ok(None);
                }
                _ => {}
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), RadioError> {
        self.subscribed = false;
        self.socket
            .send_to(&packet(DISCONNECT, &[]), self.peer)
            .await?;
        Ok(())
    }
}
