use fixlink::codec;
use fixlink::framing::{chunk, Dispatcher, Receiver, ReassemblyState};
use fixlink::link::loopback::LoopbackRadio;
use fixlink::link::udp::{UdpCentral, UdpPeripheral};
use fixlink::link::{find_device, FrameSender, ScanPolicy, Session};
use fixlink::telemetry::LinkMetrics;
use fixlink::{FixRecord, FramingMode, LinkConfig};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{self, Instant};

const STEP_TIMEOUT: Duration = Duration::from_secs(10);

fn reference_fix() -> FixRecord {
    FixRecord::new(37.7749, -122.4194, Some(1.2), Some(90.0), 1_700_000_000.0)
}

/// A receiver feeding a shared list, plus a view of its reassembly state.
fn collecting_receiver(
    config: &LinkConfig,
    metrics: Arc<LinkMetrics>,
) -> (Arc<Mutex<Vec<FixRecord>>>, Arc<Mutex<ReassemblyState>>, impl FnMut(&[u8]) + Send + 'static) {
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let state = Arc::new(Mutex::new(ReassemblyState::Idle));
    let sink = delivered.clone();
    let watcher = state.clone();
    let mut receiver = Receiver::new(
        config,
        Dispatcher::new(move |record| sink.lock().unwrap().push(record)),
        metrics,
    );
    let on_frame = move |frame: &[u8]| {
        receiver.on_notification(frame);
        *watcher.lock().unwrap() = receiver.state();
    };
    (delivered, state, on_frame)
}

#[tokio::test(start_paused = true)]
async fn reference_fix_crosses_the_loopback_link() {
    let config = LinkConfig::default();
    let radio = LoopbackRadio::new("NetGuardian");
    let record = reference_fix();
    let payload = codec::encode(&record).unwrap();
    assert_eq!(payload.len(), 53);
    let frames = chunk(&payload, config.mtu, config.framing);
    assert_eq!(
        frames.iter().map(Vec::len).collect::<Vec<_>>(),
        vec![20, 20, 13]
    );

    let mut central = radio.central();
    let device = find_device(&mut central, &config.device_name, &ScanPolicy::default())
        .await
        .unwrap();
    let mut session = Session::connect(&mut central, &device, STEP_TIMEOUT)
        .await
        .unwrap();
    let metrics = Arc::new(LinkMetrics::new());
    let (delivered, state, on_frame) = collecting_receiver(&config, metrics.clone());
    session.subscribe(on_frame, STEP_TIMEOUT).await.unwrap();

    let mut sender = FrameSender::new(radio.peripheral(), &config, Arc::new(LinkMetrics::new()));
    let started = Instant::now();
    sender.send_message(&frames).await.unwrap();
    let offsets: Vec<Duration> = radio
        .sent_frames()
        .iter()
        .map(|(at, _)| *at - started)
        .collect();
    assert_eq!(
        offsets,
        vec![
            Duration::ZERO,
            Duration::from_millis(100),
            Duration::from_millis(200)
        ]
    );

    assert!(session.pump().await.unwrap());
    assert!(delivered.lock().unwrap().is_empty());
    assert_eq!(*state.lock().unwrap(), ReassemblyState::Accumulating);
    assert!(session.pump().await.unwrap());
    assert!(delivered.lock().unwrap().is_empty());
    assert!(session.pump().await.unwrap());

    assert_eq!(*delivered.lock().unwrap(), vec![record]);
    assert_eq!(*state.lock().unwrap(), ReassemblyState::Idle);
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.frames_received, 3);
    assert_eq!(snapshot.messages_decoded, 1);
    assert_eq!(snapshot.decode_errors, 0);

    session.disconnect().await;
    assert!(!radio.is_subscribed());
}

#[tokio::test(start_paused = true)]
async fn frame_aligned_message_completes_on_the_terminator() {
    let config = LinkConfig::default();
    let radio = LoopbackRadio::new("NetGuardian");
    let record = FixRecord::new(1.5, 2.25, Some(12.25), None, 1_700_000_000.0);
    let frames = chunk(&codec::encode(&record).unwrap(), config.mtu, FramingMode::Terminated);
    assert_eq!(
        frames.iter().map(Vec::len).collect::<Vec<_>>(),
        vec![20, 20, 0]
    );

    let mut central = radio.central();
    let mut session = Session::connect(&mut central, radio.device(), STEP_TIMEOUT)
        .await
        .unwrap();
    let (delivered, _state, on_frame) =
        collecting_receiver(&config, Arc::new(LinkMetrics::new()));
    session.subscribe(on_frame, STEP_TIMEOUT).await.unwrap();

    let mut sender = FrameSender::new(radio.peripheral(), &config, Arc::new(LinkMetrics::new()));
    sender.send_message(&frames).await.unwrap();
    for _ in 0..2 {
        session.pump().await.unwrap();
    }
    assert!(delivered.lock().unwrap().is_empty());
    session.pump().await.unwrap();
    assert_eq!(*delivered.lock().unwrap(), vec![record]);
}

#[tokio::test(start_paused = true)]
async fn messages_after_a_lost_frame_recover() {
    let config = LinkConfig::default();
    let radio = LoopbackRadio::new("NetGuardian");
    let mut central = radio.central();
    let mut session = Session::connect(&mut central, radio.device(), STEP_TIMEOUT)
        .await
        .unwrap();
    let metrics = Arc::new(LinkMetrics::new());
    let (delivered, _state, on_frame) = collecting_receiver(&config, metrics.clone());
    session.subscribe(on_frame, STEP_TIMEOUT).await.unwrap();

    let mut sender = FrameSender::new(radio.peripheral(), &config, Arc::new(LinkMetrics::new()));
    let frames = chunk(
        &codec::encode(&reference_fix()).unwrap(),
        config.mtu,
        config.framing,
    );
    // the radio drops the middle frame of the first message
    radio.fail_after(1);
    assert!(sender.send_message(&frames).await.is_err());
    radio.recover();
    sender.send_message(&frames[2..]).await.unwrap();
    sender.send_message(&frames).await.unwrap();

    for _ in 0..5 {
        session.pump().await.unwrap();
    }
    assert_eq!(*delivered.lock().unwrap(), vec![reference_fix()]);
    assert_eq!(metrics.snapshot().decode_errors, 1);
}

#[tokio::test]
async fn reference_fix_crosses_the_udp_link() {
    let config = LinkConfig {
        pacing_ms: 10,
        ..LinkConfig::default()
    };
    let mut central = UdpCentral::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let peripheral = UdpPeripheral::bind(
        SocketAddr::from(([127, 0, 0, 1], 0)),
        &config.device_name,
        central.local_addr().unwrap(),
        Duration::from_millis(50),
    )
    .await
    .unwrap();
    let policy = ScanPolicy {
        deadline_secs: 10,
        sweep_window_secs: 1,
        retry_interval_secs: 1,
    };

    let device = find_device(&mut central, &config.device_name, &policy)
        .await
        .unwrap();
    let mut session = Session::connect(&mut central, &device, STEP_TIMEOUT)
        .await
        .unwrap();
    let (delivered, _state, on_frame) =
        collecting_receiver(&config, Arc::new(LinkMetrics::new()));
    session.subscribe(on_frame, STEP_TIMEOUT).await.unwrap();

    let mut sender = FrameSender::new(peripheral, &config, Arc::new(LinkMetrics::new()));
    let frames = chunk(
        &codec::encode(&reference_fix()).unwrap(),
        config.mtu,
        config.framing,
    );
    sender.send_message(&frames).await.unwrap();

    time::timeout(STEP_TIMEOUT, async {
        while delivered.lock().unwrap().is_empty() {
            session.pump().await.unwrap();
        }
    })
    .await
    .unwrap();
    assert_eq!(*delivered.lock().unwrap(), vec![reference_fix()]);
    session.disconnect().await;
}
