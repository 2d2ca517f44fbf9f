use std::sync::Arc;
use std::time::Duration;

use lingualive_core::buffering::Producer;
use lingualive_core::codec::pcm;
use lingualive_core::transport::{RemoteEnd, TransportEvent};
use lingualive_core::{
    ConnectionState, ConnectionStateEvent, EngineConfig, LiveEngine, LiveError, StubBackend,
    StubConnector,
};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

const WAIT: Duration = Duration::from_secs(5);

fn config(debounce: Duration) -> EngineConfig {
    EngineConfig {
        api_key: Some("test-key".into()),
        idle_debounce: debounce,
        ..EngineConfig::default()
    }
}

fn engine(debounce: Duration) -> (LiveEngine, Arc<StubBackend>, Arc<StubConnector>) {
    let backend = Arc::new(StubBackend::new());
    let connector = Arc::new(StubConnector::manual());
    let engine = LiveEngine::new(config(debounce), backend.clone(), connector.clone());
    (engine, backend, connector)
}

async fn wait_for_state(
    rx: &mut broadcast::Receiver<ConnectionStateEvent>,
    want: ConnectionState,
) -> ConnectionStateEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if event.state == want => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("state channel closed"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {want}"))
}

async fn wait_for_capture(engine: &LiveEngine) {
    tokio::time::timeout(WAIT, async {
        while !engine.resource_snapshot().await.capture {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("capture attached in time");
}

async fn next_frame(remote: &mut RemoteEnd) -> Vec<f32> {
    let wire = tokio::time::timeout(WAIT, remote.outbound.recv())
        .await
        .expect("outbound frame in time")
        .expect("outbound channel open");
    pcm::decode_to_float(&wire).expect("valid outbound frame")
}

fn half_second_frame(value: f32) -> String {
    pcm::encode(&vec![value; 12_000])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_call_round_trip() {
    let (engine, backend, connector) = engine(Duration::from_millis(100));
    let mut states = engine.subscribe_state();

    engine.start().await.expect("start");
    assert_eq!(engine.state(), ConnectionState::Connecting);
    wait_for_state(&mut states, ConnectionState::Connecting).await;
    assert!(engine.resource_snapshot().await.is_complete());

    let config = connector.last_config().expect("session requested");
    assert!(config.system_instruction.contains("Turkish"));
    assert_eq!(config.voice_name, "Puck");
    let constraints = backend.last_constraints().expect("microphone requested");
    assert_eq!(constraints.sample_rate, 16_000);
    assert!(constraints.echo_cancellation);

    // Open → Connected, then capture attaches.
    let mut remote = connector.take_remote().expect("remote end");
    remote.events.send(TransportEvent::Open).expect("open");
    wait_for_state(&mut states, ConnectionState::Connected).await;
    wait_for_capture(&engine).await;

    // Three capture blocks → three frames in order.
    let mut producer = backend.take_mic_producer().expect("mic producer");
    for value in [0.1f32, 0.2, 0.3] {
        assert_eq!(producer.push_slice(&vec![value; 4096]), 4096);
    }
    for expected in [0.1f32, 0.2, 0.3] {
        let frame = next_frame(&mut remote).await;
        assert_eq!(frame.len(), 4096);
        assert!((frame[0] - expected).abs() < 1e-3, "got {}", frame[0]);
    }

    // Two 0.5 s inbound frames play back to back.
    let output = backend.output().expect("output opened");
    remote
        .events
        .send(TransportEvent::Audio(half_second_frame(0.1)))
        .expect("audio 1");
    remote
        .events
        .send(TransportEvent::Audio(half_second_frame(0.2)))
        .expect("audio 2");
    tokio::time::timeout(WAIT, async {
        while output.scheduled().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("both frames scheduled");
    let scheduled = output.scheduled();
    assert!(scheduled[1].start_at >= scheduled[0].start_at + 0.5 - 1e-9);
    assert!((engine.playback_cursor() - 1.0).abs() < 1e-9);

    let diag = engine.diagnostics();
    assert_eq!(diag.frames_sent, 3);
    assert_eq!(diag.frames_received, 2);
    assert_eq!(diag.frames_scheduled, 2);

    // End call → Disconnected with everything released, then Idle.
    engine.end_call().await;
    assert_eq!(engine.state(), ConnectionState::Disconnected);
    assert!(engine.resource_snapshot().await.is_empty());
    assert!(remote.close_requested());
    assert_eq!(backend.live_microphones(), 0);
    assert_eq!(backend.live_outputs(), 0);
    assert!(output.is_closed());
    assert_eq!(engine.playback_cursor(), 0.0);
    assert_eq!(engine.volume(), 0.0);

    wait_for_state(&mut states, ConnectionState::Idle).await;
    assert_eq!(engine.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn start_without_key_stays_idle() {
    let backend = Arc::new(StubBackend::new());
    let connector = Arc::new(StubConnector::manual());
    let engine = LiveEngine::new(EngineConfig::default(), backend.clone(), connector.clone());

    let err = engine.start().await.unwrap_err();
    assert!(matches!(err, LiveError::Configuration(_)));
    assert_eq!(engine.state(), ConnectionState::Idle);
    assert_eq!(backend.acquisitions(), 0);
    assert_eq!(connector.connects(), 0);
}

#[tokio::test(start_paused = true)]
async fn unavailable_microphone_never_opens_transport() {
    let (engine, backend, connector) = engine(Duration::from_millis(500));
    backend.fail_microphone(true);

    let err = engine.start().await.unwrap_err();
    assert!(matches!(err, LiveError::DeviceUnavailable(_)));
    assert_eq!(connector.connects(), 0);
    assert_eq!(engine.state(), ConnectionState::Error);
    assert!(engine.resource_snapshot().await.is_empty());
    assert_eq!(backend.live_outputs(), 0);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(engine.state(), ConnectionState::Error);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn end_call_is_idempotent() {
    let (engine, backend, connector) = engine(Duration::from_millis(50));

    engine.end_call().await;
    engine.end_call().await;
    assert_eq!(engine.state(), ConnectionState::Idle);

    engine.start().await.expect("start");
    let _remote = connector.take_remote().expect("remote end");
    engine.end_call().await;
    engine.end_call().await;
    assert_eq!(engine.state(), ConnectionState::Disconnected);
    assert!(engine.resource_snapshot().await.is_empty());
    assert_eq!(backend.live_microphones(), 0);
    assert_eq!(backend.live_outputs(), 0);
}

#[tokio::test]
async fn second_start_replaces_first_session() {
    let (engine, backend, connector) = engine(Duration::from_millis(50));

    engine.start().await.expect("first start");
    engine.start().await.expect("second start");

    assert_eq!(connector.connects(), 2);
    assert_eq!(backend.acquisitions(), 2);
    assert_eq!(backend.live_microphones(), 1);
    assert_eq!(backend.live_outputs(), 1);
    assert!(engine.resource_snapshot().await.is_complete());

    let mut first = connector.take_remote().expect("first remote");
    assert!(first.close_requested());
    let mut second = connector.take_remote().expect("second remote");
    assert!(!second.close_requested());

    engine.end_call().await;
    assert!(second.close_requested());
}

#[tokio::test]
async fn late_events_from_old_session_are_ignored() {
    let (engine, _backend, connector) = engine(Duration::from_millis(50));
    let mut states = engine.subscribe_state();

    engine.start().await.expect("first start");
    engine.start().await.expect("second start");
    let first = connector.take_remote().expect("first remote");
    let second = connector.take_remote().expect("second remote");

    // The stale session closes; the new one must stay Connecting.
    first
        .events
        .send(TransportEvent::Close { reason: None })
        .ok();
    second.events.send(TransportEvent::Open).expect("open");
    wait_for_state(&mut states, ConnectionState::Connected).await;
    assert_eq!(engine.state(), ConnectionState::Connected);

    // An Open arriving after end_call does not resurrect the session.
    engine.end_call().await;
    second.events.send(TransportEvent::Open).ok();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_ne!(engine.state(), ConnectionState::Connected);
    assert!(engine.resource_snapshot().await.is_empty());
}

#[tokio::test]
async fn transport_error_tears_down_then_idles() {
    let (engine, backend, connector) = engine(Duration::from_millis(50));
    let mut states = engine.subscribe_state();

    engine.start().await.expect("start");
    let remote = connector.take_remote().expect("remote end");
    remote
        .events
        .send(TransportEvent::Error("quota exceeded".into()))
        .expect("error event");

    let event = wait_for_state(&mut states, ConnectionState::Error).await;
    assert_eq!(event.detail.as_deref(), Some("quota exceeded"));
    wait_for_state(&mut states, ConnectionState::Idle).await;
    assert!(engine.resource_snapshot().await.is_empty());
    assert_eq!(backend.live_microphones(), 0);
}

#[tokio::test]
async fn remote_close_disconnects() {
    let (engine, backend, connector) = engine(Duration::from_millis(50));
    let mut states = engine.subscribe_state();

    engine.start().await.expect("start");
    let remote = connector.take_remote().expect("remote end");
    remote.events.send(TransportEvent::Open).expect("open");
    wait_for_state(&mut states, ConnectionState::Connected).await;

    remote
        .events
        .send(TransportEvent::Close {
            reason: Some("session expired".into()),
        })
        .expect("close");
    let event = wait_for_state(&mut states, ConnectionState::Disconnected).await;
    assert_eq!(event.detail.as_deref(), Some("session expired"));
    assert!(engine.resource_snapshot().await.is_empty());
    assert_eq!(backend.live_outputs(), 0);
    wait_for_state(&mut states, ConnectionState::Idle).await;
}

#[tokio::test]
async fn malformed_inbound_frame_is_dropped() {
    let (engine, backend, connector) = engine(Duration::from_millis(50));
    engine.start().await.expect("start");
    let remote = connector.take_remote().expect("remote end");

    remote
        .events
        .send(TransportEvent::Audio("AAAA".into()))
        .expect("odd frame");
    remote
        .events
        .send(TransportEvent::Audio(half_second_frame(0.1)))
        .expect("valid frame");

    let output = backend.output().expect("output");
    tokio::time::timeout(WAIT, async {
        while output.scheduled().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("valid frame scheduled");

    assert_eq!(output.scheduled()[0].start_at, 0.0);
    let diag = engine.diagnostics();
    assert_eq!(diag.frames_dropped, 1);
    assert_eq!(diag.frames_scheduled, 1);
    assert_eq!(engine.state(), ConnectionState::Connecting);
    engine.end_call().await;
}

#[tokio::test]
async fn mute_toggles_microphone_track() {
    let (engine, backend, connector) = engine(Duration::from_millis(50));

    assert!(!engine.set_muted(true).await, "no microphone yet");

    engine.start().await.expect("start");
    let _remote = connector.take_remote().expect("remote end");
    assert!(engine.set_muted(true).await);
    assert_eq!(backend.mic_enabled(), Some(false));
    assert!(!engine.toggle_mute().await);
    assert_eq!(backend.mic_enabled(), Some(true));
    assert!(engine.toggle_mute().await);
    assert!(engine.is_muted().await);

    // A new session starts unmuted.
    engine.start().await.expect("restart");
    assert!(!engine.is_muted().await);
    engine.end_call().await;
    assert!(!engine.set_muted(true).await);
}

#[tokio::test]
async fn language_pair_is_locked_during_session() {
    let (engine, _backend, connector) = engine(Duration::from_millis(50));
    let pair = lingualive_core::LanguagePair::from_codes("es", "de").expect("pair");

    engine.set_language_pair(pair).expect("idle change");
    engine.start().await.expect("start");
    assert!(connector
        .last_config()
        .expect("config")
        .system_instruction
        .contains("Translate Spanish to German"));
    assert!(matches!(
        engine.set_language_pair(pair.swapped()).unwrap_err(),
        LiveError::Configuration(_)
    ));
    engine.end_call().await;
}

#[tokio::test]
async fn failing_output_close_still_releases_microphone() {
    let (engine, backend, connector) = engine(Duration::from_millis(50));
    engine.start().await.expect("start");
    let mut remote = connector.take_remote().expect("remote end");
    let output = backend.output().expect("output opened");
    output
        .fail_close
        .store(true, std::sync::atomic::Ordering::Release);

    engine.end_call().await;
    assert!(remote.close_requested());
    assert!(output.is_closed());
    assert_eq!(backend.live_outputs(), 0);
    assert_eq!(backend.live_microphones(), 0);
    assert!(engine.resource_snapshot().await.is_empty());
    assert_eq!(engine.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn unavailable_output_fails_start_before_microphone() {
    let (engine, backend, connector) = engine(Duration::from_millis(100));
    backend.fail_output(true);

    let err = engine.start().await.unwrap_err();
    assert!(matches!(err, LiveError::DeviceUnavailable(_)));
    assert_eq!(engine.state(), ConnectionState::Error);
    assert_eq!(backend.acquisitions(), 0);
    assert_eq!(backend.live_microphones(), 0);
    assert_eq!(connector.connects(), 0);
    assert!(engine.resource_snapshot().await.is_empty());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(engine.state(), ConnectionState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn capture_resamples_from_device_rate() {
    let backend = Arc::new(StubBackend::with_mic_rate(48_000));
    let connector = Arc::new(StubConnector::manual());
    let engine = LiveEngine::new(
        config(Duration::from_millis(50)),
        backend.clone(),
        connector.clone(),
    );
    let mut states = engine.subscribe_state();

    engine.start().await.expect("start");
    let mut remote = connector.take_remote().expect("remote end");
    remote.events.send(TransportEvent::Open).expect("open");
    wait_for_state(&mut states, ConnectionState::Connected).await;
    wait_for_capture(&engine).await;

    // One second at 48 kHz: enough for three full 16 kHz blocks after latency.
    let mut producer = backend.take_mic_producer().expect("mic producer");
    assert_eq!(producer.push_slice(&vec![0.2f32; 48_000]), 48_000);

    let first = next_frame(&mut remote).await;
    let second = next_frame(&mut remote).await;
    assert_eq!(first.len(), 4096);
    assert_eq!(second.len(), 4096);
    // Past the resampler's start-up transient the level is preserved.
    let mid = second[2048];
    assert!((mid - 0.2).abs() < 0.02, "got {mid}");
    engine.end_call().await;
}

#[tokio::test]
async fn toggle_mute_flips_once_per_call() {
    let (engine, backend, connector) = engine(Duration::from_millis(50));
    assert!(!engine.toggle_mute().await, "no microphone yet");

    engine.start().await.expect("start");
    let _remote = connector.take_remote().expect("remote end");
    let outcomes = [
        engine.toggle_mute().await,
        engine.toggle_mute().await,
        engine.toggle_mute().await,
    ];
    assert_eq!(outcomes, [true, false, true]);
    assert_eq!(backend.mic_enabled(), Some(false));
    assert!(engine.is_muted().await);
    engine.end_call().await;
}
