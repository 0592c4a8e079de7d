use async_trait::async_trait;
use field_core::capture::SampleCallback;
use field_core::codec::{ToBinary, encode_base64};
use field_core::playback::ScheduledVoice;
use field_core::{
    AudioOutput, AudioSource, InboundMessage, LiveConfig, MediaDevices, OutboundMedia,
    SessionController, SessionError, SessionState, StreamConfig, StreamTransport, TransportEvent,
    TransportLink, VideoSource,
};
use field_core::transport::TransportCloser;
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct FakeMic {
    callback: Mutex<Option<SampleCallback>>,
    stopped: AtomicBool,
    stop_delay: Duration,
}

impl FakeMic {
    fn feed(&self, samples: &[f32]) {
        if let Some(callback) = self.callback.lock().unwrap().as_mut() {
            callback(samples);
        }
    }
}

impl AudioSource for FakeMic {
    fn sample_rate(&self) -> u32 {
        16_000
    }

    fn start(&self, on_samples: SampleCallback) -> field_core::Result<()> {
        *self.callback.lock().unwrap() = Some(on_samples);
        Ok(())
    }

    fn stop(&self) {
        std::thread::sleep(self.stop_delay);
        self.stopped.store(true, Ordering::SeqCst);
        self.callback.lock().unwrap().take();
    }
}

#[derive(Default)]
struct FakeCamera {
    stopped: AtomicBool,
}

impl VideoSource for FakeCamera {
    fn grab(&self) -> Option<RgbImage> {
        Some(RgbImage::from_pixel(8, 8, Rgb([90, 90, 90])))
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
struct FakeDevices {
    mic: Arc<FakeMic>,
    camera: Arc<FakeCamera>,
    deny_microphone: bool,
    hang_microphone: bool,
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn open_microphone(&self) -> field_core::Result<Arc<dyn AudioSource>> {
        if self.deny_microphone {
            return Err(SessionError::PermissionDenied("microphone".to_string()));
        }
        if self.hang_microphone {
            std::future::pending::<()>().await;
        }
        Ok(self.mic.clone())
    }

    async fn open_camera(&self) -> field_core::Result<Arc<dyn VideoSource>> {
        Ok(self.camera.clone())
    }
}

/// The remote side of a fake link, as seen by the test.
#[derive(Clone)]
struct Remote {
    events: mpsc::Sender<TransportEvent>,
    media: OutboundMedia,
    shutdown: CancellationToken,
}

#[derive(Clone, Default)]
struct FakeTransport {
    remote: Arc<Mutex<Option<Remote>>>,
    never_open: bool,
}

impl FakeTransport {
    fn remote(&self) -> Remote {
        self.remote.lock().unwrap().clone().expect("transport never connected")
    }
}

#[async_trait]
impl StreamTransport for FakeTransport {
    async fn connect(
        &self,
        _config: StreamConfig,
        media: OutboundMedia,
    ) -> field_core::Result<TransportLink> {
        let (events_tx, events) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        if !self.never_open {
            events_tx
                .send(TransportEvent::Open)
                .await
                .map_err(|e| SessionError::Transport(e.to_string()))?;
        }
        *self.remote.lock().unwrap() = Some(Remote {
            events: events_tx,
            media,
            shutdown: shutdown.clone(),
        });
        let token = shutdown.clone();
        let driver = tokio::spawn(async move { token.cancelled().await });
        Ok(TransportLink {
            events,
            closer: TransportCloser::new(shutdown, driver),
        })
    }
}

#[derive(Default)]
struct Timeline {
    now: f64,
    voices: Vec<ScheduledVoice>,
}

#[derive(Clone, Default)]
struct ManualOutput(Arc<Mutex<Timeline>>);

impl ManualOutput {
    fn set_now(&self, now: f64) {
        self.0.lock().unwrap().now = now;
    }

    fn starts(&self) -> Vec<f64> {
        self.0.lock().unwrap().voices.iter().map(|v| v.start_at).collect()
    }

    fn all_stopped(&self) -> bool {
        self.0.lock().unwrap().voices.iter().all(|v| v.stop.is_stopped())
    }
}

impl AudioOutput for ManualOutput {
    fn now(&self) -> f64 {
        self.0.lock().unwrap().now
    }

    fn schedule(&mut self, voice: ScheduledVoice) -> Result<(), ScheduledVoice> {
        self.0.lock().unwrap().voices.push(voice);
        Ok(())
    }

    fn drain_finished(&mut self, _on_finished: &mut dyn FnMut(u64)) {}
}

struct Harness {
    controller: SessionController<FakeDevices, FakeTransport>,
    devices: FakeDevices,
    transport: FakeTransport,
    output: ManualOutput,
}

fn harness_with(devices: FakeDevices, transport: FakeTransport, config: LiveConfig) -> Harness {
    let output = ManualOutput::default();
    let controller = SessionController::new(
        config,
        devices.clone(),
        transport.clone(),
        Box::new(output.clone()),
    );
    Harness {
        controller,
        devices,
        transport,
        output,
    }
}

fn harness() -> Harness {
    harness_with(
        FakeDevices::default(),
        FakeTransport::default(),
        LiveConfig::default(),
    )
}

fn speech(seconds: f64) -> String {
    let samples = vec![1_000i16; (seconds * 24_000.0).round() as usize];
    encode_base64(&samples.to_binary())
}

fn audio_message(seconds: f64) -> TransportEvent {
    TransportEvent::Message(InboundMessage {
        audio: vec![speech(seconds)],
        ..Default::default()
    })
}

async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

#[tokio::test]
async fn test_gapless_schedule_then_interruption() {
    let h = harness();
    h.controller.start().await.unwrap();
    assert_eq!(h.controller.state(), SessionState::Active);
    let remote = h.transport.remote();
    let scheduler = h.controller.scheduler().clone();

    remote.events.send(audio_message(0.5)).await.unwrap();
    eventually("first chunk", || scheduler.scheduled_len() == 1).await;

    h.output.set_now(0.1);
    remote.events.send(audio_message(0.3)).await.unwrap();
    eventually("second chunk", || scheduler.scheduled_len() == 2).await;
    let starts = h.output.starts();
    assert!(close(starts[0], 0.0));
    assert!(close(starts[1], 0.5));
    assert!(close(scheduler.cursor(), 0.8));

    h.output.set_now(0.6);
    remote
        .events
        .send(TransportEvent::Message(InboundMessage {
            interrupted: true,
            ..Default::default()
        }))
        .await
        .unwrap();
    eventually("interruption", || scheduler.scheduled_len() == 0).await;
    assert!(close(scheduler.cursor(), 0.6));
    assert!(h.output.all_stopped());
    assert_eq!(h.controller.stats().interruptions, 1);
    assert_eq!(h.controller.stats().chunks_scheduled, 2);

    h.controller.stop().await;
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert!(h.devices.mic.stopped.load(Ordering::SeqCst));
    assert!(h.devices.camera.stopped.load(Ordering::SeqCst));
    assert!(remote.shutdown.is_cancelled());
}

#[tokio::test]
async fn test_denied_microphone_fails_without_sending() {
    let h = harness_with(
        FakeDevices {
            deny_microphone: true,
            ..Default::default()
        },
        FakeTransport::default(),
        LiveConfig::default(),
    );
    let err = h.controller.start().await.unwrap_err();
    assert_eq!(err, SessionError::PermissionDenied("microphone".to_string()));
    assert_eq!(
        h.controller.state(),
        SessionState::Error {
            reason: SessionError::PermissionDenied("microphone".to_string())
        }
    );
    assert!(h.devices.camera.stopped.load(Ordering::SeqCst));

    let remote = h.transport.remote();
    assert!(remote.media.audio.is_empty());
    assert!(remote.media.video.is_empty());
    assert!(remote.shutdown.is_cancelled());

    // stop after an error is harmless and keeps the error visible
    h.controller.stop().await;
    h.controller.stop().await;
    assert!(matches!(h.controller.state(), SessionState::Error { .. }));
    assert!(h.controller.reset());
    assert_eq!(h.controller.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_transcript_keeps_last_five() {
    let h = harness();
    let mut transcript = h.controller.subscribe_transcript();
    h.controller.start().await.unwrap();
    let remote = h.transport.remote();

    for i in 0..7 {
        let message = if i % 2 == 0 {
            InboundMessage {
                input_transcript: Some(format!("user {i}")),
                ..Default::default()
            }
        } else {
            InboundMessage {
                output_transcript: Some(format!("model {i}")),
                ..Default::default()
            }
        };
        remote.events.send(TransportEvent::Message(message)).await.unwrap();
    }
    eventually("transcript", || {
        transcript.borrow_and_update().last().map(|l| l.text.clone()) == Some("user 6".into())
    })
    .await;

    let lines: Vec<String> = transcript.borrow().lines().map(ToString::to_string).collect();
    assert_eq!(
        lines,
        ["User: user 2", "AI: model 3", "User: user 4", "AI: model 5", "User: user 6"]
    );
    h.controller.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let h = harness();
    h.controller.stop().await;
    assert_eq!(h.controller.state(), SessionState::Idle);

    h.controller.start().await.unwrap();
    assert_eq!(
        h.controller.start().await.unwrap_err(),
        SessionError::AlreadyRunning
    );
    h.controller.stop().await;
    h.controller.stop().await;
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert!(h.devices.mic.stopped.load(Ordering::SeqCst));
    assert!(h.devices.camera.stopped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_transport_error_releases_everything() {
    let h = harness();
    h.controller.start().await.unwrap();
    let remote = h.transport.remote();
    remote.events.send(audio_message(1.0)).await.unwrap();
    eventually("chunk", || h.controller.scheduler().scheduled_len() == 1).await;

    remote
        .events
        .send(TransportEvent::Error("socket reset".to_string()))
        .await
        .unwrap();
    let mut state = h.controller.subscribe_state();
    state
        .wait_for(|s| matches!(s, SessionState::Error { .. }))
        .await
        .unwrap();

    assert_eq!(h.controller.scheduler().scheduled_len(), 0);
    assert!(h.output.all_stopped());
    assert!(h.devices.mic.stopped.load(Ordering::SeqCst));
    assert!(h.devices.camera.stopped.load(Ordering::SeqCst));
    assert!(remote.shutdown.is_cancelled());
}

#[tokio::test]
async fn test_remote_close_returns_to_idle() {
    let h = harness();
    h.controller.start().await.unwrap();
    let remote = h.transport.remote();
    remote
        .events
        .send(TransportEvent::Close(Some("bye".to_string())))
        .await
        .unwrap();
    let mut state = h.controller.subscribe_state();
    state.wait_for(|s| *s == SessionState::Idle).await.unwrap();
    assert!(h.devices.mic.stopped.load(Ordering::SeqCst));

    // a fresh session can start afterwards
    h.controller.start().await.unwrap();
    assert_eq!(h.controller.state(), SessionState::Active);
    h.controller.stop().await;
}

#[tokio::test]
async fn test_malformed_chunk_is_dropped() {
    let h = harness();
    h.controller.start().await.unwrap();
    let remote = h.transport.remote();
    remote
        .events
        .send(TransportEvent::Message(InboundMessage {
            audio: vec!["not base64!".to_string(), speech(0.25)],
            ..Default::default()
        }))
        .await
        .unwrap();
    eventually("valid chunk", || h.controller.scheduler().scheduled_len() == 1).await;

    let stats = h.controller.stats();
    assert_eq!(stats.chunks_dropped, 1);
    assert_eq!(stats.chunks_scheduled, 1);
    assert!(close(h.controller.scheduler().cursor(), 0.25));
    assert_eq!(h.controller.state(), SessionState::Active);
    h.controller.stop().await;
}

#[tokio::test]
async fn test_microphone_windows_reach_transport() {
    let h = harness();
    h.controller.start().await.unwrap();
    let remote = h.transport.remote();

    h.devices.mic.feed(&[0.25; 4096]);
    h.devices.mic.feed(&[0.25; 100]);
    let frame = remote.media.audio.try_pop().expect("one full window");
    assert_eq!(frame.samples().len(), 4096);
    assert!(remote.media.audio.is_empty());
    h.controller.stop().await;
}

#[tokio::test]
async fn test_stop_while_connecting_cancels() {
    let h = harness_with(
        FakeDevices::default(),
        FakeTransport {
            never_open: true,
            ..Default::default()
        },
        LiveConfig::default(),
    );
    let controller = h.controller.clone();
    let start = tokio::spawn(async move { controller.start().await });

    let mut state = h.controller.subscribe_state();
    state
        .wait_for(|s| *s == SessionState::Connecting)
        .await
        .unwrap();
    eventually("transport connect", || h.transport.remote.lock().unwrap().is_some()).await;

    h.controller.stop().await;
    assert_eq!(start.await.unwrap(), Err(SessionError::Cancelled));
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert!(h.devices.mic.stopped.load(Ordering::SeqCst));
    assert!(h.devices.camera.stopped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_open_timeout_moves_to_error() {
    let config = LiveConfig::builder()
        .with_connect_timeout(Duration::from_millis(50))
        .build();
    let h = harness_with(
        FakeDevices::default(),
        FakeTransport {
            never_open: true,
            ..Default::default()
        },
        config,
    );
    let err = h.controller.start().await.unwrap_err();
    assert!(matches!(err, SessionError::Timeout(_)));
    assert!(matches!(h.controller.state(), SessionState::Error { .. }));
    assert!(h.devices.mic.stopped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_capture_timeout_stops_opened_camera() {
    let config = LiveConfig::builder()
        .with_capture_timeout(Duration::from_millis(50))
        .build();
    let h = harness_with(
        FakeDevices {
            hang_microphone: true,
            ..Default::default()
        },
        FakeTransport::default(),
        config,
    );
    let err = h.controller.start().await.unwrap_err();
    assert_eq!(err, SessionError::Timeout("acquiring capture devices"));
    assert!(matches!(h.controller.state(), SessionState::Error { .. }));
    assert!(h.devices.camera.stopped.load(Ordering::SeqCst));
    assert!(h.transport.remote().shutdown.is_cancelled());
}

#[tokio::test]
async fn test_stop_during_capture_stops_opened_camera() {
    let h = harness_with(
        FakeDevices {
            hang_microphone: true,
            ..Default::default()
        },
        FakeTransport::default(),
        LiveConfig::default(),
    );
    let controller = h.controller.clone();
    let start = tokio::spawn(async move { controller.start().await });

    let mut state = h.controller.subscribe_state();
    state
        .wait_for(|s| *s == SessionState::Connecting)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    h.controller.stop().await;
    assert_eq!(start.await.unwrap(), Err(SessionError::Cancelled));
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert!(h.devices.camera.stopped.load(Ordering::SeqCst));
    assert!(!h.devices.mic.stopped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_slow_microphone_release_keeps_runtime_responsive() {
    let devices = FakeDevices {
        mic: Arc::new(FakeMic {
            stop_delay: Duration::from_millis(150),
            ..Default::default()
        }),
        ..Default::default()
    };
    let h = harness_with(devices, FakeTransport::default(), LiveConfig::default());
    h.controller.start().await.unwrap();

    let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = ticks.clone();
    let ticker = tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(5)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let before = ticks.load(Ordering::SeqCst);
    h.controller.stop().await;
    let during = ticks.load(Ordering::SeqCst) - before;
    ticker.abort();

    assert!(during >= 5, "runtime stalled during release, {during} ticks");
    assert!(h.devices.mic.stopped.load(Ordering::SeqCst));
    assert_eq!(h.controller.state(), SessionState::Idle);
}
