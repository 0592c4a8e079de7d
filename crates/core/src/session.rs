//! The live session state machine and its guaranteed teardown.
use crate::capture::{CaptureHandle, MediaCaptureAdapter, MediaDevices};
use crate::config::LiveConfig;
use crate::encoder::OutboundAudioEncoder;
use crate::error::{Result, SessionError};
use crate::media::AudioChunk;
use crate::outbound::OutboundMedia;
use crate::playback::{AudioOutput, PlaybackScheduler};
use crate::stats::{SessionStats, StatsSnapshot};
use crate::transcript::{Speaker, TranscriptAggregator};
use crate::transport::{
    InboundMessage, StreamConfig, StreamTransport, TransportCloser, TransportEvent, TransportLink,
};
use crate::video::{FrameEncoder, JpegFrameEncoder, VideoPipeline};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Error { reason: SessionError },
}

impl SessionState {
    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Active)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Active => write!(f, "active"),
            SessionState::Error { reason } => write!(f, "error: {reason}"),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything a running session owns. Dropping it releases all of it.
struct ActiveSession {
    capture: Arc<CaptureHandle>,
    closer: Option<TransportCloser>,
    media: OutboundMedia,
    video_cancel: CancellationToken,
    video_task: Option<JoinHandle<()>>,
    inbound_cancel: CancellationToken,
    scheduler: Arc<PlaybackScheduler>,
}

impl ActiveSession {
    /// Video timer, transport, playback, hardware. No step is skipped.
    async fn teardown(mut self, close_timeout: Duration) {
        self.video_cancel.cancel();
        if let Some(task) = self.video_task.take() {
            // an encode already running still holds the camera
            match tokio::time::timeout(close_timeout, task).await {
                Ok(Err(e)) => tracing::error!("video task failed: {}", e),
                Err(_) => tracing::warn!("video encode did not finish before release"),
                Ok(Ok(())) => {}
            }
        }

        self.media.close();
        if let Some(closer) = self.closer.take() {
            if let Err(e) = closer.close(close_timeout).await {
                tracing::warn!("transport did not close cleanly: {}", e);
            }
        }

        let stopped = self.scheduler.stop_all();
        if stopped > 0 {
            tracing::debug!("stopped {} scheduled chunks", stopped);
        }

        // stopping a device may join its stream thread
        let capture = self.capture.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || capture.release()).await {
            tracing::error!("capture release task failed: {}", e);
            self.capture.release();
        }
        self.inbound_cancel.cancel();
    }
}

/// Backstop for a session dropped without [`ActiveSession::teardown`]. Releasing
/// capture here runs inline and may block while a stream thread exits.
impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.video_cancel.cancel();
        if let Some(task) = self.video_task.take() {
            task.abort();
        }
        self.media.close();
        drop(self.closer.take());
        self.scheduler.stop_all();
        self.capture.release();
        self.inbound_cancel.cancel();
    }
}

/// Puts a connect attempt that never finished back to idle.
struct ConnectingGuard<'a> {
    state: &'a watch::Sender<SessionState>,
    connecting: &'a Mutex<Option<CancellationToken>>,
    armed: bool,
}

impl ConnectingGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        lock(self.connecting).take();
        if self.armed {
            self.state.send_if_modified(|state| {
                if *state == SessionState::Connecting {
                    *state = SessionState::Idle;
                    true
                } else {
                    false
                }
            });
        }
    }
}

struct Inner<D, T> {
    config: LiveConfig,
    capture: MediaCaptureAdapter<D>,
    transport: T,
    frame_encoder: Arc<dyn FrameEncoder>,
    scheduler: Arc<PlaybackScheduler>,
    state: watch::Sender<SessionState>,
    transcript: watch::Sender<TranscriptAggregator>,
    stats: Mutex<Arc<SessionStats>>,
    active: Mutex<Option<ActiveSession>>,
    connecting: Mutex<Option<CancellationToken>>,
}

/// Runs one live session at a time over a capture device set and a transport.
pub struct SessionController<D, T> {
    inner: Arc<Inner<D, T>>,
}

impl<D, T> Clone for SessionController<D, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D, T> SessionController<D, T>
where
    D: MediaDevices + 'static,
    T: StreamTransport + 'static,
{
    pub fn new(config: LiveConfig, devices: D, transport: T, output: Box<dyn AudioOutput>) -> Self {
        let frame_encoder: Arc<dyn FrameEncoder> = Arc::new(JpegFrameEncoder::new(config.jpeg_quality));
        let (state, _) = watch::channel(SessionState::Idle);
        let (transcript, _) = watch::channel(TranscriptAggregator::new(config.transcript_capacity));
        Self {
            inner: Arc::new(Inner {
                capture: MediaCaptureAdapter::new(devices),
                transport,
                frame_encoder,
                scheduler: Arc::new(PlaybackScheduler::new(output)),
                state,
                transcript,
                stats: Mutex::new(Arc::new(SessionStats::new())),
                active: Mutex::new(None),
                connecting: Mutex::new(None),
                config,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn subscribe_transcript(&self) -> watch::Receiver<TranscriptAggregator> {
        self.inner.transcript.subscribe()
    }

    /// Counters of the current, or most recent, session.
    pub fn stats(&self) -> StatsSnapshot {
        lock(&self.inner.stats).snapshot()
    }

    pub fn scheduler(&self) -> &Arc<PlaybackScheduler> {
        &self.inner.scheduler
    }

    /// Acquire capture, open the transport and start streaming.
    ///
    /// Resolves once the session is active. Any failure leaves the state at
    /// `Error` with every acquired resource released; [`stop`](Self::stop)
    /// during this call resolves it with [`SessionError::Cancelled`].
    pub async fn start(&self) -> Result<()> {
        let cancel = CancellationToken::new();
        {
            let mut connecting = lock(&self.inner.connecting);
            let mut claimed = false;
            self.inner.state.send_if_modified(|state| {
                if state.is_running() {
                    return false;
                }
                *state = SessionState::Connecting;
                claimed = true;
                true
            });
            if !claimed {
                return Err(SessionError::AlreadyRunning);
            }
            *connecting = Some(cancel.clone());
        }
        tracing::info!("session connecting");

        let mut guard = ConnectingGuard {
            state: &self.inner.state,
            connecting: &self.inner.connecting,
            armed: true,
        };
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(SessionError::Cancelled),
            result = self.inner.open_session() => result,
        };
        match result {
            Ok(()) => {
                guard.disarm();
                Ok(())
            }
            Err(SessionError::Cancelled) => {
                tracing::info!("session start cancelled");
                Err(SessionError::Cancelled)
            }
            Err(e) => {
                guard.disarm();
                tracing::error!("session failed to start: {}", e);
                self.inner
                    .state
                    .send_replace(SessionState::Error { reason: e.clone() });
                Err(e)
            }
        }
    }

    /// End the session. Safe in any state and safe to repeat.
    pub async fn stop(&self) {
        let pending = lock(&self.inner.connecting).take();
        let mut state_rx = self.inner.state.subscribe();
        if let Some(cancel) = pending {
            cancel.cancel();
            let _ = state_rx
                .wait_for(|state| *state != SessionState::Connecting)
                .await;
        }
        self.inner.finish(None).await;
        // another path may be mid-teardown
        let _ = state_rx
            .wait_for(|state| *state != SessionState::Active)
            .await;
    }

    /// Clear a terminal error back to idle. Returns whether anything changed.
    pub fn reset(&self) -> bool {
        self.inner.state.send_if_modified(|state| {
            if matches!(state, SessionState::Error { .. }) {
                *state = SessionState::Idle;
                true
            } else {
                false
            }
        })
    }
}

impl<D, T> Inner<D, T>
where
    D: MediaDevices + 'static,
    T: StreamTransport + 'static,
{
    async fn open_session(self: &Arc<Self>) -> Result<()> {
        let config = &self.config;
        let stats = Arc::new(SessionStats::new());
        *lock(&self.stats) = stats.clone();
        let media = OutboundMedia::new(config.audio_queue_capacity);

        let acquire = async {
            tokio::time::timeout(config.capture_timeout, self.capture.acquire())
                .await
                .map_err(|_| SessionError::Timeout("acquiring capture devices"))?
        };
        let connect = async {
            tokio::time::timeout(
                config.connect_timeout,
                self.transport
                    .connect(StreamConfig::from(config), media.clone()),
            )
            .await
            .map_err(|_| SessionError::Timeout("connecting the transport"))?
        };
        let (capture, link) = tokio::join!(acquire, connect);
        let capture = capture?;
        let TransportLink { mut events, closer } = link?;

        tokio::time::timeout(config.connect_timeout, wait_for_open(&mut events))
            .await
            .map_err(|_| SessionError::Timeout("waiting for the transport to open"))??;
        tracing::info!("transport open");

        self.scheduler.reset();
        self.transcript.send_modify(|transcript| transcript.clear());

        let audio = capture.audio().clone();
        let mut encoder = OutboundAudioEncoder::new(
            audio.sample_rate(),
            config.input_sample_rate,
            config.audio_window,
            media.audio.clone(),
        )
        .map_err(|e| SessionError::DeviceUnavailable(format!("unusable microphone rate: {e}")))?
        .with_stats(stats.clone());
        audio.start(Box::new(move |samples| encoder.push_samples(samples)))?;

        let video_cancel = CancellationToken::new();
        let video = VideoPipeline {
            source: capture.video().clone(),
            encoder: self.frame_encoder.clone(),
            queue: media.video.clone(),
            stats: stats.clone(),
            interval: config.video_interval,
            max_dimension: config.max_frame_dimension,
        };
        let video_task = tokio::spawn(video.run(video_cancel.clone()));

        let inbound_cancel = CancellationToken::new();
        *lock(&self.active) = Some(ActiveSession {
            capture: Arc::new(capture),
            closer: Some(closer),
            media,
            video_cancel,
            video_task: Some(video_task),
            inbound_cancel: inbound_cancel.clone(),
            scheduler: self.scheduler.clone(),
        });
        self.state.send_replace(SessionState::Active);
        tokio::spawn(self.clone().pump_inbound(events, stats, inbound_cancel));
        tracing::info!("session active");
        Ok(())
    }

    async fn pump_inbound(
        self: Arc<Self>,
        mut events: mpsc::Receiver<TransportEvent>,
        stats: Arc<SessionStats>,
        cancel: CancellationToken,
    ) {
        let mut reap = tokio::time::interval(self.config.reap_interval);
        reap.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut next_seq = 0u64;

        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                event = events.recv() => match event {
                    Some(TransportEvent::Message(message)) => {
                        self.handle_message(message, &mut next_seq, &stats);
                    }
                    Some(TransportEvent::Open) => tracing::debug!("ignoring repeated open"),
                    Some(TransportEvent::Error(e)) => {
                        tracing::error!("transport error: {}", e);
                        break Some(SessionError::Transport(e));
                    }
                    Some(TransportEvent::Close(reason)) => {
                        tracing::info!("transport closed: {}", reason.as_deref().unwrap_or("no reason"));
                        break None;
                    }
                    None => {
                        tracing::info!("transport event stream ended");
                        break None;
                    }
                },
                _ = reap.tick() => {
                    self.scheduler.reap();
                }
            }
        };
        self.finish(outcome).await;
    }

    fn handle_message(&self, message: InboundMessage, next_seq: &mut u64, stats: &SessionStats) {
        // barge-in first so audio in the same message belongs to the new turn
        if message.interrupted {
            self.scheduler.interrupt();
            stats.record_interruption();
        }

        for payload in &message.audio {
            let seq = *next_seq;
            *next_seq += 1;
            match AudioChunk::decode(seq, self.config.output_sample_rate, payload) {
                Ok(chunk) => {
                    if self.scheduler.enqueue(&chunk).is_some() {
                        stats.record_chunk_scheduled();
                    } else {
                        stats.record_chunk_dropped();
                    }
                }
                Err(e) => {
                    tracing::warn!("dropping inbound chunk {}: {}", seq, e);
                    stats.record_chunk_dropped();
                }
            }
        }

        if let Some(text) = &message.output_transcript {
            self.transcript
                .send_if_modified(|transcript| transcript.push(Speaker::Remote, text));
        }
        if let Some(text) = &message.input_transcript {
            self.transcript
                .send_if_modified(|transcript| transcript.push(Speaker::User, text));
        }
        if message.turn_complete {
            tracing::debug!("model turn complete");
        }
    }

    /// Tear down the active session, if any, and settle the state.
    async fn finish(&self, error: Option<SessionError>) {
        let active = lock(&self.active).take();
        let Some(active) = active else {
            return;
        };
        active.teardown(self.config.close_timeout).await;
        let next = match error {
            Some(reason) => SessionState::Error { reason },
            None => SessionState::Idle,
        };
        tracing::info!("session ended, state {}", next);
        self.state.send_replace(next);
    }
}

async fn wait_for_open(events: &mut mpsc::Receiver<TransportEvent>) -> Result<()> {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Open => return Ok(()),
            TransportEvent::Error(e) => return Err(SessionError::Transport(e)),
            TransportEvent::Close(reason) => {
                return Err(SessionError::Transport(format!(
                    "closed before open: {}",
                    reason.unwrap_or_else(|| "no reason".to_string())
                )));
            }
            TransportEvent::Message(_) => {
                tracing::warn!("ignoring message received before open");
            }
        }
    }
    Err(SessionError::Transport(
        "transport ended before open".to_string(),
    ))
}
