use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every pipeline of one session.
#[derive(Debug, Default)]
pub struct SessionStats {
    audio_frames_sent: AtomicU64,
    audio_frames_dropped: AtomicU64,
    video_frames_sent: AtomicU64,
    video_ticks_skipped: AtomicU64,
    chunks_scheduled: AtomicU64,
    chunks_dropped: AtomicU64,
    interruptions: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub audio_frames_sent: u64,
    pub audio_frames_dropped: u64,
    pub video_frames_sent: u64,
    pub video_ticks_skipped: u64,
    pub chunks_scheduled: u64,
    pub chunks_dropped: u64,
    pub interruptions: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_audio_sent(&self) {
        self.audio_frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audio_dropped(&self) {
        self.audio_frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_video_sent(&self) {
        self.video_frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_video_skipped(&self) {
        self.video_ticks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunk_scheduled(&self) {
        self.chunks_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunk_dropped(&self) {
        self.chunks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_interruption(&self) {
        self.interruptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            audio_frames_sent: self.audio_frames_sent.load(Ordering::Relaxed),
            audio_frames_dropped: self.audio_frames_dropped.load(Ordering::Relaxed),
            video_frames_sent: self.video_frames_sent.load(Ordering::Relaxed),
            video_ticks_skipped: self.video_ticks_skipped.load(Ordering::Relaxed),
            chunks_scheduled: self.chunks_scheduled.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
        }
    }
}
