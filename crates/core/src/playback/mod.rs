//! Gapless, interruptible playback of inbound speech.
//!
//! [`PlaybackScheduler`] decides *when* each chunk plays against an
//! [`AudioOutput`]'s clock; the output (normally the software [`mixer`])
//! decides *how* it reaches the speaker.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub mod mixer;
mod scheduler;

pub use scheduler::{PlaybackScheduler, ScheduledChunk};

/// Shared cancellation bit for one scheduled voice. Readable from the audio thread.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A chunk handed to the output with its start time on the output clock.
#[derive(Debug, Clone)]
pub struct ScheduledVoice {
    pub id: u64,
    /// Seconds on the output clock.
    pub start_at: f64,
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    pub stop: StopFlag,
}

/// A monotonic output clock that can play scheduled voices.
pub trait AudioOutput: Send {
    /// Current output time in seconds.
    fn now(&self) -> f64;

    /// Queue a voice. Gives it back if the output cannot take it.
    fn schedule(&mut self, voice: ScheduledVoice) -> Result<(), ScheduledVoice>;

    /// Report ids of voices that played to their natural end since the last call.
    fn drain_finished(&mut self, on_finished: &mut dyn FnMut(u64));
}
