use super::{AudioOutput, ScheduledVoice, StopFlag};
use crate::media::AudioChunk;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Where a chunk landed on the output clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub id: u64,
    pub start_at: f64,
    pub duration: f64,
}

struct State {
    output: Box<dyn AudioOutput>,
    /// Next start time. Only moves backwards on reset.
    cursor: f64,
    /// In-flight voices keyed by a monotonically increasing id.
    scheduled: BTreeMap<u64, StopFlag>,
    next_id: u64,
}

impl State {
    fn stop_all(&mut self) -> usize {
        let stopped = self.scheduled.len();
        for flag in self.scheduled.values() {
            flag.stop();
        }
        self.scheduled.clear();
        self.cursor = self.output.now();
        stopped
    }
}

/// Schedules inbound chunks back to back and stops them all on demand.
///
/// All state sits behind one mutex: the inbound handler, the reaper and
/// teardown are the only callers and none of them run on the audio thread.
pub struct PlaybackScheduler {
    state: Mutex<State>,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        let cursor = output.now();
        Self {
            state: Mutex::new(State {
                output,
                cursor,
                scheduled: BTreeMap::new(),
                next_id: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a fresh session timeline at the current output time.
    pub fn reset(&self) {
        let mut state = self.lock();
        let stopped = state.stop_all();
        if stopped > 0 {
            tracing::debug!("reset stopped {} leftover chunks", stopped);
        }
    }

    /// Schedule `chunk` at `max(cursor, now)` and advance the cursor past it.
    ///
    /// Returns `None` if the output refused the voice; the cursor is left untouched.
    pub fn enqueue(&self, chunk: &AudioChunk) -> Option<ScheduledChunk> {
        let mut state = self.lock();
        let now = state.output.now();
        let start_at = state.cursor.max(now);
        let duration = chunk.duration();
        let id = state.next_id;
        state.next_id += 1;

        let stop = StopFlag::new();
        let voice = ScheduledVoice {
            id,
            start_at,
            samples: chunk.samples().clone(),
            sample_rate: chunk.sample_rate(),
            stop: stop.clone(),
        };
        if state.output.schedule(voice).is_err() {
            tracing::warn!("output queue full, dropping chunk {}", chunk.seq());
            return None;
        }
        state.scheduled.insert(id, stop);
        state.cursor = start_at + duration;
        tracing::debug!(
            "chunk {} scheduled at {:.3}s for {:.3}s (now {:.3}s)",
            chunk.seq(),
            start_at,
            duration,
            now
        );
        Some(ScheduledChunk {
            id,
            start_at,
            duration,
        })
    }

    /// Barge-in: silence everything immediately and restart the timeline at now.
    pub fn interrupt(&self) -> usize {
        let mut state = self.lock();
        let stopped = state.stop_all();
        tracing::info!(
            "playback interrupted, stopped {} chunks, cursor reset to {:.3}s",
            stopped,
            state.cursor
        );
        stopped
    }

    /// Teardown: same as [`interrupt`](Self::interrupt) without the barge-in log.
    pub fn stop_all(&self) -> usize {
        self.lock().stop_all()
    }

    /// Drop handles of chunks that finished playing on their own.
    pub fn reap(&self) -> usize {
        let mut guard = self.lock();
        let state = &mut *guard;
        let scheduled = &mut state.scheduled;
        let mut reaped = 0;
        // ids already removed by a stop are ignored, so each handle leaves once
        state.output.drain_finished(&mut |id| {
            if scheduled.remove(&id).is_some() {
                reaped += 1;
            }
        });
        reaped
    }

    pub fn cursor(&self) -> f64 {
        self.lock().cursor
    }

    pub fn now(&self) -> f64 {
        self.lock().output.now()
    }

    pub fn scheduled_len(&self) -> usize {
        self.lock().scheduled.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Default)]
    struct Shared {
        now: f64,
        voices: Vec<ScheduledVoice>,
        finished: Vec<u64>,
        refuse: bool,
    }

    #[derive(Clone, Default)]
    struct ManualOutput(Arc<std::sync::Mutex<Shared>>);

    impl ManualOutput {
        fn set_now(&self, now: f64) {
            self.0.lock().unwrap().now = now;
        }

        fn finish(&self, id: u64) {
            self.0.lock().unwrap().finished.push(id);
        }

        fn voices(&self) -> Vec<ScheduledVoice> {
            self.0.lock().unwrap().voices.clone()
        }
    }

    impl AudioOutput for ManualOutput {
        fn now(&self) -> f64 {
            self.0.lock().unwrap().now
        }

        fn schedule(&mut self, voice: ScheduledVoice) -> Result<(), ScheduledVoice> {
            let mut shared = self.0.lock().unwrap();
            if shared.refuse {
                return Err(voice);
            }
            shared.voices.push(voice);
            Ok(())
        }

        fn drain_finished(&mut self, on_finished: &mut dyn FnMut(u64)) {
            for id in self.0.lock().unwrap().finished.drain(..) {
                on_finished(id);
            }
        }
    }

    fn chunk(seq: u64, seconds: f64) -> AudioChunk {
        AudioChunk::new(seq, 24_000, vec![0.1; (seconds * 24_000.0) as usize])
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_back_to_back_chunks_are_gapless() {
        let output = ManualOutput::default();
        let scheduler = PlaybackScheduler::new(Box::new(output.clone()));

        let durations = [0.25, 0.5, 0.125, 1.0];
        let mut expected = 0.0;
        for (seq, d) in durations.iter().enumerate() {
            let placed = scheduler.enqueue(&chunk(seq as u64, *d)).unwrap();
            assert!(close(placed.start_at, expected));
            expected += d;
        }
        assert!(close(scheduler.cursor(), expected));
        assert_eq!(scheduler.scheduled_len(), 4);
    }

    #[test]
    fn test_late_chunk_starts_at_arrival() {
        let output = ManualOutput::default();
        let scheduler = PlaybackScheduler::new(Box::new(output.clone()));

        scheduler.enqueue(&chunk(0, 0.25)).unwrap();
        output.set_now(2.0);
        let placed = scheduler.enqueue(&chunk(1, 0.5)).unwrap();
        assert!(close(placed.start_at, 2.0));
        assert!(close(scheduler.cursor(), 2.5));
    }

    #[test]
    fn test_interrupt_stops_everything_and_resets_cursor() {
        let output = ManualOutput::default();
        let scheduler = PlaybackScheduler::new(Box::new(output.clone()));

        let first = scheduler.enqueue(&chunk(0, 0.5)).unwrap();
        assert!(close(first.start_at, 0.0));
        output.set_now(0.1);
        let second = scheduler.enqueue(&chunk(1, 0.3)).unwrap();
        assert!(close(second.start_at, 0.5));

        output.set_now(0.6);
        assert_eq!(scheduler.interrupt(), 2);
        assert_eq!(scheduler.scheduled_len(), 0);
        assert!(close(scheduler.cursor(), 0.6));
        assert!(output.voices().iter().all(|v| v.stop.is_stopped()));

        // the model resumes speaking
        let resumed = scheduler.enqueue(&chunk(2, 0.2)).unwrap();
        assert!(close(resumed.start_at, 0.6));
    }

    #[test]
    fn test_interrupt_when_idle_only_moves_cursor() {
        let output = ManualOutput::default();
        let scheduler = PlaybackScheduler::new(Box::new(output.clone()));
        output.set_now(3.0);
        assert_eq!(scheduler.interrupt(), 0);
        assert!(close(scheduler.cursor(), 3.0));
        assert_eq!(scheduler.stop_all(), 0);
    }

    #[test]
    fn test_reap_removes_each_handle_once() {
        let output = ManualOutput::default();
        let scheduler = PlaybackScheduler::new(Box::new(output.clone()));
        let a = scheduler.enqueue(&chunk(0, 0.1)).unwrap();
        let b = scheduler.enqueue(&chunk(1, 0.1)).unwrap();

        output.finish(a.id);
        output.finish(a.id);
        assert_eq!(scheduler.reap(), 1);
        assert_eq!(scheduler.scheduled_len(), 1);

        scheduler.interrupt();
        // a stopped voice reported late is ignored
        output.finish(b.id);
        assert_eq!(scheduler.reap(), 0);
    }

    #[test]
    fn test_refused_voice_leaves_cursor() {
        let output = ManualOutput::default();
        let scheduler = PlaybackScheduler::new(Box::new(output.clone()));
        scheduler.enqueue(&chunk(0, 0.5)).unwrap();
        output.0.lock().unwrap().refuse = true;
        assert!(scheduler.enqueue(&chunk(1, 0.5)).is_none());
        assert!(close(scheduler.cursor(), 0.5));
        assert_eq!(scheduler.scheduled_len(), 1);
    }
}
