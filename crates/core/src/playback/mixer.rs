//! Software mixer that turns scheduled voices into device frames.
//!
//! The output clock is the count of frames the device has pulled, so it only
//! advances while audio is actually being rendered. [`MixerHandle`] lives with
//! the scheduler, [`MixerRenderer`] lives in the device callback; they talk
//! through two lock-free ring buffers.
use super::{AudioOutput, ScheduledVoice, StopFlag};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

struct Clock {
    frames: AtomicU64,
    rate: u32,
}

impl Clock {
    fn seconds(&self) -> f64 {
        self.frames.load(Ordering::Acquire) as f64 / self.rate as f64
    }
}

/// Build a connected handle/renderer pair for a device running at `device_rate`.
/// `capacity` bounds voices in transit between the two.
pub fn channel(device_rate: u32, capacity: usize) -> (MixerHandle, MixerRenderer) {
    let device_rate = device_rate.max(1);
    let capacity = capacity.max(1);
    let clock = Arc::new(Clock {
        frames: AtomicU64::new(0),
        rate: device_rate,
    });
    let (command_tx, command_rx) = HeapRb::<ScheduledVoice>::new(capacity).split();
    let (finished_tx, finished_rx) = HeapRb::<u64>::new(capacity * 2).split();
    (
        MixerHandle {
            commands: command_tx,
            finished: finished_rx,
            clock: clock.clone(),
        },
        MixerRenderer {
            commands: command_rx,
            finished: finished_tx,
            voices: Vec::with_capacity(capacity),
            clock,
        },
    )
}

pub struct MixerHandle {
    commands: HeapProd<ScheduledVoice>,
    finished: HeapCons<u64>,
    clock: Arc<Clock>,
}

impl AudioOutput for MixerHandle {
    fn now(&self) -> f64 {
        self.clock.seconds()
    }

    fn schedule(&mut self, voice: ScheduledVoice) -> Result<(), ScheduledVoice> {
        self.commands.try_push(voice)
    }

    fn drain_finished(&mut self, on_finished: &mut dyn FnMut(u64)) {
        while let Some(id) = self.finished.try_pop() {
            on_finished(id);
        }
    }
}

struct Voice {
    id: u64,
    start_frame: u64,
    samples: Arc<[f32]>,
    /// Source samples advanced per device frame.
    step: f64,
    stop: StopFlag,
}

impl Voice {
    /// Linear interpolation at fractional source position `pos`.
    fn sample_at(&self, pos: f64) -> Option<f32> {
        let idx = pos as usize;
        let current = *self.samples.get(idx)?;
        let next = self.samples.get(idx + 1).copied().unwrap_or(current);
        let frac = (pos - idx as f64) as f32;
        Some(current + (next - current) * frac)
    }
}

pub struct MixerRenderer {
    commands: HeapCons<ScheduledVoice>,
    finished: HeapProd<u64>,
    voices: Vec<Voice>,
    clock: Arc<Clock>,
}

impl MixerRenderer {
    pub fn sample_rate(&self) -> u32 {
        self.clock.rate
    }

    /// Fill one interleaved device buffer and advance the clock.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = out.len() / channels;
        let base = self.clock.frames.load(Ordering::Acquire);
        let rate = self.clock.rate as f64;

        while let Some(voice) = self.commands.try_pop() {
            if voice.stop.is_stopped() {
                continue;
            }
            // a start time already in the past plays right away
            let start_frame = ((voice.start_at * rate).round() as u64).max(base);
            self.voices.push(Voice {
                id: voice.id,
                start_frame,
                samples: voice.samples,
                step: voice.sample_rate as f64 / rate,
                stop: voice.stop,
            });
        }

        out.fill(0.0);
        let finished = &mut self.finished;
        self.voices.retain(|voice| {
            if voice.stop.is_stopped() {
                return false;
            }
            let first = voice.start_frame.saturating_sub(base) as usize;
            for frame in first..frames {
                let pos = (base + frame as u64 - voice.start_frame) as f64 * voice.step;
                let Some(sample) = voice.sample_at(pos) else {
                    // if the reaper is behind the id is lost; stop_all still clears it
                    let _ = finished.try_push(voice.id);
                    return false;
                };
                for slot in &mut out[frame * channels..(frame + 1) * channels] {
                    *slot += sample;
                }
            }
            let end = base + frames as u64;
            if end > voice.start_frame
                && (end - voice.start_frame) as f64 * voice.step >= voice.samples.len() as f64
            {
                let _ = finished.try_push(voice.id);
                return false;
            }
            true
        });

        for slot in out.iter_mut() {
            *slot = slot.clamp(-1.0, 1.0);
        }
        self.clock.frames.fetch_add(frames as u64, Ordering::Release);
    }
}
