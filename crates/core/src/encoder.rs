//! Turns device-rate capture callbacks into fixed 16 kHz PCM16 windows.
use crate::codec;
use crate::media::AudioFrame;
use crate::outbound::{FrameQueue, PushOutcome};
use crate::stats::SessionStats;
use crossbeam_channel::{Receiver, Sender};
use rubato::{FastFixedIn, Resampler};
use std::collections::VecDeque;
use std::sync::Arc;

const RESAMPLER_CHUNK: usize = 1024;
/// PCM buffers kept for reuse once their frames are dropped downstream.
const SPARE_BUFFERS: usize = 64;

/// Slices a mono stream into fixed windows and queues them as PCM16 frames.
struct Windower {
    rate: u32,
    window: usize,
    window_buf: Vec<f32>,
    spare_rx: Receiver<Vec<i16>>,
    spare_tx: Sender<Vec<i16>>,
    queue: FrameQueue<AudioFrame>,
    next_seq: u64,
    sent: u64,
    displaced: u64,
    stats: Option<Arc<SessionStats>>,
}

impl Windower {
    fn accept(&mut self, samples: &[f32]) {
        let mut rest = samples;
        while !rest.is_empty() {
            let take = (self.window - self.window_buf.len()).min(rest.len());
            self.window_buf.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.window_buf.len() == self.window {
                self.flush_window();
            }
        }
    }

    fn flush_window(&mut self) {
        // only allocates until the first frames come back
        let mut pcm = self
            .spare_rx
            .try_recv()
            .unwrap_or_else(|_| Vec::with_capacity(self.window));
        codec::convert_f32_to_i16_into(&self.window_buf, &mut pcm);
        self.window_buf.clear();
        let frame =
            AudioFrame::new(self.next_seq, self.rate, pcm).with_recycler(self.spare_tx.clone());
        self.next_seq += 1;
        let outcome = self.queue.push(frame);
        if outcome == PushOutcome::Closed {
            return;
        }
        self.sent += 1;
        if let Some(stats) = &self.stats {
            stats.record_audio_sent();
        }
        if outcome == PushOutcome::DisplacedOldest {
            self.displaced += 1;
            if let Some(stats) = &self.stats {
                stats.record_audio_dropped();
            }
        }
    }
}

/// Fixed buffers around the resampler so the capture thread never allocates.
struct ResampleStage {
    resampler: FastFixedIn<f32>,
    pending: VecDeque<f32>,
    input: Vec<f32>,
    output: Vec<Vec<f32>>,
}

impl ResampleStage {
    fn new(resampler: FastFixedIn<f32>) -> Self {
        let input = Vec::with_capacity(resampler.input_frames_max());
        let output = resampler.output_buffer_allocate(true);
        Self {
            resampler,
            pending: VecDeque::with_capacity(RESAMPLER_CHUNK * 4),
            input,
            output,
        }
    }

    fn push(&mut self, samples: &[f32], windower: &mut Windower) {
        self.pending.extend(samples.iter().copied());
        loop {
            let needed = self.resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            self.input.clear();
            self.input.extend(self.pending.drain(..needed));
            match self
                .resampler
                .process_into_buffer(&[self.input.as_slice()], &mut self.output, None)
            {
                Ok((_, produced)) => {
                    if let Some(resampled) = self.output.first() {
                        windower.accept(&resampled[..produced]);
                    }
                }
                Err(e) => {
                    tracing::warn!("failed to resample capture audio: {:?}", e);
                }
            }
        }
    }
}

pub struct OutboundAudioEncoder {
    resample: Option<ResampleStage>,
    windower: Windower,
}

impl OutboundAudioEncoder {
    /// `device_rate` is the rate the capture callback delivers mono samples at.
    pub fn new(
        device_rate: u32,
        target_rate: u32,
        window: usize,
        queue: FrameQueue<AudioFrame>,
    ) -> anyhow::Result<Self> {
        let resample = if device_rate != target_rate {
            tracing::debug!(
                "resampling capture audio from {}hz to {}hz",
                device_rate,
                target_rate
            );
            Some(ResampleStage::new(codec::create_resampler(
                device_rate as f64,
                target_rate as f64,
                RESAMPLER_CHUNK,
            )?))
        } else {
            None
        };
        let window = window.max(1);
        let (spare_tx, spare_rx) = crossbeam_channel::bounded(SPARE_BUFFERS);
        Ok(Self {
            resample,
            windower: Windower {
                rate: target_rate,
                window,
                window_buf: Vec::with_capacity(window),
                spare_rx,
                spare_tx,
                queue,
                next_seq: 0,
                sent: 0,
                displaced: 0,
                stats: None,
            },
        })
    }

    pub fn with_stats(mut self, stats: Arc<SessionStats>) -> Self {
        self.windower.stats = Some(stats);
        self
    }

    /// Feed one capture callback worth of mono samples. Never blocks.
    pub fn push_samples(&mut self, samples: &[f32]) {
        match self.resample.as_mut() {
            Some(stage) => stage.push(samples, &mut self.windower),
            None => self.windower.accept(samples),
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.windower.sent
    }

    pub fn frames_displaced(&self) -> u64 {
        self.windower.displaced
    }

    /// Samples waiting for the next full window.
    pub fn buffered(&self) -> usize {
        self.windower.window_buf.len()
    }
}
