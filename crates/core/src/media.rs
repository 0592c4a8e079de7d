use crate::codec::{self, ToBinary};
use crate::error::Result;
use crossbeam_channel::Sender;
use std::sync::Arc;

pub const IMAGE_JPEG_MIME: &str = "image/jpeg";

/// One outbound window of 16-bit mono PCM.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    seq: u64,
    sample_rate: u32,
    samples: Vec<i16>,
    recycle: Option<Sender<Vec<i16>>>,
}

impl AudioFrame {
    pub fn new(seq: u64, sample_rate: u32, samples: Vec<i16>) -> Self {
        Self {
            seq,
            sample_rate,
            samples,
            recycle: None,
        }
    }

    /// Hand the sample buffer to `recycle` when the frame is dropped.
    pub fn with_recycler(mut self, recycle: Sender<Vec<i16>>) -> Self {
        self.recycle = Some(recycle);
        self
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    pub fn to_pcm_bytes(&self) -> Vec<u8> {
        self.samples.to_binary()
    }
}

impl PartialEq for AudioFrame {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
            && self.sample_rate == other.sample_rate
            && self.samples == other.samples
    }
}

impl Drop for AudioFrame {
    fn drop(&mut self) {
        if let Some(recycle) = self.recycle.take() {
            // a full pool just lets the buffer go
            let _ = recycle.try_send(std::mem::take(&mut self.samples));
        }
    }
}

/// One JPEG still from the camera.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    seq: u64,
    width: u32,
    height: u32,
    jpeg: Vec<u8>,
}

impl VideoFrame {
    pub fn new(seq: u64, width: u32, height: u32, jpeg: Vec<u8>) -> Self {
        Self {
            seq,
            width,
            height,
            jpeg,
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn jpeg(&self) -> &[u8] {
        &self.jpeg
    }

    pub fn mime_type(&self) -> &'static str {
        IMAGE_JPEG_MIME
    }
}

/// Anything the transport sends to the endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Audio(AudioFrame),
    Video(VideoFrame),
}

impl OutboundFrame {
    pub fn mime_type(&self) -> String {
        match self {
            OutboundFrame::Audio(frame) => frame.mime_type(),
            OutboundFrame::Video(frame) => frame.mime_type().to_string(),
        }
    }

    /// Base64 payload as it goes on the wire.
    pub fn to_base64(&self) -> String {
        match self {
            OutboundFrame::Audio(frame) => codec::encode_base64(&frame.to_pcm_bytes()),
            OutboundFrame::Video(frame) => codec::encode_base64(frame.jpeg()),
        }
    }
}

/// A decoded inbound buffer of synthesized speech.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    seq: u64,
    sample_rate: u32,
    samples: Arc<[f32]>,
}

impl AudioChunk {
    pub fn new(seq: u64, sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            seq,
            sample_rate,
            samples: samples.into(),
        }
    }

    /// Decode a base64 PCM16 payload. Fails on malformed input.
    pub fn decode(seq: u64, sample_rate: u32, base64_pcm: &str) -> Result<Self> {
        let samples = codec::decode_pcm16(base64_pcm)?;
        Ok(Self::new(seq, sample_rate, samples))
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &Arc<[f32]> {
        &self.samples
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}
