//! Platform-agnostic core of a live audio/video assistant session.
//!
//! Capture hardware comes in through [`MediaDevices`], the remote endpoint
//! through [`StreamTransport`] and the speaker through [`AudioOutput`];
//! [`SessionController`] wires them together.
pub mod capture;
pub mod codec;
pub mod config;
pub mod encoder;
pub mod error;
pub mod media;
pub mod outbound;
pub mod playback;
pub mod session;
pub mod stats;
pub mod transcript;
pub mod transport;
pub mod video;

pub use capture::{AudioSource, CaptureHandle, MediaCaptureAdapter, MediaDevices, VideoSource};
pub use config::LiveConfig;
pub use error::{Result, SessionError};
pub use media::{AudioChunk, AudioFrame, OutboundFrame, VideoFrame};
pub use outbound::OutboundMedia;
pub use playback::{AudioOutput, PlaybackScheduler};
pub use session::{SessionController, SessionState};
pub use stats::StatsSnapshot;
pub use transcript::{Speaker, TranscriptAggregator, TranscriptLine};
pub use transport::{InboundMessage, StreamConfig, StreamTransport, TransportEvent, TransportLink};
