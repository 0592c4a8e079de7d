//! Wire model for the bidirectional live generation protocol.
pub mod input;
pub mod server;
pub mod setup;

pub use input::{Blob, ClientMessage, RealtimeInput};
pub use server::{
    GoAway, ModelTurn, ServerContent, ServerMessage, ServerPart, SetupComplete, Transcription,
    UsageMetadata,
};
pub use setup::{Modality, Setup, SetupBuilder};

/// MIME type of the 16 kHz mono PCM stream sent to the endpoint.
pub const INPUT_AUDIO_MIME: &str = "audio/pcm;rate=16000";
/// MIME type of still camera frames sent to the endpoint.
pub const IMAGE_JPEG_MIME: &str = "image/jpeg";
