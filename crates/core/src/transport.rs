//! Contract with the full-duplex channel to the remote endpoint.
use crate::config::LiveConfig;
use crate::error::{Result, SessionError};
use crate::outbound::OutboundMedia;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What the endpoint is told when the channel opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub system_instruction: String,
    pub audio_only_response: bool,
    pub transcribe_input: bool,
    pub transcribe_output: bool,
}

impl From<&LiveConfig> for StreamConfig {
    fn from(config: &LiveConfig) -> Self {
        Self {
            system_instruction: config.system_instruction.clone(),
            audio_only_response: true,
            transcribe_input: true,
            transcribe_output: true,
        }
    }
}

/// One inbound server message, reduced to what the session acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundMessage {
    /// Base64 PCM16 at the output rate, in playback order.
    pub audio: Vec<String>,
    pub output_transcript: Option<String>,
    pub input_transcript: Option<String>,
    pub interrupted: bool,
    pub turn_complete: bool,
}

impl InboundMessage {
    pub fn is_empty(&self) -> bool {
        self.audio.is_empty()
            && self.output_transcript.is_none()
            && self.input_transcript.is_none()
            && !self.interrupted
            && !self.turn_complete
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(InboundMessage),
    Error(String),
    Close(Option<String>),
}

/// Stops the transport driver. Dropping it cancels without waiting.
pub struct TransportCloser {
    shutdown: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

impl TransportCloser {
    pub fn new(shutdown: CancellationToken, driver: JoinHandle<()>) -> Self {
        Self {
            shutdown,
            driver: Some(driver),
        }
    }

    /// Signal shutdown and wait up to `timeout` for the driver to finish.
    pub async fn close(mut self, timeout: Duration) -> Result<()> {
        self.shutdown.cancel();
        let Some(mut driver) = self.driver.take() else {
            return Ok(());
        };
        match tokio::time::timeout(timeout, &mut driver).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SessionError::Transport(format!("transport driver failed: {e}"))),
            Err(_) => {
                driver.abort();
                Err(SessionError::Timeout("closing the transport"))
            }
        }
    }
}

impl Drop for TransportCloser {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A channel being opened. `Open` arrives on `events` once media may flow.
pub struct TransportLink {
    pub events: mpsc::Receiver<TransportEvent>,
    pub closer: TransportCloser,
}

#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Begin opening a channel. The transport drains `media` only after it
    /// has emitted [`TransportEvent::Open`].
    async fn connect(&self, config: StreamConfig, media: OutboundMedia) -> Result<TransportLink>;
}
