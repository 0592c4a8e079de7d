use anyhow::Result;
use async_trait::async_trait;
use field_core::{
    InboundMessage, OutboundMedia, StreamConfig, StreamTransport, TransportEvent,
    TransportLink,
};
use field_core::transport::TransportCloser;
use gemini_live::types::{Blob, ServerMessage, Setup};
use gemini_live::{LiveClient, Session, SessionEvent};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const EVENT_CAPACITY: usize = 128;
const CLIENT_CAPACITY: usize = 1024;

/// Implements [`StreamTransport`] over a Gemini live session.
pub struct GeminiTransport {
    api_key: SecretString,
    model: Option<String>,
}

impl GeminiTransport {
    pub fn new(api_key: SecretString, model: Option<String>) -> Self {
        Self { api_key, model }
    }

    fn client_config(&self) -> gemini_live::Config {
        let builder = gemini_live::Config::builder().with_api_key(self.api_key.expose_secret());
        let builder = match &self.model {
            Some(model) => builder.with_model(model),
            None => builder,
        };
        builder.build()
    }
}

pub(crate) fn build_setup(model: &str, config: &StreamConfig) -> Setup {
    let mut builder = Setup::builder(model).with_system_instruction(&config.system_instruction);
    if config.audio_only_response {
        builder = builder.with_audio_only_response();
    }
    if config.transcribe_input {
        builder = builder.with_input_transcription_enable();
    }
    if config.transcribe_output {
        builder = builder.with_output_transcription_enable();
    }
    builder.build()
}

#[async_trait]
impl StreamTransport for GeminiTransport {
    async fn connect(
        &self,
        config: StreamConfig,
        media: OutboundMedia,
    ) -> field_core::Result<TransportLink> {
        let client_config = self.client_config();
        let setup = build_setup(client_config.model(), &config);
        let (tx, events) = mpsc::channel(EVENT_CAPACITY);
        let shutdown = CancellationToken::new();
        let driver = tokio::spawn(drive(client_config, setup, media, tx, shutdown.clone()));
        Ok(TransportLink {
            events,
            closer: TransportCloser::new(shutdown, driver),
        })
    }
}

async fn open_session(config: gemini_live::Config, setup: Setup) -> Result<Session> {
    let pending = gemini_live::connect_with_config(CLIENT_CAPACITY, config).await?;
    pending.open(setup).await
}

async fn drive(
    config: gemini_live::Config,
    setup: Setup,
    media: OutboundMedia,
    tx: mpsc::Sender<TransportEvent>,
    shutdown: CancellationToken,
) {
    let opened = tokio::select! {
        _ = shutdown.cancelled() => return,
        opened = open_session(config, setup) => opened,
    };
    let session = match opened {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("Failed to open live session: {:?}", e);
            emit(&tx, &shutdown, TransportEvent::Error(format!("{e:#}"))).await;
            return;
        }
    };
    if !emit(&tx, &shutdown, TransportEvent::Open).await {
        return;
    }
    run_link(session, media, tx, shutdown).await;
}

/// Deliver an event unless shutdown wins first. Returns false when the link is done.
async fn emit(
    tx: &mpsc::Sender<TransportEvent>,
    shutdown: &CancellationToken,
    event: TransportEvent,
) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        sent = tx.send(event) => sent.is_ok(),
    }
}

/// Pump outbound media to the client and inbound messages to the session.
/// Queued media goes out before the next inbound message is read.
pub(crate) async fn run_link<C: LiveClient>(
    mut client: C,
    media: OutboundMedia,
    tx: mpsc::Sender<TransportEvent>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            frame = media.next() => match frame {
                Some(frame) => {
                    let blob = Blob::new(&frame.mime_type(), frame.to_base64());
                    if let Err(e) = client.send_realtime_input(blob).await {
                        tracing::error!("Failed to send media: {:?}", e);
                        emit(&tx, &shutdown, TransportEvent::Error(format!("{e:#}"))).await;
                        break;
                    }
                }
                None => break,
            },
            event = client.next_event() => match event {
                Some(SessionEvent::Message(message)) => {
                    if let Some(inbound) = translate(&message) {
                        if !emit(&tx, &shutdown, TransportEvent::Message(inbound)).await {
                            break;
                        }
                    }
                }
                Some(SessionEvent::Closed { reason }) => {
                    emit(&tx, &shutdown, TransportEvent::Close(reason)).await;
                    break;
                }
                None => {
                    emit(&tx, &shutdown, TransportEvent::Close(None)).await;
                    break;
                }
            },
        }
    }
    if let Err(e) = client.close().await {
        tracing::debug!("live session did not close cleanly: {:?}", e);
    }
}

/// Reduce a server message to what the session acts on. Logs the rest.
pub(crate) fn translate(message: &ServerMessage) -> Option<InboundMessage> {
    if let Some(go_away) = &message.go_away {
        tracing::warn!(
            "server is going away, time left: {}",
            go_away.time_left.as_deref().unwrap_or("unknown")
        );
    }
    if let Some(usage) = &message.usage_metadata {
        tracing::debug!(
            "usage: prompt={} response={} total={}",
            usage.prompt_token_count,
            usage.response_token_count,
            usage.total_token_count
        );
    }
    if message.tool_call.is_some() {
        tracing::debug!("ignoring tool call");
    }

    let content = message.server_content.as_ref()?;
    let inbound = InboundMessage {
        audio: content.audio_parts().map(|blob| blob.data.clone()).collect(),
        output_transcript: content.output_transcription.as_ref().map(|t| t.text.clone()),
        input_transcript: content.input_transcription.as_ref().map(|t| t.text.clone()),
        interrupted: content.is_interrupted(),
        turn_complete: content.is_turn_complete(),
    };
    (!inbound.is_empty()).then_some(inbound)
}
