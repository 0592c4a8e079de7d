use crate::client::config::Config;
use crate::client::consts::{API_KEY_HEADER, LIVE_PATH};
use gemini_live_types::ServerMessage;
use secrecy::ExposeSecret;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

pub fn build_request(config: &Config) -> tokio_tungstenite::tungstenite::Result<Request> {
    let mut request = format!("{}{}", config.base_url(), LIVE_PATH).into_client_request()?;
    request.headers_mut().insert(
        API_KEY_HEADER,
        config.api_key().expose_secret().parse()?,
    );
    Ok(request)
}

/// What a single socket frame means to the session.
#[derive(Debug)]
pub enum Frame {
    Message(Box<ServerMessage>),
    Closed(Option<String>),
    Ignored,
}

/// The server sends JSON in both text and binary frames.
pub fn parse_frame(message: Message) -> anyhow::Result<Frame> {
    let payload = match message {
        Message::Text(text) => text.into_bytes(),
        Message::Binary(bin) => bin,
        Message::Close(frame) => {
            return Ok(Frame::Closed(frame.map(|f| {
                if f.reason.is_empty() {
                    f.code.to_string()
                } else {
                    format!("{} ({})", f.reason, f.code)
                }
            })));
        }
        _ => return Ok(Frame::Ignored),
    };
    let msg = serde_json::from_slice::<ServerMessage>(&payload)?;
    Ok(Frame::Message(Box::new(msg)))
}
