use crate::error::Result;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

pub const CHAT_SOCKET_PATH: &str = "ws/chat/";
pub const NOTIFICATIONS_SOCKET_PATH: &str = "ws/notifications/";

/// Lifecycle of one push connection.
///
/// `Idle → Connecting → Open → (Closed | Error) → Idle`. A start without a token goes
/// `Connecting → Idle`. Nothing here reconnects on its own; the owner restarts on focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
    Error,
}

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Builds the socket URL from the current access token.
pub type UrlBuilder = Arc<dyn Fn(&str) -> Result<Url> + Send + Sync>;

#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Opens the socket and yields its text frames until it closes.
    async fn connect(&self, url: Url) -> Result<FrameStream>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WsPushChannel;

#[async_trait]
impl PushChannel for WsPushChannel {
    async fn connect(&self, url: Url) -> Result<FrameStream> {
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        log::info!("WebSocket connected to {}{}", url.host_str().unwrap_or_default(), url.path());
        let frames = ws_stream.filter_map(|msg| async move {
            match msg {
                Ok(WsMessage::Text(text)) => Some(Ok(text)),
                Ok(WsMessage::Binary(bytes)) => String::from_utf8(bytes).ok().map(Ok),
                Ok(_) => None,
                Err(e) => Some(Err(e.into())),
            }
        });
        Ok(Box::pin(frames))
    }
}

/// `{base}{path}?token=...`
pub fn ws_url(base: &Url, path: &str, token: &str) -> Result<Url> {
    let mut url = base.join(path)?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

pub fn socket_url_builder(base: Url, path: &'static str) -> UrlBuilder {
    Arc::new(move |token: &str| ws_url(&base, path, token))
}
