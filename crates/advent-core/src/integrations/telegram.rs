//! Telegram integration -- long-poll inbound messages, send day payloads.
//!
//! Uses the Bot API over HTTPS: `getUpdates` for inbound messages,
//! `sendMessage` for text and MarkdownV2, `sendPhoto` for images (by URL or
//! multipart upload of a local file). The token is part of the endpoint URL
//! and is stripped from every error before it can reach a log line.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use url::Url;

use crate::calendar::{Payload, PayloadPart, RequesterId};
use crate::error::TransportError;
use crate::integrations::traits::{ChatId, InboundRequest, Transport};

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default = "Option::default")]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

impl Update {
    /// Only text messages with a sender become requests.
    pub fn into_request(self) -> Option<InboundRequest> {
        let message = self.message?;
        let from = message.from?;
        let text = message.text?;
        let display_name = from
            .username
            .clone()
            .or_else(|| Some(from.first_name.clone()).filter(|n| !n.is_empty()));
        Some(InboundRequest {
            requester: RequesterId(from.id),
            chat: ChatId(message.chat.id),
            text,
            display_name,
        })
    }
}

fn http_error(err: reqwest::Error) -> TransportError {
    TransportError::Http(err.without_url())
}

/// Bot API client.
pub struct TelegramTransport {
    http: Client,
    base: Url,
    media_root: Option<PathBuf>,
}

impl TelegramTransport {
    /// `api_base` is e.g. `https://api.telegram.org`.
    ///
    /// # Errors
    /// Returns an error if the endpoint URL cannot be built.
    pub fn new(api_base: &str, token: &str) -> Result<Self, TransportError> {
        let base = Url::parse(&format!("{}/bot{}/", api_base.trim_end_matches('/'), token))?;
        Ok(Self {
            http: Client::new(),
            base,
            media_root: None,
        })
    }

    /// Directory relative image paths are resolved against.
    pub fn with_media_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.media_root = Some(root.into());
        self
    }

    fn endpoint(&self, method: &str) -> Result<Url, TransportError> {
        Ok(self.base.join(method)?)
    }

    fn resolve_media(&self, source: &str) -> PathBuf {
        let path = Path::new(source);
        match &self.media_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, TransportError> {
        let status = resp.status().as_u16();
        let body: ApiResponse<T> = resp.json().await.map_err(http_error)?;
        match body {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            other => Err(TransportError::Rejected {
                status: other.error_code.unwrap_or(status),
                description: other
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            }),
        }
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &Value,
        timeout: Option<Duration>,
    ) -> Result<T, TransportError> {
        let mut request = self.http.post(self.endpoint(method)?).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let resp = request.send().await.map_err(http_error)?;
        Self::decode(resp).await
    }

    /// Check the token; returns the bot's username.
    pub async fn get_me(&self) -> Result<String, TransportError> {
        let me: User = self
            .post_json("getMe", &json!({}), Some(Duration::from_secs(10)))
            .await?;
        Ok(me.username.unwrap_or(me.first_name))
    }

    /// Long-poll for updates. `offset` acknowledges everything before it.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, TransportError> {
        let body = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message"],
        });
        self.post_json("getUpdates", &body, Some(Duration::from_secs(timeout_secs + 10)))
            .await
    }

    async fn send_text(
        &self,
        chat: ChatId,
        text: &str,
        parse_mode: Option<&str>,
    ) -> Result<(), TransportError> {
        let mut body = json!({ "chat_id": chat.0, "text": text });
        if let Some(mode) = parse_mode {
            body["parse_mode"] = Value::String(mode.to_string());
        }
        self.post_json::<Value>("sendMessage", &body, None).await?;
        Ok(())
    }

    async fn send_photo(&self, chat: ChatId, source: &str) -> Result<(), TransportError> {
        if source.starts_with("http://") || source.starts_with("https://") {
            let body = json!({ "chat_id": chat.0, "photo": source });
            self.post_json::<Value>("sendPhoto", &body, None).await?;
            return Ok(());
        }

        let path = self.resolve_media(source);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| TransportError::Attachment {
                path: path.clone(),
                source,
            })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "photo".to_string());
        let form = Form::new()
            .text("chat_id", chat.0.to_string())
            .part("photo", Part::bytes(bytes).file_name(file_name));
        let resp = self
            .http
            .post(self.endpoint("sendPhoto")?)
            .multipart(form)
            .send()
            .await
            .map_err(http_error)?;
        Self::decode::<Value>(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send_message(&self, chat: ChatId, payload: &Payload) -> Result<(), TransportError> {
        for part in payload.parts() {
            match part {
                PayloadPart::Text(text) => self.send_text(chat, text, None).await?,
                PayloadPart::Markdown(text) => {
                    self.send_text(chat, text, Some("MarkdownV2")).await?
                }
                PayloadPart::Image(source) => self.send_photo(chat, source).await?,
            }
        }
        Ok(())
    }
}

/// Feeds Telegram updates into the router's inbound channel.
pub struct UpdatePoller {
    transport: Arc<TelegramTransport>,
    poll_timeout_secs: u64,
    error_backoff: Duration,
}

impl UpdatePoller {
    pub fn new(transport: Arc<TelegramTransport>, poll_timeout_secs: u64) -> Self {
        Self {
            transport,
            poll_timeout_secs,
            error_backoff: Duration::from_secs(5),
        }
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Poll until `shutdown` flips (or its sender is dropped), then
    /// acknowledge the forwarded updates and drop `sender` so the router can
    /// drain and stop. An interrupted long poll is simply abandoned: nothing
    /// from it was acknowledged, so Telegram delivers it again next start.
    pub async fn run(self, sender: mpsc::Sender<InboundRequest>, mut shutdown: watch::Receiver<bool>) {
        let mut offset: i64 = 0;
        tracing::info!(timeout_secs = self.poll_timeout_secs, "update poller started");

        'poll: loop {
            if *shutdown.borrow() {
                break;
            }
            let result = tokio::select! {
                _ = shutdown.changed() => break,
                result = self.transport.get_updates(offset, self.poll_timeout_secs) => result,
            };

            match result {
                Ok(updates) => {
                    for update in updates {
                        let update_id = update.update_id;
                        match update.into_request() {
                            Some(request) => {
                                if sender.send(request).await.is_err() {
                                    tracing::warn!(update_id, "router stopped accepting requests");
                                    break 'poll;
                                }
                            }
                            None => tracing::debug!(update_id, "skipping non-text update"),
                        }
                        // Only acknowledge what the router has taken.
                        offset = offset.max(update_id + 1);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "getUpdates failed");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(self.error_backoff) => {}
                    }
                }
            }
        }

        if offset > 0 {
            if let Err(e) = self.transport.get_updates(offset, 0).await {
                tracing::warn!(error = %e, offset, "failed to acknowledge updates");
            }
        }
        drop(sender);
        tracing::info!("update poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_message_becomes_request() {
        let update: Update = serde_json::from_value(json!({
            "update_id": 10,
            "message": {
                "message_id": 1,
                "from": { "id": 42, "first_name": "Alice", "username": "alice" },
                "chat": { "id": -100 },
                "date": 1733385600,
                "text": "/open 5"
            }
        }))
        .unwrap();
        let request = update.into_request().unwrap();
        assert_eq!(request.requester, RequesterId(42));
        assert_eq!(request.chat, ChatId(-100));
        assert_eq!(request.text, "/open 5");
        assert_eq!(request.display_name.as_deref(), Some("alice"));
    }

    #[test]
    fn non_text_updates_are_skipped() {
        let sticker: Update = serde_json::from_value(json!({
            "update_id": 11,
            "message": {
                "message_id": 2,
                "from": { "id": 42, "first_name": "Alice" },
                "chat": { "id": 42 }
            }
        }))
        .unwrap();
        assert!(sticker.into_request().is_none());

        let edited: Update = serde_json::from_value(json!({ "update_id": 12 })).unwrap();
        assert!(edited.into_request().is_none());
    }

    #[test]
    fn endpoint_keeps_token_path() {
        let transport = TelegramTransport::new("https://api.telegram.org/", "123:abc").unwrap();
        assert_eq!(
            transport.endpoint("sendMessage").unwrap().as_str(),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn relative_media_uses_root() {
        let transport = TelegramTransport::new("https://api.telegram.org", "t")
            .unwrap()
            .with_media_root("/srv/advent");
        assert_eq!(transport.resolve_media("door1.jpg"), PathBuf::from("/srv/advent/door1.jpg"));
        assert_eq!(transport.resolve_media("/abs/door.jpg"), PathBuf::from("/abs/door.jpg"));
    }
}
