//! Telegram bus — long-polls the Bot API for updates.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::channels::bus::{BusContext, InboundMessage, MessageBus, MessageStream};
use crate::error::BusError;

const PLATFORM: &str = "telegram";

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

const POLL_TIMEOUT_SECS: u64 = 30;
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Telegram settings from `TELEGRAM_*` environment variables.
#[derive(Debug)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    /// Usernames or numeric ids; `*` allows everyone, empty allows no one.
    pub allowed_users: Vec<String>,
    /// Chat that proactive posts go to when no target is given.
    pub default_chat: Option<String>,
}

impl TelegramConfig {
    /// `None` unless `TELEGRAM_BOT_TOKEN` is set.
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN").ok()?;
        if token.trim().is_empty() {
            return None;
        }
        let allowed_users = std::env::var("TELEGRAM_ALLOWED_USERS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Some(Self {
            bot_token: SecretString::from(token),
            allowed_users,
            default_chat: std::env::var("TELEGRAM_DEFAULT_CHAT").ok(),
        })
    }
}

/// Telegram bus — connects to the Bot API via long-polling.
pub struct TelegramBus {
    config: TelegramConfig,
    client: reqwest::Client,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl TelegramBus {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            poller: Mutex::new(None),
        }
    }

    fn api_url(&self, method: &str) -> String {
        api_url(&self.config.bot_token, method)
    }

    fn abort_poller(&self) {
        if let Ok(mut poller) = self.poller.lock()
            && let Some(handle) = poller.take()
        {
            handle.abort();
        }
    }

    /// Send a text message, split to fit the length limit.
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), BusError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_message_chunk(chat_id, &chunk).await?;
        }
        Ok(())
    }

    /// Markdown first, plain text if Telegram rejects the markup.
    async fn send_message_chunk(&self, chat_id: &str, text: &str) -> Result<(), BusError> {
        let markdown_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "Markdown"
            }))
            .send()
            .await
            .map_err(send_failed)?;

        if markdown_resp.status().is_success() {
            return Ok(());
        }

        let markdown_status = markdown_resp.status();
        tracing::warn!(
            status = ?markdown_status,
            "Telegram sendMessage with Markdown failed; retrying without parse_mode"
        );

        let plain_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": text,
            }))
            .send()
            .await
            .map_err(send_failed)?;

        if !plain_resp.status().is_success() {
            let plain_err = plain_resp.text().await.unwrap_or_default();
            return Err(BusError::SendFailed {
                name: PLATFORM.into(),
                reason: format!(
                    "sendMessage failed (markdown: {}, plain: {})",
                    markdown_status, plain_err
                ),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MessageBus for TelegramBus {
    fn name(&self) -> &str {
        PLATFORM
    }

    async fn start(&self) -> Result<MessageStream, BusError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| BusError::StartupFailed {
                name: PLATFORM.into(),
                reason: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(BusError::StartupFailed {
                name: PLATFORM.into(),
                reason: format!("getMe returned {}", resp.status()),
            });
        }

        self.abort_poller();

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let client = self.client.clone();
        let url = self.api_url("getUpdates");

        let handle = tokio::spawn(async move {
            let mut offset: i64 = 0;
            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message"]
                });

                let data: serde_json::Value = match client.post(&url).json(&body).send().await {
                    Ok(resp) => match resp.json().await {
                        Ok(data) => data,
                        Err(e) => {
                            tracing::warn!("Telegram parse error: {e}");
                            tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                            continue;
                        }
                    },
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                let Some(updates) = data.get("result").and_then(serde_json::Value::as_array) else {
                    tracing::warn!("Telegram getUpdates rejected: {}", data);
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                    continue;
                };
                for update in updates {
                    if let Some(update_id) =
                        update.get("update_id").and_then(serde_json::Value::as_i64)
                    {
                        offset = update_id + 1;
                    }
                    let Some(msg) = parse_update(update) else {
                        continue;
                    };
                    if tx.send(msg).is_err() {
                        tracing::info!("Telegram listener closed");
                        return;
                    }
                }
            }
        });

        if let Ok(mut poller) = self.poller.lock() {
            *poller = Some(handle);
        }
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    fn is_allowed(&self, context: &BusContext) -> bool {
        let username = context.metadata.get("username").and_then(|v| v.as_str());
        let identities = std::iter::once(context.user_id.as_str()).chain(username);
        check_user_allowed(&self.config.allowed_users, identities)
    }

    async fn reply(&self, content: &str, context: &BusContext) -> Result<(), BusError> {
        let chat_id = context.chat_id.as_deref().ok_or_else(|| BusError::SendFailed {
            name: PLATFORM.into(),
            reason: "No chat_id in message context".into(),
        })?;
        self.send_message(chat_id, content).await
    }

    async fn post(&self, content: &str, target: Option<&str>) -> Result<(), BusError> {
        let chat_id = target
            .or(self.config.default_chat.as_deref())
            .ok_or_else(|| BusError::SendFailed {
                name: PLATFORM.into(),
                reason: "No target and no TELEGRAM_DEFAULT_CHAT".into(),
            })?;
        self.send_message(chat_id, content).await
    }

    async fn send_status(&self, _status: &str, context: &BusContext) -> Result<(), BusError> {
        if let Some(chat_id) = context.chat_id.as_deref() {
            self.client
                .post(self.api_url("sendChatAction"))
                .json(&serde_json::json!({
                    "chat_id": chat_id,
                    "action": "typing"
                }))
                .send()
                .await
                .map_err(send_failed)?;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), BusError> {
        tracing::info!("Telegram bus shutting down");
        self.abort_poller();
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn api_url(token: &SecretString, method: &str) -> String {
    format!("https://api.telegram.org/bot{}/{method}", token.expose_secret())
}

fn send_failed(e: reqwest::Error) -> BusError {
    BusError::SendFailed {
        name: PLATFORM.into(),
        reason: e.to_string(),
    }
}

/// Turn one `getUpdates` entry into an inbound message. Non-text updates are skipped.
fn parse_update(update: &serde_json::Value) -> Option<InboundMessage> {
    let message = update.get("message")?;
    let text = message.get("text").and_then(serde_json::Value::as_str)?;
    let from = message.get("from");

    let username = from
        .and_then(|f| f.get("username"))
        .and_then(serde_json::Value::as_str);
    let user_id = from
        .and_then(|f| f.get("id"))
        .and_then(serde_json::Value::as_i64)
        .map(|id| id.to_string())
        .or_else(|| username.map(str::to_string))?;
    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(serde_json::Value::as_i64)
        .map(|id| id.to_string());
    let first_name = from
        .and_then(|f| f.get("first_name"))
        .and_then(serde_json::Value::as_str);

    let mut context = BusContext::new(PLATFORM, user_id);
    context.metadata = serde_json::json!({ "username": username });
    if let Some(chat_id) = chat_id {
        context = context.with_chat_id(chat_id);
    }
    if let Some(name) = first_name.or(username) {
        context = context.with_user_name(name);
    }
    Some(InboundMessage::new(context, text))
}

/// Check if any identity matches the allowed users list.
fn check_user_allowed<'a>(
    allowed_users: &[String],
    identities: impl IntoIterator<Item = &'a str>,
) -> bool {
    let ids: Vec<&str> = identities.into_iter().collect();
    allowed_users
        .iter()
        .any(|u| u == "*" || ids.contains(&u.as_str()))
}

/// Split a message into chunks of at most `max_len` bytes.
/// Tries to split on newlines, then spaces, then hard-cuts at a char boundary.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut limit = max_len;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }
        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .filter(|&at| at > 0)
            .unwrap_or(limit);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus(allowed: &[&str]) -> TelegramBus {
        TelegramBus::new(TelegramConfig {
            bot_token: SecretString::from("123:ABC".to_string()),
            allowed_users: allowed.iter().map(|s| s.to_string()).collect(),
            default_chat: None,
        })
    }

    fn update(user_id: i64, username: &str, chat_id: i64, text: &str) -> serde_json::Value {
        serde_json::json!({
            "update_id": 10,
            "message": {
                "text": text,
                "from": { "id": user_id, "username": username, "first_name": "Ada" },
                "chat": { "id": chat_id }
            }
        })
    }

    #[test]
    fn telegram_api_url() {
        assert_eq!(
            bus(&[]).api_url("getMe"),
            "https://api.telegram.org/bot123:ABC/getMe"
        );
    }

    #[test]
    fn parse_text_update() {
        let msg = parse_update(&update(42, "ada", 99887766, "hello")).unwrap();
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.context.user_id, "42");
        assert_eq!(msg.context.chat_id.as_deref(), Some("99887766"));
        assert_eq!(msg.context.user_name.as_deref(), Some("Ada"));
        assert_eq!(msg.context.identity_key(), "telegram:42");
    }

    #[test]
    fn non_text_update_is_skipped() {
        let sticker = serde_json::json!({
            "update_id": 11,
            "message": { "sticker": {}, "from": { "id": 1 }, "chat": { "id": 1 } }
        });
        assert!(parse_update(&sticker).is_none());
    }

    #[test]
    fn allow_list_matches_id_or_username() {
        let msg = parse_update(&update(42, "ada", 1, "hi")).unwrap();
        assert!(bus(&["*"]).is_allowed(&msg.context));
        assert!(bus(&["ada"]).is_allowed(&msg.context));
        assert!(bus(&["42"]).is_allowed(&msg.context));
        assert!(!bus(&["bob"]).is_allowed(&msg.context));
        assert!(!bus(&[]).is_allowed(&msg.context));
        assert!(!bus(&["Ada"]).is_allowed(&msg.context));
    }

    #[test]
    fn split_message_short() {
        assert_eq!(split_message("hi", 10), vec!["hi"]);
    }

    #[test]
    fn split_message_on_newline_then_space() {
        let chunks = split_message("aaaa\nbbbb cccc", 8);
        assert_eq!(chunks, vec!["aaaa", "bbbb", "cccc"]);
    }

    #[test]
    fn split_message_respects_char_boundaries() {
        let text = "é".repeat(5); // 10 bytes
        let chunks = split_message(&text, 3);
        assert!(chunks.iter().all(|c| c.len() <= 3));
        assert_eq!(chunks.concat(), text);
    }
}
