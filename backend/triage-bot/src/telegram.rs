//! Telegram Bot API transport.
//!
//! Inbound traffic is long-polled with `getUpdates` and flattened into
//! [`Inbound`] events; outbound calls go through the [`ChatTransport`] trait
//! so the triage pipeline can be driven by an in-memory fake in tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::conversation::ConversationKey;
use crate::dispatcher::Inbox;
use crate::errors::{Result, TriageError};

// ─────────────────────────────────────────────────────────
// Outbound surface
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Html,
    MarkdownV2,
}

impl ParseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "HTML",
            Self::MarkdownV2 => "MarkdownV2",
        }
    }
}

/// Destination chat: numeric id or public `@username`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ChatId {
    Id(i64),
    Username(String),
}

impl ChatId {
    pub fn parse(raw: &str) -> Self {
        raw.parse()
            .map(Self::Id)
            .unwrap_or_else(|_| Self::Username(raw.to_string()))
    }
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a new message, returning its message id.
    async fn send_message(&self, chat: &ChatId, text: &str, mode: Option<ParseMode>)
        -> Result<i64>;

    async fn edit_message(
        &self,
        chat: &ChatId,
        message_id: i64,
        text: &str,
        mode: Option<ParseMode>,
    ) -> Result<()>;

    async fn reply_to(&self, chat: &ChatId, message_id: i64, text: &str) -> Result<()>;

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>>;
}

#[async_trait]
impl<T: ChatTransport + ?Sized> ChatTransport for Arc<T> {
    async fn send_message(
        &self,
        chat: &ChatId,
        text: &str,
        mode: Option<ParseMode>,
    ) -> Result<i64> {
        (**self).send_message(chat, text, mode).await
    }

    async fn edit_message(
        &self,
        chat: &ChatId,
        message_id: i64,
        text: &str,
        mode: Option<ParseMode>,
    ) -> Result<()> {
        (**self).edit_message(chat, message_id, text, mode).await
    }

    async fn reply_to(&self, chat: &ChatId, message_id: i64, text: &str) -> Result<()> {
        (**self).reply_to(chat, message_id, text).await
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        (**self).download_file(file_id).await
    }
}

// ─────────────────────────────────────────────────────────
// Inbound events
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A message starting with `/`. `name` is lowercased without the slash
    /// or `@bot` suffix; `text` is the message as sent.
    Command { name: String, text: String },
    Document {
        file_id: String,
        file_name: Option<String>,
        caption: Option<String>,
    },
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub key: ConversationKey,
    pub message_id: i64,
    pub username: Option<String>,
    pub event: InboundEvent,
}

impl Inbound {
    pub fn chat(&self) -> ChatId {
        ChatId::Id(self.key.chat_id)
    }
}

// ─────────────────────────────────────────────────────────
// Bot API response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub document: Option<Document>,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct Document {
    pub file_id: String,
    pub file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct File {
    file_path: Option<String>,
}

impl Update {
    /// Flatten an update into an [`Inbound`] event. Updates that are not
    /// user messages with a document or text are dropped.
    pub fn into_inbound(self) -> Option<Inbound> {
        let message = self.message?;
        let from = message.from?;
        let key = ConversationKey {
            user_id: from.id,
            chat_id: message.chat.id,
        };

        let event = if let Some(doc) = message.document {
            InboundEvent::Document {
                file_id: doc.file_id,
                file_name: doc.file_name,
                caption: message.caption,
            }
        } else {
            let text = message.text?;
            match parse_command(&text) {
                Some(name) => InboundEvent::Command { name, text },
                None => InboundEvent::Text(text),
            }
        };

        Some(Inbound {
            key,
            message_id: message.message_id,
            username: from.username,
            event,
        })
    }
}

fn parse_command(text: &str) -> Option<String> {
    let first = text.split_whitespace().next()?;
    let name = first.strip_prefix('/')?;
    let name = name.split('@').next().unwrap_or(name);
    (!name.is_empty()).then(|| name.to_ascii_lowercase())
}

// ─────────────────────────────────────────────────────────
// HTTP client
// ─────────────────────────────────────────────────────────

pub struct TelegramClient {
    client: Client,
    api_url: String,
    token: String,
}

impl TelegramClient {
    pub fn new(client: Client, api_url: &str, token: &str) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: Value,
        timeout: Option<Duration>,
    ) -> Result<T> {
        let url = format!("{}/bot{}/{method}", self.api_url, self.token);
        let mut request = self.client.post(url).json(&body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let body: ApiResponse<T> = request.send().await?.json().await?;
        if !body.ok {
            return Err(TriageError::Telegram(format!(
                "{method}: {}",
                body.description.unwrap_or_else(|| "unknown error".to_string())
            )));
        }
        body.result
            .ok_or_else(|| TriageError::Telegram(format!("{method}: empty result")))
    }

    /// Long-poll for updates newer than `offset`.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        let updates: Vec<Update> = self
            .call(
                "getUpdates",
                json!({
                    "offset": offset,
                    "timeout": timeout_secs,
                    "allowed_updates": ["message"],
                }),
                Some(Duration::from_secs(timeout_secs + 10)),
            )
            .await?;
        debug!("Received {} updates", updates.len());
        Ok(updates)
    }
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn send_message(
        &self,
        chat: &ChatId,
        text: &str,
        mode: Option<ParseMode>,
    ) -> Result<i64> {
        let mut body = json!({
            "chat_id": chat,
            "text": text,
            "disable_web_page_preview": true,
        });
        if let Some(mode) = mode {
            body["parse_mode"] = json!(mode.as_str());
        }
        let sent: SentMessage = self.call("sendMessage", body, None).await?;
        Ok(sent.message_id)
    }

    async fn edit_message(
        &self,
        chat: &ChatId,
        message_id: i64,
        text: &str,
        mode: Option<ParseMode>,
    ) -> Result<()> {
        let mut body = json!({
            "chat_id": chat,
            "message_id": message_id,
            "text": text,
        });
        if let Some(mode) = mode {
            body["parse_mode"] = json!(mode.as_str());
        }
        // Returns the edited Message, or `true` for inline messages.
        let _: Value = self.call("editMessageText", body, None).await?;
        Ok(())
    }

    async fn reply_to(&self, chat: &ChatId, message_id: i64, text: &str) -> Result<()> {
        let _: SentMessage = self
            .call(
                "sendMessage",
                json!({
                    "chat_id": chat,
                    "text": text,
                    "reply_parameters": { "message_id": message_id },
                }),
                None,
            )
            .await?;
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        let file: File = self
            .call("getFile", json!({ "file_id": file_id }), None)
            .await?;
        let path = file
            .file_path
            .ok_or_else(|| TriageError::Telegram("getFile: no file_path".to_string()))?;

        let url = format!("{}/file/bot{}/{path}", self.api_url, self.token);
        let bytes = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}

/// Long-polling [`Inbox`] over `getUpdates`.
pub struct TelegramInbox {
    client: Arc<TelegramClient>,
    offset: i64,
    timeout_secs: u64,
}

impl TelegramInbox {
    pub fn new(client: Arc<TelegramClient>, timeout_secs: u64) -> Self {
        Self {
            client,
            offset: 0,
            timeout_secs,
        }
    }
}

#[async_trait]
impl Inbox for TelegramInbox {
    async fn poll(&mut self) -> Result<Vec<Inbound>> {
        let updates = self
            .client
            .get_updates(self.offset, self.timeout_secs)
            .await?;
        if let Some(last) = updates.iter().map(|u| u.update_id).max() {
            self.offset = last + 1;
        }
        Ok(updates.into_iter().filter_map(Update::into_inbound).collect())
    }
}

// ─────────────────────────────────────────────────────────
// Formatting
// ─────────────────────────────────────────────────────────

/// Escape text for MarkdownV2.
pub fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '=' | '|'
                | '{' | '}' | '.' | '!' | '\\'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Render `text` as a MarkdownV2 block quote.
pub fn quote_markdown_v2(text: &str) -> String {
    text.lines()
        .map(|line| format!(">{}", escape_markdown_v2(line)))
        .collect::<Vec<_>>()
        .join("\n")
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
