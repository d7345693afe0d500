//! Telegram Bot API client.
//!
//! Inbound updates come from `getUpdates` long polling; outbound replies go
//! through the [`ChatTransport`] trait so handlers can be tested without the
//! network.

use crate::config::TelegramConfig;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

/// Callback data carried by the inline "help" button
pub const HELP_CALLBACK: &str = "help";

const MAX_CAPTION_CHARS: usize = 1024;
const MAX_TEXT_CHARS: usize = 4096;

/// Telegram client errors
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {code}: {description}")]
    Api { code: i32, description: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("File {0} has no download path")]
    MissingFilePath(String),
}

impl From<reqwest::Error> for TelegramError {
    fn from(err: reqwest::Error) -> Self {
        // the request URL embeds the bot token
        TelegramError::Network(err.without_url().to_string())
    }
}

/// An incoming update
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

impl Update {
    /// The user who sent the message or pressed the button
    pub fn sender_id(&self) -> Option<i64> {
        self.message
            .as_ref()
            .and_then(|m| m.from.as_ref())
            .map(|u| u.id)
            .or_else(|| self.callback_query.as_ref().map(|q| q.from.id))
    }
}

/// A chat message
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
    pub caption: Option<String>,
    #[serde(default)]
    pub photo: Vec<PhotoSize>,
}

impl Message {
    /// The highest-resolution size of an attached photo
    pub fn largest_photo(&self) -> Option<&PhotoSize> {
        self.photo
            .iter()
            .max_by_key(|p| u64::from(p.width) * u64::from(p.height))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    pub language_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// One size of a photo
#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    /// Stable across bots and re-sends of the same photo
    pub file_unique_id: String,
    pub width: u32,
    pub height: u32,
    pub file_size: Option<u64>,
}

/// A press on an inline keyboard button
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i32>,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<T, TelegramError> {
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(TelegramError::Api {
                code: self.error_code.unwrap_or_default(),
                description: self.description.unwrap_or_else(|| "no description".to_string()),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct File {
    file_id: String,
    file_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest<'a> {
    offset: i64,
    timeout: u64,
    allowed_updates: &'a [&'a str],
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<InlineKeyboardMarkup<'a>>,
}

#[derive(Debug, Serialize)]
struct InlineKeyboardMarkup<'a> {
    inline_keyboard: Vec<Vec<InlineKeyboardButton<'a>>>,
}

#[derive(Debug, Serialize)]
struct InlineKeyboardButton<'a> {
    text: &'a str,
    callback_data: &'a str,
}

impl<'a> InlineKeyboardMarkup<'a> {
    fn help_button(label: &'a str) -> Self {
        Self {
            inline_keyboard: vec![vec![InlineKeyboardButton {
                text: label,
                callback_data: HELP_CALLBACK,
            }]],
        }
    }
}

#[derive(Debug, Serialize)]
struct GetFileRequest<'a> {
    file_id: &'a str,
}

#[derive(Debug, Serialize)]
struct AnswerCallbackRequest<'a> {
    callback_query_id: &'a str,
}

/// Outbound side of the chat transport
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a text reply
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), TelegramError>;

    /// Send a text reply with an inline "help" button
    async fn send_text_with_help(
        &self,
        chat_id: i64,
        text: &str,
        button_label: &str,
    ) -> Result<(), TelegramError>;

    /// Send a photo with a caption
    async fn send_photo(
        &self,
        chat_id: i64,
        image: Vec<u8>,
        caption: String,
    ) -> Result<(), TelegramError>;

    /// Download the bytes of a file sent by a user
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, TelegramError>;

    /// Acknowledge a callback query so the client stops its spinner
    async fn answer_callback(&self, callback_id: &str) -> Result<(), TelegramError>;
}

/// Telegram Bot API client
pub struct TelegramClient {
    http_client: reqwest::Client,
    api_url: String,
    token: String,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Result<Self, TelegramError> {
        // long polls must not hit the client timeout
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_secs + 15))
            .build()?;

        Ok(Self {
            http_client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.bot_token.clone(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_url, self.token, file_path)
    }

    async fn call<B, T>(&self, method: &str, body: &B) -> Result<T, TelegramError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let response = self
            .http_client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await?;

        decode_response(response).await
    }

    /// Long-poll for updates after `offset`
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout: Duration,
    ) -> Result<Vec<Update>, TelegramError> {
        self.call(
            "getUpdates",
            &GetUpdatesRequest {
                offset,
                timeout: timeout.as_secs(),
                allowed_updates: &["message", "callback_query"],
            },
        )
        .await
    }
}

async fn decode_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, TelegramError> {
    // Telegram reports failures in the body, with a non-2xx status
    let bytes = response.bytes().await?;
    let parsed: ApiResponse<T> =
        serde_json::from_slice(&bytes).map_err(|e| TelegramError::Parse(e.to_string()))?;
    parsed.into_result()
}

/// Truncate to at most `max` characters
fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[async_trait]
impl ChatTransport for TelegramClient {
    #[instrument(skip(self, text))]
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        let text = truncate_chars(text, MAX_TEXT_CHARS);
        let _: serde_json::Value = self
            .call(
                "sendMessage",
                &SendMessageRequest {
                    chat_id,
                    text: &text,
                    reply_markup: None,
                },
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self, text, button_label))]
    async fn send_text_with_help(
        &self,
        chat_id: i64,
        text: &str,
        button_label: &str,
    ) -> Result<(), TelegramError> {
        let text = truncate_chars(text, MAX_TEXT_CHARS);
        let _: serde_json::Value = self
            .call(
                "sendMessage",
                &SendMessageRequest {
                    chat_id,
                    text: &text,
                    reply_markup: Some(InlineKeyboardMarkup::help_button(button_label)),
                },
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self, image, caption), fields(size_bytes = image.len()))]
    async fn send_photo(
        &self,
        chat_id: i64,
        image: Vec<u8>,
        caption: String,
    ) -> Result<(), TelegramError> {
        let photo = Part::bytes(image)
            .file_name("photo.jpg")
            .mime_str("image/jpeg")?;

        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", truncate_chars(&caption, MAX_CAPTION_CHARS))
            .part("photo", photo);

        let response = self
            .http_client
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await?;

        let _: serde_json::Value = decode_response(response).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, TelegramError> {
        let file: File = self.call("getFile", &GetFileRequest { file_id }).await?;
        let file_path = file
            .file_path
            .ok_or_else(|| TelegramError::MissingFilePath(file.file_id.clone()))?;

        let response = self
            .http_client
            .get(self.file_url(&file_path))
            .send()
            .await?
            .error_for_status()?;

        let bytes = response.bytes().await?;
        debug!(size_bytes = bytes.len(), "File downloaded");

        Ok(bytes.to_vec())
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<(), TelegramError> {
        let _: bool = self
            .call(
                "answerCallbackQuery",
                &AnswerCallbackRequest {
                    callback_query_id: callback_id,
                },
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_photo_update() {
        let json = r#"{
            "ok": true,
            "result": [{
                "update_id": 10001,
                "message": {
                    "message_id": 7,
                    "date": 1700000000,
                    "from": {"id": 42, "is_bot": false, "first_name": "Giulia", "language_code": "it"},
                    "chat": {"id": 42, "type": "private"},
                    "caption": "Il mio gatto",
                    "photo": [
                        {"file_id": "small", "file_unique_id": "AQADs", "width": 90, "height": 67, "file_size": 1200},
                        {"file_id": "large", "file_unique_id": "AQADl", "width": 1280, "height": 960, "file_size": 98000},
                        {"file_id": "medium", "file_unique_id": "AQADm", "width": 320, "height": 240}
                    ]
                }
            }]
        }"#;

        let response: ApiResponse<Vec<Update>> = serde_json::from_str(json).unwrap();
        let updates = response.into_result().unwrap();
        let message = updates[0].message.as_ref().unwrap();

        assert_eq!(updates[0].update_id, 10001);
        assert_eq!(updates[0].sender_id(), Some(42));
        assert_eq!(message.from.as_ref().unwrap().language_code.as_deref(), Some("it"));
        assert_eq!(message.caption.as_deref(), Some("Il mio gatto"));
        assert_eq!(message.largest_photo().unwrap().file_id, "large");
    }

    #[test]
    fn test_deserialize_callback_update() {
        let json = r#"{
            "update_id": 10002,
            "callback_query": {
                "id": "cb-1",
                "from": {"id": 42, "is_bot": false, "first_name": "Giulia"},
                "data": "help"
            }
        }"#;

        let update: Update = serde_json::from_str(json).unwrap();
        assert_eq!(update.sender_id(), Some(42));
        let callback = update.callback_query.unwrap();

        assert!(update.message.is_none());
        assert_eq!(callback.data.as_deref(), Some(HELP_CALLBACK));
        assert!(callback.message.is_none());
    }

    #[test]
    fn test_api_error_response() {
        let json = r#"{"ok": false, "error_code": 401, "description": "Unauthorized"}"#;
        let response: ApiResponse<Vec<Update>> = serde_json::from_str(json).unwrap();

        match response.into_result() {
            Err(TelegramError::Api { code, description }) => {
                assert_eq!(code, 401);
                assert_eq!(description, "Unauthorized");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[test]
    fn test_help_button_markup() {
        let request = SendMessageRequest {
            chat_id: 1,
            text: "hi",
            reply_markup: Some(InlineKeyboardMarkup::help_button("Aiuto")),
        };
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["reply_markup"]["inline_keyboard"][0][0]["text"], "Aiuto");
        assert_eq!(
            value["reply_markup"]["inline_keyboard"][0][0]["callback_data"],
            "help"
        );

        let plain = SendMessageRequest {
            chat_id: 1,
            text: "hi",
            reply_markup: None,
        };
        assert!(serde_json::to_value(&plain).unwrap().get("reply_markup").is_none());
    }

    #[test]
    fn test_urls() {
        let client = TelegramClient::new(&TelegramConfig {
            bot_token: "123:abc".to_string(),
            api_url: "https://api.telegram.org/".to_string(),
            poll_timeout_secs: 30,
            retry_delay_secs: 5,
            max_concurrent_updates: 8,
        })
        .unwrap();

        assert_eq!(
            client.method_url("getMe"),
            "https://api.telegram.org/bot123:abc/getMe"
        );
        assert_eq!(
            client.file_url("photos/file_1.jpg"),
            "https://api.telegram.org/file/bot123:abc/photos/file_1.jpg"
        );
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("città", 4), "citt");
        assert_eq!(truncate_chars("ok", 10), "ok");
    }
}
