//! Query and caption translation through the Cloud Translation v2 API.

use crate::config::TranslationConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

/// Translation errors
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Empty translation")]
    Empty,
}

impl From<reqwest::Error> for TranslateError {
    fn from(err: reqwest::Error) -> Self {
        // the request URL carries the API key
        TranslateError::Network(err.without_url().to_string())
    }
}

/// A translated text with the detected source language
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub text: String,
    pub source_language: Option<String>,
}

/// Source text plus target language in, translated text out
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text` into `target`, auto-detecting the source language
    async fn translate(&self, text: &str, target: &str) -> Result<Translation, TranslateError>;
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    target: &'a str,
    format: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    data: TranslateData,
}

#[derive(Debug, Deserialize)]
struct TranslateData {
    #[serde(default)]
    translations: Vec<TranslatedText>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslatedText {
    translated_text: String,
    detected_source_language: Option<String>,
}

/// Cloud Translation REST client
pub struct GoogleTranslateClient {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl GoogleTranslateClient {
    pub fn new(config: &TranslationConfig) -> Result<Self, TranslateError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

fn first_translation(response: TranslateResponse) -> Result<Translation, TranslateError> {
    let translated = response
        .data
        .translations
        .into_iter()
        .next()
        .ok_or(TranslateError::Empty)?;

    Ok(Translation {
        text: translated.translated_text,
        source_language: translated.detected_source_language,
    })
}

#[async_trait]
impl Translator for GoogleTranslateClient {
    #[instrument(skip(self))]
    async fn translate(&self, text: &str, target: &str) -> Result<Translation, TranslateError> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .query(&[("key", &self.api_key)])
            .json(&TranslateRequest {
                q: text,
                target,
                format: "text",
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(TranslateError::Api(status.as_u16(), error_text));
        }

        let body: TranslateResponse = response
            .json()
            .await
            .map_err(|e| TranslateError::Parse(e.without_url().to_string()))?;

        let translation = first_translation(body)?;

        debug!(
            source = ?translation.source_language,
            translated = %translation.text,
            "Text translated"
        );

        Ok(translation)
    }
}
