//! Synonym lookup used to broaden searches that found nothing.

use crate::config::SynonymConfig;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

/// Synonym lookup errors
#[derive(Debug, Error)]
pub enum SynonymError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for SynonymError {
    fn from(err: reqwest::Error) -> Self {
        SynonymError::Network(err.without_url().to_string())
    }
}

/// Single word in, synonym words out
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SynonymProvider: Send + Sync {
    async fn synonyms(&self, word: &str) -> Result<Vec<String>, SynonymError>;
}

#[derive(Debug, Deserialize)]
struct DatamuseWord {
    word: String,
}

/// Datamuse `rel_syn` client
pub struct DatamuseClient {
    http_client: reqwest::Client,
    endpoint: String,
    max_results: u32,
}

impl DatamuseClient {
    pub fn new(config: &SynonymConfig) -> Result<Self, SynonymError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            max_results: config.max_results,
        })
    }
}

/// Drop the word itself and duplicates, keep the service's ranking
fn distinct_synonyms(word: &str, words: Vec<DatamuseWord>, max: usize) -> Vec<String> {
    let word = word.to_lowercase();
    let mut synonyms: Vec<String> = Vec::new();

    for candidate in words {
        let candidate = candidate.word.to_lowercase();
        if candidate != word && !synonyms.contains(&candidate) {
            synonyms.push(candidate);
        }
        if synonyms.len() >= max {
            break;
        }
    }

    synonyms
}

#[async_trait]
impl SynonymProvider for DatamuseClient {
    #[instrument(skip(self))]
    async fn synonyms(&self, word: &str) -> Result<Vec<String>, SynonymError> {
        let max = self.max_results.to_string();
        let response = self
            .http_client
            .get(&self.endpoint)
            .query(&[("rel_syn", word), ("max", max.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SynonymError::Api(status.as_u16(), error_text));
        }

        let words: Vec<DatamuseWord> = response
            .json()
            .await
            .map_err(|e| SynonymError::Parse(e.without_url().to_string()))?;

        let synonyms = distinct_synonyms(word, words, self.max_results as usize);
        debug!(count = synonyms.len(), "Synonyms found");

        Ok(synonyms)
    }
}
