//! Label detection through the Cloud Vision `images:annotate` API.

use crate::config::VisionConfig;
use crate::labels::{self, LabelSet};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

/// Label detection errors
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Annotation failed: {0}")]
    Annotation(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for VisionError {
    fn from(err: reqwest::Error) -> Self {
        // the request URL carries the API key
        VisionError::Network(err.without_url().to_string())
    }
}

/// Everything the vision service recognized in one image
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectedLabels {
    /// Whole-image labels
    pub labels: Vec<String>,
    /// Localized object names
    pub objects: Vec<String>,
    /// Full detected text, if any
    pub text: Option<String>,
}

impl DetectedLabels {
    /// Flatten into a normalized label set of at most `max` labels.
    ///
    /// Detection order decides what survives the cap: labels, then objects,
    /// then the words of the detected text.
    pub fn to_label_set(&self, max: usize) -> LabelSet {
        let text_words = self.text.as_deref().map(labels::words).unwrap_or_default();
        let mut set = LabelSet::new();

        for raw in self
            .labels
            .iter()
            .chain(self.objects.iter())
            .chain(text_words.iter())
        {
            if set.len() >= max {
                break;
            }
            set.insert(raw);
        }
        set
    }
}

/// Image bytes in, free-text labels out
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LabelDetector: Send + Sync {
    async fn detect(&self, image: &[u8]) -> Result<DetectedLabels, VisionError>;
}

#[derive(Debug, Serialize)]
struct AnnotateRequest<'a> {
    requests: Vec<AnnotateImageRequest<'a>>,
}

#[derive(Debug, Serialize)]
struct AnnotateImageRequest<'a> {
    image: ImageContent,
    features: Vec<Feature<'a>>,
}

#[derive(Debug, Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Feature<'a> {
    #[serde(rename = "type")]
    feature_type: &'a str,
    max_results: u32,
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    #[serde(default)]
    label_annotations: Vec<EntityAnnotation>,
    #[serde(default)]
    localized_object_annotations: Vec<LocalizedObjectAnnotation>,
    #[serde(default)]
    text_annotations: Vec<EntityAnnotation>,
    error: Option<Status>,
}

#[derive(Debug, Deserialize)]
struct EntityAnnotation {
    description: String,
    #[serde(default)]
    score: f32,
}

#[derive(Debug, Deserialize)]
struct LocalizedObjectAnnotation {
    name: String,
    #[serde(default)]
    score: f32,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(default)]
    message: String,
}

/// Cloud Vision REST client
pub struct GoogleVisionClient {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
    max_results: u32,
    min_score: f32,
}

impl GoogleVisionClient {
    pub fn new(config: &VisionConfig) -> Result<Self, VisionError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            max_results: config.max_results,
            min_score: config.min_score,
        })
    }

    fn request_body(&self, image: &[u8]) -> AnnotateRequest<'static> {
        AnnotateRequest {
            requests: vec![AnnotateImageRequest {
                image: ImageContent {
                    content: STANDARD.encode(image),
                },
                features: vec![
                    Feature {
                        feature_type: "LABEL_DETECTION",
                        max_results: self.max_results,
                    },
                    Feature {
                        feature_type: "OBJECT_LOCALIZATION",
                        max_results: self.max_results,
                    },
                    Feature {
                        feature_type: "TEXT_DETECTION",
                        max_results: 1,
                    },
                ],
            }],
        }
    }
}

/// Keep annotations at or above `min_score`. The first text annotation is
/// the full detected text and carries no score.
fn extract_labels(response: AnnotateImageResponse, min_score: f32) -> DetectedLabels {
    DetectedLabels {
        labels: response
            .label_annotations
            .into_iter()
            .filter(|a| a.score >= min_score)
            .map(|a| a.description)
            .collect(),
        objects: response
            .localized_object_annotations
            .into_iter()
            .filter(|o| o.score >= min_score)
            .map(|o| o.name)
            .collect(),
        text: response
            .text_annotations
            .into_iter()
            .next()
            .map(|t| t.description)
            .filter(|t| !t.trim().is_empty()),
    }
}

#[async_trait]
impl LabelDetector for GoogleVisionClient {
    #[instrument(skip(self, image), fields(size_bytes = image.len()))]
    async fn detect(&self, image: &[u8]) -> Result<DetectedLabels, VisionError> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .query(&[("key", &self.api_key)])
            .json(&self.request_body(image))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(VisionError::Api(status.as_u16(), error_text));
        }

        let body: AnnotateResponse = response
            .json()
            .await
            .map_err(|e| VisionError::Parse(e.without_url().to_string()))?;

        let image_response = body.responses.into_iter().next().unwrap_or_default();
        if let Some(error) = image_response.error {
            return Err(VisionError::Annotation(error.message));
        }

        let detected = extract_labels(image_response, self.min_score);

        debug!(
            labels = detected.labels.len(),
            objects = detected.objects.len(),
            has_text = detected.text.is_some(),
            "Labels detected"
        );

        Ok(detected)
    }
}
