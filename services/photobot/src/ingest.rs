//! Upload path: detect labels, merge the caption, persist the image.

use crate::labels::{self, LabelSet};
use crate::object_store::{image_key, ImageStore};
use crate::session::UserId;
use crate::translate::Translator;
use crate::vision::LabelDetector;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// An image written to the store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredImage {
    pub key: String,
    pub labels: LabelSet,
}

/// Turns an uploaded photo into a labelled object in the store
pub struct PhotoIngestor {
    detector: Arc<dyn LabelDetector>,
    translator: Option<Arc<dyn Translator>>,
    store: Arc<dyn ImageStore>,
    target_language: String,
    max_labels: usize,
}

impl PhotoIngestor {
    /// `translator` is `None` when captions are stored untranslated
    pub fn new(
        detector: Arc<dyn LabelDetector>,
        translator: Option<Arc<dyn Translator>>,
        store: Arc<dyn ImageStore>,
        target_language: impl Into<String>,
        max_labels: usize,
    ) -> Self {
        Self {
            detector,
            translator,
            store,
            target_language: target_language.into(),
            max_labels,
        }
    }

    /// Ask the vision service for the labels of an image, capped at
    /// `max_labels`
    pub async fn fetch_labels(&self, image: &[u8]) -> Result<LabelSet> {
        let detected = self
            .detector
            .detect(image)
            .await
            .context("Label detection failed")?;
        Ok(detected.to_label_set(self.max_labels))
    }

    /// Caption words, plus their translation into the canonical language.
    ///
    /// A failed caption translation only loses the translated words.
    pub async fn caption_labels(&self, caption: &str) -> LabelSet {
        let mut set = LabelSet::from_raw(labels::words(caption));

        if let Some(ref translator) = self.translator {
            match translator.translate(caption, &self.target_language).await {
                Ok(translation) => set.extend(labels::words(&translation.text)),
                Err(e) => warn!(error = %e, "Caption translation failed"),
            }
        }

        set
    }

    /// Store an uploaded photo under `{user_id}/{photo_id}.jpg`
    #[instrument(skip(self, image, caption), fields(size_bytes = image.len()))]
    pub async fn ingest(
        &self,
        user_id: UserId,
        photo_id: &str,
        image: Vec<u8>,
        caption: Option<&str>,
    ) -> Result<StoredImage> {
        // the cap applies to detected labels only; caption words always stay
        let mut labels = self.fetch_labels(&image).await?;
        if let Some(caption) = caption.filter(|c| !c.trim().is_empty()) {
            labels.merge(self.caption_labels(caption).await);
        }

        let key = image_key(user_id, photo_id);
        let size_bytes = image.len();

        self.store
            .put_image(&key, image, &labels)
            .await
            .with_context(|| format!("Failed to store {}", key))?;

        metrics::counter!("photobot.photos.stored").increment(1);
        metrics::counter!("photobot.bytes.uploaded").increment(size_bytes as u64);

        info!(
            user_id,
            key = %key,
            label_count = labels.len(),
            "Photo stored"
        );

        Ok(StoredImage { key, labels })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::MemoryImageStore;
    use crate::translate::{MockTranslator, TranslateError, Translation};
    use crate::vision::{DetectedLabels, MockLabelDetector};

    fn detector_with(labels: &'static [&'static str]) -> MockLabelDetector {
        let mut detector = MockLabelDetector::new();
        detector.expect_detect().returning(move |_| {
            Ok(DetectedLabels {
                labels: labels.iter().map(|l| l.to_string()).collect(),
                ..Default::default()
            })
        });
        detector
    }

    #[tokio::test]
    async fn test_ingest_stores_labels() {
        let store = Arc::new(MemoryImageStore::new());
        let ingestor = PhotoIngestor::new(
            Arc::new(detector_with(&["Cat", "Animal"])),
            None,
            store.clone(),
            "en",
            30,
        );

        let stored = ingestor
            .ingest(42, "AQADl", vec![0xFF, 0xD8], Some("Micio"))
            .await
            .unwrap();

        assert_eq!(stored.key, "42/AQADl.jpg");
        assert_eq!(stored.labels.joined(), "animal,cat,micio");
        assert_eq!(
            store.get_labels(&stored.key).await.unwrap(),
            stored.labels
        );
        assert_eq!(store.get_image(&stored.key).await.unwrap(), vec![0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_caption_is_translated() {
        let mut translator = MockTranslator::new();
        translator
            .expect_translate()
            .withf(|text, target| text == "il mio gatto" && target == "en")
            .times(1)
            .returning(|_, _| {
                Ok(Translation {
                    text: "My Cat".to_string(),
                    source_language: Some("it".to_string()),
                })
            });

        let ingestor = PhotoIngestor::new(
            Arc::new(detector_with(&[])),
            Some(Arc::new(translator)),
            Arc::new(MemoryImageStore::new()),
            "en",
            30,
        );

        let stored = ingestor
            .ingest(1, "p", vec![1], Some("il mio gatto"))
            .await
            .unwrap();

        assert_eq!(stored.labels.joined(), "cat,gatto,il,mio,my");
    }

    #[tokio::test]
    async fn test_caption_translation_failure_keeps_original_words() {
        let mut translator = MockTranslator::new();
        translator
            .expect_translate()
            .returning(|_, _| Err(TranslateError::Network("down".to_string())));

        let ingestor = PhotoIngestor::new(
            Arc::new(detector_with(&["dog"])),
            Some(Arc::new(translator)),
            Arc::new(MemoryImageStore::new()),
            "en",
            30,
        );

        let stored = ingestor.ingest(1, "p", vec![1], Some("cane")).await.unwrap();
        assert_eq!(stored.labels.joined(), "cane,dog");
    }

    #[tokio::test]
    async fn test_reupload_overwrites() {
        let store = Arc::new(MemoryImageStore::new());

        let first = PhotoIngestor::new(
            Arc::new(detector_with(&["cat"])),
            None,
            store.clone(),
            "en",
            30,
        );
        first.ingest(1, "same", vec![1, 1], None).await.unwrap();

        let second = PhotoIngestor::new(
            Arc::new(detector_with(&["beach"])),
            None,
            store.clone(),
            "en",
            30,
        );
        let stored = second.ingest(1, "same", vec![2], None).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get_image(&stored.key).await.unwrap(), vec![2]);
        assert_eq!(store.get_labels(&stored.key).await.unwrap().joined(), "beach");
    }

    #[tokio::test]
    async fn test_label_cap() {
        let ingestor = PhotoIngestor::new(
            Arc::new(detector_with(&["a1", "b2", "c3", "d4"])),
            None,
            Arc::new(MemoryImageStore::new()),
            "en",
            2,
        );

        let stored = ingestor.ingest(1, "p", vec![1], None).await.unwrap();
        assert_eq!(stored.labels.joined(), "a1,b2");
    }

    #[tokio::test]
    async fn test_caption_survives_label_cap() {
        let mut detector = MockLabelDetector::new();
        detector.expect_detect().returning(|_| {
            Ok(DetectedLabels {
                labels: (0..10).map(|i| format!("label{}", i)).collect(),
                objects: (0..10).map(|i| format!("object{}", i)).collect(),
                text: Some(
                    (0..15)
                        .map(|i| format!("word{}", i))
                        .collect::<Vec<_>>()
                        .join(" "),
                ),
            })
        });

        let store = Arc::new(MemoryImageStore::new());
        let ingestor = PhotoIngestor::new(Arc::new(detector), None, store.clone(), "en", 30);

        let stored = ingestor
            .ingest(1, "p", vec![1], Some("zebra"))
            .await
            .unwrap();

        assert!(stored.labels.contains("zebra"));
        assert!(stored.labels.contains("label9"));
        assert!(stored.labels.contains("object9"));
        assert!(!stored.labels.contains("word14"));
        assert_eq!(stored.labels.len(), 31);

        let persisted = store.get_labels(&stored.key).await.unwrap();
        assert!(persisted.contains("zebra"));
    }

    #[tokio::test]
    async fn test_detection_failure_stores_nothing() {
        let mut detector = MockLabelDetector::new();
        detector
            .expect_detect()
            .returning(|_| Err(crate::vision::VisionError::Api(403, "denied".to_string())));

        let store = Arc::new(MemoryImageStore::new());
        let ingestor = PhotoIngestor::new(Arc::new(detector), None, store.clone(), "en", 30);

        assert!(ingestor.ingest(1, "p", vec![1], None).await.is_err());
        assert!(store.is_empty());
    }
}
