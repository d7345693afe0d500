use crate::config::{StorageBackend, StorageConfig};
use crate::labels::LabelSet;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, instrument};

const IMAGE_CONTENT_TYPE: &str = "image/jpeg";

/// Object store holding user images and their label metadata.
///
/// The store owns all persisted state: there is no index besides the key
/// layout `{user_id}/{photo_id}.jpg` and the `labels` metadata entry.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Write an image with its labels, overwriting any object under `key`
    async fn put_image(&self, key: &str, data: Vec<u8>, labels: &LabelSet) -> Result<()>;

    /// List object keys under a prefix, in lexicographic order
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Reload the label set stored with an object
    async fn get_labels(&self, key: &str) -> Result<LabelSet>;

    /// Read the image bytes
    async fn get_image(&self, key: &str) -> Result<Vec<u8>>;

    /// Delete an object
    async fn delete_image(&self, key: &str) -> Result<()>;

    /// Check that the store is reachable
    async fn health_check(&self) -> Result<()>;
}

/// Build the configured image store
pub async fn build_image_store(config: &StorageConfig) -> Result<Arc<dyn ImageStore>> {
    match config.backend {
        StorageBackend::S3 => Ok(Arc::new(S3ImageStore::new(config).await?)),
        StorageBackend::Memory => {
            info!("Using in-memory image store, images are lost on restart");
            Ok(Arc::new(MemoryImageStore::new()))
        }
    }
}

/// Key prefix under which all of a user's images live
pub fn user_prefix(user_id: i64) -> String {
    format!("{}/", user_id)
}

/// Object key for a user's photo.
/// Format: {user_id}/{photo_id}.jpg
pub fn image_key(user_id: i64, photo_id: &str) -> String {
    format!(
        "{prefix}{photo_id}.jpg",
        prefix = user_prefix(user_id),
        photo_id = sanitize_path_component(photo_id)
    )
}

/// Whether `key` belongs to the given user
pub fn is_user_key(user_id: i64, key: &str) -> bool {
    key.starts_with(&user_prefix(user_id))
}

/// S3-backed image store
pub struct S3ImageStore {
    client: S3Client,
    bucket: String,
}

impl S3ImageStore {
    /// Create a new S3 image store
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 image store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl ImageStore for S3ImageStore {
    #[instrument(skip(self, data, labels), fields(size_bytes = data.len()))]
    async fn put_image(&self, key: &str, data: Vec<u8>, labels: &LabelSet) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(IMAGE_CONTENT_TYPE)
            .set_metadata(Some(labels.to_metadata()))
            .send()
            .await
            .context("Failed to upload image to S3")?;

        debug!(key = %key, labels = %labels, "Image uploaded");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .context("Failed to list images")?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(String::from)),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(keys)
    }

    async fn get_labels(&self, key: &str) -> Result<LabelSet> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to read metadata of {}", key))?;

        Ok(response
            .metadata()
            .map(LabelSet::from_metadata)
            .unwrap_or_default())
    }

    async fn get_image(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", key))?;

        let bytes = response
            .body
            .collect()
            .await
            .with_context(|| format!("Failed to read body of {}", key))?;

        Ok(bytes.into_bytes().to_vec())
    }

    #[instrument(skip(self))]
    async fn delete_image(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("Failed to delete image from S3")?;

        debug!(key = %key, "Image deleted from S3");
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .context("Bucket is not reachable")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    metadata: HashMap<String, String>,
}

/// Process-local image store with the same contract as the S3 store
#[derive(Default)]
pub struct MemoryImageStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn put_image(&self, key: &str, data: Vec<u8>, labels: &LabelSet) -> Result<()> {
        self.objects.write().insert(
            key.to_string(),
            StoredObject {
                data,
                metadata: labels.to_metadata(),
            },
        );
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn get_labels(&self, key: &str) -> Result<LabelSet> {
        let objects = self.objects.read();
        let object = objects
            .get(key)
            .with_context(|| format!("No such object: {}", key))?;
        Ok(LabelSet::from_metadata(&object.metadata))
    }

    async fn get_image(&self, key: &str) -> Result<Vec<u8>> {
        let objects = self.objects.read();
        let object = objects
            .get(key)
            .with_context(|| format!("No such object: {}", key))?;
        Ok(object.data.clone())
    }

    async fn delete_image(&self, key: &str) -> Result<()> {
        // S3 deletes are idempotent, so are these
        self.objects.write().remove(key);
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Sanitize a path component to prevent path traversal
fn sanitize_path_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}
