//! Query path: translate, reload labels, match, remember the last search.

use crate::matcher::{Candidate, MatchHit, QueryError, QueryMatcher, SearchMode, SearchQuery};
use crate::object_store::{is_user_key, user_prefix, ImageStore};
use crate::session::{SessionStore, UserId};
use crate::synonyms::SynonymProvider;
use crate::translate::Translator;
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Search errors surfaced to the handlers
#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    InvalidQuery(#[from] QueryError),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Result of one search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    /// The term that was evaluated first (translated unless literal)
    pub term: String,
    /// Synonym that produced the hits, when the term itself found nothing
    pub synonym_used: Option<String>,
    pub hits: Vec<MatchHit>,
}

impl SearchOutcome {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Search settings
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub literal_marker: String,
    pub target_language: String,
    pub load_concurrency: usize,
}

/// Label search over a user's stored images
pub struct SearchService {
    store: Arc<dyn ImageStore>,
    translator: Option<Arc<dyn Translator>>,
    synonyms: Option<Arc<dyn SynonymProvider>>,
    matcher: QueryMatcher,
    sessions: Arc<SessionStore>,
    settings: SearchSettings,
}

impl SearchService {
    /// `translator` and `synonyms` are `None` when those features are disabled
    pub fn new(
        store: Arc<dyn ImageStore>,
        translator: Option<Arc<dyn Translator>>,
        synonyms: Option<Arc<dyn SynonymProvider>>,
        matcher: QueryMatcher,
        sessions: Arc<SessionStore>,
        settings: SearchSettings,
    ) -> Self {
        Self {
            store,
            translator,
            synonyms,
            matcher,
            sessions,
            settings,
        }
    }

    /// Run a search for `user_id` and record the hits as their last search
    #[instrument(skip(self))]
    pub async fn search(
        &self,
        user_id: UserId,
        raw_query: &str,
        mode: SearchMode,
    ) -> Result<SearchOutcome, SearchError> {
        let query = SearchQuery::parse(raw_query, &self.settings.literal_marker)?;
        let term = self.resolve_term(&query).await?;

        let candidates = self.load_candidates(user_id).await?;
        let mut outcome = self.matcher.evaluate(&term, &candidates, mode);
        let mut synonym_used = None;

        if outcome.is_empty() && !query.literal {
            if let Some((synonym, hits)) = self.expand_synonyms(&term, &candidates, mode).await {
                outcome = hits;
                synonym_used = Some(synonym);
            }
        }

        // replaces the previous result even when empty
        self.sessions.record_last_search(user_id, outcome.keys());

        metrics::counter!("photobot.searches").increment(1);
        if outcome.is_empty() {
            metrics::counter!("photobot.searches.empty").increment(1);
        }

        info!(
            user_id,
            term = %term,
            literal = query.literal,
            candidates = candidates.len(),
            hits = outcome.hits.len(),
            synonym = ?synonym_used,
            "Search completed"
        );

        Ok(SearchOutcome {
            term,
            synonym_used,
            hits: outcome.hits,
        })
    }

    /// Translate the query unless it is literal or translation is disabled
    async fn resolve_term(&self, query: &SearchQuery) -> Result<String> {
        if query.literal {
            return Ok(query.text.clone());
        }

        let Some(ref translator) = self.translator else {
            return Ok(query.text.clone());
        };

        let translation = translator
            .translate(&query.text, &self.settings.target_language)
            .await
            .context("Query translation failed")?;

        let term = translation.text.trim().to_lowercase();
        debug!(original = %query.text, translated = %term, "Query translated");

        if term.is_empty() {
            Ok(query.text.clone())
        } else {
            Ok(term)
        }
    }

    /// List the user's images and reload their labels, keeping listing order
    pub async fn load_candidates(&self, user_id: UserId) -> Result<Vec<Candidate>> {
        let keys = self
            .store
            .list_keys(&user_prefix(user_id))
            .await
            .context("Failed to list user images")?;

        let store = self.store.clone();
        stream::iter(keys)
            .map(move |key| {
                let store = store.clone();
                async move {
                    let labels = store.get_labels(&key).await?;
                    Ok::<_, anyhow::Error>(Candidate { key, labels })
                }
            })
            .buffered(self.settings.load_concurrency.max(1))
            .try_collect()
            .await
    }

    /// Try each synonym in turn, stopping at the first one with hits.
    /// Lookup failures count as "no synonyms".
    async fn expand_synonyms(
        &self,
        term: &str,
        candidates: &[Candidate],
        mode: SearchMode,
    ) -> Option<(String, crate::matcher::MatchOutcome)> {
        let provider = self.synonyms.as_ref()?;

        // only consulted when queries are translated into the label language
        self.translator.as_ref()?;

        let synonyms = match provider.synonyms(term).await {
            Ok(synonyms) => synonyms,
            Err(e) => {
                warn!(error = %e, term = %term, "Synonym lookup failed");
                return None;
            }
        };

        for synonym in synonyms {
            let outcome = self.matcher.evaluate(&synonym, candidates, mode);
            if !outcome.is_empty() {
                debug!(term = %term, synonym = %synonym, "Synonym matched");
                metrics::counter!("photobot.searches.synonym_hits").increment(1);
                return Some((synonym, outcome));
            }
        }

        None
    }

    /// Delete every image of the user's last search, returns how many
    #[instrument(skip(self))]
    pub async fn delete_last_search(&self, user_id: UserId) -> Result<usize> {
        let keys = self.sessions.take_last_search(user_id);
        let mut deleted = 0;

        for (i, key) in keys.iter().enumerate() {
            if !is_user_key(user_id, key) {
                continue;
            }
            if let Err(e) = self.store.delete_image(key).await {
                // keep what is left so a retry can finish the job
                self.sessions.record_last_search(user_id, keys[i..].to_vec());
                metrics::counter!("photobot.photos.deleted").increment(deleted as u64);
                return Err(e.context(format!("Failed to delete {}", key)));
            }
            deleted += 1;
        }

        metrics::counter!("photobot.photos.deleted").increment(deleted as u64);
        info!(user_id, deleted, "Last search deleted");

        Ok(deleted)
    }

    /// Number of images stored for the user
    pub async fn count_images(&self, user_id: UserId) -> Result<usize> {
        Ok(self.store.list_keys(&user_prefix(user_id)).await?.len())
    }

    /// Read the bytes of a matched image
    pub async fn image_bytes(&self, key: &str) -> Result<Vec<u8>> {
        self.store.get_image(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelSet;
    use crate::matcher::QueryMatcherBuilder;
    use crate::object_store::{image_key, MemoryImageStore};
    use crate::synonyms::{MockSynonymProvider, SynonymError};
    use crate::translate::{MockTranslator, TranslateError, Translation};
    use std::time::Duration;

    const USER: UserId = 42;

    fn settings() -> SearchSettings {
        SearchSettings {
            literal_marker: "!".to_string(),
            target_language: "en".to_string(),
            load_concurrency: 4,
        }
    }

    async fn seeded_store() -> Arc<MemoryImageStore> {
        let store = Arc::new(MemoryImageStore::new());
        store
            .put_image(&image_key(USER, "a"), vec![1], &LabelSet::from_raw(["cat", "animal"]))
            .await
            .unwrap();
        store
            .put_image(&image_key(USER, "b"), vec![2], &LabelSet::from_raw(["dog", "animal"]))
            .await
            .unwrap();
        store
            .put_image(&image_key(USER, "c"), vec![3], &LabelSet::from_raw(["Gatto Nero"]))
            .await
            .unwrap();
        // another user's picture must never show up
        store
            .put_image(&image_key(7, "z"), vec![9], &LabelSet::from_raw(["cat"]))
            .await
            .unwrap();
        store
    }

    fn translating(from: &'static str, to: &'static str) -> MockTranslator {
        let mut translator = MockTranslator::new();
        translator
            .expect_translate()
            .withf(move |text, _| text == from)
            .returning(move |_, _| {
                Ok(Translation {
                    text: to.to_string(),
                    source_language: Some("it".to_string()),
                })
            });
        translator
    }

    fn service(
        store: Arc<dyn ImageStore>,
        translator: Option<MockTranslator>,
        synonyms: Option<MockSynonymProvider>,
        sessions: Arc<SessionStore>,
    ) -> SearchService {
        SearchService::new(
            store,
            translator.map(|t| Arc::new(t) as Arc<dyn Translator>),
            synonyms.map(|s| Arc::new(s) as Arc<dyn SynonymProvider>),
            QueryMatcherBuilder::new().build(),
            sessions,
            settings(),
        )
    }

    fn sessions() -> Arc<SessionStore> {
        Arc::new(SessionStore::new(Duration::from_secs(3600)))
    }

    #[tokio::test]
    async fn test_single_search_records_last_search() {
        let sessions = sessions();
        let search = service(seeded_store().await, None, None, sessions.clone());

        let outcome = search.search(USER, "cat", SearchMode::First).await.unwrap();

        assert_eq!(outcome.hits.len(), 1);
        assert_eq!(outcome.hits[0].key, "42/a.jpg");
        assert_eq!(sessions.last_search(USER), vec!["42/a.jpg"]);
    }

    #[tokio::test]
    async fn test_all_search() {
        let search = service(seeded_store().await, None, None, sessions());

        let outcome = search.search(USER, "animal", SearchMode::All).await.unwrap();
        let keys: Vec<_> = outcome.hits.iter().map(|h| h.key.as_str()).collect();

        assert_eq!(keys, vec!["42/a.jpg", "42/b.jpg"]);
    }

    #[tokio::test]
    async fn test_query_is_translated() {
        let search = service(
            seeded_store().await,
            Some(translating("cane", "Dog")),
            None,
            sessions(),
        );

        let outcome = search.search(USER, "Cane", SearchMode::First).await.unwrap();

        assert_eq!(outcome.term, "dog");
        assert_eq!(outcome.hits[0].key, "42/b.jpg");
    }

    #[tokio::test]
    async fn test_synonyms_consulted_before_not_found() {
        let mut synonyms = MockSynonymProvider::new();
        synonyms
            .expect_synonyms()
            .withf(|word| word == "puppy")
            .times(1)
            .returning(|_| Ok(vec!["pup".to_string(), "dog".to_string()]));

        let search = service(
            seeded_store().await,
            Some(translating("cucciolo", "puppy")),
            Some(synonyms),
            sessions(),
        );

        let outcome = search
            .search(USER, "cucciolo", SearchMode::All)
            .await
            .unwrap();

        assert_eq!(outcome.synonym_used.as_deref(), Some("dog"));
        assert_eq!(outcome.hits.len(), 1);
        assert_eq!(outcome.hits[0].key, "42/b.jpg");
    }

    #[tokio::test]
    async fn test_not_found_after_synonyms() {
        let mut synonyms = MockSynonymProvider::new();
        synonyms
            .expect_synonyms()
            .times(1)
            .returning(|_| Ok(vec!["camelopard".to_string()]));

        let sessions = sessions();
        sessions.record_last_search(USER, vec!["42/a.jpg".to_string()]);

        let search = service(
            seeded_store().await,
            Some(translating("giraffa", "giraffe")),
            Some(synonyms),
            sessions.clone(),
        );

        let outcome = search.search(USER, "giraffa", SearchMode::All).await.unwrap();

        assert!(outcome.is_empty());
        assert!(outcome.synonym_used.is_none());
        // an empty result replaces the previous one
        assert!(sessions.last_search(USER).is_empty());
    }

    #[tokio::test]
    async fn test_synonym_failure_is_not_fatal() {
        let mut synonyms = MockSynonymProvider::new();
        synonyms
            .expect_synonyms()
            .returning(|_| Err(SynonymError::Network("down".to_string())));

        let search = service(
            seeded_store().await,
            Some(translating("giraffa", "giraffe")),
            Some(synonyms),
            sessions(),
        );

        let outcome = search.search(USER, "giraffa", SearchMode::All).await.unwrap();
        assert!(outcome.is_empty());
    }

    #[tokio::test]
    async fn test_literal_query_bypasses_translation() {
        let mut translator = MockTranslator::new();
        translator.expect_translate().never();
        let mut synonyms = MockSynonymProvider::new();
        synonyms.expect_synonyms().never();

        let search = service(
            seeded_store().await,
            Some(translator),
            Some(synonyms),
            sessions(),
        );

        let outcome = search
            .search(USER, "!GATTO nero", SearchMode::All)
            .await
            .unwrap();

        assert_eq!(outcome.term, "gatto nero");
        assert_eq!(outcome.hits.len(), 1);
        assert_eq!(outcome.hits[0].key, "42/c.jpg");
    }

    #[tokio::test]
    async fn test_translation_failure_propagates() {
        let mut translator = MockTranslator::new();
        translator
            .expect_translate()
            .returning(|_, _| Err(TranslateError::Api(500, "boom".to_string())));

        let search = service(seeded_store().await, Some(translator), None, sessions());

        assert!(matches!(
            search.search(USER, "gatto", SearchMode::First).await,
            Err(SearchError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_query() {
        let search = service(seeded_store().await, None, None, sessions());

        assert!(matches!(
            search.search(USER, "  ", SearchMode::First).await,
            Err(SearchError::InvalidQuery(QueryError::Empty))
        ));
    }

    #[tokio::test]
    async fn test_delete_last_search() {
        let store = seeded_store().await;
        let sessions = sessions();
        let search = service(store.clone(), None, None, sessions.clone());

        search.search(USER, "animal", SearchMode::All).await.unwrap();
        let deleted = search.delete_last_search(USER).await.unwrap();

        assert_eq!(deleted, 2);
        let remaining = store.list_keys(&user_prefix(USER)).await.unwrap();
        assert_eq!(remaining, vec!["42/c.jpg"]);
        assert!(sessions.last_search(USER).is_empty());

        // nothing left to delete
        assert_eq!(search.delete_last_search(USER).await.unwrap(), 0);
    }

    /// Memory store that refuses to delete one key
    struct StuckDeleteStore {
        inner: Arc<MemoryImageStore>,
        stuck: String,
    }

    #[async_trait::async_trait]
    impl ImageStore for StuckDeleteStore {
        async fn put_image(&self, key: &str, data: Vec<u8>, labels: &LabelSet) -> Result<()> {
            self.inner.put_image(key, data, labels).await
        }

        async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
            self.inner.list_keys(prefix).await
        }

        async fn get_labels(&self, key: &str) -> Result<LabelSet> {
            self.inner.get_labels(key).await
        }

        async fn get_image(&self, key: &str) -> Result<Vec<u8>> {
            self.inner.get_image(key).await
        }

        async fn delete_image(&self, key: &str) -> Result<()> {
            if key == self.stuck {
                anyhow::bail!("access denied");
            }
            self.inner.delete_image(key).await
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_remaining_keys() {
        let inner = seeded_store().await;
        let sessions = sessions();
        let stuck = Arc::new(StuckDeleteStore {
            inner: inner.clone(),
            stuck: image_key(USER, "b"),
        });
        let search = service(stuck, None, None, sessions.clone());

        search.search(USER, "animal", SearchMode::All).await.unwrap();
        assert!(search.delete_last_search(USER).await.is_err());

        // the first key is gone, the failed one is still pending
        assert_eq!(
            inner.list_keys(&user_prefix(USER)).await.unwrap(),
            vec!["42/b.jpg", "42/c.jpg"]
        );
        assert_eq!(sessions.last_search(USER), vec!["42/b.jpg"]);

        // once the store recovers, a retry finishes the job
        let healthy = service(inner.clone(), None, None, sessions.clone());
        assert_eq!(healthy.delete_last_search(USER).await.unwrap(), 1);
        assert_eq!(
            inner.list_keys(&user_prefix(USER)).await.unwrap(),
            vec!["42/c.jpg"]
        );
        assert!(sessions.last_search(USER).is_empty());
    }

    #[tokio::test]
    async fn test_delete_ignores_foreign_keys() {
        let store = seeded_store().await;
        let sessions = sessions();
        sessions.record_last_search(USER, vec!["7/z.jpg".to_string()]);

        let search = service(store.clone(), None, None, sessions);

        assert_eq!(search.delete_last_search(USER).await.unwrap(), 0);
        assert_eq!(store.list_keys("7/").await.unwrap(), vec!["7/z.jpg"]);
    }

    #[tokio::test]
    async fn test_count_images() {
        let search = service(seeded_store().await, None, None, sessions());
        assert_eq!(search.count_images(USER).await.unwrap(), 3);
        assert_eq!(search.count_images(1).await.unwrap(), 0);
    }
}
