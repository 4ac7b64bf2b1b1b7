//! Persistence collaborator contract.
//!
//! The pipeline treats domain persistence (contents, tags, community
//! visibility) as an opaque collaborator behind [`ContentRepository`]. The
//! in-memory implementation backs tests and the default server wiring; a
//! relational store plugs in by implementing the same trait.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::tasks::NoteSummary;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Stores enriched note artifacts and tag associations.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Persist corrected text, summary artifact, and knowledge record.
    /// Returns the new content id.
    async fn store_content(
        &self,
        owner: Uuid,
        corrected_text: &str,
        summary: &NoteSummary,
        knowledge_text: &str,
    ) -> Result<i64>;

    /// Names of existing tags, up to `limit`.
    async fn list_existing_tags(&self, limit: usize) -> Result<Vec<String>>;

    /// Create the tag if missing; returns its id either way.
    async fn upsert_tag(&self, name: &str) -> Result<i64>;

    /// Attach a tag to content with a confidence score. Idempotent on
    /// `(content_id, tag_id)`.
    async fn associate(&self, content_id: i64, tag_id: i64, confidence: f64) -> Result<()>;

    /// Mark content as publicly visible in the community layer.
    async fn set_content_public(
        &self,
        content_id: i64,
        public_title: &str,
        public_description: &str,
        published_at: DateTime<Utc>,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
struct StoredContent {
    #[allow(dead_code)]
    owner: Uuid,
    #[allow(dead_code)]
    corrected_text: String,
    summary: NoteSummary,
    #[allow(dead_code)]
    knowledge_text: String,
    public: Option<(String, String, DateTime<Utc>)>,
}

#[derive(Default)]
struct MemoryState {
    contents: HashMap<i64, StoredContent>,
    next_content_id: i64,
    /// lowercased name → (tag id, display name)
    tags: HashMap<String, (i64, String)>,
    next_tag_id: i64,
    associations: HashMap<(i64, i64), f64>,
}

/// In-memory [`ContentRepository`].
#[derive(Default)]
pub struct InMemoryContentRepository {
    state: Mutex<MemoryState>,
}

impl InMemoryContentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed existing tag names (test setup).
    pub fn seed_tags<I: IntoIterator<Item = S>, S: Into<String>>(&self, names: I) {
        let mut state = self.state.lock().unwrap();
        for name in names {
            let name = name.into();
            state.next_tag_id += 1;
            let id = state.next_tag_id;
            state.tags.insert(name.to_lowercase(), (id, name));
        }
    }

    pub fn content_count(&self) -> usize {
        self.state.lock().unwrap().contents.len()
    }

    /// Tags associated with a content id, as (name, confidence) pairs.
    pub fn associations_for(&self, content_id: i64) -> Vec<(String, f64)> {
        let state = self.state.lock().unwrap();
        state
            .associations
            .iter()
            .filter(|((cid, _), _)| *cid == content_id)
            .filter_map(|((_, tid), conf)| {
                state
                    .tags
                    .values()
                    .find(|(id, _)| id == tid)
                    .map(|(_, name)| (name.clone(), *conf))
            })
            .collect()
    }

    /// Whether content has been made public.
    pub fn is_public(&self, content_id: i64) -> bool {
        self.state
            .lock()
            .unwrap()
            .contents
            .get(&content_id)
            .map(|c| c.public.is_some())
            .unwrap_or(false)
    }

    pub fn summary_of(&self, content_id: i64) -> Option<NoteSummary> {
        self.state
            .lock()
            .unwrap()
            .contents
            .get(&content_id)
            .map(|c| c.summary.clone())
    }
}

#[async_trait]
impl ContentRepository for InMemoryContentRepository {
    async fn store_content(
        &self,
        owner: Uuid,
        corrected_text: &str,
        summary: &NoteSummary,
        knowledge_text: &str,
    ) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        state.next_content_id += 1;
        let id = state.next_content_id;
        state.contents.insert(
            id,
            StoredContent {
                owner,
                corrected_text: corrected_text.to_string(),
                summary: summary.clone(),
                knowledge_text: knowledge_text.to_string(),
                public: None,
            },
        );
        Ok(id)
    }

    async fn list_existing_tags(&self, limit: usize) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state.tags.values().map(|(_, name)| name.clone()).collect();
        names.sort();
        names.truncate(limit);
        Ok(names)
    }

    async fn upsert_tag(&self, name: &str) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        let key = name.to_lowercase();
        if let Some((id, _)) = state.tags.get(&key) {
            return Ok(*id);
        }
        state.next_tag_id += 1;
        let id = state.next_tag_id;
        state.tags.insert(key, (id, name.to_string()));
        Ok(id)
    }

    async fn associate(&self, content_id: i64, tag_id: i64, confidence: f64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.contents.contains_key(&content_id) {
            return Err(RepositoryError::NotFound(format!("content {content_id}")));
        }
        state
            .associations
            .entry((content_id, tag_id))
            .or_insert(confidence);
        Ok(())
    }

    async fn set_content_public(
        &self,
        content_id: i64,
        public_title: &str,
        public_description: &str,
        published_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.contents.get_mut(&content_id) {
            Some(content) => {
                content.public = Some((
                    public_title.to_string(),
                    public_description.to_string(),
                    published_at,
                ));
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("content {content_id}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> NoteSummary {
        NoteSummary {
            title: "T".into(),
            topic: "physics".into(),
            content_markdown: "c".into(),
            keywords: vec![],
        }
    }

    #[tokio::test]
    async fn test_store_content_assigns_positive_ids() {
        let repo = InMemoryContentRepository::new();
        let a = repo
            .store_content(Uuid::nil(), "text", &summary(), "k")
            .await
            .unwrap();
        let b = repo
            .store_content(Uuid::nil(), "text", &summary(), "k")
            .await
            .unwrap();
        assert!(a > 0);
        assert_eq!(b, a + 1);
    }

    #[tokio::test]
    async fn test_upsert_tag_is_idempotent_case_insensitive() {
        let repo = InMemoryContentRepository::new();
        let a = repo.upsert_tag("Physics").await.unwrap();
        let b = repo.upsert_tag("physics").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(repo.list_existing_tags(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_associate_is_idempotent() {
        let repo = InMemoryContentRepository::new();
        let content = repo
            .store_content(Uuid::nil(), "t", &summary(), "k")
            .await
            .unwrap();
        let tag = repo.upsert_tag("physics").await.unwrap();
        repo.associate(content, tag, 0.9).await.unwrap();
        repo.associate(content, tag, 0.1).await.unwrap();
        let assocs = repo.associations_for(content);
        assert_eq!(assocs.len(), 1);
        assert!((assocs[0].1 - 0.9).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_set_public() {
        let repo = InMemoryContentRepository::new();
        let content = repo
            .store_content(Uuid::nil(), "t", &summary(), "k")
            .await
            .unwrap();
        assert!(!repo.is_public(content));
        repo.set_content_public(content, "T", "d", Utc::now())
            .await
            .unwrap();
        assert!(repo.is_public(content));
    }
}
