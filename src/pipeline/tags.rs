//! Tag generation tail stage.
//!
//! Runs after the smart-note result is persisted: offers the model the
//! existing tag vocabulary, normalizes its suggestions, and stores the
//! associations. A failure anywhere in here never fails the parent task.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::config::MAX_EXISTING_TAGS;
use crate::llm::{ModelBackend, TagSuggestions};
use crate::repository::ContentRepository;
use crate::tasks::{NoteSummary, TagAssociation};

/// Generates and persists tags for stored content.
#[derive(Clone)]
pub struct TagGenerator {
    model: Arc<dyn ModelBackend>,
    repository: Arc<dyn ContentRepository>,
    max_tags: usize,
}

impl TagGenerator {
    pub fn new(
        model: Arc<dyn ModelBackend>,
        repository: Arc<dyn ContentRepository>,
        max_tags: usize,
    ) -> Self {
        Self {
            model,
            repository,
            max_tags,
        }
    }

    /// Generate tags for persisted content and store the associations,
    /// minting new tags on first reference.
    pub async fn attach_tags(
        &self,
        owner: Uuid,
        content_id: i64,
        summary: &NoteSummary,
        knowledge_text: &str,
        deadline: Instant,
    ) -> anyhow::Result<Vec<TagAssociation>> {
        let existing = self.repository.list_existing_tags(MAX_EXISTING_TAGS).await?;
        let suggestions = self
            .model
            .generate_tags(summary, knowledge_text, &existing, deadline)
            .await?;

        let tags = normalize_suggestions(suggestions, &existing, self.max_tags);
        debug!(owner = %owner, content_id, count = tags.len(), "attaching tags");

        for tag in &tags {
            let tag_id = self.repository.upsert_tag(&tag.name).await?;
            self.repository
                .associate(content_id, tag_id, tag.confidence)
                .await?;
        }
        Ok(tags)
    }
}

/// Normalize model suggestions: trim, drop empties, dedupe
/// case-insensitively with existing names winning over new ones, clamp
/// confidence, cap the total.
pub fn normalize_suggestions(
    suggestions: TagSuggestions,
    existing: &[String],
    max_tags: usize,
) -> Vec<TagAssociation> {
    let known: HashSet<String> = existing.iter().map(|n| n.to_lowercase()).collect();
    let mut seen = HashSet::new();
    let mut tags = Vec::new();

    // Existing-bucket names first so they win cross-bucket duplicates.
    for name in suggestions.existing {
        let name = name.trim().to_string();
        if name.is_empty() || !seen.insert(name.to_lowercase()) {
            continue;
        }
        tags.push(TagAssociation {
            name,
            confidence: 1.0,
            is_new: false,
        });
    }

    for tag in suggestions.new {
        let name = tag.name.trim().to_string();
        if name.is_empty() || !seen.insert(name.to_lowercase()) {
            continue;
        }
        // The model sometimes "mints" a name that already exists.
        let is_new = !known.contains(&name.to_lowercase());
        tags.push(TagAssociation {
            confidence: if is_new {
                tag.confidence.clamp(0.0, 1.0)
            } else {
                1.0
            },
            name,
            is_new,
        });
    }

    tags.truncate(max_tags);
    tags
}
