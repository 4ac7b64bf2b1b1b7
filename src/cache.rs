//! Content-hash result cache.
//!
//! Deterministic de-duplication keyed by SHA-256 of normalized input. Two
//! tasks with identical normalized input and kind share one result. Bounded
//! by entry count (LRU eviction) and entry age. Image submissions are not
//! cached: there is no normalization rule for pixels, so only the text-based
//! hash builders exist.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::tasks::{NoteInput, TaskKind, TaskResult};
use crate::utils::{normalize_content, normalize_title};

/// Cache key: SHA-256 over normalized input plus the task kind.
pub type ContentHash = [u8; 32];

struct CacheSlot {
    result: TaskResult,
    created_at: Instant,
    last_used: u64,
}

struct CacheState {
    entries: HashMap<ContentHash, CacheSlot>,
    /// Monotone access counter backing LRU ordering.
    tick: u64,
}

/// Bounded LRU + TTL map from content hash to completed result.
pub struct ContentCache {
    state: Mutex<CacheState>,
    max_entries: usize,
    ttl: Duration,
}

impl ContentCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                tick: 0,
            }),
            max_entries: max_entries.max(1),
            ttl,
        }
    }

    /// Hash for a single text note: normalized content plus lowercased
    /// normalized title, domain-separated by the task kind.
    pub fn hash_text(title: Option<&str>, text: &str) -> ContentHash {
        let mut hasher = Sha256::new();
        hasher.update(TaskKind::SmartNote.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(normalize_title(title.unwrap_or_default()).as_bytes());
        hasher.update([0]);
        hasher.update(normalize_content(text).as_bytes());
        hasher.finalize().into()
    }

    /// Hash for an ordered multi-note submission.
    pub fn hash_notes(notes: &[NoteInput]) -> ContentHash {
        let mut hasher = Sha256::new();
        hasher.update(TaskKind::MultiSummary.as_str().as_bytes());
        for note in notes {
            hasher.update([0]);
            hasher.update(normalize_title(&note.title).as_bytes());
            hasher.update([0x1e]);
            hasher.update(normalize_content(&note.content).as_bytes());
        }
        hasher.finalize().into()
    }

    /// Look up a cached result, refreshing its LRU position. Expired entries
    /// are dropped on access.
    pub fn get(&self, hash: &ContentHash) -> Option<TaskResult> {
        let mut state = self.state.lock().unwrap();
        state.tick += 1;
        let tick = state.tick;

        let expired = match state.entries.get(hash) {
            Some(slot) => slot.created_at.elapsed() >= self.ttl,
            None => return None,
        };
        if expired {
            state.entries.remove(hash);
            return None;
        }
        state.entries.get_mut(hash).map(|slot| {
            slot.last_used = tick;
            slot.result.clone()
        })
    }

    /// Store a completed result, evicting the least-recently-used entry when
    /// the cache is full.
    pub fn insert(&self, hash: ContentHash, result: TaskResult) {
        let mut state = self.state.lock().unwrap();
        state.tick += 1;
        let tick = state.tick;
        if !state.entries.contains_key(&hash) && state.entries.len() >= self.max_entries {
            if let Some(lru) = state
                .entries
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(hash, _)| *hash)
            {
                state.entries.remove(&lru);
            }
        }
        state.entries.insert(
            hash,
            CacheSlot {
                result,
                created_at: Instant::now(),
                last_used: tick,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{ProcessingMethod, SummaryResult};

    fn result(tag: &str) -> TaskResult {
        TaskResult::Summary(SummaryResult {
            title: tag.to_string(),
            topic: "t".into(),
            content_markdown: "c".into(),
            confidence_scores: vec![],
            processing_method: ProcessingMethod::Single,
        })
    }

    #[test]
    fn test_normalized_inputs_share_hash() {
        let a = ContentCache::hash_text(Some("Physics"), "  E = mc^2 ");
        let b = ContentCache::hash_text(Some(" physics "), "E = mc^2");
        assert_eq!(a, b);

        let c = ContentCache::hash_text(Some("Chemistry"), "E = mc^2");
        assert_ne!(a, c);
    }

    #[test]
    fn test_note_order_matters() {
        let note = |t: &str, c: &str| NoteInput {
            title: t.into(),
            content: c.into(),
        };
        let a = ContentCache::hash_notes(&[note("a", "1"), note("b", "2")]);
        let b = ContentCache::hash_notes(&[note("b", "2"), note("a", "1")]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_get_after_insert() {
        let cache = ContentCache::new(10, Duration::from_secs(60));
        let hash = ContentCache::hash_text(None, "note");
        assert!(cache.get(&hash).is_none());
        cache.insert(hash, result("r"));
        assert_eq!(cache.get(&hash), Some(result("r")));
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = ContentCache::new(10, Duration::ZERO);
        let hash = ContentCache::hash_text(None, "note");
        cache.insert(hash, result("r"));
        assert!(cache.get(&hash).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let cache = ContentCache::new(2, Duration::from_secs(60));
        let h1 = ContentCache::hash_text(None, "one");
        let h2 = ContentCache::hash_text(None, "two");
        let h3 = ContentCache::hash_text(None, "three");

        cache.insert(h1, result("1"));
        cache.insert(h2, result("2"));
        // Touch h1 so h2 becomes least recently used.
        assert!(cache.get(&h1).is_some());
        cache.insert(h3, result("3"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&h1).is_some());
        assert!(cache.get(&h2).is_none());
        assert!(cache.get(&h3).is_some());
    }
}
