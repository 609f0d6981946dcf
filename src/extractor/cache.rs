//! LRU cache of comment-stripped blob contents

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use gix::ObjectId;
use lru::LruCache;
use tokio::sync::Mutex;

use crate::git::{GitResult, LocalRepo, TreeFile};
use crate::language::LanguageProfile;

pub const DEFAULT_CAPACITY: usize = 20_000;

type Key = (LanguageProfile, ObjectId);

/// Shared by every worker of one extraction.
///
/// The lock is held from lookup through load and insert, so a blob is
/// read and stripped once even when two workers ask for it together.
pub struct StrippedCache {
    lru: Mutex<LruCache<Key, Arc<String>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl StrippedCache {
    pub fn new(capacity: usize) -> Self {
        let non_zero_capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            lru: Mutex::new(LruCache::new(non_zero_capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Stripped contents of `files`, in order. Unreadable blobs are left out.
    pub async fn stripped(
        &self,
        repo: &LocalRepo,
        files: &[TreeFile],
        profile: LanguageProfile,
    ) -> GitResult<Vec<Arc<String>>> {
        let mut lru = self.lru.lock().await;
        let mut found: HashMap<ObjectId, Arc<String>> = HashMap::new();
        let mut missing = Vec::new();

        for file in files {
            if found.contains_key(&file.oid) {
                continue;
            }
            match lru.get(&(profile, file.oid)) {
                Some(text) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    found.insert(file.oid, Arc::clone(text));
                }
                None if !missing.contains(&file.oid) => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    missing.push(file.oid);
                }
                None => {}
            }
        }

        if !missing.is_empty() {
            for (oid, raw) in repo.read_blobs(missing).await? {
                let text = Arc::new(profile.strip_comments(&raw));
                lru.put((profile, oid), Arc::clone(&text));
                found.insert(oid, text);
            }
        }

        Ok(files
            .iter()
            .filter_map(|f| found.get(&f.oid).cloned())
            .collect())
    }

    pub fn cache_stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

impl Default for StrippedCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
