//! Soft per-process caches
//!
//! Three concurrent maps keyed by job id hold recently served results,
//! document-pair lists and per-page difference details. The page-details
//! cache is bounded; overflow evicts an arbitrary resident entry. Any
//! mutation for a job id invalidates everything derived from it.

use crate::types::{ComparisonResult, Difference, DocumentPair};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

const PAGE_DETAILS_CAPACITY: usize = 100;

/// Per-process comparison caches
pub struct ComparisonCaches {
    result_cache: DashMap<Uuid, Arc<ComparisonResult>>,
    document_pairs_cache: DashMap<Uuid, Arc<Vec<DocumentPair>>>,
    page_details_cache: DashMap<(Uuid, String), Arc<Vec<Difference>>>,
    page_details_capacity: usize,
}

impl Default for ComparisonCaches {
    fn default() -> Self {
        Self::with_capacity(PAGE_DETAILS_CAPACITY)
    }
}

impl ComparisonCaches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(page_details_capacity: usize) -> Self {
        Self {
            result_cache: DashMap::new(),
            document_pairs_cache: DashMap::new(),
            page_details_cache: DashMap::new(),
            page_details_capacity: page_details_capacity.max(1),
        }
    }

    pub fn get_result(&self, id: Uuid) -> Option<Arc<ComparisonResult>> {
        self.result_cache.get(&id).map(|r| Arc::clone(&r))
    }

    /// Cache a result, dropping anything previously derived from this id
    pub fn put_result(&self, id: Uuid, result: Arc<ComparisonResult>) {
        self.invalidate(id);
        self.result_cache.insert(id, result);
    }

    pub fn get_document_pairs(&self, id: Uuid) -> Option<Arc<Vec<DocumentPair>>> {
        self.document_pairs_cache.get(&id).map(|p| Arc::clone(&p))
    }

    pub fn put_document_pairs(&self, id: Uuid, pairs: Arc<Vec<DocumentPair>>) {
        self.document_pairs_cache.insert(id, pairs);
    }

    pub fn get_page_details(&self, id: Uuid, page_key: &str) -> Option<Arc<Vec<Difference>>> {
        self.page_details_cache
            .get(&(id, page_key.to_string()))
            .map(|d| Arc::clone(&d))
    }

    pub fn put_page_details(&self, id: Uuid, page_key: &str, details: Arc<Vec<Difference>>) {
        while self.page_details_cache.len() >= self.page_details_capacity {
            // concurrent-map iteration order is arbitrary, which is all the
            // eviction policy asks for
            let victim = self
                .page_details_cache
                .iter()
                .next()
                .map(|entry| entry.key().clone());
            match victim {
                Some(key) => {
                    self.page_details_cache.remove(&key);
                }
                None => break,
            }
        }
        self.page_details_cache
            .insert((id, page_key.to_string()), details);
    }

    /// Drop every cached entry belonging to a job id
    pub fn invalidate(&self, id: Uuid) {
        self.result_cache.remove(&id);
        self.document_pairs_cache.remove(&id);
        self.page_details_cache.retain(|(job, _), _| *job != id);
    }

    pub fn clear(&self) {
        self.result_cache.clear();
        self.document_pairs_cache.clear();
        self.page_details_cache.clear();
    }
}
