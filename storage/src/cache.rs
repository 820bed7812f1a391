// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! A content-addressed chunk cache layer over remote storage.
//!
//! This is intentionally the thinnest possible contract: `fetch`/`add` by
//! `ChunkId`, safe under concurrent callers, with eviction and persistence
//! delegated to the implementation. It plays the same role for the stargz
//! reader and prefetcher that `nydus-storage`'s `BlobCache` trait plays for
//! rafs, but without the compression/decompression/merging machinery that
//! trait carries -- spec.md §4.2 deliberately externalizes all of that.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use stargz_utils::ChunkId;

/// A content-addressed store mapping a chunk ID to its bytes.
///
/// Implementations must be safe under concurrent callers and must never let
/// a caller observe a mutated version of a buffer it was handed: returned
/// buffers are logically immutable once inserted under a given `ChunkId`.
pub trait ChunkCache: Send + Sync {
    /// Look up `id`. Returns `None` on a miss.
    fn fetch(&self, id: &ChunkId) -> Option<Arc<[u8]>>;

    /// Insert `data` under `id`. Idempotent: replacing an existing entry
    /// with the same ID is permitted and is not an error.
    fn add(&self, id: ChunkId, data: Arc<[u8]>);
}

/// An in-memory `ChunkCache` backed by a mutex-guarded hash map.
///
/// No eviction policy: spec.md delegates eviction, persistence and size
/// limits to the implementation, and "keep everything forever" is a
/// complete (if memory-hungry) implementation of that contract.
#[derive(Default)]
pub struct MemChunkCache {
    entries: Mutex<HashMap<ChunkId, Arc<[u8]>>>,
}

impl MemChunkCache {
    pub fn new() -> Self {
        MemChunkCache {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of entries currently cached; test/diagnostic helper.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChunkCache for MemChunkCache {
    fn fetch(&self, id: &ChunkId) -> Option<Arc<[u8]>> {
        self.entries.lock().unwrap().get(id).cloned()
    }

    fn add(&self, id: ChunkId, data: Arc<[u8]>) {
        self.entries.lock().unwrap().insert(id, data);
    }
}

/// Look up `id` in `cache`, requiring the cached buffer to be exactly
/// `expected_size` bytes (spec.md §3 invariant 1: a length mismatch is
/// treated as absent, not as corruption to be surfaced).
pub fn fetch_if_size_matches(
    cache: &dyn ChunkCache,
    id: &ChunkId,
    expected_size: usize,
) -> Option<Arc<[u8]>> {
    match cache.fetch(id) {
        Some(buf) if buf.len() == expected_size => Some(buf),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_hit() {
        let cache = MemChunkCache::new();
        let id = ChunkId::for_file_chunk("sha256:abc", 0, 4);
        assert!(cache.fetch(&id).is_none());
        cache.add(id.clone(), Arc::from(vec![1u8, 2, 3, 4]));
        assert_eq!(cache.fetch(&id).unwrap().as_ref(), &[1, 2, 3, 4]);
    }

    #[test]
    fn add_is_idempotent_for_same_id() {
        let cache = MemChunkCache::new();
        let id = ChunkId::for_file_chunk("sha256:abc", 0, 4);
        cache.add(id.clone(), Arc::from(vec![1u8, 2, 3, 4]));
        cache.add(id.clone(), Arc::from(vec![1u8, 2, 3, 4]));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn size_mismatch_is_treated_as_absent() {
        let cache = MemChunkCache::new();
        let id = ChunkId::for_file_chunk("sha256:abc", 0, 4);
        cache.add(id.clone(), Arc::from(vec![1u8, 2, 3]));
        assert!(fetch_if_size_matches(&cache, &id, 4).is_none());
        assert!(fetch_if_size_matches(&cache, &id, 3).is_some());
    }
}
