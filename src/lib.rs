// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! The stargz remote layer core: wires a `Resolver`, a `StargzReader` and a
//! `Prefetcher` into a single handle on one layer, for an embedder (a
//! FUSE filesystem, a snapshotter, a CLI -- all out of this crate's scope)
//! to mount.

use std::sync::Arc;
use std::time::Duration;

pub use stargz_api::{BlobConfig, DomainConfig, MirrorHost, RegistryConfig, StargzError};
pub use stargz_rafs::{Chunk, FileEntry, FileReader, Prefetcher, StargzReader, Toc};
pub use stargz_storage::{Blob, ChunkCache, Credential, EnvKeychain, Fetcher, Keychain, MemChunkCache, Resolver};
pub use stargz_utils::{logging, BlobSectionReader, ChunkId, Region};

/// A single mounted layer: its resolved blob, its TOC-indexed reader, and
/// the prefetcher warming its cache.
pub struct Layer {
    resolver: Arc<Resolver>,
    blob: Arc<Blob>,
    reader: StargzReader,
    prefetcher: Prefetcher,
}

impl Layer {
    /// Resolve `reference`/`digest`, parse its TOC out of `toc_json`, and
    /// bind the three pieces together. The caller supplies the TOC bytes
    /// since fetching them (typically the layer's own footer) is itself a
    /// `BlobSectionReader` read the embedder is better placed to drive.
    pub fn open(
        resolver: Arc<Resolver>,
        reference: &str,
        digest: &str,
        toc_json: &[u8],
        cache: Arc<dyn ChunkCache>,
        blob_config: BlobConfig,
    ) -> Result<Self, StargzError> {
        let blob = Arc::new(resolver.resolve(reference, digest, cache.clone(), blob_config)?);
        let toc = Toc::parse(toc_json)
            .map_err(|e| StargzError::PrefetchReadFailed { reason: e.to_string() })?;
        let reader = StargzReader::new(toc, blob.clone(), cache);
        Ok(Layer {
            resolver,
            blob,
            reader,
            prefetcher: Prefetcher::new(),
        })
    }

    pub fn open_file(&self, name: &str) -> Result<FileReader<'_>, StargzError> {
        self.reader.open_file(name)
    }

    /// Warm the cache for this layer's prefix, up to `prefetch_size` or the
    /// layer's own landmark, whichever governs (spec.md §4.7).
    pub fn prefetch(&self, cache: &dyn ChunkCache, prefetch_size: u64) -> Result<(), StargzError> {
        self.prefetcher.prefetch_with_reader(
            self.reader.toc(),
            self.blob.as_ref(),
            cache,
            self.blob.size.max(0) as u64,
            prefetch_size,
        )
    }

    pub fn wait_for_prefetch(&self, timeout: Duration) -> Result<(), StargzError> {
        self.prefetcher.wait_for_completion(timeout)
    }

    /// Re-resolve this layer's blob if it's due for a liveness check,
    /// refreshing the underlying fetcher on success (spec.md §4.5).
    pub fn check_and_refresh(&self) -> Result<(), StargzError> {
        if !self.blob.needs_check() {
            return Ok(());
        }
        if self.blob.fetcher().check().is_err() {
            self.blob.refresh(&self.resolver)?;
        } else {
            self.blob.touch_last_check();
        }
        Ok(())
    }
}
