// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! The stargz table of contents, lazy file reader and prefetcher (C6, C7).
//!
//! The reader and prefetcher reach their bytes only through
//! `stargz_utils::BlobSectionReader`, never through `stargz_storage::Blob`
//! or `Fetcher` directly, so both are exercisable in tests against any
//! section reader, not just a live registry-backed blob. They do use
//! `stargz_storage::ChunkCache`, the cache contract C2 defines.

pub mod prefetch;
pub mod reader;
pub mod toc;

pub use prefetch::Prefetcher;
pub use reader::{FileReader, StargzReader};
pub use toc::{Chunk, FileEntry, Toc};
