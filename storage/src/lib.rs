// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Remote resolver, byte-range fetcher and chunk cache for stargz layers.
//!
//! This crate implements C2-C5 of the stargz remote-layer design: a
//! content-addressed `ChunkCache`, a `Keychain`/`Transport` factory for
//! registry authentication, a `Fetcher` that turns byte ranges into HTTP
//! range requests, and a `Resolver` that ties mirrors, transports and
//! fetchers together into a `Blob`.

pub mod blob;
pub mod cache;
pub mod fetcher;
pub mod keychain;
pub mod multipart;
pub mod resolver;

pub use blob::Blob;
pub use cache::{ChunkCache, MemChunkCache};
pub use fetcher::Fetcher;
pub use keychain::{Credential, EnvKeychain, Keychain, Transport};
pub use resolver::Resolver;
