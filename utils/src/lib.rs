// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Shared low-level helpers for the stargz remote layer core: error macros,
//! chunk/range digests (C1's sibling, chunk identity) and the region algebra
//! (C1), plus process-wide logging setup.

#[macro_use]
pub mod error;

pub mod digest;
pub mod logging;
pub mod region;
pub mod section;

pub use digest::ChunkId;
pub use region::Region;
pub use section::BlobSectionReader;
