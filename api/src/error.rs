// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! The error taxonomy of spec.md §7, as a `thiserror` enum.
//!
//! Each variant carries the context spec.md mandates for it: a URL and
//! status code for most fetch-path errors, the accumulated per-host
//! messages for `ResolveFailed`. Lower layers mostly work in terms of
//! `std::io::Error` (see `stargz_utils::error`'s macros) and convert at the
//! public API boundary.

use thiserror::Error;

/// The error taxonomy from spec.md §7.
#[derive(Debug, Error)]
pub enum StargzError {
    #[error("resolve failed, no mirror produced a valid fetcher: {context}")]
    ResolveFailed { context: String },

    #[error("redirect failed for {url}: unexpected status {status}")]
    RedirectFailed { url: String, status: u16 },

    #[error("size probe failed for {url}: {reason}")]
    SizeProbeFailed { url: String, reason: String },

    #[error("authentication timed out for {reference} after {timeout_secs}s")]
    AuthnTimeout {
        reference: String,
        timeout_secs: u64,
    },

    #[error("fetch failed for {url}: unexpected status {status}")]
    FetchFailed { url: String, status: u16 },

    #[error("malformed Content-Range header: {header:?}")]
    MalformedRange { header: String },

    #[error("size mismatch for {url}: expected {expected}, got {actual}")]
    SizeMismatch {
        url: String,
        expected: u64,
        actual: u64,
    },

    #[error("blob size changed on refresh for {url}: was {old_size}, now {new_size}")]
    SizeChanged {
        url: String,
        old_size: i64,
        new_size: i64,
    },

    #[error("liveness check failed for {url}: unexpected status {status}")]
    CheckFailed { url: String, status: u16 },

    #[error("prefetch read failed: {reason}")]
    PrefetchReadFailed { reason: String },

    #[error("prefetch wait timed out after {timeout_secs}s")]
    PrefetchTimeout { timeout_secs: u64 },

    #[error("no such entry: {path}")]
    NoSuchEntry { path: String },

    #[error("bad landmark: prefetch offset {offset} exceeds layer size {layer_size}")]
    BadLandmark { offset: u64, layer_size: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
