// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Abstract configuration and the shared error taxonomy for the stargz
//! remote layer core. No registry protocol or I/O lives here -- see
//! `stargz-storage` and `stargz-rafs`.

pub mod config;
pub mod error;

pub use config::{BlobConfig, DomainConfig, MirrorHost, RegistryConfig};
pub use error::StargzError;
