// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Logging setup shared by every crate in this workspace.
//!
//! Mirrors `nydus-utils`'s use of `flexi_logger`: a single process-wide
//! logger configured from the `RUST_LOG`-style env spec (or a default level
//! for embedders that don't care), writing to stderr. Library crates never
//! call this themselves -- only an embedder (or a test) opts in.

use flexi_logger::{Logger, LoggerHandle};
use log::LevelFilter;

/// Initialize the process-wide logger at `level`, honoring `RUST_LOG` if set.
///
/// Returns a handle that must be kept alive for the duration of the process;
/// dropping it silently stops log output.
pub fn init(level: LevelFilter) -> Result<LoggerHandle, flexi_logger::FlexiLoggerError> {
    Logger::try_with_env_or_str(level.to_string())?.start()
}
