// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Greedy cache warm-up of a layer's prefix (spec.md §4.7).
//!
//! Prefetch state (not-started / in-progress / completed) is modeled with
//! `rust-fsm`, the teacher's own small-state-machine dependency. Completion
//! is signalled through a `Condvar` guarding that state, the same rendezvous
//! pattern `ripunzip`'s `SeekableHttpReaderEngine` uses for its single
//! in-flight read / many waiters / timeout-forces-release case.

use std::io::{self, Read};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use flate2::read::GzDecoder;
use log::{debug, warn};
use rust_fsm::*;
use stargz_api::StargzError;
use stargz_storage::ChunkCache;
use stargz_storage::cache::fetch_if_size_matches;
use stargz_utils::{BlobSectionReader, ChunkId};
use tar::Archive;

use crate::toc::{Toc, NO_PREFETCH_LANDMARK, PREFETCH_LANDMARK};

state_machine! {
    derive(Debug)
    pub prefetch_fsm(NotStarted)

    NotStarted(Begin) => InProgress,
    InProgress(Finish) => Completed,
}

/// Drives one layer's prefetch and lets readers wait for it to finish.
///
/// A `Prefetcher` is bound to a single reader (spec.md §3 invariant 4: "a
/// prefetch is either not started, in progress, or completed; it cannot
/// restart on the same reader").
pub struct Prefetcher {
    state: Mutex<StateMachine<prefetch_fsm>>,
    completed: Condvar,
}

impl Default for Prefetcher {
    fn default() -> Self {
        Prefetcher {
            state: Mutex::new(StateMachine::new()),
            completed: Condvar::new(),
        }
    }
}

impl Prefetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the prefetch to completion. Marks in-progress on entry and
    /// completed (with a broadcast) on every exit path, successful or not
    /// (spec.md §4.7 step 1).
    pub fn prefetch_with_reader(
        &self,
        toc: &Toc,
        section: &dyn BlobSectionReader,
        cache: &dyn ChunkCache,
        layer_size: u64,
        prefetch_size: u64,
    ) -> Result<(), StargzError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.consume(&PrefetchFsmInput::Begin).is_err() {
                debug!("prefetch already started for this reader; ignoring");
                return Ok(());
            }
        }

        let result = self.run(toc, section, cache, layer_size, prefetch_size);

        {
            let mut state = self.state.lock().unwrap();
            let _ = state.consume(&PrefetchFsmInput::Finish);
        }
        self.completed.notify_all();
        result
    }

    fn run(
        &self,
        toc: &Toc,
        section: &dyn BlobSectionReader,
        cache: &dyn ChunkCache,
        layer_size: u64,
        prefetch_size: u64,
    ) -> Result<(), StargzError> {
        if toc.has_no_prefetch_landmark() {
            return Ok(());
        }

        let mut size = prefetch_size;
        if let Some(offset) = toc.prefetch_landmark_offset() {
            if offset > layer_size {
                return Err(StargzError::BadLandmark {
                    offset,
                    layer_size,
                });
            }
            size = offset;
        }
        size = size.min(layer_size);

        let mut buf = vec![0u8; size as usize];
        let n = read_section_tolerating_eof(section, &mut buf, 0)
            .map_err(|e| StargzError::PrefetchReadFailed {
                reason: e.to_string(),
            })?;
        buf.truncate(n);

        cache_tar_gz(&buf, toc, cache)
    }

    /// Block until the prefetch completes, or force-release all waiters
    /// after `timeout` (spec.md §4.7 `WaitForPrefetchCompletion`).
    pub fn wait_for_completion(&self, timeout: Duration) -> Result<(), StargzError> {
        let state = self.state.lock().unwrap();
        if matches!(*state.state(), PrefetchFsmState::NotStarted | PrefetchFsmState::Completed) {
            return Ok(());
        }

        let (mut state, wait_result) = self
            .completed
            .wait_timeout_while(state, timeout, |s| {
                matches!(*s.state(), PrefetchFsmState::InProgress)
            })
            .unwrap();

        if wait_result.timed_out() {
            warn!("prefetch wait timed out after {:?}; force-releasing waiters", timeout);
            // `InProgress -> Completed` is a declared edge; drive the forced
            // release through it rather than forging a state directly.
            let _ = state.consume(&PrefetchFsmInput::Finish);
            drop(state);
            self.completed.notify_all();
            return Err(StargzError::PrefetchTimeout {
                timeout_secs: timeout.as_secs(),
            });
        }
        Ok(())
    }
}

fn read_section_tolerating_eof(
    section: &dyn BlobSectionReader,
    buf: &mut [u8],
    offset: u64,
) -> io::Result<usize> {
    let mut total = 0usize;
    while total < buf.len() {
        let n = section.read_section(&mut buf[total..], offset + total as u64)?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

fn is_eof_like(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::UnexpectedEof)
}

/// Gunzip and untar `buf`, filling the cache with each tiled chunk of every
/// file the TOC knows about (spec.md §4.7 step 6). `EOF`/`UnexpectedEof`
/// partway through are expected truncation terminators, not errors (step 7).
fn cache_tar_gz(buf: &[u8], toc: &Toc, cache: &dyn ChunkCache) -> Result<(), StargzError> {
    let gunzip = GzDecoder::new(buf);
    let mut archive = Archive::new(gunzip);

    let entries = match archive.entries() {
        Ok(entries) => entries,
        Err(e) if is_eof_like(&e) => return Ok(()),
        Err(e) => {
            return Err(StargzError::PrefetchReadFailed {
                reason: e.to_string(),
            })
        }
    };

    for entry_result in entries {
        let mut entry = match entry_result {
            Ok(entry) => entry,
            Err(e) if is_eof_like(&e) => break,
            Err(e) => {
                return Err(StargzError::PrefetchReadFailed {
                    reason: e.to_string(),
                })
            }
        };

        let path = match entry.path() {
            Ok(p) => p.to_string_lossy().into_owned(),
            Err(_) => continue,
        };
        if path == PREFETCH_LANDMARK || path == NO_PREFETCH_LANDMARK {
            continue;
        }
        let file = match toc.lookup(&path) {
            Some(file) => file,
            None => continue,
        };

        for chunk in &file.chunks {
            let chunk_id = ChunkId::for_file_chunk(&file.digest, chunk.offset_in_blob, chunk.size);
            let mut data = vec![0u8; chunk.size as usize];
            let read = match read_exact_tolerating_eof(&mut entry, &mut data) {
                Ok(n) => n,
                Err(e) => {
                    return Err(StargzError::PrefetchReadFailed {
                        reason: e.to_string(),
                    })
                }
            };
            data.truncate(read);

            if fetch_if_size_matches(cache, &chunk_id, chunk.size as usize).is_some() {
                continue;
            }
            cache.add(chunk_id, std::sync::Arc::from(data));

            if read < chunk.size as usize {
                return Ok(());
            }
        }
    }

    Ok(())
}

fn read_exact_tolerating_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0usize;
    while total < buf.len() {
        match r.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if is_eof_like(&e) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}
