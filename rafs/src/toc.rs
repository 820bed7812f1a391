// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! The stargz table of contents: a typed view over the archive's JSON index.
//!
//! The JSON grammar itself is parsed by `serde_json` -- this module only
//! gives the entries a shape and implements the lookups spec.md §4.6/§4.7
//! actually need (`lookup`, per-offset chunk lookup, landmark scan).

use std::collections::HashMap;

use serde::Deserialize;

pub const PREFETCH_LANDMARK: &str = ".prefetch.landmark";
pub const NO_PREFETCH_LANDMARK: &str = ".no.prefetch.landmark";

#[derive(Debug, Clone, Deserialize)]
struct RawTocEntry {
    name: String,
    #[serde(rename = "type")]
    entry_type: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    offset: u64,
    #[serde(default)]
    digest: String,
    #[serde(rename = "chunkOffset", default)]
    chunk_offset: u64,
    #[serde(rename = "chunkSize", default)]
    chunk_size: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct RawToc {
    entries: Vec<RawTocEntry>,
}

/// One fixed-size chunk of a file: its position within the file and within
/// the underlying blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub offset_in_file: u64,
    pub size: u64,
    pub offset_in_blob: u64,
}

impl Chunk {
    pub fn contains(&self, offset_in_file: u64) -> bool {
        offset_in_file >= self.offset_in_file && offset_in_file < self.offset_in_file + self.size
    }
}

/// A regular file's TOC entry: its digest and the chunks tiling its bytes.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: String,
    pub digest: String,
    pub size: u64,
    pub chunks: Vec<Chunk>,
}

impl FileEntry {
    /// The chunk containing file-relative `offset`, if any (spec.md §4.6
    /// step (a): "query TOC for the chunk entry containing offset + nr").
    pub fn chunk_at(&self, offset: u64) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.contains(offset))
    }
}

/// The parsed table of contents for one stargz layer.
pub struct Toc {
    files: HashMap<String, FileEntry>,
    prefetch_landmark_offset: Option<u64>,
    has_no_prefetch_landmark: bool,
}

impl Toc {
    /// Parse a stargz TOC from its JSON representation.
    pub fn parse(json: &[u8]) -> Result<Toc, serde_json::Error> {
        let raw: RawToc = serde_json::from_slice(json)?;

        let mut files: HashMap<String, FileEntry> = HashMap::new();
        let mut prefetch_landmark_offset = None;
        let mut has_no_prefetch_landmark = false;

        for entry in raw.entries {
            match entry.name.as_str() {
                PREFETCH_LANDMARK => {
                    prefetch_landmark_offset = Some(entry.offset);
                    continue;
                }
                NO_PREFETCH_LANDMARK => {
                    has_no_prefetch_landmark = true;
                    continue;
                }
                _ => {}
            }

            match entry.entry_type.as_str() {
                "reg" => {
                    files.entry(entry.name.clone()).or_insert(FileEntry {
                        name: entry.name,
                        digest: entry.digest,
                        size: entry.size,
                        chunks: Vec::new(),
                    });
                }
                "chunk" => {
                    let file = files.entry(entry.name.clone()).or_insert_with(|| FileEntry {
                        name: entry.name.clone(),
                        digest: String::new(),
                        size: 0,
                        chunks: Vec::new(),
                    });
                    file.chunks.push(Chunk {
                        offset_in_file: entry.chunk_offset,
                        size: entry.chunk_size,
                        offset_in_blob: entry.offset,
                    });
                }
                _ => {}
            }
        }

        for file in files.values_mut() {
            file.chunks.sort_by_key(|c| c.offset_in_file);
        }

        Ok(Toc {
            files,
            prefetch_landmark_offset,
            has_no_prefetch_landmark,
        })
    }

    pub fn lookup(&self, path: &str) -> Option<&FileEntry> {
        self.files.get(path)
    }

    pub fn has_no_prefetch_landmark(&self) -> bool {
        self.has_no_prefetch_landmark
    }

    pub fn prefetch_landmark_offset(&self) -> Option<u64> {
        self.prefetch_landmark_offset
    }

    /// Every regular file entry, for the prefetcher's tar-stream walk.
    pub fn files(&self) -> impl Iterator<Item = &FileEntry> {
        self.files.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "version": 1,
            "entries": [
                {"name": "a.txt", "type": "reg", "size": 20, "digest": "sha256:fa"},
                {"name": "a.txt", "type": "chunk", "chunkOffset": 0, "chunkSize": 10, "offset": 100},
                {"name": "a.txt", "type": "chunk", "chunkOffset": 10, "chunkSize": 10, "offset": 110},
                {"name": ".prefetch.landmark", "type": "reg", "offset": 200},
                {"name": "b.txt", "type": "reg", "size": 5, "digest": "sha256:fb"}
            ]
        }"#
    }

    #[test]
    fn lookup_finds_file_with_chunks() {
        let toc = Toc::parse(sample_json().as_bytes()).unwrap();
        let entry = toc.lookup("a.txt").unwrap();
        assert_eq!(entry.digest, "sha256:fa");
        assert_eq!(entry.chunks.len(), 2);
    }

    #[test]
    fn lookup_missing_file_is_none() {
        let toc = Toc::parse(sample_json().as_bytes()).unwrap();
        assert!(toc.lookup("missing.txt").is_none());
    }

    #[test]
    fn chunk_at_finds_containing_chunk() {
        let toc = Toc::parse(sample_json().as_bytes()).unwrap();
        let entry = toc.lookup("a.txt").unwrap();
        let chunk = entry.chunk_at(15).unwrap();
        assert_eq!(chunk.offset_in_file, 10);
        assert_eq!(chunk.offset_in_blob, 110);
    }

    #[test]
    fn chunk_at_beyond_file_is_none() {
        let toc = Toc::parse(sample_json().as_bytes()).unwrap();
        let entry = toc.lookup("a.txt").unwrap();
        assert!(entry.chunk_at(99).is_none());
    }

    #[test]
    fn landmark_offset_is_extracted_and_excluded_from_files() {
        let toc = Toc::parse(sample_json().as_bytes()).unwrap();
        assert_eq!(toc.prefetch_landmark_offset(), Some(200));
        assert!(!toc.has_no_prefetch_landmark());
        assert!(toc.lookup(".prefetch.landmark").is_none());
    }
}
