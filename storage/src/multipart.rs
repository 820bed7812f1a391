// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! A small `multipart/byteranges` parser (RFC 7233 Appendix A).
//!
//! This is not a general MIME parser -- just enough to split a byteranges
//! response body into its `Content-Range`-bearing parts. General-purpose
//! multipart crates in the ecosystem (`multer`, etc.) assume an async
//! `futures::Stream` body, which a `reqwest::blocking` response doesn't
//! give us, so this is hand-rolled the way the fixed, small grammar here
//! warrants.

use std::collections::HashMap;

/// One part of a multipart/byteranges body: its headers and raw body bytes.
pub struct Part {
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Part {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }
}

/// Extract the `boundary` parameter from a `Content-Type` header value,
/// requiring the media type to be `multipart/...`.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let mime: mime::Mime = content_type.parse().ok()?;
    if mime.type_() != mime::MULTIPART {
        return None;
    }
    mime.get_param("boundary").map(|b| b.as_str().to_string())
}

/// Split `body` into its multipart parts using `boundary`.
pub fn parse_parts(body: &[u8], boundary: &str) -> Vec<Part> {
    let delimiter = format!("--{}", boundary);
    let delimiter_bytes = delimiter.as_bytes();

    let mut parts = Vec::new();
    let mut search_from = 0usize;

    // Find every delimiter occurrence; the bytes between consecutive
    // delimiters (after the first) form one part's raw section.
    let mut boundaries = Vec::new();
    while let Some(pos) = find_subslice(&body[search_from..], delimiter_bytes) {
        let abs_pos = search_from + pos;
        boundaries.push(abs_pos);
        search_from = abs_pos + delimiter_bytes.len();
        if search_from >= body.len() {
            break;
        }
    }

    for window in boundaries.windows(2) {
        let start = window[0] + delimiter_bytes.len();
        let end = window[1];
        if start >= end {
            continue;
        }
        let mut section = &body[start..end];
        // Closing delimiter is `--boundary--`; skip a segment that's just
        // that trailer with no headers/body of its own.
        if section.starts_with(b"--") {
            continue;
        }
        // Strip the CRLF that follows the delimiter line.
        section = strip_leading_crlf(section);
        if let Some(part) = parse_one_part(section) {
            parts.push(part);
        }
    }

    parts
}

fn strip_leading_crlf(data: &[u8]) -> &[u8] {
    if let Some(rest) = data.strip_prefix(b"\r\n") {
        rest
    } else if let Some(rest) = data.strip_prefix(b"\n") {
        rest
    } else {
        data
    }
}

fn parse_one_part(section: &[u8]) -> Option<Part> {
    let header_end = find_subslice(section, b"\r\n\r\n")
        .map(|p| (p, 4))
        .or_else(|| find_subslice(section, b"\n\n").map(|p| (p, 2)))?;
    let (header_bytes, body_start) = (&section[..header_end.0], header_end.0 + header_end.1);
    let mut body = section[body_start..].to_vec();
    // Trim the trailing CRLF that precedes the next boundary delimiter.
    if body.ends_with(b"\r\n") {
        body.truncate(body.len() - 2);
    } else if body.ends_with(b"\n") {
        body.truncate(body.len() - 1);
    }

    let header_str = String::from_utf8_lossy(header_bytes);
    let mut headers = HashMap::new();
    for line in header_str.split("\r\n").flat_map(|l| l.split('\n')) {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(
                name.trim().to_ascii_lowercase(),
                value.trim().to_string(),
            );
        }
    }

    Some(Part { headers, body })
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
