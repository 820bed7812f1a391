// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! The byte-range fetcher (spec.md §4.4): endpoint discovery, size probing,
//! ranged reads and liveness checks against a single resolved blob URL.

use std::collections::HashMap;
use std::time::Duration;

use arc_swap::ArcSwap;
use log::{debug, trace, warn};
use reqwest::header::{ACCEPT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, LOCATION, RANGE};
use reqwest::StatusCode;
use stargz_api::StargzError;
use stargz_utils::Region;

use crate::keychain::Transport;
use crate::multipart;

/// Metadata timeout for redirect/size-probe/check calls (spec.md §4.4, §5).
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
/// Default overall timeout for a bulk `fetch` call, overridable by the caller.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

fn drain_and_ignore(resp: reqwest::blocking::Response) {
    // Every response body is drained on every exit path so the connection
    // can be reused (spec.md §5 "Resource discipline").
    let _ = resp.bytes();
}

fn authed_request(
    transport: &Transport,
    method: reqwest::Method,
    url: &str,
) -> reqwest::blocking::RequestBuilder {
    let mut req = transport.client.request(method, url);
    if let Some(token) = &transport.token {
        req = req.bearer_auth(token);
    }
    req
}

/// Discover the endpoint URL for `<scheme>://<registry>/v2/<repo>/blobs/<digest>`.
///
/// Follows at most one redirect hop (spec.md §4.4, §9 open question).
pub fn redirect(transport: &Transport, url: &str) -> Result<String, StargzError> {
    let resp = authed_request(transport, reqwest::Method::GET, url)
        .header(RANGE, "bytes=0-1")
        .timeout(METADATA_TIMEOUT)
        .send()
        .map_err(|e| StargzError::RedirectFailed {
            url: url.to_string(),
            status: e.status().map(|s| s.as_u16()).unwrap_or(0),
        })?;

    let status = resp.status();
    if status.is_success() {
        drain_and_ignore(resp);
        return Ok(url.to_string());
    }
    if status.is_redirection() {
        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        drain_and_ignore(resp);
        return location.ok_or(StargzError::RedirectFailed {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let status_code = status.as_u16();
    drain_and_ignore(resp);
    Err(StargzError::RedirectFailed {
        url: url.to_string(),
        status: status_code,
    })
}

/// `HEAD` the endpoint URL and return its `Content-Length`.
pub fn get_size(transport: &Transport, url: &str) -> Result<i64, StargzError> {
    let resp = authed_request(transport, reqwest::Method::HEAD, url)
        .timeout(METADATA_TIMEOUT)
        .send()
        .map_err(|e| StargzError::SizeProbeFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    if resp.status() != StatusCode::OK {
        let status = resp.status().as_u16();
        drain_and_ignore(resp);
        return Err(StargzError::SizeProbeFailed {
            url: url.to_string(),
            reason: format!("unexpected status {}", status),
        });
    }

    let size = resp
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<i64>().ok());
    drain_and_ignore(resp);

    size.ok_or_else(|| StargzError::SizeProbeFailed {
        url: url.to_string(),
        reason: "missing or unparseable Content-Length".to_string(),
    })
}

/// `GET bytes=0-1` liveness probe. Spec.md explicitly keeps `GET` here
/// rather than `HEAD` (§9: "GCR requires it").
pub fn check(transport: &Transport, url: &str) -> Result<(), StargzError> {
    let resp = authed_request(transport, reqwest::Method::GET, url)
        .header(RANGE, "bytes=0-1")
        .timeout(METADATA_TIMEOUT)
        .send()
        .map_err(|_| StargzError::CheckFailed {
            url: url.to_string(),
            status: 0,
        })?;

    let status = resp.status();
    drain_and_ignore(resp);
    if status == StatusCode::OK || status == StatusCode::PARTIAL_CONTENT {
        Ok(())
    } else {
        Err(StargzError::CheckFailed {
            url: url.to_string(),
            status: status.as_u16(),
        })
    }
}

/// A fetcher bound to a resolved blob URL and transport.
pub struct Fetcher {
    pub url: String,
    pub size: i64,
    transport: ArcSwap<Transport>,
}

impl Fetcher {
    pub fn new(url: String, size: i64, transport: Transport) -> Self {
        Fetcher {
            url,
            size,
            transport: ArcSwap::from_pointee(transport),
        }
    }

    /// Atomically replace the transport used for future requests (called by
    /// `Resolver::refresh`). The fetcher's URL and size are unaffected.
    pub fn swap_transport(&self, transport: Transport) {
        self.transport.store(std::sync::Arc::new(transport));
    }

    pub fn check(&self) -> Result<(), StargzError> {
        let transport = self.transport.load();
        check(&transport, &self.url)
    }

    /// Fetch a non-empty set of disjoint byte ranges in a single HTTP
    /// request, per spec.md §4.4.
    pub fn fetch(
        &self,
        regions: &[Region],
        timeout: Option<Duration>,
    ) -> Result<HashMap<Region, Vec<u8>>, StargzError> {
        assert!(!regions.is_empty(), "fetch requires a non-empty region set");
        let transport = self.transport.load();

        // Prepend a dummy `0-0` range so the server is obliged to respond
        // multipart/byteranges even for a single requested range (spec.md §9).
        let mut range_header = String::from("bytes=0-0");
        for region in regions {
            range_header.push(',');
            range_header.push_str(&format!("{}-{}", region.begin(), region.end()));
        }

        let resp = authed_request(&transport, reqwest::Method::GET, &self.url)
            .header(RANGE, range_header)
            .header(ACCEPT_ENCODING, "identity")
            .timeout(timeout.unwrap_or(DEFAULT_FETCH_TIMEOUT))
            .send()
            .map_err(|_| StargzError::FetchFailed {
                url: self.url.clone(),
                status: 0,
            })?;

        let status = resp.status();
        match status {
            StatusCode::OK => {
                let content_length = resp
                    .headers()
                    .get(CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok());
                let body = resp.bytes().map_err(|_| StargzError::FetchFailed {
                    url: self.url.clone(),
                    status: 0,
                })?;
                if let Some(expected) = content_length {
                    if body.len() as u64 != expected {
                        return Err(StargzError::SizeMismatch {
                            url: self.url.clone(),
                            expected,
                            actual: body.len() as u64,
                        });
                    }
                }
                let size = body.len() as u64;
                let mut map = HashMap::new();
                if size > 0 {
                    map.insert(Region::new(0, size - 1), body.to_vec());
                }
                Ok(map)
            }
            StatusCode::PARTIAL_CONTENT => {
                let content_type = resp
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.to_string());
                let body = resp.bytes().map_err(|_| StargzError::FetchFailed {
                    url: self.url.clone(),
                    status: 206,
                })?;

                let boundary = content_type
                    .as_deref()
                    .and_then(multipart::boundary_from_content_type)
                    .ok_or_else(|| StargzError::FetchFailed {
                        url: self.url.clone(),
                        status: 206,
                    })?;

                let parts = multipart::parse_parts(&body, &boundary);
                let mut map = HashMap::new();
                // First part is the dummy `0-0` range; discard it.
                for part in parts.into_iter().skip(1) {
                    let content_range = part.header("content-range").ok_or_else(|| {
                        StargzError::MalformedRange {
                            header: String::new(),
                        }
                    })?;
                    let region = Region::parse_content_range(content_range).ok_or_else(|| {
                        StargzError::MalformedRange {
                            header: content_range.to_string(),
                        }
                    })?;
                    if part.body.len() as u64 != region.size() {
                        return Err(StargzError::SizeMismatch {
                            url: self.url.clone(),
                            expected: region.size(),
                            actual: part.body.len() as u64,
                        });
                    }
                    map.insert(region, part.body);
                }
                trace!("fetched {} region(s) from {}", map.len(), self.url);
                Ok(map)
            }
            other => {
                drain_and_ignore(resp);
                Err(StargzError::FetchFailed {
                    url: self.url.clone(),
                    status: other.as_u16(),
                })
            }
        }
    }
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("url", &self.url)
            .field("size", &self.size)
            .finish()
    }
}

pub(crate) fn log_refresh(old_url: &str, new_url: &str) {
    if old_url != new_url {
        warn!("fetcher URL changed on refresh: {} -> {}", old_url, new_url);
    } else {
        debug!("fetcher refreshed for {}", old_url);
    }
}
