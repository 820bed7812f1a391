// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Mirror-failover resolution of a registry reference into a live `Blob`
//! (spec.md §4.5).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;
use stargz_api::{BlobConfig, RegistryConfig, StargzError};

use crate::blob::Blob;
use crate::cache::ChunkCache;
use crate::fetcher::{self, Fetcher};
use crate::keychain::{Keychain, Transport};

/// Default bound on credential negotiation (spec.md §4.3, §7: 10s).
const DEFAULT_AUTHN_TIMEOUT: Duration = Duration::from_secs(10);

/// Split `reference` (`"domain/path/to/repo"`) into its domain and path.
///
/// Reuses the `url` crate's authority/path grammar against a synthetic
/// scheme rather than hand-splitting on the first `/`, since host parsing
/// (IPv6 literals, ports) is exactly what `url` already gets right.
fn split_reference(reference: &str) -> Result<(String, String), StargzError> {
    let synthetic = format!("stargz://{}", reference);
    let parsed = url::Url::parse(&synthetic).map_err(|e| StargzError::ResolveFailed {
        context: format!("invalid reference {:?}: {}", reference, e),
    })?;
    let host = parsed
        .host_str()
        .ok_or_else(|| StargzError::ResolveFailed {
            context: format!("reference {:?} has no host component", reference),
        })?;
    // `Url::host_str` drops an explicit port; registry domains like
    // "localhost:5000" are keyed with it, so put it back.
    let domain = match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let path = parsed.path().trim_start_matches('/').to_string();
    if path.is_empty() {
        return Err(StargzError::ResolveFailed {
            context: format!("reference {:?} has no repository path", reference),
        });
    }
    Ok((domain, path))
}

/// Resolves registry references into `Blob`s, with mirror failover and a
/// pool of negotiated transports shared across resolutions.
pub struct Resolver {
    registry_config: RegistryConfig,
    keychain: Arc<dyn Keychain>,
    client: reqwest::blocking::Client,
    /// Keyed by `"{host}/{path}"`; see spec.md §9 "Shared mutable resolver
    /// pool" on why the lock must span lookup→create→store as one section.
    tr_pool: Mutex<HashMap<String, Transport>>,
    authn_timeout: Duration,
}

impl Resolver {
    pub fn new(registry_config: RegistryConfig, keychain: Arc<dyn Keychain>) -> Self {
        Resolver {
            registry_config,
            keychain,
            client: reqwest::blocking::Client::new(),
            tr_pool: Mutex::new(HashMap::new()),
            authn_timeout: DEFAULT_AUTHN_TIMEOUT,
        }
    }

    pub fn with_authn_timeout(mut self, timeout: Duration) -> Self {
        self.authn_timeout = timeout;
        self
    }

    /// Resolve `reference`/`digest` into a live `Blob`, trying each
    /// candidate host in order and keeping the first that succeeds in full.
    pub fn resolve(
        &self,
        reference: &str,
        digest: &str,
        cache: Arc<dyn ChunkCache>,
        blob_config: BlobConfig,
    ) -> Result<Blob, StargzError> {
        let (domain, path) = split_reference(reference)?;
        let hosts = self.registry_config.candidate_hosts(&domain);

        let mut errors = Vec::new();
        for host in &hosts {
            if host.host.is_empty() || host.host.contains('/') {
                errors.push(format!("skipping malformed host {:?}", host.host));
                continue;
            }
            match self.try_host(host.host.as_str(), host.insecure, &path, digest, reference) {
                Ok(fetcher) => {
                    let chunk_size = blob_config.effective_chunk_size();
                    let check_interval =
                        Duration::from_secs(blob_config.effective_check_interval_secs());
                    let size = fetcher.size;
                    debug!("resolved {} via {}", reference, fetcher.url);
                    return Ok(Blob::new(
                        reference.to_string(),
                        digest.to_string(),
                        blob_config,
                        size,
                        chunk_size,
                        check_interval,
                        fetcher,
                        cache,
                    ));
                }
                Err(e) => errors.push(format!("{}: {}", host.host, e)),
            }
        }

        Err(StargzError::ResolveFailed {
            context: errors.join("; "),
        })
    }

    /// Resolve against a single candidate host: obtain (or negotiate) a
    /// transport, follow the redirect, and probe the size.
    fn try_host(
        &self,
        host: &str,
        insecure: bool,
        path: &str,
        digest: &str,
        reference: &str,
    ) -> Result<Fetcher, StargzError> {
        let scheme = if insecure { "http" } else { "https" };
        let blob_url = format!("{}://{}/v2/{}/blobs/{}", scheme, host, path, digest);
        let pool_key = format!("{}/{}", host, path);

        let mut pool = self.tr_pool.lock().unwrap();
        let mut transport = pool
            .get(&pool_key)
            .cloned()
            .unwrap_or_else(|| Transport::anonymous(self.client.clone()));

        let final_url = match fetcher::redirect(&transport, &blob_url) {
            Ok(url) => url,
            Err(_) => {
                transport = Transport::authenticate(
                    self.client.clone(),
                    reference,
                    &blob_url,
                    self.keychain.as_ref(),
                    self.authn_timeout,
                )?;
                fetcher::redirect(&transport, &blob_url)?
            }
        };

        let size = fetcher::get_size(&transport, &final_url)?;
        pool.insert(pool_key, transport.clone());
        drop(pool);

        Ok(Fetcher::new(final_url, size, transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_reference_extracts_domain_and_path() {
        let (domain, path) = split_reference("registry-1.docker.io/library/busybox").unwrap();
        assert_eq!(domain, "registry-1.docker.io");
        assert_eq!(path, "library/busybox");
    }

    #[test]
    fn split_reference_rejects_missing_path() {
        assert!(split_reference("registry-1.docker.io").is_err());
    }

    #[test]
    fn split_reference_rejects_garbage() {
        assert!(split_reference("").is_err());
    }

    #[test]
    fn split_reference_preserves_an_explicit_port() {
        let (domain, path) = split_reference("localhost:5000/library/busybox").unwrap();
        assert_eq!(domain, "localhost:5000");
        assert_eq!(path, "library/busybox");
    }
}
