// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Abstract configuration: registry mirrors and per-blob runtime settings.
//!
//! This models spec.md §6's "Configuration (abstract)" mapping. No TOML (or
//! any other format) loader lives here -- that's the explicitly out-of-scope
//! CLI/config-loader layer; callers build these structs directly, or
//! deserialize them from whatever source they already have via `serde`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Default chunk size used when a blob config leaves `chunk_size` at 0.
pub const DEFAULT_CHUNK_SIZE: u64 = 50_000;

/// Default liveness re-check interval, in seconds, when `valid_interval_secs`
/// is left at 0.
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;

/// One mirror host entry for a registry domain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorHost {
    pub host: String,
    #[serde(default)]
    pub insecure: bool,
}

/// Per-domain mirror configuration: `config[domain].mirrors`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DomainConfig {
    #[serde(default)]
    pub mirrors: Vec<MirrorHost>,
}

/// The full registry configuration: a mapping keyed by registry domain.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub domains: HashMap<String, DomainConfig>,
}

impl RegistryConfig {
    /// Candidate host list for `domain`: its configured mirrors, followed by
    /// the domain itself as an implicit fallback (spec.md §3 "Mirror list").
    pub fn candidate_hosts(&self, domain: &str) -> Vec<MirrorHost> {
        let mut hosts: Vec<MirrorHost> = self
            .domains
            .get(domain)
            .map(|d| d.mirrors.clone())
            .unwrap_or_default();
        hosts.push(MirrorHost {
            host: domain.to_string(),
            insecure: false,
        });
        hosts
    }
}

/// Per-blob runtime settings (spec.md §6).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BlobConfig {
    /// 0 means "use `DEFAULT_CHUNK_SIZE`".
    #[serde(default)]
    pub chunk_size: u64,
    /// 0 means "use `DEFAULT_CHECK_INTERVAL_SECS`".
    #[serde(default)]
    pub valid_interval_secs: u64,
    /// If true, every access triggers a liveness check (forces the
    /// effective check interval to 0).
    #[serde(default)]
    pub check_always: bool,
}

impl Default for BlobConfig {
    fn default() -> Self {
        BlobConfig {
            chunk_size: 0,
            valid_interval_secs: 0,
            check_always: false,
        }
    }
}

impl BlobConfig {
    /// Effective chunk size after applying the "0 ⇒ default" rule.
    pub fn effective_chunk_size(&self) -> u64 {
        if self.chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            self.chunk_size
        }
    }

    /// Effective check interval, in seconds, after applying the "0 ⇒
    /// default" rule and the `check_always` override.
    pub fn effective_check_interval_secs(&self) -> u64 {
        if self.check_always {
            0
        } else if self.valid_interval_secs == 0 {
            DEFAULT_CHECK_INTERVAL_SECS
        } else {
            self.valid_interval_secs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_hosts_appends_domain_as_fallback() {
        let mut cfg = RegistryConfig::default();
        cfg.domains.insert(
            "registry-1.docker.io".to_string(),
            DomainConfig {
                mirrors: vec![MirrorHost {
                    host: "mirror.example.com".to_string(),
                    insecure: false,
                }],
            },
        );
        let hosts = cfg.candidate_hosts("registry-1.docker.io");
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].host, "mirror.example.com");
        assert_eq!(hosts[1].host, "registry-1.docker.io");
    }

    #[test]
    fn candidate_hosts_with_no_mirrors_is_just_domain() {
        let cfg = RegistryConfig::default();
        let hosts = cfg.candidate_hosts("example.com");
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].host, "example.com");
    }

    #[test]
    fn blob_config_defaults() {
        let cfg = BlobConfig::default();
        assert_eq!(cfg.effective_chunk_size(), DEFAULT_CHUNK_SIZE);
        assert_eq!(cfg.effective_check_interval_secs(), DEFAULT_CHECK_INTERVAL_SECS);
    }

    #[test]
    fn blob_config_check_always_forces_zero_interval() {
        let cfg = BlobConfig {
            chunk_size: 0,
            valid_interval_secs: 120,
            check_always: true,
        };
        assert_eq!(cfg.effective_check_interval_secs(), 0);
    }
}
