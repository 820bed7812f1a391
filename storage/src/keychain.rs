// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Keychain and transport factory (spec.md §4.3).
//!
//! Given a reference and a base HTTP transport, produce a new transport that
//! transparently injects pull-scope credentials. Acquisition is bounded by a
//! timeout; on timeout the caller gets `StargzError::AuthnTimeout`.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use serde::Deserialize;
use stargz_api::StargzError;

/// Pull-scope credentials for a repository, as handed out by a `Keychain`.
#[derive(Clone, Debug)]
pub enum Credential {
    Basic { username: String, password: String },
    Bearer { token: String },
}

/// Produces credentials for a given repository reference.
///
/// Implementations may consult environment variables, a credential helper,
/// or a static table; anonymous pull is modeled as `None`.
pub trait Keychain: Send + Sync {
    fn credential(&self, repo: &str) -> Option<Credential>;
}

/// Default keychain: reads `STARGZ_AUTH_<HOST>` env vars formatted
/// `user:pass`. `HOST` is `repo`'s host, upper-cased with `.` and `:`
/// replaced by `_`.
#[derive(Default)]
pub struct EnvKeychain;

impl EnvKeychain {
    fn env_var_name(repo: &str) -> String {
        let host = repo.split('/').next().unwrap_or(repo);
        let normalized: String = host
            .chars()
            .map(|c| if c == '.' || c == ':' { '_' } else { c })
            .collect();
        format!("STARGZ_AUTH_{}", normalized.to_uppercase())
    }
}

impl Keychain for EnvKeychain {
    fn credential(&self, repo: &str) -> Option<Credential> {
        let var = Self::env_var_name(repo);
        let value = std::env::var(&var).ok()?;
        let (username, password) = value.split_once(':')?;
        Some(Credential::Basic {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

/// The OCI Distribution `WWW-Authenticate: Bearer ...` challenge.
#[derive(Debug, Default)]
struct BearerChallenge {
    realm: String,
    service: Option<String>,
    scope: Option<String>,
}

fn parse_bearer_challenge(header: &str) -> Option<BearerChallenge> {
    let rest = header.strip_prefix("Bearer ")?;
    let mut challenge = BearerChallenge::default();
    for part in rest.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        let value = value.trim_matches('"');
        match key {
            "realm" => challenge.realm = value.to_string(),
            "service" => challenge.service = Some(value.to_string()),
            "scope" => challenge.scope = Some(value.to_string()),
            _ => {}
        }
    }
    if challenge.realm.is_empty() {
        None
    } else {
        Some(challenge)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(alias = "access_token")]
    token: Option<String>,
}

/// An authenticated HTTP transport bound to a single registry reference.
#[derive(Clone)]
pub struct Transport {
    pub(crate) client: reqwest::blocking::Client,
    pub(crate) token: Option<String>,
}

impl Transport {
    /// Build an unauthenticated transport (anonymous pull).
    pub fn anonymous(client: reqwest::blocking::Client) -> Self {
        Transport {
            client,
            token: None,
        }
    }

    /// Negotiate pull-scope credentials for `reference` against `probe_url`,
    /// bounded by `timeout`. `probe_url` should be a blob/manifest endpoint
    /// whose 401 response carries the `WWW-Authenticate` challenge.
    pub fn authenticate(
        client: reqwest::blocking::Client,
        reference: &str,
        probe_url: &str,
        keychain: &dyn Keychain,
        timeout: Duration,
    ) -> Result<Transport, StargzError> {
        let (tx, rx) = mpsc::channel();
        let client_clone = client.clone();
        let probe_url = probe_url.to_string();
        let credential = keychain.credential(reference);
        let handle = thread::spawn(move || {
            let result = negotiate(&client_clone, &probe_url, credential.as_ref());
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(Ok(token)) => {
                let _ = handle.join();
                Ok(Transport { client, token })
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                warn!("authn negotiation failed for {}: {}", reference, e);
                Ok(Transport {
                    client,
                    token: None,
                })
            }
            Err(_) => Err(StargzError::AuthnTimeout {
                reference: reference.to_string(),
                timeout_secs: timeout.as_secs(),
            }),
        }
    }
}

fn negotiate(
    client: &reqwest::blocking::Client,
    probe_url: &str,
    credential: Option<&Credential>,
) -> Result<Option<String>, anyhow::Error> {
    let resp = client.get(probe_url).send()?;
    if resp.status() != reqwest::StatusCode::UNAUTHORIZED {
        return Ok(None);
    }
    let challenge = resp
        .headers()
        .get(reqwest::header::WWW_AUTHENTICATE)
        .and_then(|h| h.to_str().ok())
        .and_then(parse_bearer_challenge);
    let challenge = match challenge {
        Some(c) => c,
        None => return Ok(None),
    };

    let mut req = client.get(&challenge.realm);
    if let Some(service) = &challenge.service {
        req = req.query(&[("service", service)]);
    }
    if let Some(scope) = &challenge.scope {
        req = req.query(&[("scope", scope)]);
    }
    if let Some(Credential::Basic { username, password }) = credential {
        req = req.basic_auth(username, Some(password));
    }

    let resp = req.send()?;
    let token_resp: TokenResponse = resp.json()?;
    let token = token_resp.token;
    debug!("negotiated registry token via {}", challenge.realm);
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_name_normalizes_host() {
        assert_eq!(
            EnvKeychain::env_var_name("registry-1.docker.io/library/busybox"),
            "STARGZ_AUTH_REGISTRY-1_DOCKER_IO"
        );
    }

    #[test]
    fn parse_challenge() {
        let c = parse_bearer_challenge(
            r#"Bearer realm="https://auth.example.com/token",service="registry.example.com",scope="repository:foo:pull""#,
        )
        .unwrap();
        assert_eq!(c.realm, "https://auth.example.com/token");
        assert_eq!(c.service.as_deref(), Some("registry.example.com"));
        assert_eq!(c.scope.as_deref(), Some("repository:foo:pull"));
    }

    #[test]
    fn parse_challenge_rejects_non_bearer() {
        assert!(parse_bearer_challenge(r#"Basic realm="x""#).is_none());
    }
}
