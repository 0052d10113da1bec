//! Proxy authentication (RFC 7235 challenges, RFC 7617 Basic credentials).
//!
//! Credentials are never sent preemptively. The connection layer consults a
//! [`ProxyAuthenticator`] only after a proxy answered `407 Proxy
//! Authentication Required`, passing the parsed `Proxy-Authenticate`
//! challenges.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::fmt;

/// A single challenge from a `Proxy-Authenticate` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyChallenge {
    /// Authentication scheme, e.g. "Basic".
    pub scheme: String,
    /// Realm parameter, if present.
    pub realm: Option<String>,
}

impl ProxyChallenge {
    /// Check the scheme, case-insensitively.
    pub fn is_scheme(&self, scheme: &str) -> bool {
        self.scheme.eq_ignore_ascii_case(scheme)
    }
}

/// Supplies `Proxy-Authorization` values in response to proxy challenges.
///
/// Returning `None` means "no credentials for this challenge" and fails the
/// connection attempt with [`Error::ProxyAuth`](crate::Error::ProxyAuth).
pub trait ProxyAuthenticator: Send + Sync + fmt::Debug {
    /// Produce a `Proxy-Authorization` header value for `proxy` (host:port).
    fn authenticate(&self, proxy: &str, challenges: &[ProxyChallenge]) -> Option<String>;
}

/// Answers Basic challenges with a fixed user and password.
#[derive(Clone)]
pub struct BasicProxyAuthenticator {
    user: String,
    password: String,
}

impl BasicProxyAuthenticator {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl ProxyAuthenticator for BasicProxyAuthenticator {
    fn authenticate(&self, proxy: &str, challenges: &[ProxyChallenge]) -> Option<String> {
        // A bare 407 without any challenge is still answered with Basic.
        if !challenges.is_empty() && !challenges.iter().any(|c| c.is_scheme("basic")) {
            tracing::debug!(
                "Proxy {} offered no Basic challenge ({:?})",
                proxy,
                challenges.iter().map(|c| c.scheme.as_str()).collect::<Vec<_>>()
            );
            return None;
        }
        Some(basic_auth(&self.user, &self.password))
    }
}

impl fmt::Debug for BasicProxyAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicProxyAuthenticator")
            .field("user", &self.user)
            .field("password", &mask(&self.password))
            .finish()
    }
}

/// Generate Basic Auth header value (RFC 7617).
pub fn basic_auth(username: &str, password: &str) -> String {
    let plain = format!("{}:{}", username, password);
    format!("Basic {}", BASE64.encode(plain))
}

/// Parse `Proxy-Authenticate` header values into challenges.
///
/// Each value may hold several comma-separated challenges; a token followed
/// by a space starts a new challenge, `key=value` pairs are its parameters.
pub fn parse_challenges<'a>(values: impl IntoIterator<Item = &'a str>) -> Vec<ProxyChallenge> {
    let mut challenges: Vec<ProxyChallenge> = Vec::new();

    for value in values {
        for part in value.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (scheme, params) = match part.split_once(' ') {
                Some((head, rest)) if !head.contains('=') => (Some(head), rest.trim()),
                _ if !part.contains('=') => (Some(part), ""),
                _ => (None, part),
            };

            if let Some(scheme) = scheme {
                challenges.push(ProxyChallenge {
                    scheme: scheme.to_string(),
                    realm: None,
                });
            }

            if let Some((key, val)) = params.split_once('=') {
                if key.trim().eq_ignore_ascii_case("realm") {
                    if let Some(current) = challenges.last_mut() {
                        current.realm = Some(val.trim().trim_matches('"').to_string());
                    }
                }
            }
        }
    }

    challenges
}

/// Mask a secret for diagnostics: every character becomes `*`.
pub fn mask(secret: &str) -> String {
    "*".repeat(secret.chars().count())
}
