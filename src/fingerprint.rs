//! Request fingerprinting.
//!
//! A [`Fingerprint`] names "this caller, calling this endpoint, with this combination of
//! selected inputs". It is recomputed for every request and used as the key of the
//! admission cache.
//!
//! Inputs are fed to SHA-256 in a fixed order (endpoint, client address, parameters,
//! headers, body fields; names sorted within each group) and every component is
//! length-framed, so no value can be crafted to shift bytes into a neighbouring field. The
//! digest keeps keys at 64 hex characters and keeps raw parameter values out of memory.

use crate::request::RequestContext;
use crate::rule::{EndpointId, Rule};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Headers consulted, in order, by [`ClientIpStrategy::ForwardedHeaders`].
pub const FORWARDED_IP_HEADERS: [&str; 5] = [
    "X-Forwarded-For",
    "Proxy-Client-IP",
    "WL-Proxy-Client-IP",
    "HTTP_CLIENT_IP",
    "HTTP_X_FORWARDED_FOR",
];

/// Canonical admission key. Lower-case hex SHA-256.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(Arc<str>);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap an already-computed fingerprint (e.g. one an operator copied from a log line).
    pub fn from_hex(hex: impl AsRef<str>) -> Self {
        Self(Arc::from(hex.as_ref()))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the client address is derived for ip-based rules.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientIpStrategy {
    /// Use the transport peer address only.
    RemoteAddr,
    /// Prefer proxy headers ([`FORWARDED_IP_HEADERS`]), falling back to the peer address.
    #[default]
    ForwardedHeaders,
}

impl ClientIpStrategy {
    /// Resolve the client address for `request`.
    pub fn resolve<'a, R: RequestContext + ?Sized>(&self, request: &'a R) -> Option<Cow<'a, str>> {
        if *self == ClientIpStrategy::ForwardedHeaders {
            for name in FORWARDED_IP_HEADERS {
                if let Some(value) = request.header(name) {
                    if let Some(first) = first_forwarded_entry(&value) {
                        return Some(Cow::Owned(first.to_string()));
                    }
                }
            }
        }
        request.remote_addr()
    }
}

fn first_forwarded_entry(value: &str) -> Option<&str> {
    value.split(',').map(str::trim).find(|s| !s.is_empty())
}

/// Stateless builder turning a request into a [`Fingerprint`].
#[derive(Clone, Copy, Debug, Default)]
pub struct FingerprintBuilder {
    client_ip: ClientIpStrategy,
}

impl FingerprintBuilder {
    pub fn new(client_ip: ClientIpStrategy) -> Self {
        Self { client_ip }
    }

    pub fn client_ip_strategy(&self) -> ClientIpStrategy {
        self.client_ip
    }

    /// Compute the fingerprint of `request` against `rule`.
    ///
    /// Never fails: a selected input the request does not carry is left out.
    pub fn build<R: RequestContext + ?Sized>(
        &self,
        endpoint: &EndpointId,
        rule: &Rule,
        request: &R,
    ) -> Fingerprint {
        let mut hasher = FramedHasher::default();
        hasher.component(b'E', endpoint.as_str(), "");

        if rule.ip_based {
            if let Some(ip) = self.client_ip.resolve(request) {
                hasher.component(b'I', &ip, "");
            }
        }

        // BTreeSet iteration is already lexicographic.
        for name in &rule.parameters {
            if let Some(value) = request.query_param(name) {
                hasher.component(b'P', name, &value);
            }
        }
        for name in &rule.headers {
            if let Some(value) = request.header(name) {
                hasher.component(b'H', &name.to_ascii_lowercase(), &value);
            }
        }
        for name in &rule.body_fields {
            let value = request.body_field(name).or_else(|| request.query_param(name));
            if let Some(value) = value {
                hasher.component(b'B', name, &value);
            }
        }

        hasher.finish()
    }
}

#[derive(Default)]
struct FramedHasher {
    inner: Sha256,
}

impl FramedHasher {
    fn component(&mut self, tag: u8, name: &str, value: &str) {
        self.inner.update([tag]);
        self.inner.update((name.len() as u64).to_be_bytes());
        self.inner.update(name.as_bytes());
        self.inner.update((value.len() as u64).to_be_bytes());
        self.inner.update(value.as_bytes());
    }

    fn finish(self) -> Fingerprint {
        Fingerprint(Arc::from(format!("{:x}", self.inner.finalize())))
    }
}
