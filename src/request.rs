//! The capability interface a host request must expose to be admitted.
//!
//! The engine never parses transport payloads itself; it only asks the host for named
//! values. [`RequestParts`] is an owned implementation for hosts that would rather copy
//! the relevant bits out of their native request type.

use crate::rule::EndpointId;
use serde_json::Value as JsonValue;
use std::borrow::Cow;
use std::collections::HashMap;

/// Named lookups over an intercepted request.
///
/// Every lookup is optional: a value the host cannot supply simply contributes nothing to
/// the fingerprint.
pub trait RequestContext {
    /// Endpoint identity of the route being invoked; `None` when no handler matched.
    fn endpoint(&self) -> Option<EndpointId>;

    /// Request path, used to recognise the engine's own administrative surface.
    fn path(&self) -> &str;

    /// Transport-level peer address.
    fn remote_addr(&self) -> Option<Cow<'_, str>>;

    fn query_param(&self, name: &str) -> Option<Cow<'_, str>>;

    /// Header lookup. Implementations should match names case-insensitively.
    fn header(&self, name: &str) -> Option<Cow<'_, str>>;

    /// Top-level field of the structured request payload.
    fn body_field(&self, name: &str) -> Option<Cow<'_, str>>;
}

impl<T: RequestContext + ?Sized> RequestContext for &T {
    fn endpoint(&self) -> Option<EndpointId> {
        (**self).endpoint()
    }

    fn path(&self) -> &str {
        (**self).path()
    }

    fn remote_addr(&self) -> Option<Cow<'_, str>> {
        (**self).remote_addr()
    }

    fn query_param(&self, name: &str) -> Option<Cow<'_, str>> {
        (**self).query_param(name)
    }

    fn header(&self, name: &str) -> Option<Cow<'_, str>> {
        (**self).header(name)
    }

    fn body_field(&self, name: &str) -> Option<Cow<'_, str>> {
        (**self).body_field(name)
    }
}

/// Render a JSON payload value the way it contributes to a fingerprint.
///
/// Strings as-is, numbers and booleans as their JSON text, `null` as absent, and
/// arrays/objects as compact JSON.
pub fn render_json_field(value: &JsonValue) -> Option<Cow<'_, str>> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(Cow::Borrowed(s.as_str())),
        JsonValue::Bool(b) => Some(Cow::Owned(b.to_string())),
        JsonValue::Number(n) => Some(Cow::Owned(n.to_string())),
        other => Some(Cow::Owned(other.to_string())),
    }
}

/// Owned request snapshot implementing [`RequestContext`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestParts {
    pub endpoint: Option<EndpointId>,
    pub path: String,
    pub remote_addr: Option<String>,
    pub query: HashMap<String, String>,
    /// Keys are stored lower-cased.
    pub headers: HashMap<String, String>,
    pub body: Option<JsonValue>,
}

impl RequestParts {
    pub fn new(endpoint: impl Into<EndpointId>, path: impl Into<String>) -> Self {
        Self { endpoint: Some(endpoint.into()), path: path.into(), ..Self::default() }
    }

    /// A request that matched no handler.
    pub fn unrouted(path: impl Into<String>) -> Self {
        Self { path: path.into(), ..Self::default() }
    }

    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }
}

impl RequestContext for RequestParts {
    fn endpoint(&self) -> Option<EndpointId> {
        self.endpoint.clone()
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn remote_addr(&self) -> Option<Cow<'_, str>> {
        self.remote_addr.as_deref().map(Cow::Borrowed)
    }

    fn query_param(&self, name: &str) -> Option<Cow<'_, str>> {
        self.query.get(name).map(|v| Cow::Borrowed(v.as_str()))
    }

    fn header(&self, name: &str) -> Option<Cow<'_, str>> {
        self.headers.get(&name.to_ascii_lowercase()).map(|v| Cow::Borrowed(v.as_str()))
    }

    fn body_field(&self, name: &str) -> Option<Cow<'_, str>> {
        self.body.as_ref()?.get(name).and_then(render_json_field)
    }
}
