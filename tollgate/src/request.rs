//! Request context handed to rate limiting policies by the transport layer

use std::{net::SocketAddr, sync::Arc};
use http::{request::Parts, HeaderMap, Method, Request, Uri};
use serde_json::Value;

/// A read-only view of an inbound request.
///
/// The transport layer builds one per request from the request head, the
/// peer address of the connection and, if available, the authenticated
/// identity and the parsed request body.
///
/// # Example
/// ```no_run
/// use tollgate::RequestContext;
///
/// let request = http::Request::post("/password/reset")
///     .header("x-forwarded-for", "198.51.100.4")
///     .body(())
///     .unwrap();
///
/// let ctx = RequestContext::from(request)
///     .with_peer_addr("10.0.0.1:40000".parse().unwrap())
///     .with_body(serde_json::json!({ "email": "jane@example.com" }));
/// ```
#[derive(Debug)]
pub struct RequestContext {
    /// Request head
    parts: Parts,

    /// Address of the connected peer
    peer_addr: Option<SocketAddr>,

    /// Identity supplied by the authentication layer
    identity: Option<Arc<str>>,

    /// Route template the request was matched to
    route: Option<Arc<str>>,

    /// Parsed request body
    body: Option<Value>,
}

impl<B> From<Request<B>> for RequestContext {
    #[inline]
    fn from(request: Request<B>) -> Self {
        let (parts, _) = request.into_parts();
        Self::new(parts)
    }
}

impl RequestContext {
    /// Creates a new [`RequestContext`] from the request head
    #[inline]
    pub fn new(parts: Parts) -> Self {
        Self {
            parts,
            peer_addr: None,
            identity: None,
            route: None,
            body: None,
        }
    }

    /// Sets the address of the connected peer
    #[inline]
    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Sets the authenticated identity (e.g. a user ID)
    #[inline]
    pub fn with_identity(mut self, identity: impl Into<Arc<str>>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Sets the route template the request was matched to (e.g. `/users/{id}`)
    #[inline]
    pub fn with_route(mut self, route: impl Into<Arc<str>>) -> Self {
        self.route = Some(route.into());
        self
    }

    /// Sets the parsed request body
    #[inline]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Returns the HTTP method
    #[inline]
    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    /// Returns the request URI
    #[inline]
    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    /// Returns the request headers
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// Returns the address of the connected peer
    #[inline]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Returns the authenticated identity, if any
    #[inline]
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Returns the matched route template, or the request path if no
    /// route was set
    #[inline]
    pub fn route(&self) -> &str {
        self.route
            .as_deref()
            .unwrap_or_else(|| self.parts.uri.path())
    }

    /// Returns the parsed request body, if any
    #[inline]
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Returns a top-level body field rendered as a string.
    ///
    /// Strings are returned as is, numbers and booleans in their JSON form.
    /// Missing, `null`, empty, array and object fields yield `None`.
    pub fn body_field(&self, name: &str) -> Option<String> {
        match self.body.as_ref()?.get(name)? {
            Value::String(value) if !value.is_empty() => Some(value.clone()),
            Value::Number(value) => Some(value.to_string()),
            Value::Bool(value) => Some(value.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_ctx() -> RequestContext {
        let request = Request::get("/users/42?active=true")
            .header("x-api-key", "alpha")
            .body(())
            .unwrap();

        RequestContext::from(request)
    }

    #[test]
    fn it_exposes_request_head() {
        let ctx = create_ctx();

        assert_eq!(ctx.method(), &Method::GET);
        assert_eq!(ctx.uri().path(), "/users/42");
        assert_eq!(ctx.headers().get("x-api-key").unwrap(), "alpha");
        assert!(ctx.peer_addr().is_none());
        assert!(ctx.identity().is_none());
    }

    #[test]
    fn it_falls_back_to_path_when_route_is_not_set() {
        let ctx = create_ctx();
        assert_eq!(ctx.route(), "/users/42");

        let ctx = ctx.with_route("/users/{id}");
        assert_eq!(ctx.route(), "/users/{id}");
    }

    #[test]
    fn it_sets_peer_and_identity() {
        let ctx = create_ctx()
            .with_peer_addr("127.0.0.1:8080".parse().unwrap())
            .with_identity("user-1");

        assert_eq!(ctx.peer_addr().unwrap().to_string(), "127.0.0.1:8080");
        assert_eq!(ctx.identity(), Some("user-1"));
    }

    #[test]
    fn it_reads_scalar_body_fields() {
        let ctx = create_ctx().with_body(json!({
            "email": "jane@example.com",
            "id": 7,
            "admin": false,
            "empty": "",
            "nothing": null,
            "tags": ["a"]
        }));

        assert_eq!(ctx.body_field("email").as_deref(), Some("jane@example.com"));
        assert_eq!(ctx.body_field("id").as_deref(), Some("7"));
        assert_eq!(ctx.body_field("admin").as_deref(), Some("false"));
        assert!(ctx.body_field("empty").is_none());
        assert!(ctx.body_field("nothing").is_none());
        assert!(ctx.body_field("tags").is_none());
        assert!(ctx.body_field("missing").is_none());
    }

    #[test]
    fn it_reads_no_body_fields_without_body() {
        let ctx = create_ctx();

        assert!(ctx.body().is_none());
        assert!(ctx.body_field("email").is_none());
    }
}
