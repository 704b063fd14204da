//! Helpers for building rate limiting keys.
//!
//! This module provides a set of helpers for defining how a key
//! is derived from an incoming request.
//!
//! Keys are used by the window store to group requests
//! (e.g. by client IP address or authenticated user identity).
//!
//! # Examples
//!
//! ```no_run
//! use tollgate::by;
//!
//! // Rate limit by client IP
//! by::ip();
//!
//! // Rate limit by client IP, honoring proxy headers
//! by::ip().trust_proxy();
//!
//! // Rate limit by the email in the request body, or by IP without one
//! by::body_field("email").or(by::ip());
//! ```

use std::fmt::{Debug, Formatter};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use http::{header::FORWARDED, HeaderMap, HeaderName};
use crate::{error::Error, key::RateLimitKey, RequestContext};

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Represents a source from which a rate-limiting key is derived.
///
/// A key determines *which requests share the same window*.
/// For example:
/// - grouping by client IP address
/// - grouping by authenticated user ID
/// - grouping by any custom request-derived value
///
/// Users construct `KeySource` values via helper functions of this module,
/// such as [`ip`] or [`user`], and pass them to
/// [`Policy::with_key`](crate::Policy::with_key).
///
/// # Fallbacks
///
/// Sources can be chained with [`KeySource::or`]: the first source that
/// yields a key wins.
///
/// ```no_run
/// use tollgate::by;
///
/// // Per user when authenticated, per IP otherwise
/// by::user().or(by::ip());
/// ```
#[derive(Debug, Clone)]
pub struct KeySource {
    /// Inner key
    inner: PartitionKey,
}

impl KeySource {
    /// Resolves client IP addresses from proxy headers.
    ///
    /// The address is resolved in the following order:
    /// 1. The `Forwarded` header (RFC 7239)
    /// 2. The `X-Forwarded-For` header
    /// 3. The `X-Real-IP` header
    /// 4. The peer socket address as a fallback
    ///
    /// Only enable this behind a reverse proxy that overwrites these headers,
    /// otherwise clients can pick their own key and bypass the limiter.
    ///
    /// Affects [`ip`] and [`route_and_ip`] sources, including those
    /// chained with [`KeySource::or`].
    pub fn trust_proxy(self) -> Self {
        Self { inner: self.inner.trust_proxy() }
    }

    /// Falls back to `other` when this source cannot derive a key.
    pub fn or(self, other: KeySource) -> Self {
        Self {
            inner: PartitionKey::Fallback(Box::new(self.inner), Box::new(other.inner)),
        }
    }
}

impl RateLimitKey for KeySource {
    #[inline]
    fn extract(&self, ctx: &RequestContext) -> Result<String, Error> {
        self.inner.extract(ctx)
    }
}

/// A function that derives a rate-limiting key from a request.
///
/// This type is internally type-erased and stored behind an `Arc`
/// to allow cheap cloning and thread-safe sharing.
type PartitionKeyExtractor = Arc<
    dyn Fn(&RequestContext) -> Result<String, Error>
    + Send
    + Sync
    + 'static
>;

/// Represents a source from which a rate-limiting key is derived.
///
/// This enum is an internal implementation detail and is exposed to users
/// through helper functions such as [`ip`] and [`user`].
#[derive(Clone)]
enum PartitionKey {
    /// The client IP address.
    Ip { trust_proxy: bool },

    /// The matched route combined with the client IP address.
    RouteAndIp { trust_proxy: bool },

    /// A user-defined function.
    Custom(PartitionKeyExtractor),

    /// The first source, or the second one if the first fails.
    Fallback(Box<PartitionKey>, Box<PartitionKey>),
}

impl Debug for PartitionKey {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionKey::Ip { trust_proxy } => f
                .debug_struct("PartitionKey::Ip")
                .field("trust_proxy", trust_proxy)
                .finish(),
            PartitionKey::RouteAndIp { trust_proxy } => f
                .debug_struct("PartitionKey::RouteAndIp")
                .field("trust_proxy", trust_proxy)
                .finish(),
            PartitionKey::Custom(_) => f.debug_tuple("PartitionKey::Custom").finish(),
            PartitionKey::Fallback(first, second) => f
                .debug_tuple("PartitionKey::Fallback")
                .field(first)
                .field(second)
                .finish(),
        }
    }
}

impl PartitionKey {
    fn trust_proxy(self) -> Self {
        match self {
            PartitionKey::Ip { .. } => PartitionKey::Ip { trust_proxy: true },
            PartitionKey::RouteAndIp { .. } => PartitionKey::RouteAndIp { trust_proxy: true },
            PartitionKey::Fallback(first, second) => PartitionKey::Fallback(
                Box::new(first.trust_proxy()),
                Box::new(second.trust_proxy()),
            ),
            custom => custom,
        }
    }
}

impl RateLimitKey for PartitionKey {
    fn extract(&self, ctx: &RequestContext) -> Result<String, Error> {
        match self {
            PartitionKey::Ip { trust_proxy } => client_ip(ctx, *trust_proxy).map(|ip| ip.to_string()),
            PartitionKey::RouteAndIp { trust_proxy } => {
                let ip = client_ip(ctx, *trust_proxy)?;
                Ok(format!("{}|{ip}", ctx.route()))
            },
            PartitionKey::Custom(extractor) => extractor(ctx),
            PartitionKey::Fallback(first, second) => first
                .extract(ctx)
                .or_else(|_| second.extract(ctx)),
        }
    }
}

/// Uses the client IP address as a rate limiting key.
///
/// By default only the peer socket address is used;
/// see [`KeySource::trust_proxy`] for deployments behind a reverse proxy.
///
/// This is the most common strategy for unauthenticated rate limiting.
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use tollgate::{by, Policy};
///
/// let policy = Policy::new(100, Duration::from_secs(60))
///     .with_key(by::ip());
/// ```
#[inline]
pub fn ip() -> KeySource {
    KeySource {
        inner: PartitionKey::Ip { trust_proxy: false },
    }
}

/// Uses the matched route together with the client IP address as a key.
///
/// Limits each client per endpoint, independently of its traffic to other
/// endpoints. See [`RequestContext::route`] for how the route is resolved.
#[inline]
pub fn route_and_ip() -> KeySource {
    KeySource {
        inner: PartitionKey::RouteAndIp { trust_proxy: false },
    }
}

/// Uses the authenticated identity as a rate limiting key.
///
/// # Notes
/// - If the request is not authenticated, the key derivation fails;
///   chain with [`KeySource::or`] to fall back to another source.
///
/// # Example
/// ```no_run
/// use tollgate::by;
///
/// by::user().or(by::ip());
/// ```
#[inline]
pub fn user() -> KeySource {
    custom(|ctx| {
        ctx.identity()
            .filter(|id| !id.is_empty())
            .map(|id| format!("user:{id}"))
            .ok_or_else(|| Error::invalid_configuration("authenticated identity is unavailable"))
    })
}

/// Uses the value of an HTTP header as a rate limiting key.
///
/// # Notes
/// - Header names are case-insensitive and must be passed in lowercase.
/// - If the header is missing or empty, the key derivation fails.
///
/// # Example
/// ```no_run
/// use tollgate::by;
///
/// by::header("x-api-key");
/// ```
#[inline]
pub fn header(name: &'static str) -> KeySource {
    let header = HeaderName::from_static(name);

    custom(move |ctx| {
        let value = ctx.headers()
            .get(&header)
            .ok_or_else(|| Error::invalid_configuration(format!("header {name} is missing")))?
            .to_str()
            .map_err(|_| Error::invalid_configuration(format!("header {name} is not visible ASCII")))?;

        if value.is_empty() {
            return Err(Error::invalid_configuration(format!("header {name} is empty")));
        }
        Ok(format!("{name}:{value}"))
    })
}

/// Uses a top-level field of the parsed request body as a rate limiting key.
///
/// Useful to throttle per account regardless of the client address,
/// e.g. password reset requests per email.
///
/// # Notes
/// - See [`RequestContext::body_field`] for which values are accepted.
/// - If the field is missing, the key derivation fails.
///
/// # Example
/// ```no_run
/// use tollgate::by;
///
/// by::body_field("email").or(by::ip());
/// ```
#[inline]
pub fn body_field(name: &'static str) -> KeySource {
    custom(move |ctx| {
        ctx.body_field(name)
            .map(|value| format!("{name}:{value}"))
            .ok_or_else(|| Error::invalid_configuration(format!("body field {name} is missing")))
    })
}

/// Uses a fixed identifier as a rate limiting key.
///
/// All clients share one window, which caps the total throughput of a route.
///
/// # Example
/// ```no_run
/// use tollgate::by;
///
/// by::route("reports-export");
/// ```
#[inline]
pub fn route(id: impl Into<Arc<str>>) -> KeySource {
    let key: Arc<str> = format!("route:{}", id.into()).into();
    custom(move |_| Ok(key.to_string()))
}

/// Uses a user-defined function as a rate limiting key.
///
/// # Example
/// ```no_run
/// use tollgate::{by, error::Error};
///
/// by::custom(|ctx| {
///     ctx.uri()
///         .query()
///         .map(|query| query.to_owned())
///         .ok_or_else(|| Error::invalid_configuration("query is missing"))
/// });
/// ```
#[inline]
pub fn custom<F>(f: F) -> KeySource
where
    F: Fn(&RequestContext) -> Result<String, Error> + Send + Sync + 'static
{
    KeySource {
        inner: PartitionKey::Custom(Arc::new(f)),
    }
}

/// Resolves the client address, optionally from proxy headers.
fn client_ip(ctx: &RequestContext, trust_proxy: bool) -> Result<IpAddr, Error> {
    if trust_proxy {
        if let Some(ip) = forwarded_ip(ctx.headers()) {
            return Ok(ip);
        }
    }

    ctx.peer_addr()
        .map(|addr| addr.ip())
        .ok_or_else(|| Error::invalid_configuration("client address is unavailable"))
}

/// Reads the original client address from proxy headers.
fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let header = |name: &HeaderName| headers.get(name).and_then(|value| value.to_str().ok());

    header(&FORWARDED)
        .and_then(parse_forwarded)
        .or_else(|| header(&X_FORWARDED_FOR)
            .and_then(|value| value.split(',').next())
            .and_then(parse_node))
        .or_else(|| header(&X_REAL_IP).and_then(parse_node))
}

/// Parses the `for` parameter of the first element of a `Forwarded` header.
///
/// `Forwarded: for=192.0.2.60;proto=http;by=203.0.113.43, for=198.51.100.17`
fn parse_forwarded(value: &str) -> Option<IpAddr> {
    value
        .split(',')
        .next()?
        .split(';')
        .find_map(|pair| {
            let (name, node) = pair.trim().split_once('=')?;
            if name.trim().eq_ignore_ascii_case("for") {
                parse_node(node)
            } else {
                None
            }
        })
}

/// Parses an address with an optional port: `192.0.2.43`, `192.0.2.43:47011`,
/// `"[2001:db8:cafe::17]:4711"` or `2001:db8::1`.
fn parse_node(node: &str) -> Option<IpAddr> {
    let node = node.trim().trim_matches('"');
    if let Some(rest) = node.strip_prefix('[') {
        return rest.split(']').next()?.parse().ok();
    }

    node.parse::<IpAddr>()
        .ok()
        .or_else(|| node.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;
    use serde_json::json;

    fn create_ctx(headers: &[(&'static str, &'static str)]) -> RequestContext {
        let mut request = Request::get("/login");
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        RequestContext::from(request.body(()).unwrap())
            .with_peer_addr("10.0.0.1:50000".parse().unwrap())
    }

    #[test]
    fn it_uses_peer_address_by_default() {
        let ctx = create_ctx(&[("x-forwarded-for", "198.51.100.4")]);

        assert_eq!(ip().extract(&ctx).unwrap(), "10.0.0.1");
    }

    #[test]
    fn it_fails_without_peer_address() {
        let ctx = RequestContext::from(Request::get("/").body(()).unwrap());

        assert!(ip().extract(&ctx).unwrap_err().is_invalid_configuration());
    }

    #[test]
    fn it_trusts_forwarded_header_first() {
        let ctx = create_ctx(&[
            ("forwarded", "for=192.0.2.60;proto=http;by=203.0.113.43, for=198.51.100.17"),
            ("x-forwarded-for", "198.51.100.4"),
        ]);

        assert_eq!(ip().trust_proxy().extract(&ctx).unwrap(), "192.0.2.60");
    }

    #[test]
    fn it_parses_quoted_ipv6_forwarded_node() {
        let ctx = create_ctx(&[("forwarded", "For=\"[2001:db8:cafe::17]:4711\"")]);

        assert_eq!(ip().trust_proxy().extract(&ctx).unwrap(), "2001:db8:cafe::17");
    }

    #[test]
    fn it_falls_back_to_x_forwarded_for() {
        let ctx = create_ctx(&[("x-forwarded-for", "198.51.100.4, 10.0.0.2")]);

        assert_eq!(ip().trust_proxy().extract(&ctx).unwrap(), "198.51.100.4");
    }

    #[test]
    fn it_falls_back_to_x_real_ip() {
        let ctx = create_ctx(&[("x-real-ip", "198.51.100.9:443")]);

        assert_eq!(ip().trust_proxy().extract(&ctx).unwrap(), "198.51.100.9");
    }

    #[test]
    fn it_ignores_malformed_proxy_headers() {
        let ctx = create_ctx(&[
            ("forwarded", "for=unknown"),
            ("x-forwarded-for", "not-an-ip"),
        ]);

        assert_eq!(ip().trust_proxy().extract(&ctx).unwrap(), "10.0.0.1");
    }

    #[test]
    fn it_combines_route_and_ip() {
        let ctx = create_ctx(&[]).with_route("/login");

        assert_eq!(route_and_ip().extract(&ctx).unwrap(), "/login|10.0.0.1");
    }

    #[test]
    fn it_extracts_user_identity() {
        let ctx = create_ctx(&[]).with_identity("42");

        assert_eq!(user().extract(&ctx).unwrap(), "user:42");
        assert!(user().extract(&create_ctx(&[])).is_err());
    }

    #[test]
    fn it_extracts_header_value() {
        let key = header("x-api-key");

        assert_eq!(key.extract(&create_ctx(&[("x-api-key", "alpha")])).unwrap(), "x-api-key:alpha");
        assert!(key.extract(&create_ctx(&[])).is_err());
        assert!(key.extract(&create_ctx(&[("x-api-key", "")])).is_err());
    }

    #[test]
    fn it_extracts_body_field() {
        let ctx = create_ctx(&[]).with_body(json!({ "email": "jane@example.com" }));

        assert_eq!(body_field("email").extract(&ctx).unwrap(), "email:jane@example.com");
        assert!(body_field("username").extract(&ctx).is_err());
    }

    #[test]
    fn it_uses_fixed_route_key_for_every_client() {
        let key = route("export");
        let other = RequestContext::from(Request::get("/").body(()).unwrap());

        assert_eq!(key.extract(&create_ctx(&[])).unwrap(), "route:export");
        assert_eq!(key.extract(&other).unwrap(), "route:export");
    }

    #[test]
    fn it_falls_back_to_second_source() {
        let key = user().or(body_field("email")).or(ip());

        let ctx = create_ctx(&[]).with_identity("7");
        assert_eq!(key.extract(&ctx).unwrap(), "user:7");

        let ctx = create_ctx(&[]).with_body(json!({ "email": "a@b.c" }));
        assert_eq!(key.extract(&ctx).unwrap(), "email:a@b.c");

        assert_eq!(key.extract(&create_ctx(&[])).unwrap(), "10.0.0.1");
    }

    #[test]
    fn it_applies_trust_proxy_through_fallbacks() {
        let key = user().or(ip()).trust_proxy();
        let ctx = create_ctx(&[("x-forwarded-for", "198.51.100.4")]);

        assert_eq!(key.extract(&ctx).unwrap(), "198.51.100.4");
    }

    #[test]
    fn it_runs_custom_extractor() {
        let key = custom(|ctx| Ok(format!("{}:{}", ctx.method(), ctx.uri().path())));

        assert_eq!(key.extract(&create_ctx(&[])).unwrap(), "GET:/login");
    }

    #[test]
    fn it_formats_key_source_debug_output() {
        let debug_str = format!("{:?}", user().or(ip()));

        assert!(debug_str.contains("PartitionKey::Fallback"));
        assert!(debug_str.contains("PartitionKey::Custom"));
        assert!(debug_str.contains("trust_proxy: false"));
    }
}
