//! Tools for applying a rate limiting policy to inbound requests.
//!
//! A [`RateLimitFilter`] is invoked by the transport layer ahead of the
//! request handler. For each request it walks through:
//!
//! ```text
//! Evaluating -> Skipped  -> Outcome::Continue (no headers)
//!            -> Allowed  -> Outcome::Continue (X-RateLimit-* headers)
//!            -> Rejected -> Outcome::Reject   (X-RateLimit-* and Retry-After headers)
//! ```
//!
//! in a single pass; it never retries on its own.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use bytes::Bytes;
use http::{header::CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use serde::Serialize;
use tollgate_store::{WindowStatus, WindowStore};
use crate::{
    error::Error,
    headers::{limit_headers, rejection_headers},
    key::namespaced,
    Policy,
    RequestContext
};

/// Machine-readable code of the default rejection body.
pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";

/// Result of applying a [`RateLimitFilter`] to a request.
#[derive(Debug)]
pub enum Outcome {
    /// The request may proceed to the handler.
    ///
    /// Holds the rate limiting headers to add to the handler's response.
    /// Empty if the request was skipped or the store was unavailable.
    Continue(HeaderMap),

    /// The request must not reach the handler; respond with this instead.
    Reject(Rejection),
}

impl Outcome {
    /// Returns `true` if the request may proceed.
    #[inline]
    pub fn is_continue(&self) -> bool {
        matches!(self, Outcome::Continue(_))
    }

    /// Returns `true` if the request was rejected.
    #[inline]
    pub fn is_reject(&self) -> bool {
        matches!(self, Outcome::Reject(_))
    }
}

/// A fully formed rejection response.
#[derive(Debug, Clone)]
pub struct Rejection {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

#[derive(Serialize)]
struct RejectionBody<'a> {
    success: bool,
    error: RejectionError<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RejectionError<'a> {
    message: &'a str,
    code: &'static str,
    status_code: u16,
    retry_after: u64,
}

impl Rejection {
    /// Creates a rejection with a raw body and no headers
    #[inline]
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Creates a `text/plain` rejection
    #[inline]
    pub fn text(status: StatusCode, text: impl Into<String>) -> Self {
        Self::new(status, text.into())
            .with_header(CONTENT_TYPE, HeaderValue::from_static(mime::TEXT_PLAIN_UTF_8.as_ref()))
    }

    /// Creates an `application/json` rejection
    #[inline]
    pub fn json(status: StatusCode, body: &serde_json::Value) -> Self {
        Self::new(status, body.to_string())
            .with_header(CONTENT_TYPE, HeaderValue::from_static(mime::APPLICATION_JSON.as_ref()))
    }

    /// Creates the default rejection:
    ///
    /// ```json
    /// {
    ///   "success": false,
    ///   "error": {
    ///     "message": "Too many requests, please try again later",
    ///     "code": "RATE_LIMIT_EXCEEDED",
    ///     "statusCode": 429,
    ///     "retryAfter": 60
    ///   }
    /// }
    /// ```
    pub fn too_many_requests(status: StatusCode, message: &str, retry_after: u64) -> Self {
        let body = RejectionBody {
            success: false,
            error: RejectionError {
                code: RATE_LIMIT_EXCEEDED,
                status_code: status.as_u16(),
                message,
                retry_after,
            },
        };

        // Serializing a struct of strings and integers cannot fail.
        let body = serde_json::to_vec(&body).unwrap_or_default();
        Self::new(status, body)
            .with_header(CONTENT_TYPE, HeaderValue::from_static(mime::APPLICATION_JSON.as_ref()))
    }

    /// Adds or replaces a response header
    #[inline]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Returns the status code
    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the response body
    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Converts into an HTTP response
    pub fn into_response(self) -> Response<Bytes> {
        let mut response = Response::new(self.body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Applies a [`Policy`] to requests using a shared [`WindowStore`].
///
/// Cheap to clone; all clones share the store.
///
/// # Example
/// ```no_run
/// use std::{sync::Arc, time::Duration};
/// use tollgate::{Outcome, Policy, RateLimitFilter, RequestContext, SlidingWindowStore};
///
/// let store = Arc::new(SlidingWindowStore::new());
/// let filter = RateLimitFilter::new(Policy::new(3, Duration::from_secs(60)), store).unwrap();
///
/// let ctx = RequestContext::from(http::Request::get("/").body(()).unwrap())
///     .with_peer_addr("203.0.113.7:50000".parse().unwrap());
///
/// match filter.check(&ctx).unwrap() {
///     Outcome::Continue(headers) => println!("allowed: {headers:?}"),
///     Outcome::Reject(rejection) => println!("rejected: {}", rejection.status()),
/// }
/// ```
#[derive(Clone)]
pub struct RateLimitFilter {
    policy: Policy,
    store: Arc<dyn WindowStore>,
}

impl Debug for RateLimitFilter {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitFilter")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RateLimitFilter {
    /// Creates a filter enforcing `policy` on `store`.
    ///
    /// # Errors
    ///
    /// Fails fast with [`ErrorKind::InvalidConfiguration`](crate::error::ErrorKind::InvalidConfiguration)
    /// if the policy is malformed, see [`Policy::validate`].
    pub fn new(policy: Policy, store: Arc<dyn WindowStore>) -> Result<Self, Error> {
        policy.validate()?;
        Ok(Self { policy, store })
    }

    /// Returns the enforced policy
    #[inline]
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Decides whether the request may proceed.
    ///
    /// Exceeding the limit yields [`Outcome::Reject`], not an error.
    /// If the store is unavailable the request is allowed without headers,
    /// so that a limiter defect never blocks legitimate traffic.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfiguration`](crate::error::ErrorKind::InvalidConfiguration)
    /// if no key can be derived from the request.
    pub fn check(&self, ctx: &RequestContext) -> Result<Outcome, Error> {
        if self.policy.should_skip(ctx) {
            #[cfg(feature = "tracing")]
            tracing::trace!(policy = self.policy.name(), "rate limiting skipped");
            return Ok(Outcome::Continue(HeaderMap::new()));
        }

        let key = self.key(ctx)?;
        let decision = match self.store.check_and_record(&key, self.policy.window(), self.policy.max_requests()) {
            Ok(decision) => decision,
            Err(_err) if _err.is_store_unavailable() => {
                #[cfg(feature = "tracing")]
                tracing::error!(policy = self.policy.name(), "rate limiting failed open: {_err}");
                return Ok(Outcome::Continue(HeaderMap::new()));
            },
            Err(err) => return Err(err),
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(
            policy = self.policy.name(),
            key = %key,
            count = decision.count(),
            allowed = decision.is_allowed(),
            "rate limit checked"
        );

        if decision.is_allowed() {
            return Ok(Outcome::Continue(limit_headers(&decision)));
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(
            target: "tollgate::rejected",
            policy = self.policy.name(),
            key = %key,
            count = decision.count(),
            limit = decision.limit(),
            retry_after = decision.retry_after_secs(),
            "rate limit exceeded"
        );

        let mut rejection = self.policy.reject(ctx, &decision);
        rejection.headers.extend(rejection_headers(&decision));
        Ok(Outcome::Reject(rejection))
    }

    /// Returns a snapshot of the window the request falls into, without recording it.
    pub fn status(&self, ctx: &RequestContext) -> Result<WindowStatus, Error> {
        let key = self.key(ctx)?;
        self.store.status(&key, self.policy.window())
    }

    /// Forgets the requests recorded for the caller of `ctx` under this policy.
    pub fn reset_key(&self, ctx: &RequestContext) -> Result<(), Error> {
        let key = self.key(ctx)?;
        self.store.reset(&key);
        Ok(())
    }

    /// Derives the store key: the policy name followed by the request key.
    fn key(&self, ctx: &RequestContext) -> Result<String, Error> {
        let key = self.policy.key().extract(ctx)?;
        if key.is_empty() {
            return Err(Error::invalid_configuration(format!(
                "policy {}: derived an empty key", self.policy.name()
            )));
        }
        Ok(namespaced(self.policy.name(), &key))
    }
}
