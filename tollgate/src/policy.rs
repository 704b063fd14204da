//! Tools and structs for a sliding-window rate limiting policy

use std::borrow::Cow;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;
use http::StatusCode;
use tollgate_store::Decision;
use crate::{
    by,
    error::Error,
    filter::Rejection,
    key::{PolicyName, RateLimitKey, KEY_SEPARATOR},
    RequestContext
};

/// Name of a policy that was not given one with [`Policy::with_name`].
pub const DEFAULT_POLICY_NAME: &str = "default";

/// Default human-readable rejection message.
pub const DEFAULT_MESSAGE: &str = "Too many requests, please try again later";

/// A predicate that exempts a request from rate limiting.
type SkipFn = Arc<
    dyn Fn(&RequestContext) -> bool
    + Send
    + Sync
    + 'static
>;

/// A function that builds the rejection response in place of the default body.
type RejectFn = Arc<
    dyn Fn(&RequestContext, &Decision) -> Rejection
    + Send
    + Sync
    + 'static
>;

/// Configuration of a **sliding window** rate limiting policy.
///
/// This struct defines the policy parameters:
/// - `max_requests` - maximum number of requests allowed per window
/// - `window` - duration of the sliding window
/// - `name` - name of the policy, also used to namespace its keys
/// - `key` - how requests are grouped, by client IP by default
/// - `skip` - optional predicate exempting requests
/// - `on_reject` - optional custom rejection response
/// - `status` and `message` - of the default rejection response
///
/// A policy is an immutable value once built and is cheap to clone.
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use tollgate::{by, Policy};
///
/// let policy = Policy::new(10, Duration::from_secs(60))
///     .with_name("search")
///     .with_key(by::user().or(by::ip()))
///     .with_skip(|ctx| ctx.identity() == Some("admin"))
///     .with_message("Slow down");
/// ```
#[derive(Clone)]
pub struct Policy {
    /// Name of the policy
    name: PolicyName,

    /// Maximum number of requests allowed in the window
    max_requests: u32,

    /// Duration of the window
    window: Duration,

    /// Message of the default rejection body
    message: Cow<'static, str>,

    /// Status code of the default rejection response
    status: StatusCode,

    /// Key derivation
    key: Arc<dyn RateLimitKey>,

    /// Optional skip predicate
    skip: Option<SkipFn>,

    /// Optional custom rejection
    on_reject: Option<RejectFn>,
}

impl Debug for Policy {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Policy")
            .field("name", &self.name)
            .field("max_requests", &self.max_requests)
            .field("window", &self.window)
            .field("message", &self.message)
            .field("status", &self.status)
            .field("skip", &self.skip.is_some())
            .field("on_reject", &self.on_reject.is_some())
            .finish_non_exhaustive()
    }
}

impl Policy {
    /// Creates a new sliding window rate limiting policy.
    ///
    /// Requests are keyed by client IP (see [`by::ip`]) until
    /// [`with_key`](Self::with_key) says otherwise.
    ///
    /// # Arguments
    /// * `max_requests` - Maximum number of requests allowed in one window.
    /// * `window` - Duration of the window.
    #[inline]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            name: Arc::from(DEFAULT_POLICY_NAME),
            message: Cow::Borrowed(DEFAULT_MESSAGE),
            status: StatusCode::TOO_MANY_REQUESTS,
            key: Arc::new(by::ip()),
            skip: None,
            on_reject: None,
            max_requests,
            window,
        }
    }

    /// Sets the name of this policy.
    ///
    /// The name prefixes every key the policy records, so it must not
    /// contain `:`.
    #[inline]
    pub fn with_name(mut self, name: impl Into<PolicyName>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the maximum number of requests allowed in one window.
    #[inline]
    pub fn with_max_requests(mut self, max_requests: u32) -> Self {
        self.max_requests = max_requests;
        self
    }

    /// Sets the duration of the window.
    #[inline]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Sets the message of the default rejection body.
    #[inline]
    pub fn with_message(mut self, message: impl Into<Cow<'static, str>>) -> Self {
        self.message = message.into();
        self
    }

    /// Sets the status code of the default rejection response.
    ///
    /// Default: `429 Too Many Requests`
    #[inline]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Sets how requests are grouped into windows.
    #[inline]
    pub fn with_key(mut self, key: impl RateLimitKey + 'static) -> Self {
        self.key = Arc::new(key);
        self
    }

    /// Sets a predicate that exempts requests from rate limiting.
    ///
    /// The predicate runs before key derivation. Skipped requests are not
    /// recorded and get no rate limiting headers.
    #[inline]
    pub fn with_skip<F>(mut self, skip: F) -> Self
    where
        F: Fn(&RequestContext) -> bool + Send + Sync + 'static
    {
        self.skip = Some(Arc::new(skip));
        self
    }

    /// Sets a function that builds the rejection response in place of the
    /// default JSON body.
    ///
    /// Rate limiting headers and `Retry-After` are added to whatever the
    /// function returns.
    #[inline]
    pub fn with_on_reject<F>(mut self, on_reject: F) -> Self
    where
        F: Fn(&RequestContext, &Decision) -> Rejection + Send + Sync + 'static
    {
        self.on_reject = Some(Arc::new(on_reject));
        self
    }

    /// Name of the policy.
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of allowed requests per window.
    #[inline(always)]
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Duration of the window.
    #[inline(always)]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Message of the default rejection body.
    #[inline(always)]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Status code of the default rejection response.
    #[inline(always)]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Checks that the policy can be enforced.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfiguration`](crate::error::ErrorKind::InvalidConfiguration)
    /// for an empty name, a zero ceiling, a window shorter than one millisecond,
    /// or a status code that is not an error. Names must not contain `:`.
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.is_empty() {
            return Err(Error::invalid_configuration("policy name must not be empty"));
        }
        if self.name.contains(KEY_SEPARATOR) {
            return Err(Error::invalid_configuration(format!(
                "policy {}: name must not contain '{KEY_SEPARATOR}'", self.name
            )));
        }
        if self.max_requests == 0 {
            return Err(Error::invalid_configuration(format!(
                "policy {}: max requests must be greater than zero", self.name
            )));
        }
        if self.window < Duration::from_millis(1) {
            return Err(Error::invalid_configuration(format!(
                "policy {}: window must be at least one millisecond", self.name
            )));
        }
        if !self.status.is_client_error() && !self.status.is_server_error() {
            return Err(Error::invalid_configuration(format!(
                "policy {}: status {} is not an error status", self.name, self.status
            )));
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn key(&self) -> &dyn RateLimitKey {
        self.key.as_ref()
    }

    #[inline]
    pub(crate) fn should_skip(&self, ctx: &RequestContext) -> bool {
        self.skip.as_ref().is_some_and(|skip| skip(ctx))
    }

    /// Builds the rejection response without rate limiting headers.
    #[inline]
    pub(crate) fn reject(&self, ctx: &RequestContext, decision: &Decision) -> Rejection {
        match &self.on_reject {
            Some(on_reject) => on_reject(ctx, decision),
            None => Rejection::too_many_requests(self.status, &self.message, decision.retry_after_secs()),
        }
    }
}
