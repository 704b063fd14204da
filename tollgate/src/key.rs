//! Tools, structs, and traits for rate-limiting keys

use std::sync::Arc;
use crate::{error::Error, RequestContext};

/// A symbolic name of a rate-limiting policy.
///
/// Policy names namespace the keys a policy records in the shared store,
/// and select a registered policy on [`RateLimiting`](crate::RateLimiting).
///
/// Internally, this type is reference-counted to allow cheap cloning
/// when policies are shared across routes.
///
/// Typical examples include `"auth"`, `"upload"`, or `"api"`.
pub type PolicyName = Arc<str>;

/// Defines how a rate-limiting key is derived from an inbound request.
///
/// Implementations of this trait determine how requests are grouped
/// for the purposes of rate limiting.
///
/// The derived key must be:
/// - Stable for the same logical client
/// - Non-empty
/// - Fast to compute
/// - Safe to compute concurrently
///
/// Most users do not implement this trait directly but pick a source from
/// the [`by`](crate::by) module.
pub trait RateLimitKey: Send + Sync {
    /// Derives a key from the given request.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfiguration`](crate::error::ErrorKind::InvalidConfiguration)
    /// if the request does not carry what this key is derived from.
    fn extract(&self, ctx: &RequestContext) -> Result<String, Error>;
}

impl<K: RateLimitKey + ?Sized> RateLimitKey for Arc<K> {
    #[inline]
    fn extract(&self, ctx: &RequestContext) -> Result<String, Error> {
        (**self).extract(ctx)
    }
}

/// Separates the policy name from the request key in store keys.
///
/// Policy names never contain it, so the first occurrence always ends the name.
pub(crate) const KEY_SEPARATOR: char = ':';

/// Prefixes `key` with the policy name, so that two policies sharing a
/// key source never share a window.
#[inline]
pub(crate) fn namespaced(policy: &str, key: &str) -> String {
    let mut namespaced = String::with_capacity(policy.len() + key.len() + 1);
    namespaced.push_str(policy);
    namespaced.push(KEY_SEPARATOR);
    namespaced.push_str(key);
    namespaced
}
