//! Error Handling tools
//!
//! Exceeding a rate limit is not an error: it is an
//! [`Outcome::Reject`](crate::Outcome::Reject) value. Errors are reserved for
//! misconfiguration, which should fail fast at startup, and for store
//! defects, which the [`RateLimitFilter`](crate::RateLimitFilter) absorbs by
//! failing open.

pub use tollgate_store::{Error, ErrorKind};
