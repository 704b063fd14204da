//! # Tollgate
//!
//! > Sliding-window request rate limiting with composable per-route policies.
//!
//! ## Features
//! * Exact sliding-window log per key, atomic under concurrent access
//! * Composable policies: key sources, skip predicates, custom rejections
//! * Presets for authentication, registration, password reset, uploads and APIs
//! * `X-RateLimit-*` and `Retry-After` response headers
//! * Background sweeper with graceful shutdown
//! * Fails open if the store breaks, so a limiter defect never blocks traffic
//!
//! ## Example
//! ```no_run
//! use tollgate::{RateLimiting, Outcome, RequestContext, presets::Preset};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut limiting = RateLimiting::builder()
//!     .with_preset(Preset::Auth)
//!     .build()?;
//! limiting.start()?;
//!
//! let login = limiting.filter("auth")?;
//!
//! let request = http::Request::post("/login").body(())?;
//! let ctx = RequestContext::from(request)
//!     .with_peer_addr("203.0.113.7:51234".parse()?);
//!
//! match login.check(&ctx)? {
//!     Outcome::Continue(headers) => { /* call the handler, then add `headers` */ }
//!     Outcome::Reject(rejection) => { /* respond with `rejection.into_response()` */ }
//! }
//!
//! limiting.shutdown(false).await;
//! # Ok(())
//! # }
//! ```

pub mod by;
pub mod error;
pub mod filter;
pub mod headers;
pub mod key;
pub mod policy;
pub mod presets;
pub mod request;
pub mod service;
pub mod sweeper;

pub use crate::filter::{Outcome, RateLimitFilter, Rejection};
pub use crate::policy::Policy;
pub use crate::request::RequestContext;
pub use crate::service::{RateLimiting, RateLimitingBuilder};
pub use tollgate_store::{
    Decision,
    ManualTimeSource,
    SlidingWindowStore,
    SweepReport,
    SystemTimeSource,
    TimeSource,
    WindowStatus,
    WindowStore,
};
