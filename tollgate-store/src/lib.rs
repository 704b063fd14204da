//! Tollgate Store
//!
//! A concurrent, in-memory sliding-window store used by the Tollgate
//! rate limiter to decide whether a keyed request may proceed.

mod error;
mod store;

pub use error::{Error, ErrorKind};
pub use store::{
    Decision,
    ManualTimeSource,
    SlidingWindowStore,
    SweepReport,
    SystemTimeSource,
    TimeSource,
    WindowStatus,
    WindowStore,
};
