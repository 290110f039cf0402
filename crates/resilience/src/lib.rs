//! Retry primitives for the UnLost handoff service
//!
//! - `ExponentialBackoff`: capped exponential delay sequence
//! - `RetryPolicy` / `retry_with_backoff`: re-run an async operation while
//!   its error is classified as transient

pub mod backoff;
pub mod retry;

pub use backoff::ExponentialBackoff;
pub use retry::{retry_with_backoff, RetryError, RetryPolicy, Transient};
