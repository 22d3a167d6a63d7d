//! Resilient HTTP transport for identity-provider calls
//!
//! Every request the client issues (login, refresh, code exchange, profile)
//! goes through [`HttpTransport`], which binds each attempt to a timeout and
//! retries transient statuses with `Retry-After`-aware exponential backoff.
//!
//! Only HTTP statuses are retried. Connection failures and timeouts surface
//! immediately so the caller decides whether the operation is worth repeating.

pub mod client;
pub mod error;
pub mod policy;

pub use client::HttpTransport;
pub use error::{Error, Result};
pub use policy::{DEFAULT_RETRYABLE_STATUSES, ErrorClassification, RetryPolicy, parse_retry_after};
