//! Refresh outcome counters
//!
//! - `idp_token_refresh_total` (counter): label `outcome`
//!   (`success`, `rejected`, `error`, `superseded`)

/// Record the outcome of one refresh attempt.
pub fn record_refresh(outcome: &'static str) {
    metrics::counter!("idp_token_refresh_total", "outcome" => outcome).increment(1);
}
