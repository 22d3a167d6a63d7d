//! Best-effort JWT expiry hint
//!
//! Reads the `exp` claim from the payload WITHOUT verifying the signature.
//! The value only decides when to refresh proactively; it is never a trust
//! decision. The server remains the authority on whether a token is valid.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: Option<f64>,
}

/// Expiry of `token` as unix seconds, if it is a JWT carrying an `exp` claim.
///
/// Returns `None` for opaque tokens, malformed payloads, or a missing claim.
/// Non-finite values or values outside the `i64` range count as unreadable.
pub fn expires_at(token: &str) -> Option<i64> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claim: ExpiryClaim = serde_json::from_slice(&bytes).ok()?;
    claim
        .exp
        .filter(|exp| exp.is_finite() && (i64::MIN as f64..i64::MAX as f64).contains(exp))
        .map(|exp| exp as i64)
}

/// Whether `token` expires within `window_secs` of `now` (unix seconds).
///
/// `None` when the expiry cannot be read; callers treat that as usable.
pub fn expires_within(token: &str, now: i64, window_secs: i64) -> Option<bool> {
    expires_at(token).map(|exp| exp.saturating_sub(now) <= window_secs)
}
