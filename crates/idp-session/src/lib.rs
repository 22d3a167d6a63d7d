//! Token lifecycle for an identity-provider client
//!
//! Owns the stored token pair and keeps it usable: callers ask for an access
//! token and get one that is not about to expire, refreshed silently when
//! needed. Concurrent callers share a single refresh request.
//!
//! Session lifecycle:
//! 1. A login or code exchange hands the pair to `TokenManager::set_session`
//! 2. `get_access_token` returns the stored token, refreshing it when it
//!    expires within five minutes
//! 3. A failed refresh clears storage (fail closed) and notifies observers
//! 4. Logout calls `clear_session`

pub mod manager;
pub mod metrics;
pub mod observers;

pub use manager::{REFRESH_WINDOW, TokenManager};
pub use observers::{Observers, Subscription};
