//! Shared primitives for the identity-provider client workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
