//! Identity provider implementations.
//!
//! The production provider is the identity provider's own client SDK, reached
//! through `IdentityProvider`. This module only holds the scripted provider
//! used in development and tests.

#[cfg(any(test, feature = "mock"))]
mod mock;

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockProvider, PopupOutcome};
