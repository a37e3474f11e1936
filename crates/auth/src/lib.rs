//! Sign-in reconciliation for tilshare.
//!
//! This crate provides:
//! - `AuthController`, which drives popup and redirect sign-in and reconciles
//!   the outcome after a page reload
//! - Session storage adapters and environment probes
//! - The static auth callback page as an axum router

mod config;
mod controller;
mod environment;
mod handlers;
mod location;
mod providers;
mod storage;
mod templates;

pub use config::{
    AuthConfig, ConfigError, DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_LOOP_THRESHOLD, DEFAULT_LOOP_WINDOW,
};
pub use controller::{AuthController, AuthServices};
pub use environment::{FixedEnvironment, UserAgentProbe};
pub use handlers::auth_routes;
pub use location::MemoryLocation;
#[cfg(any(test, feature = "mock"))]
pub use providers::{MockProvider, PopupOutcome};
pub use storage::{load_flags, save_flags, MemoryStorage, UnavailableStorage};
pub use templates::AUTH_COMPLETE_MESSAGE;
