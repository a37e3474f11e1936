//! Functional core for tilshare.
//!
//! Everything here is pure: types, state transitions and the traits the
//! imperative shell implements. No I/O happens in this crate.

pub mod auth;
