//! Server-side service logic.
//!
//! ## Structure
//!
//! - [`auth`] - principal store and handshake authenticator
//! - [`config`] - CLI surface and validated configuration
//! - [`greeting`] - the `greetings` route: generator, reverse health
//!   monitor, and the race between them
//! - [`telemetry`] - log subscriber setup

pub mod auth;
pub mod config;
pub mod greeting;
pub mod telemetry;
