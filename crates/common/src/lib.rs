//! Common utilities and types shared across the relay and the mesh client.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for common data types
pub mod types;

/// Module for stripping markup from user-supplied text
pub mod sanitize;

/// Module for secret types that prevent accidental logging
pub mod secret;
