//! Shared building blocks for the Waggle workspace: configuration loading
//! and tracing initialization. Kept dependency-light so every crate can use
//! it without pulling in the storage stack.

pub mod config;
pub mod tracing_setup;

pub use config::WaggleConfig;
