//! Common utilities and types shared across Sluice crates.
//!
//! This crate contains the base building blocks for the Sluice query
//! gateway, including:
//! - **Configuration**: Strongly typed application configuration (`config`).
//! - **Error Handling**: The gateway error taxonomy (`error`).
//! - **Named Queries**: The read-only named-query registry (`registry`).
//! - **Resilience**: Circuit breaker for fault tolerance (`circuit_breaker`).
//! - **Values**: Parameter binding and row decoding (`value`).
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod models;
pub mod registry;
pub mod value;
