//! Shared types, errors, and configuration for Tally.
//!
//! This crate provides common types used across all other crates:
//! - Money helpers with decimal precision
//! - Typed IDs for type-safe entity references
//! - Pagination types for history queries
//! - Application-wide error types
//! - Configuration management, including balance limit settings

pub mod config;
pub mod error;
pub mod types;

pub use config::{AppConfig, LimitsSettings};
pub use error::{AppError, AppResult};
