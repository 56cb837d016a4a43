//! # Chanvault Common Library
//!
//! Shared code for the chanvault services including:
//! - Error types
//! - Storage root resolution and TOML configuration
//! - Database initialization and settings access

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
