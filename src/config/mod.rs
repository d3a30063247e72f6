//! Configuration module for assetflow
//!
//! Provides types, discovery and parsing for `assetflow.toml`.

pub mod loader;
pub mod schema;

pub use loader::*;
pub use schema::*;
