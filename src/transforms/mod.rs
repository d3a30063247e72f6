//! Built-in transform stages
//!
//! The orchestrator only knows the [`Transform`](crate::build::Transform)
//! trait; these are the stages the standard tasks are assembled from.
//!
//! # Module Structure
//!
//! - [`styles`] - Stylesheet preprocessing, prefixing and minification
//! - [`images`] - Lossless PNG and quality-bounded JPEG recompression
//! - [`scripts`] - Declaration lowering, bundling and minification
//! - [`lexer`] - Script tokenizer shared by the script stages

pub mod images;
pub mod lexer;
pub mod scripts;
pub mod styles;

pub use images::Compress;
pub use styles::browser_targets;
