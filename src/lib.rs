//! Assetflow - declarative front-end asset pipelines
//!
//! This library provides:
//! - File selection with deterministic ordering ([`build::discovery`])
//! - Typed transform stages composed into pipelines ([`build`])
//! - Source map composition and emission ([`sourcemap`], [`build::provenance`])
//! - A task registry with cycle detection and single-flight runs ([`registry`])
//! - Coalescing watch triggers ([`watch`])
//! - Built-in stylesheet, image and script stages ([`transforms`])

pub mod build;
pub mod cli;
pub mod config;
pub mod registry;
pub mod sourcemap;
pub mod tasks;
pub mod transforms;
pub mod watch;
