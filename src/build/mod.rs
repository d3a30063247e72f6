//! Pipeline engine for assetflow
//!
//! Runs declarative stage compositions over file selections and writes the
//! results, with source maps, under a destination root.
//!
//! # Overview
//!
//! The engine consists of:
//! - **Discovery**: resolve a [`Pattern`] into an ordered [`Selection`]
//! - **Stages**: pure [`Transform`]s described by [`StageDescriptor`]s
//! - **Execution**: [`Pipeline::run`] folds stages over the selection and
//!   persists outputs, finalizing provenance with [`ProvenanceWriter`]
//!
//! # Example
//!
//! ```ignore
//! use assetflow::build::{ArtifactKind, Pattern, Pipeline, PipelineDefinition};
//!
//! let source = Pattern::new("src/js", "*.js")?;
//! let def = PipelineDefinition::builder("scripts", source, ArtifactKind::Script, "dist/js")
//!     .stage(concat_stage)
//!     .build()?;
//!
//! let result = Pipeline::new(&def).with_jobs(4).run()?;
//! println!("{}", result.summary());
//! ```

pub mod artifact;
pub mod context;
pub mod discovery;
pub mod error;
pub mod pipeline;
pub mod provenance;
pub mod result;
pub mod stage;

pub use artifact::*;
pub use context::*;
pub use discovery::*;
pub use error::*;
pub use pipeline::*;
pub use provenance::*;
pub use result::*;
pub use stage::*;
