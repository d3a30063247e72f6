//! The standard task set, wired from configuration.
//!
//! | task | units |
//! |---|---|
//! | `styles` | stylesheet pipeline |
//! | `images` | image pipeline |
//! | `scripts` | script pipeline |
//! | `html` | copy of the entry HTML file to the destination root |
//! | `default` | all of the above, then watch stylesheets |
//! | `styles:watch` | watch stylesheets only |
//!
//! `sassToDist` and `sass:watch` are registered as aliases for the legacy
//! task names.

use crate::build::{ArtifactKind, BuildContext, ConfigurationError, Pattern, PipelineDefinition, StageDescriptor};
use crate::registry::{Task, TaskRegistry};
use crate::transforms::{images, scripts, styles};
use std::path::Path;

/// Build the stylesheet pipeline: compile, prefix, minify.
///
/// Imports resolve under the pattern root; partials are compiled only
/// through the files that import them.
pub fn styles_pipeline(ctx: &BuildContext) -> Result<PipelineDefinition, ConfigurationError> {
    let config = &ctx.config().styles;
    let targets = styles::browser_targets(&config.browsers)?;

    let pattern = styles_pattern(ctx)?;
    let compile = styles::Compile::new(pattern.root().to_path_buf());

    PipelineDefinition::builder("styles", pattern, ArtifactKind::Stylesheet, ctx.dest_path(&config.out))
        .stage(StageDescriptor::each("compile", ArtifactKind::Stylesheet, ArtifactKind::Css, compile))
        .stage(
            StageDescriptor::each("autoprefix", ArtifactKind::Css, ArtifactKind::Css, styles::Autoprefix::new(targets))
                .after("compile"),
        )
        .stage(
            StageDescriptor::each("minify", ArtifactKind::Css, ArtifactKind::Css, styles::Minify::new(targets))
                .after("autoprefix"),
        )
        .source_maps(config.source_maps)
        .source_root(ctx.config().build.source_root.clone())
        .build()
}

/// Build the image pipeline.
pub fn images_pipeline(ctx: &BuildContext) -> Result<PipelineDefinition, ConfigurationError> {
    let config = &ctx.config().images;
    let pattern = Pattern::new(ctx.resolve_path(&config.src), &config.pattern)?;

    PipelineDefinition::builder("images", pattern, ArtifactKind::RasterImage, ctx.dest_path(&config.out))
        .stage(StageDescriptor::each(
            "compress",
            ArtifactKind::RasterImage,
            ArtifactKind::RasterImage,
            images::Compress::new(config.png_compression, config.jpeg_quality),
        ))
        .build()
}

/// Build the script pipeline: transpile, concatenate, minify.
pub fn scripts_pipeline(ctx: &BuildContext) -> Result<PipelineDefinition, ConfigurationError> {
    let config = &ctx.config().scripts;
    let pattern = Pattern::new(ctx.resolve_path(&config.src), &config.pattern)?;

    let mut builder =
        PipelineDefinition::builder("scripts", pattern, ArtifactKind::Script, ctx.dest_path(&config.out));
    let mut previous = None;
    if scripts::needs_transpile(config.preset) {
        builder = builder.stage(StageDescriptor::each(
            "transpile",
            ArtifactKind::Script,
            ArtifactKind::Script,
            scripts::Transpile::new(config.preset),
        ));
        previous = Some("transpile");
    }

    let mut concat =
        StageDescriptor::fold("concat", ArtifactKind::Script, ArtifactKind::Script, scripts::Concat::new(&config.bundle));
    if let Some(prev) = previous {
        concat = concat.after(prev);
    }

    builder
        .stage(concat)
        .stage(StageDescriptor::each("minify", ArtifactKind::Script, ArtifactKind::Script, scripts::Minify).after("concat"))
        .source_maps(config.source_maps)
        .source_root(ctx.config().build.source_root.clone())
        .build()
}

/// Zero-stage pipeline copying the entry HTML file to the destination root.
pub fn html_pipeline(ctx: &BuildContext) -> Result<PipelineDefinition, ConfigurationError> {
    let entry = ctx.resolve_path(&ctx.config().project.entry);
    let invalid = || ConfigurationError::Pattern {
        pattern: entry.display().to_string(),
        message: "entry must name a file".to_string(),
    };
    let name = entry.file_name().and_then(|n| n.to_str()).ok_or_else(invalid)?;
    let root = entry.parent().unwrap_or_else(|| Path::new("."));
    let pattern = Pattern::new(root, &glob::Pattern::escape(name))?;

    PipelineDefinition::builder("html", pattern, ArtifactKind::Any, ctx.dest_dir()).build()
}

fn styles_pattern(ctx: &BuildContext) -> Result<Pattern, ConfigurationError> {
    let config = &ctx.config().styles;
    Pattern::new(ctx.resolve_path(&config.src), &config.pattern)
}

/// Register the standard tasks.
pub fn standard_registry(ctx: &BuildContext) -> Result<TaskRegistry, ConfigurationError> {
    let mut registry = TaskRegistry::new().with_jobs(ctx.jobs());
    let styles_watch = styles_pattern(ctx)?;

    registry.register(Task::new("styles").describe("Compile, prefix and minify stylesheets").pipeline(styles_pipeline(ctx)?))?;
    registry.register(Task::new("images").describe("Recompress images").pipeline(images_pipeline(ctx)?))?;
    registry.register(Task::new("scripts").describe("Transpile, bundle and minify scripts").pipeline(scripts_pipeline(ctx)?))?;
    registry.register(Task::new("html").describe("Copy the entry HTML file").pipeline(html_pipeline(ctx)?))?;
    registry.register(
        Task::new("default")
            .describe("Build everything, then watch stylesheets")
            .subtask("styles")
            .subtask("images")
            .subtask("scripts")
            .subtask("html")
            .watch(styles_watch.clone(), "styles"),
    )?;
    registry.register(Task::new("styles:watch").describe("Watch stylesheets").watch(styles_watch.clone(), "styles"))?;

    registry.register(Task::new("sassToDist").describe("Alias of styles").subtask("styles"))?;
    registry.register(Task::new("sass:watch").describe("Alias of styles:watch").watch(styles_watch, "styles"))?;

    registry.validate()?;
    tracing::debug!(tasks = registry.len(), "registered standard tasks");
    Ok(registry)
}
