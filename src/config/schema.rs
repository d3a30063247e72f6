//! Configuration schema types for `assetflow.toml`
//!
//! Every section is optional; an absent file yields the defaults, which
//! describe the conventional `src/{sass,img,js}` → `dist/{css,img,js}` layout.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration file name searched for by the loader
pub const CONFIG_FILE: &str = "assetflow.toml";

/// PNG re-encoding effort
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PngCompression {
    Fast,
    Default,
    #[default]
    Best,
}

/// Script transpilation target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScriptPreset {
    /// Rewrite block-scoped declarations for ES5 engines
    #[default]
    Es5,
    /// Leave sources untouched
    Esnext,
}

/// Project layout section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Destination root for every pipeline
    #[serde(default = "default_dest")]
    pub dest: PathBuf,
    /// Root HTML file copied to the destination root
    #[serde(default = "default_entry")]
    pub entry: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self { dest: default_dest(), entry: default_entry() }
    }
}

fn default_dest() -> PathBuf {
    PathBuf::from("dist")
}

fn default_entry() -> PathBuf {
    PathBuf::from("index.html")
}

fn default_true() -> bool {
    true
}

/// Stylesheet pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StylesConfig {
    /// Source root
    #[serde(default = "default_styles_src")]
    pub src: PathBuf,
    /// Glob relative to `src`
    #[serde(default = "default_styles_pattern")]
    pub pattern: String,
    /// Output directory relative to `project.dest`
    #[serde(default = "default_styles_out")]
    pub out: PathBuf,
    /// Browserslist queries for the prefixing stage
    #[serde(default = "default_browsers")]
    pub browsers: Vec<String>,
    /// Emit `.map` files
    #[serde(default = "default_true")]
    pub source_maps: bool,
}

impl Default for StylesConfig {
    fn default() -> Self {
        Self {
            src: default_styles_src(),
            pattern: default_styles_pattern(),
            out: default_styles_out(),
            browsers: default_browsers(),
            source_maps: true,
        }
    }
}

fn default_styles_src() -> PathBuf {
    PathBuf::from("src/sass")
}

fn default_styles_pattern() -> String {
    "*.scss".to_string()
}

fn default_styles_out() -> PathBuf {
    PathBuf::from("css")
}

fn default_browsers() -> Vec<String> {
    vec!["last 2 versions".to_string()]
}

/// Image pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagesConfig {
    #[serde(default = "default_images_src")]
    pub src: PathBuf,
    #[serde(default = "default_images_pattern")]
    pub pattern: String,
    #[serde(default = "default_images_out")]
    pub out: PathBuf,
    #[serde(default)]
    pub png_compression: PngCompression,
    /// Lossy JPEG re-encode quality, 1-100. Unset copies JPEGs unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jpeg_quality: Option<u8>,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            src: default_images_src(),
            pattern: default_images_pattern(),
            out: default_images_out(),
            png_compression: PngCompression::default(),
            jpeg_quality: None,
        }
    }
}

fn default_images_src() -> PathBuf {
    PathBuf::from("src/img")
}

fn default_images_pattern() -> String {
    "*".to_string()
}

fn default_images_out() -> PathBuf {
    PathBuf::from("img")
}

/// Script pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptsConfig {
    #[serde(default = "default_scripts_src")]
    pub src: PathBuf,
    #[serde(default = "default_scripts_pattern")]
    pub pattern: String,
    #[serde(default = "default_scripts_out")]
    pub out: PathBuf,
    /// File name of the concatenated bundle
    #[serde(default = "default_bundle")]
    pub bundle: String,
    #[serde(default)]
    pub preset: ScriptPreset,
    #[serde(default = "default_true")]
    pub source_maps: bool,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            src: default_scripts_src(),
            pattern: default_scripts_pattern(),
            out: default_scripts_out(),
            bundle: default_bundle(),
            preset: ScriptPreset::default(),
            source_maps: true,
        }
    }
}

fn default_scripts_src() -> PathBuf {
    PathBuf::from("src/js")
}

fn default_scripts_pattern() -> String {
    "*.js".to_string()
}

fn default_scripts_out() -> PathBuf {
    PathBuf::from("js")
}

fn default_bundle() -> String {
    "all.js".to_string()
}

/// Watch mode settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Debounce window for filesystem events
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u32,
}

fn default_debounce_ms() -> u32 {
    100
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: default_debounce_ms() }
    }
}

/// Execution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Parallel artifact workers per pipeline (0 = available parallelism)
    #[serde(default)]
    pub jobs: usize,
    /// `sourceRoot` written into emitted source maps
    #[serde(default = "default_source_root")]
    pub source_root: String,
}

fn default_source_root() -> String {
    "/source/".to_string()
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self { jobs: 0, source_root: default_source_root() }
    }
}

/// Complete assetflow.toml configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetConfig {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub styles: StylesConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub scripts: ScriptsConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub build: BuildConfig,
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    /// Path to the invalid field (e.g., "styles.pattern")
    pub field: String,
    /// Error message
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: '{}' {}", CONFIG_FILE, self.field, self.message)
    }
}

impl AssetConfig {
    /// Validate the configuration and return any errors
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: &str| {
            errors.push(ConfigValidationError { field: field.to_string(), message: message.to_string() })
        };

        for (section, pattern) in [
            ("styles", &self.styles.pattern),
            ("images", &self.images.pattern),
            ("scripts", &self.scripts.pattern),
        ] {
            let field = format!("{}.pattern", section);
            if pattern.trim().is_empty() {
                push(&field, "must be a non-empty glob");
            } else if let Err(e) = glob::Pattern::new(pattern) {
                push(&field, &format!("is not a valid glob: {}", e.msg));
            }
        }

        for (field, out) in [
            ("styles.out", &self.styles.out),
            ("images.out", &self.images.out),
            ("scripts.out", &self.scripts.out),
        ] {
            if out.is_absolute() {
                push(field, "must be relative to project.dest");
            }
        }

        if self.styles.browsers.iter().all(|q| q.trim().is_empty()) {
            push("styles.browsers", "must contain at least one query");
        }

        if self.images.jpeg_quality.is_some_and(|q| q == 0 || q > 100) {
            push("images.jpeg_quality", "must be between 1 and 100");
        }

        let bundle = self.scripts.bundle.trim();
        if bundle.is_empty() || bundle.contains('/') || bundle.contains('\\') {
            push("scripts.bundle", "must be a plain file name");
        }

        if self.watch.debounce_ms == 0 {
            push("watch.debounce_ms", "must be a positive integer");
        }

        errors
    }

    /// Check if validation passed
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_parse() {
        let config: AssetConfig = toml::from_str("").unwrap();
        assert_eq!(config, AssetConfig::default());
        assert_eq!(config.project.dest, PathBuf::from("dist"));
        assert_eq!(config.styles.src, PathBuf::from("src/sass"));
        assert_eq!(config.styles.pattern, "*.scss");
        assert_eq!(config.styles.browsers, vec!["last 2 versions"]);
        assert_eq!(config.images.png_compression, PngCompression::Best);
        assert_eq!(config.images.jpeg_quality, None);
        assert_eq!(config.scripts.bundle, "all.js");
        assert_eq!(config.scripts.preset, ScriptPreset::Es5);
        assert_eq!(config.build.source_root, "/source/");
        assert!(config.is_valid());
    }

    #[test]
    fn test_full_config_parse() {
        let toml = r#"
[project]
dest = "public"
entry = "app.html"

[styles]
src = "styles"
pattern = "**/*.scss"
browsers = ["chrome 90", "firefox 88"]
source_maps = false

[images]
png_compression = "fast"
jpeg_quality = 65

[scripts]
bundle = "app.js"
preset = "esnext"

[watch]
debounce_ms = 250

[build]
jobs = 4
source_root = ""
"#;
        let config: AssetConfig = toml::from_str(toml).unwrap();

        assert_eq!(config.project.dest, PathBuf::from("public"));
        assert_eq!(config.project.entry, PathBuf::from("app.html"));
        assert_eq!(config.styles.src, PathBuf::from("styles"));
        assert_eq!(config.styles.out, PathBuf::from("css"));
        assert!(!config.styles.source_maps);
        assert_eq!(config.styles.browsers.len(), 2);
        assert_eq!(config.images.png_compression, PngCompression::Fast);
        assert_eq!(config.images.jpeg_quality, Some(65));
        assert_eq!(config.scripts.bundle, "app.js");
        assert_eq!(config.scripts.preset, ScriptPreset::Esnext);
        assert!(config.scripts.source_maps);
        assert_eq!(config.watch.debounce_ms, 250);
        assert_eq!(config.build.jobs, 4);
        assert!(config.is_valid());
    }

    #[test]
    fn test_unknown_preset_rejected() {
        let result: Result<AssetConfig, _> = toml::from_str("[scripts]\npreset = \"es3\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = AssetConfig::default();
        config.styles.pattern = "[".to_string();
        config.images.jpeg_quality = Some(0);
        config.scripts.bundle = "js/all.js".to_string();
        config.styles.browsers = vec![];
        config.watch.debounce_ms = 0;

        let fields: Vec<String> = config.validate().into_iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "styles.pattern",
                "styles.browsers",
                "images.jpeg_quality",
                "scripts.bundle",
                "watch.debounce_ms"
            ]
        );
    }

    #[test]
    fn test_validation_error_display() {
        let err = ConfigValidationError {
            field: "images.jpeg_quality".to_string(),
            message: "must be between 1 and 100".to_string(),
        };
        assert_eq!(err.to_string(), "assetflow.toml: 'images.jpeg_quality' must be between 1 and 100");
    }
}
