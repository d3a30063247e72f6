//! File selection for pipelines.
//!
//! A [`Pattern`] is a root directory plus a glob expression relative to it.
//! [`resolve`] lists the matching files at call time and returns a
//! [`Selection`] whose content is read lazily. Nothing is cached between
//! calls, so every pipeline invocation sees the current file set.

use crate::build::{id_from_path, Artifact, ArtifactKind, ConfigurationError, SelectionError};
use glob::MatchOptions;
use std::path::{Path, PathBuf};

fn match_options() -> MatchOptions {
    MatchOptions { case_sensitive: true, require_literal_separator: true, require_literal_leading_dot: true }
}

/// Glob-like selection rule: root directory + match expression.
#[derive(Debug, Clone)]
pub struct Pattern {
    root: PathBuf,
    expr: String,
    compiled: glob::Pattern,
}

impl Pattern {
    /// Create a pattern, rejecting malformed or absolute expressions.
    pub fn new(root: impl Into<PathBuf>, expr: &str) -> Result<Self, ConfigurationError> {
        let invalid = |message: &str| ConfigurationError::Pattern {
            pattern: expr.to_string(),
            message: message.to_string(),
        };

        if expr.trim().is_empty() {
            return Err(invalid("expression is empty"));
        }
        if expr.starts_with('/') || Path::new(expr).is_absolute() {
            return Err(invalid("expression must be relative to the pattern root"));
        }
        if expr.split('/').any(|part| part == "..") {
            return Err(invalid("expression must not leave the pattern root"));
        }

        let compiled = glob::Pattern::new(expr).map_err(|e| invalid(e.msg))?;
        Ok(Self { root: root.into(), expr: expr.to_string(), compiled })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// Copy of this pattern anchored at a different root.
    pub fn with_root(&self, root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), ..self.clone() }
    }

    /// Identifier of `path` relative to the root, if the pattern selects it.
    ///
    /// Used to filter filesystem events; `path` may be absolute or relative to
    /// the current directory, as long as it lies under the root.
    pub fn relative_id(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        if rel.as_os_str().is_empty() {
            return None;
        }
        let id = id_from_path(rel);
        self.compiled.matches_with(&id, match_options()).then_some(id)
    }

    /// Whether `path` is selected by this pattern.
    pub fn matches(&self, path: &Path) -> bool {
        self.relative_id(path).is_some()
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.root.display(), self.expr)
    }
}

/// One selected file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub id: String,
    pub path: PathBuf,
}

/// Files matched by one resolution, sorted by identifier.
#[derive(Debug, Clone)]
pub struct Selection {
    kind: ArtifactKind,
    files: Vec<SelectedFile>,
}

impl Selection {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> &[SelectedFile] {
        &self.files
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.id.as_str())
    }

    /// Read each selected file into an [`Artifact`], in identifier order.
    ///
    /// Content is read when the iterator advances; calling `iter` again
    /// re-reads from disk.
    pub fn iter(&self) -> impl Iterator<Item = Result<Artifact, SelectionError>> + '_ {
        self.files.iter().map(move |file| {
            let content = std::fs::read(&file.path)
                .map_err(|source| SelectionError::Io { path: file.path.clone(), source })?;
            Ok(Artifact::new(file.id.clone(), self.kind, content))
        })
    }
}

/// Resolve a pattern against the filesystem.
///
/// The root must be an existing directory; an empty match is not an error.
pub fn resolve(pattern: &Pattern, kind: ArtifactKind) -> Result<Selection, SelectionError> {
    let root = pattern.root();
    if !root.is_dir() {
        return Err(SelectionError::RootNotFound(root.to_path_buf()));
    }

    let escaped_root = glob::Pattern::escape(&root.to_string_lossy());
    let full = format!("{}/{}", escaped_root.trim_end_matches('/'), pattern.expr());

    // Pattern::new already validated the expression; a failure here means the
    // root itself could not be expressed as a glob.
    let paths = glob::glob_with(&full, match_options()).map_err(|e| SelectionError::Io {
        path: root.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e.msg),
    })?;

    let mut files = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) if path.is_file() => {
                let rel = path.strip_prefix(root).unwrap_or(&path);
                files.push(SelectedFile { id: id_from_path(rel), path });
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(path = %e.path().display(), error = %e.error(), "skipping unreadable path");
            }
        }
    }

    files.sort_by(|a, b| a.id.cmp(&b.id));
    files.dedup_by(|a, b| a.id == b.id);

    tracing::debug!(pattern = %pattern, count = files.len(), "resolved selection");
    Ok(Selection { kind, files })
}
