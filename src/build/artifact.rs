//! Artifacts flowing through a pipeline.
//!
//! An [`Artifact`] is an immutable, in-memory unit of content: a path-like
//! identifier relative to the pipeline's source root, a content type, the
//! payload bytes, and optional provenance back to the original sources.
//! Stages never mutate an artifact; they derive new ones.

use crate::sourcemap::SourceMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Content type of an artifact, used to type-check stage compositions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    /// Stylesheet source before compilation (e.g. `.scss`)
    Stylesheet,
    /// Compiled CSS
    Css,
    /// Raster image (png, jpeg, gif, ...)
    RasterImage,
    /// Script source
    Script,
    /// Source map emitted next to an output
    SourceMap,
    /// Anything; used by copy-only pipelines
    Any,
}

impl ArtifactKind {
    /// Whether an artifact of kind `produced` may flow into an input expecting `self`.
    pub fn accepts(self, produced: ArtifactKind) -> bool {
        self == ArtifactKind::Any || self == produced
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Stylesheet => write!(f, "stylesheet"),
            ArtifactKind::Css => write!(f, "css"),
            ArtifactKind::RasterImage => write!(f, "raster-image"),
            ArtifactKind::Script => write!(f, "script"),
            ArtifactKind::SourceMap => write!(f, "source-map"),
            ArtifactKind::Any => write!(f, "any"),
        }
    }
}

/// One unit of content in a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    id: String,
    kind: ArtifactKind,
    content: Arc<[u8]>,
    provenance: Option<Arc<SourceMap>>,
}

impl Artifact {
    /// Create a fresh artifact with no provenance (it is its own origin).
    pub fn new(id: impl Into<String>, kind: ArtifactKind, content: impl Into<Vec<u8>>) -> Self {
        Self { id: normalize_id(&id.into()), kind, content: content.into().into(), provenance: None }
    }

    /// Derive a new artifact from this one, keeping its provenance.
    ///
    /// Stages that do not shift byte offsets (or that pass content through)
    /// rely on this to keep the accumulated source map intact.
    pub fn derive(
        &self,
        id: impl Into<String>,
        kind: ArtifactKind,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            id: normalize_id(&id.into()),
            kind,
            content: content.into().into(),
            provenance: self.provenance.clone(),
        }
    }

    /// Return a copy of this artifact carrying the given provenance.
    pub fn with_provenance(&self, map: SourceMap) -> Self {
        Self { provenance: Some(Arc::new(map)), ..self.clone() }
    }

    /// Return a copy of this artifact with different content and the same identity.
    pub fn with_content(&self, content: impl Into<Vec<u8>>) -> Self {
        Self { content: content.into().into(), ..self.clone() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Content as UTF-8 text, if valid.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }

    pub fn provenance(&self) -> Option<&SourceMap> {
        self.provenance.as_deref()
    }

    /// File name component of the identifier.
    pub fn file_name(&self) -> &str {
        self.id.rsplit('/').next().unwrap_or(&self.id)
    }

    /// Identifier with its extension replaced (or added).
    pub fn id_with_extension(&self, ext: &str) -> String {
        let name = self.file_name();
        let stem_len = match name.rfind('.') {
            Some(0) | None => name.len(),
            Some(dot) => dot,
        };
        let prefix_len = self.id.len() - name.len();
        format!("{}{}.{}", &self.id[..prefix_len], &name[..stem_len], ext)
    }
}

/// Turn a relative path into an artifact identifier (forward slashes, no `./`).
pub fn id_from_path(path: &Path) -> String {
    let parts: Vec<String> =
        path.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
    normalize_id(&parts.join("/"))
}

fn normalize_id(id: &str) -> String {
    let id = id.replace('\\', "/");
    let trimmed = id.trim_start_matches("./");
    trimmed.to_string()
}
