//! Final source-map emission for pipeline outputs.

use crate::build::{Artifact, ArtifactKind};
use crate::sourcemap::SourceMapError;

/// Turns an artifact's accumulated provenance into a sibling `.map` artifact
/// and links the output to it with a `sourceMappingURL` comment.
#[derive(Debug, Clone, Default)]
pub struct ProvenanceWriter {
    source_root: Option<String>,
}

impl ProvenanceWriter {
    pub fn new(source_root: Option<String>) -> Self {
        Self { source_root: source_root.filter(|r| !r.is_empty()) }
    }

    /// Finalize `artifact`.
    ///
    /// Returns `None` when the artifact carries no provenance. Otherwise
    /// returns the output with its link comment appended, and the map.
    pub fn finalize(&self, artifact: &Artifact) -> Result<Option<(Artifact, Artifact)>, SourceMapError> {
        let Some(map) = artifact.provenance() else {
            return Ok(None);
        };

        let map_id = format!("{}.map", artifact.id());
        let map_name = format!("{}.map", artifact.file_name());
        let json = map.to_json(artifact.file_name(), self.source_root.as_deref())?;
        let map_artifact = Artifact::new(map_id, ArtifactKind::SourceMap, json);

        let output = match link_comment(artifact.kind(), &map_name) {
            Some(comment) => {
                let mut content = artifact.content().to_vec();
                if !content.is_empty() && !content.ends_with(b"\n") {
                    content.push(b'\n');
                }
                content.extend_from_slice(comment.as_bytes());
                artifact.with_content(content)
            }
            None => artifact.clone(),
        };

        Ok(Some((output, map_artifact)))
    }
}

fn link_comment(kind: ArtifactKind, map_name: &str) -> Option<String> {
    match kind {
        ArtifactKind::Css => Some(format!("/*# sourceMappingURL={} */\n", map_name)),
        ArtifactKind::Script => Some(format!("//# sourceMappingURL={}\n", map_name)),
        _ => None,
    }
}
