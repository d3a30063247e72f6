//! Source map (revision 3) model, codec and composition.
//!
//! Every stage that shifts byte offsets contributes a fragment mapping its
//! output back to its input. Fragments compose: looking a position up in the
//! newest fragment and then in the artifact's accumulated map yields a
//! position in the original source file.
//!
//! Lines and columns are zero-based, as in the serialized format.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const BASE64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Error reading or writing a source map.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SourceMapError {
    #[error("invalid source map JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported source map version {0}")]
    UnsupportedVersion(u8),
    #[error("invalid VLQ mapping data: {0}")]
    InvalidMappings(String),
}

/// A single generated → original position pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Mapping {
    pub generated_line: u32,
    pub generated_column: u32,
    /// Index into [`SourceMap::sources`]
    pub source: u32,
    pub original_line: u32,
    pub original_column: u32,
}

/// Serialized layout of a revision 3 source map.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSourceMap {
    version: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_root: Option<String>,
    sources: Vec<String>,
    #[serde(default)]
    sources_content: Vec<Option<String>>,
    #[serde(default)]
    names: Vec<String>,
    mappings: String,
}

/// In-memory source map. Mappings are kept sorted by generated position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMap {
    sources: Vec<String>,
    sources_content: Vec<Option<String>>,
    mappings: Vec<Mapping>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Line-for-line identity map of `content`.
    pub fn identity(source: &str, content: &str) -> Self {
        let mut map = Self::new();
        let index = map.add_source(source, Some(content));
        for (line, _) in content.lines().enumerate() {
            map.add_mapping(Mapping {
                generated_line: line as u32,
                generated_column: 0,
                source: index,
                original_line: line as u32,
                original_column: 0,
            });
        }
        map
    }

    /// Register a source, returning its index. Sources are deduplicated by name;
    /// content already recorded for a name is kept.
    pub fn add_source(&mut self, name: &str, content: Option<&str>) -> u32 {
        if let Some(index) = self.sources.iter().position(|s| s == name) {
            if self.sources_content[index].is_none() {
                self.sources_content[index] = content.map(str::to_string);
            }
            return index as u32;
        }
        self.sources.push(name.to_string());
        self.sources_content.push(content.map(str::to_string));
        (self.sources.len() - 1) as u32
    }

    /// Insert a mapping, keeping generated-position order.
    pub fn add_mapping(&mut self, mapping: Mapping) {
        match self.mappings.last() {
            Some(last) if *last > mapping => {
                let at = self.mappings.partition_point(|m| *m <= mapping);
                self.mappings.insert(at, mapping);
            }
            _ => self.mappings.push(mapping),
        }
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn source_content(&self, index: u32) -> Option<&str> {
        self.sources_content.get(index as usize).and_then(|c| c.as_deref())
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Find the mapping covering a generated position: the closest mapping at
    /// or before `column` on the same generated line.
    pub fn lookup(&self, line: u32, column: u32) -> Option<&Mapping> {
        let end = self
            .mappings
            .partition_point(|m| (m.generated_line, m.generated_column) <= (line, column));
        let candidate = self.mappings[..end].last()?;
        (candidate.generated_line == line).then_some(candidate)
    }

    /// Resolve a generated position all the way to `(source name, line, column)`.
    pub fn original_position(&self, line: u32, column: u32) -> Option<(&str, u32, u32)> {
        let m = self.lookup(line, column)?;
        let name = self.sources.get(m.source as usize)?;
        Some((name.as_str(), m.original_line, m.original_column))
    }

    /// Compose this map with the maps of its sources.
    ///
    /// `upstream[i]` is the accumulated map for `self.sources()[i]`, or `None`
    /// when that source is itself an original file. Mappings that land on an
    /// unmapped upstream position are dropped.
    pub fn compose(&self, upstream: &[Option<&SourceMap>]) -> SourceMap {
        let mut out = SourceMap::new();

        for m in &self.mappings {
            let index = m.source as usize;
            match upstream.get(index).copied().flatten() {
                Some(inner) => {
                    if let Some(u) = inner.lookup(m.original_line, m.original_column) {
                        let name = &inner.sources[u.source as usize];
                        let source = out.add_source(name, inner.source_content(u.source));
                        out.add_mapping(Mapping {
                            generated_line: m.generated_line,
                            generated_column: m.generated_column,
                            source,
                            original_line: u.original_line,
                            original_column: u.original_column,
                        });
                    }
                }
                None => {
                    let Some(name) = self.sources.get(index) else { continue };
                    let source = out.add_source(name, self.source_content(m.source));
                    out.add_mapping(Mapping { source, ..*m });
                }
            }
        }

        out
    }

    /// Serialize as revision 3 JSON.
    pub fn to_json(&self, file: &str, source_root: Option<&str>) -> Result<String, SourceMapError> {
        let raw = RawSourceMap {
            version: 3,
            file: Some(file.to_string()),
            source_root: source_root.map(str::to_string),
            sources: self.sources.clone(),
            sources_content: self.sources_content.clone(),
            names: Vec::new(),
            mappings: encode_mappings(&self.mappings),
        };
        Ok(serde_json::to_string(&raw)?)
    }

    /// Parse revision 3 JSON. `names` are ignored.
    pub fn from_json(json: &str) -> Result<SourceMap, SourceMapError> {
        let raw: RawSourceMap = serde_json::from_str(json)?;
        if raw.version != 3 {
            return Err(SourceMapError::UnsupportedVersion(raw.version));
        }

        let mut sources_content = raw.sources_content;
        sources_content.resize(raw.sources.len(), None);

        let mut map = SourceMap { sources: raw.sources, sources_content, mappings: Vec::new() };
        for mapping in decode_mappings(&raw.mappings)? {
            if mapping.source as usize >= map.sources.len() {
                return Err(SourceMapError::InvalidMappings(format!(
                    "source index {} out of range",
                    mapping.source
                )));
            }
            map.add_mapping(mapping);
        }
        Ok(map)
    }
}

fn encode_vlq(out: &mut String, value: i64) {
    let mut vlq = if value < 0 { ((-value) << 1) | 1 } else { value << 1 };
    loop {
        let mut digit = (vlq & 31) as usize;
        vlq >>= 5;
        if vlq > 0 {
            digit |= 32;
        }
        out.push(BASE64[digit] as char);
        if vlq == 0 {
            break;
        }
    }
}

fn decode_base64(byte: u8) -> Option<i64> {
    BASE64.iter().position(|&b| b == byte).map(|p| p as i64)
}

fn encode_mappings(mappings: &[Mapping]) -> String {
    let mut out = String::new();
    let mut line = 0u32;
    let mut prev_column = 0i64;
    let mut prev_source = 0i64;
    let mut prev_orig_line = 0i64;
    let mut prev_orig_column = 0i64;
    let mut first_in_line = true;

    for m in mappings {
        while line < m.generated_line {
            out.push(';');
            line += 1;
            prev_column = 0;
            first_in_line = true;
        }
        if !first_in_line {
            out.push(',');
        }
        first_in_line = false;

        encode_vlq(&mut out, m.generated_column as i64 - prev_column);
        encode_vlq(&mut out, m.source as i64 - prev_source);
        encode_vlq(&mut out, m.original_line as i64 - prev_orig_line);
        encode_vlq(&mut out, m.original_column as i64 - prev_orig_column);

        prev_column = m.generated_column as i64;
        prev_source = m.source as i64;
        prev_orig_line = m.original_line as i64;
        prev_orig_column = m.original_column as i64;
    }

    out
}

fn decode_mappings(encoded: &str) -> Result<Vec<Mapping>, SourceMapError> {
    let mut mappings = Vec::new();
    let mut source = 0i64;
    let mut orig_line = 0i64;
    let mut orig_column = 0i64;

    for (line, group) in encoded.split(';').enumerate() {
        let mut column = 0i64;
        for segment in group.split(',').filter(|s| !s.is_empty()) {
            let fields = decode_segment(segment)?;
            match fields.len() {
                1 => {
                    column += fields[0];
                }
                4 | 5 => {
                    column += fields[0];
                    source += fields[1];
                    orig_line += fields[2];
                    orig_column += fields[3];
                    if column < 0 || source < 0 || orig_line < 0 || orig_column < 0 {
                        return Err(SourceMapError::InvalidMappings(format!(
                            "negative position in segment '{}'",
                            segment
                        )));
                    }
                    mappings.push(Mapping {
                        generated_line: line as u32,
                        generated_column: column as u32,
                        source: source as u32,
                        original_line: orig_line as u32,
                        original_column: orig_column as u32,
                    });
                }
                n => {
                    return Err(SourceMapError::InvalidMappings(format!(
                        "segment '{}' has {} fields",
                        segment, n
                    )))
                }
            }
        }
    }

    Ok(mappings)
}

fn decode_segment(segment: &str) -> Result<Vec<i64>, SourceMapError> {
    let mut fields = Vec::new();
    let mut value = 0i64;
    let mut shift = 0u32;

    for byte in segment.bytes() {
        let digit = decode_base64(byte).ok_or_else(|| {
            SourceMapError::InvalidMappings(format!("invalid base64 character '{}'", byte as char))
        })?;
        if shift > 60 {
            return Err(SourceMapError::InvalidMappings("VLQ value overflow".to_string()));
        }
        value += (digit & 31) << shift;
        if digit & 32 != 0 {
            shift += 5;
        } else {
            let negative = value & 1 == 1;
            let magnitude = value >> 1;
            fields.push(if negative { -magnitude } else { magnitude });
            value = 0;
            shift = 0;
        }
    }

    if shift != 0 {
        return Err(SourceMapError::InvalidMappings(format!(
            "truncated VLQ in segment '{}'",
            segment
        )));
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(gl: u32, gc: u32, src: u32, ol: u32, oc: u32) -> Mapping {
        Mapping {
            generated_line: gl,
            generated_column: gc,
            source: src,
            original_line: ol,
            original_column: oc,
        }
    }

    #[test]
    fn test_vlq_known_values() {
        let mut s = String::new();
        encode_vlq(&mut s, 0);
        encode_vlq(&mut s, 1);
        encode_vlq(&mut s, -1);
        encode_vlq(&mut s, 16);
        assert_eq!(s, "ACDgB");
        assert_eq!(decode_segment("ACDgB").unwrap(), vec![0, 1, -1, 16]);
    }

    #[test]
    fn test_encode_mappings_layout() {
        let mappings = vec![mapping(0, 0, 0, 0, 0), mapping(0, 4, 0, 0, 4), mapping(2, 2, 0, 3, 0)];
        assert_eq!(encode_mappings(&mappings), "AAAA,IAAI;;EAGJ");
    }

    #[test]
    fn test_json_roundtrip_preserves_mappings() {
        let mut map = SourceMap::new();
        map.add_source("a.scss", Some("a { b: c }"));
        map.add_source("b.scss", None);
        map.add_mapping(mapping(0, 0, 0, 0, 0));
        map.add_mapping(mapping(0, 7, 1, 4, 2));
        map.add_mapping(mapping(3, 1, 0, 1, 0));

        let json = map.to_json("out.css", Some("/source/")).unwrap();
        let parsed = SourceMap::from_json(&json).unwrap();
        assert_eq!(parsed, map);

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["version"], 3);
        assert_eq!(value["file"], "out.css");
        assert_eq!(value["sourceRoot"], "/source/");
        assert_eq!(value["sources"][0], "a.scss");
    }

    #[test]
    fn test_add_mapping_keeps_order() {
        let mut map = SourceMap::new();
        map.add_source("x", None);
        map.add_mapping(mapping(1, 0, 0, 1, 0));
        map.add_mapping(mapping(0, 5, 0, 0, 5));
        map.add_mapping(mapping(0, 1, 0, 0, 1));
        let cols: Vec<_> =
            map.mappings().iter().map(|m| (m.generated_line, m.generated_column)).collect();
        assert_eq!(cols, vec![(0, 1), (0, 5), (1, 0)]);
    }

    #[test]
    fn test_lookup_same_line_only() {
        let mut map = SourceMap::new();
        map.add_source("x", None);
        map.add_mapping(mapping(0, 0, 0, 5, 0));
        map.add_mapping(mapping(0, 10, 0, 6, 2));
        map.add_mapping(mapping(2, 3, 0, 9, 0));

        assert_eq!(map.lookup(0, 4).map(|m| m.original_line), Some(5));
        assert_eq!(map.lookup(0, 10).map(|m| m.original_line), Some(6));
        assert_eq!(map.lookup(0, 99).map(|m| m.original_line), Some(6));
        assert!(map.lookup(1, 0).is_none());
        assert!(map.lookup(2, 2).is_none());
        assert_eq!(map.lookup(2, 3).map(|m| m.original_line), Some(9));
    }

    #[test]
    fn test_compose_through_upstream() {
        // stage 1: original.scss line 4 -> intermediate line 1
        let mut inner = SourceMap::new();
        inner.add_source("original.scss", Some("..."));
        inner.add_mapping(mapping(1, 0, 0, 4, 2));

        // stage 2: minified line 0 col 12 -> intermediate line 1 col 3
        let mut outer = SourceMap::new();
        outer.add_source("original.css", None);
        outer.add_mapping(mapping(0, 12, 0, 1, 3));
        outer.add_mapping(mapping(0, 20, 0, 7, 0)); // lands on unmapped line, dropped

        let composed = outer.compose(&[Some(&inner)]);
        assert_eq!(composed.sources(), &["original.scss".to_string()]);
        assert_eq!(composed.source_content(0), Some("..."));
        assert_eq!(composed.mappings(), &[mapping(0, 12, 0, 4, 2)]);
        assert_eq!(composed.original_position(0, 15), Some(("original.scss", 4, 2)));
    }

    #[test]
    fn test_compose_mixed_sources() {
        let mut inner = SourceMap::new();
        inner.add_source("x.ts", None);
        inner.add_mapping(mapping(0, 0, 0, 10, 0));

        let mut outer = SourceMap::new();
        outer.add_source("x.js", None);
        outer.add_source("y.js", Some("y"));
        outer.add_mapping(mapping(0, 0, 0, 0, 0));
        outer.add_mapping(mapping(1, 0, 1, 0, 0));

        let composed = outer.compose(&[Some(&inner), None]);
        assert_eq!(composed.sources(), &["x.ts".to_string(), "y.js".to_string()]);
        assert_eq!(composed.original_position(0, 0), Some(("x.ts", 10, 0)));
        assert_eq!(composed.original_position(1, 0), Some(("y.js", 0, 0)));
    }

    #[test]
    fn test_identity() {
        let map = SourceMap::identity("a.js", "one\ntwo\nthree");
        assert_eq!(map.mappings().len(), 3);
        assert_eq!(map.original_position(2, 4), Some(("a.js", 2, 0)));
    }

    #[test]
    fn test_from_json_rejects_bad_input() {
        assert!(matches!(
            SourceMap::from_json(r#"{"version":2,"sources":[],"mappings":""}"#),
            Err(SourceMapError::UnsupportedVersion(2))
        ));
        assert!(matches!(
            SourceMap::from_json(r#"{"version":3,"sources":[],"mappings":"AAAA"}"#),
            Err(SourceMapError::InvalidMappings(_))
        ));
        assert!(matches!(
            SourceMap::from_json(r#"{"version":3,"sources":["a"],"mappings":"A!"}"#),
            Err(SourceMapError::InvalidMappings(_))
        ));
    }
}
