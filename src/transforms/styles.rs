//! Stylesheet stages: preprocessing, vendor prefixing and minification.
//!
//! [`Compile`] handles the preprocessor subset used by plain `.scss` files:
//! `$name: value;` declarations (with `!default`), `$name` and `#{$name}`
//! references, `//` line comments and `@import` of other stylesheets.
//! Everything else is passed through as CSS, so native nesting survives into
//! [`Autoprefix`], which lowers it for the configured browsers.
//!
//! Partials (files named `_*.scss`) only exist to be imported and produce no
//! output of their own.

use crate::build::{
    id_from_path, Artifact, ArtifactKind, ConfigurationError, Produced, StageContext, Transform, TransformError,
};
use crate::sourcemap::{Mapping, SourceMap};
use lightningcss::stylesheet::{MinifyOptions, ParserFlags, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Resolve browserslist queries into lightningcss targets.
pub fn browser_targets(queries: &[String]) -> Result<Targets, ConfigurationError> {
    let browsers = Browsers::from_browserslist(queries.iter().map(String::as_str)).map_err(|e| {
        ConfigurationError::Browsers { queries: queries.to_vec(), message: e.to_string() }
    })?;
    Ok(Targets::from(browsers))
}

/// Failure from the stylesheet toolchain, with a 1-based line when known.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CssError {
    message: String,
    line: Option<u32>,
}

impl CssError {
    fn at(line: u32, message: impl Into<String>) -> Self {
        Self { message: message.into(), line: Some(line) }
    }

    fn into_transform_error(self, ctx: &StageContext<'_>, artifact: &str) -> TransformError {
        let err = ctx.error(artifact, self.message);
        match self.line {
            Some(line) => err.at_line(line),
            None => err,
        }
    }
}

impl<T: std::fmt::Display> From<lightningcss::error::Error<T>> for CssError {
    fn from(e: lightningcss::error::Error<T>) -> Self {
        CssError { message: e.kind.to_string(), line: e.loc.map(|loc| loc.line + 1) }
    }
}

fn utf8<'a>(input: &'a Artifact, ctx: &StageContext<'_>) -> Result<&'a str, TransformError> {
    input.text().ok_or_else(|| ctx.error(input.id(), "stylesheet is not valid UTF-8"))
}

/// Stylesheet → CSS preprocessing. Output ids take the `.css` extension.
///
/// `@import 'name'` looks for `_name.scss` then `name.scss`, first next to
/// the importing file and then under `root`.
#[derive(Debug, Clone, Default)]
pub struct Compile {
    root: PathBuf,
}

impl Compile {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Transform for Compile {
    fn apply(&self, inputs: &[Artifact], ctx: &StageContext<'_>) -> Result<Vec<Produced>, TransformError> {
        let mut produced = Vec::with_capacity(inputs.len());
        for input in inputs {
            if is_partial(input.file_name()) {
                tracing::debug!(artifact = input.id(), "partial, no output");
                continue;
            }

            let text = utf8(input, ctx)?;
            let compiled =
                Compiler::new(&self.root).run(input.id(), text).map_err(|e| e.into_transform_error(ctx, input.id()))?;
            let artifact = input.derive(input.id_with_extension("css"), ArtifactKind::Css, compiled.css);
            produced.push(Produced::with_fragment(artifact, compiled.fragment));
        }
        Ok(produced)
    }
}

/// Whether a stylesheet is only meant to be imported.
pub fn is_partial(file_name: &str) -> bool {
    file_name.starts_with('_')
}

/// Add vendor prefixes and lower modern syntax for the target browsers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Autoprefix {
    targets: Targets,
}

impl Autoprefix {
    pub fn new(targets: Targets) -> Self {
        Self { targets }
    }
}

impl Transform for Autoprefix {
    fn apply(&self, inputs: &[Artifact], ctx: &StageContext<'_>) -> Result<Vec<Produced>, TransformError> {
        inputs.iter().map(|input| print(input, ctx, self.targets, false)).collect()
    }
}

/// Minified CSS printing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Minify {
    targets: Targets,
}

impl Minify {
    pub fn new(targets: Targets) -> Self {
        Self { targets }
    }
}

impl Transform for Minify {
    fn apply(&self, inputs: &[Artifact], ctx: &StageContext<'_>) -> Result<Vec<Produced>, TransformError> {
        inputs.iter().map(|input| print(input, ctx, self.targets, true)).collect()
    }
}

fn print(input: &Artifact, ctx: &StageContext<'_>, targets: Targets, minify: bool) -> Result<Produced, TransformError> {
    let text = utf8(input, ctx)?;
    let (code, fragment) =
        print_css(input.id(), text, targets, minify).map_err(|e| e.into_transform_error(ctx, input.id()))?;
    Ok(Produced::with_fragment(input.derive(input.id(), ArtifactKind::Css, code), fragment))
}

fn print_css(id: &str, text: &str, targets: Targets, minify: bool) -> Result<(String, SourceMap), CssError> {
    let options = ParserOptions { filename: id.to_string(), flags: ParserFlags::NESTING, ..ParserOptions::default() };
    let mut sheet = StyleSheet::parse(text, options)?;
    sheet.minify(MinifyOptions { targets, ..MinifyOptions::default() })?;

    let mut map = parcel_sourcemap::SourceMap::new("/");
    map.add_source(id);
    let result = sheet.to_css(PrinterOptions {
        minify,
        source_map: Some(&mut map),
        targets,
        ..PrinterOptions::default()
    })?;

    let mut code = result.code;
    if !code.is_empty() && !code.ends_with('\n') {
        code.push('\n');
    }

    let mut fragment = SourceMap::new();
    let source = fragment.add_source(id, Some(text));
    for m in map.get_mappings() {
        if let Some(original) = m.original {
            fragment.add_mapping(Mapping {
                generated_line: m.generated_line,
                generated_column: m.generated_column,
                source,
                original_line: original.original_line,
                original_column: original.original_column,
            });
        }
    }
    Ok((code, fragment))
}

#[derive(Debug)]
struct Compiled {
    css: String,
    /// Line-level map back to the stylesheet and everything it imported
    fragment: SourceMap,
}

/// Preprocessor state for one stylesheet and its imports.
struct Compiler<'a> {
    root: &'a Path,
    vars: HashMap<String, String>,
    css: String,
    lines: u32,
    fragment: SourceMap,
    /// Files being compiled, outermost first
    stack: Vec<PathBuf>,
}

impl<'a> Compiler<'a> {
    fn new(root: &'a Path) -> Self {
        Self { root, vars: HashMap::new(), css: String::new(), lines: 0, fragment: SourceMap::new(), stack: Vec::new() }
    }

    fn run(mut self, id: &str, text: &str) -> Result<Compiled, CssError> {
        let path = self.root.join(id);
        self.compile_file(id, &path, text)?;
        Ok(Compiled { css: self.css, fragment: self.fragment })
    }

    fn compile_file(&mut self, id: &str, path: &Path, text: &str) -> Result<(), CssError> {
        let stripped = strip_comments(text)?;
        let source = self.fragment.add_source(id, Some(text));
        self.stack.push(std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()));
        let mut open: Vec<u32> = Vec::new();

        for (index, line) in stripped.lines().enumerate() {
            let line_no = index as u32 + 1;
            let trimmed = line.trim();

            if trimmed.starts_with('$') {
                if let Some((name, raw, is_default)) = parse_declaration(trimmed, line_no)? {
                    let value = substitute(raw, &self.vars, line_no)?;
                    if !(is_default && self.vars.contains_key(name)) {
                        self.vars.insert(name.to_string(), value);
                    }
                    continue;
                }
            }

            if let Some(names) = parse_import(trimmed) {
                for name in names {
                    self.import(name, path, line_no)?;
                }
                continue;
            }

            let line = substitute(line, &self.vars, line_no)?;
            track_braces(&line, line_no, &mut open)?;

            if !line.trim().is_empty() {
                self.emit(line.trim_end(), source, index as u32);
            }
        }

        if let Some(&line) = open.last() {
            return Err(CssError::at(line, "unclosed '{'"));
        }
        self.stack.pop();
        Ok(())
    }

    fn emit(&mut self, line: &str, source: u32, original_line: u32) {
        self.fragment.add_mapping(Mapping {
            generated_line: self.lines,
            generated_column: 0,
            source,
            original_line,
            original_column: 0,
        });
        self.css.push_str(line);
        self.css.push('\n');
        self.lines += 1;
    }

    /// Compile an imported stylesheet inline. Errors inside it are reported
    /// at the importing line, prefixed with the imported id.
    fn import(&mut self, name: &str, from: &Path, line_no: u32) -> Result<(), CssError> {
        let path = self
            .resolve(name, from)
            .ok_or_else(|| CssError::at(line_no, format!("cannot find stylesheet to import: '{}'", name)))?;
        let canonical = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if self.stack.contains(&canonical) {
            return Err(CssError::at(line_no, format!("import cycle through '{}'", name)));
        }

        let text = std::fs::read_to_string(&path)
            .map_err(|e| CssError::at(line_no, format!("cannot read '{}': {}", path.display(), e)))?;
        let id = match path.strip_prefix(self.root) {
            Ok(rel) => id_from_path(rel),
            Err(_) => path.display().to_string(),
        };

        tracing::trace!(import = %id, line = line_no, "inlining import");
        self.compile_file(&id, &path, &text).map_err(|e| {
            let location = match e.line {
                Some(line) => format!("{}:{}", id, line),
                None => id.clone(),
            };
            CssError::at(line_no, format!("{}: {}", location, e.message))
        })
    }

    fn resolve(&self, name: &str, from: &Path) -> Option<PathBuf> {
        let name = Path::new(name);
        let dir = name.parent().unwrap_or(Path::new(""));
        let file = name.file_name()?.to_string_lossy();
        let file = if file.ends_with(".scss") { file.into_owned() } else { format!("{}.scss", file) };
        let candidates = [format!("_{}", file), file];

        from.parent()
            .into_iter()
            .chain(std::iter::once(self.root))
            .flat_map(|base| candidates.iter().map(move |candidate| base.join(dir).join(candidate)))
            .find(|path| path.is_file())
    }
}

/// Names from `@import 'a', "b";` when every target is a stylesheet.
///
/// Plain CSS imports (`url(...)`, `.css` files, remote URLs, media queries)
/// return `None` and stay in the output as written.
fn parse_import(trimmed: &str) -> Option<Vec<&str>> {
    let args = trimmed.strip_prefix("@import")?.strip_suffix(';')?;
    if !args.starts_with(|c: char| c.is_whitespace() || c == '"' || c == '\'') {
        return None;
    }

    let mut names = Vec::new();
    for arg in args.split(',').map(str::trim) {
        let quote = arg.chars().next().filter(|&q| q == '"' || q == '\'')?;
        let name = arg.strip_prefix(quote)?.strip_suffix(quote)?;
        let plain = name.is_empty()
            || name.ends_with(".css")
            || name.starts_with("http://")
            || name.starts_with("https://")
            || name.starts_with("//");
        if plain {
            return None;
        }
        names.push(name);
    }
    Some(names)
}

/// Remove `//` and `/* */` comments, keeping line breaks so line numbers hold.
fn strip_comments(text: &str) -> Result<String, CssError> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut line = 1u32;
    let mut parens = 0u32;

    while let Some(c) = chars.next() {
        match c {
            '"' | '\'' => {
                let start = line;
                out.push(c);
                loop {
                    match chars.next() {
                        Some('\\') => {
                            out.push('\\');
                            if let Some(escaped) = chars.next() {
                                out.push(escaped);
                            }
                        }
                        Some('\n') | None => return Err(CssError::at(start, "unterminated string")),
                        Some(q) if q == c => {
                            out.push(q);
                            break;
                        }
                        Some(other) => out.push(other),
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                let start = line;
                chars.next();
                let mut closed = false;
                while let Some(inner) = chars.next() {
                    if inner == '\n' {
                        line += 1;
                        out.push('\n');
                    } else if inner == '*' && chars.peek() == Some(&'/') {
                        chars.next();
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(CssError::at(start, "unterminated comment"));
                }
            }
            // Inside url(...) a double slash is part of the value.
            '/' if parens == 0 && chars.peek() == Some(&'/') => {
                while chars.peek().is_some_and(|&next| next != '\n') {
                    chars.next();
                }
            }
            '(' => {
                parens += 1;
                out.push(c);
            }
            ')' => {
                parens = parens.saturating_sub(1);
                out.push(c);
            }
            '\n' => {
                line += 1;
                parens = 0;
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}

/// Parse `$name: value;` (optionally `!default`).
fn parse_declaration(trimmed: &str, line: u32) -> Result<Option<(&str, &str, bool)>, CssError> {
    let body = &trimmed[1..];
    let name_len = variable_name_len(body);
    if name_len == 0 {
        return Ok(None);
    }
    let (name, rest) = body.split_at(name_len);
    let Some(rest) = rest.trim_start().strip_prefix(':') else {
        return Ok(None);
    };
    let Some(value) = rest.trim_end().strip_suffix(';') else {
        return Err(CssError::at(line, format!("expected ';' after ${}", name)));
    };

    let mut value = value.trim();
    let mut is_default = false;
    if let Some(v) = value.strip_suffix("!default") {
        value = v.trim_end();
        is_default = true;
    }
    if value.is_empty() {
        return Err(CssError::at(line, format!("${} has no value", name)));
    }
    Ok(Some((name, value, is_default)))
}

fn variable_name_len(s: &str) -> usize {
    let mut len = 0;
    for (i, c) in s.char_indices() {
        let ok = if i == 0 { c.is_ascii_alphabetic() || c == '_' } else { c.is_ascii_alphanumeric() || c == '_' || c == '-' };
        if !ok {
            break;
        }
        len = i + c.len_utf8();
    }
    len
}

/// Replace `$name` and `#{$name}` outside string literals.
fn substitute(line: &str, vars: &HashMap<String, String>, line_no: u32) -> Result<String, CssError> {
    let lookup = |name: &str| {
        vars.get(name).cloned().ok_or_else(|| CssError::at(line_no, format!("undefined variable ${}", name)))
    };

    let mut out = String::with_capacity(line.len());
    let mut quote: Option<char> = None;
    let mut rest = line;

    while let Some(c) = rest.chars().next() {
        let width = c.len_utf8();
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' {
                if let Some(escaped) = rest[width..].chars().next() {
                    out.push(escaped);
                    rest = &rest[width + escaped.len_utf8()..];
                    continue;
                }
            } else if c == q {
                quote = None;
            }
            rest = &rest[width..];
            continue;
        }

        match c {
            '"' | '\'' => {
                quote = Some(c);
                out.push(c);
                rest = &rest[1..];
            }
            '#' if rest[1..].starts_with('{') => {
                let Some(end) = rest.find('}') else {
                    return Err(CssError::at(line_no, "unterminated interpolation"));
                };
                let inner = rest[2..end].trim();
                match inner.strip_prefix('$') {
                    Some(name) if variable_name_len(name) == name.len() && !name.is_empty() => {
                        out.push_str(&lookup(name)?);
                    }
                    _ => out.push_str(inner),
                }
                rest = &rest[end + 1..];
            }
            '$' => {
                let len = variable_name_len(&rest[1..]);
                if len == 0 {
                    out.push('$');
                    rest = &rest[1..];
                } else {
                    out.push_str(&lookup(&rest[1..1 + len])?);
                    rest = &rest[1 + len..];
                }
            }
            _ => {
                out.push(c);
                rest = &rest[width..];
            }
        }
    }
    Ok(out)
}

fn track_braces(line: &str, line_no: u32, open: &mut Vec<u32>) -> Result<(), CssError> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in line.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '{' => open.push(line_no),
            '}' => {
                if open.pop().is_none() {
                    return Err(CssError::at(line_no, "unexpected '}'"));
                }
            }
            _ => {}
        }
    }
    Ok(())
}
