//! Script stages: syntax lowering, bundling and minification.

use super::lexer::{is_operator_keyword, template_parts, tokenize, LexError, TemplatePart, Token, TokenKind};
use crate::build::{Artifact, ArtifactKind, Produced, StageContext, Transform, TransformError};
use crate::config::ScriptPreset;
use crate::sourcemap::{Mapping, SourceMap};
use regex::Regex;
use std::sync::OnceLock;

fn lex_error(ctx: &StageContext<'_>, artifact: &str, e: LexError) -> TransformError {
    ctx.error(artifact, e.message).at_line(e.line)
}

fn utf8<'a>(input: &'a Artifact, ctx: &StageContext<'_>) -> Result<&'a str, TransformError> {
    input.text().ok_or_else(|| ctx.error(input.id(), "script is not valid UTF-8"))
}

/// Output text plus a fragment built position by position.
struct Emitter {
    out: String,
    line: u32,
    column: u32,
    fragment: SourceMap,
    source: u32,
}

impl Emitter {
    fn new(id: &str, text: &str) -> Self {
        let mut fragment = SourceMap::new();
        let source = fragment.add_source(id, Some(text));
        Self { out: String::with_capacity(text.len()), line: 0, column: 0, fragment, source }
    }

    /// Emit `text` mapped to the token's original position.
    fn token(&mut self, text: &str, origin: &Token<'_>) {
        self.fragment.add_mapping(Mapping {
            generated_line: self.line,
            generated_column: self.column,
            source: self.source,
            original_line: origin.line,
            original_column: origin.column,
        });
        self.raw(text);
    }

    fn raw(&mut self, text: &str) {
        for c in text.chars() {
            if c == '\n' {
                self.line += 1;
                self.column = 0;
            } else {
                self.column += 1;
            }
        }
        self.out.push_str(text);
    }
}

/// Lower ES2015 syntax to ES5 for older runtimes.
///
/// Rewrites `let`/`const`, arrow functions and untagged template literals.
/// Arrow bodies that mention `this` are bound with `.bind(this)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Transpile {
    preset: ScriptPreset,
}

impl Transpile {
    pub fn new(preset: ScriptPreset) -> Self {
        Self { preset }
    }
}

impl Transform for Transpile {
    fn apply(&self, inputs: &[Artifact], ctx: &StageContext<'_>) -> Result<Vec<Produced>, TransformError> {
        inputs
            .iter()
            .map(|input| match self.preset {
                ScriptPreset::Esnext => Ok(Produced::new(input.clone())),
                ScriptPreset::Es5 => {
                    let text = utf8(input, ctx)?;
                    let emitter = lower_es5(input.id(), text).map_err(|e| lex_error(ctx, input.id(), e))?;
                    let artifact = input.derive(input.id(), ArtifactKind::Script, emitter.out);
                    Ok(Produced::with_fragment(artifact, emitter.fragment))
                }
            })
            .collect()
    }
}

/// Rewrites attached to one source token.
#[derive(Debug, Default)]
struct Edit {
    before: Vec<String>,
    replace: Option<String>,
    drop: bool,
    after: Vec<String>,
}

fn lower_es5(id: &str, text: &str) -> Result<Emitter, LexError> {
    let tokens = tokenize(text)?;
    let significant: Vec<usize> = (0..tokens.len()).filter(|&i| !tokens[i].kind.is_trivia()).collect();
    let mut edits: Vec<Edit> = tokens.iter().map(|_| Edit::default()).collect();

    for (rank, &i) in significant.iter().enumerate() {
        let token = &tokens[i];
        let prev = rank.checked_sub(1).map(|r| &tokens[significant[r]]);
        let next = significant.get(rank + 1).map(|&j| &tokens[j]);

        if is_block_declaration(token, prev, next) {
            edits[i].replace = Some("var".to_string());
        } else if token.kind == TokenKind::Template && !is_tagged(prev) {
            let lowered = lower_template(token.text).map_err(|e| LexError { line: token.line + 1, ..e })?;
            edits[i].replace = Some(lowered);
        } else if token.is(TokenKind::Punct, "=") && tokens.get(i + 1).is_some_and(|t| t.is(TokenKind::Punct, ">")) {
            lower_arrow(&tokens, &significant, rank, &mut edits);
        }
    }

    let mut emitter = Emitter::new(id, text);
    for (token, edit) in tokens.iter().zip(&edits) {
        for extra in &edit.before {
            emitter.token(extra, token);
        }
        match &edit.replace {
            _ if edit.drop => {}
            Some(text) => emitter.token(text, token),
            None if token.kind.is_trivia() => emitter.raw(token.text),
            None => emitter.token(token.text, token),
        }
        for extra in &edit.after {
            emitter.token(extra, token);
        }
    }
    Ok(emitter)
}

fn is_block_declaration(token: &Token<'_>, prev: Option<&Token<'_>>, next: Option<&Token<'_>>) -> bool {
    if token.kind != TokenKind::Ident || !matches!(token.text, "let" | "const") {
        return false;
    }
    if prev.is_some_and(|p| p.is(TokenKind::Punct, ".")) {
        return false;
    }
    next.is_some_and(|n| n.kind == TokenKind::Ident || n.is(TokenKind::Punct, "[") || n.is(TokenKind::Punct, "{"))
}

fn is_tagged(prev: Option<&Token<'_>>) -> bool {
    prev.is_some_and(|p| match p.kind {
        TokenKind::Ident => !is_operator_keyword(p.text),
        TokenKind::Punct => matches!(p.text, ")" | "]"),
        TokenKind::Template => true,
        _ => false,
    })
}

/// `` `a${b}c` `` becomes `"a" + (b) + "c"`.
fn lower_template(template: &str) -> Result<String, LexError> {
    let mut out = String::with_capacity(template.len() + 8);
    for (n, part) in template_parts(template)?.into_iter().enumerate() {
        match part {
            TemplatePart::Text(raw) if n == 0 => push_quoted(&mut out, raw),
            TemplatePart::Text("") => {}
            TemplatePart::Text(raw) => {
                out.push_str(" + ");
                push_quoted(&mut out, raw);
            }
            TemplatePart::Substitution(expr) => {
                out.push_str(" + (");
                out.push_str(expr.trim());
                out.push(')');
            }
        }
    }
    Ok(out)
}

fn push_quoted(out: &mut String, raw: &str) {
    out.push('"');
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                out.push(c);
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            }
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Rewrite the arrow whose `=` sits at significant rank `arrow`.
///
/// Async arrows and arrows without a recognisable parameter list are left alone.
fn lower_arrow(tokens: &[Token<'_>], significant: &[usize], arrow: usize, edits: &mut [Edit]) {
    let at = |rank: usize| &tokens[significant[rank]];
    let Some(params_end) = arrow.checked_sub(1) else {
        return;
    };
    let parenthesized = at(params_end).is(TokenKind::Punct, ")");
    let params_start = if parenthesized {
        match matching_open(tokens, significant, params_end) {
            Some(rank) => rank,
            None => return,
        }
    } else if at(params_end).kind == TokenKind::Ident {
        params_end
    } else {
        return;
    };
    if params_start.checked_sub(1).is_some_and(|r| at(r).is(TokenKind::Ident, "async")) {
        return;
    }

    let body_start = arrow + 2;
    if body_start >= significant.len() {
        return;
    }
    let block = at(body_start).is(TokenKind::Punct, "{");
    let body_end = if block {
        match matching_close(tokens, significant, body_start) {
            Some(rank) => rank,
            None => return,
        }
    } else {
        expression_end(tokens, significant, body_start)
    };

    let params = &mut edits[significant[params_start]];
    if parenthesized {
        params.before.push("function".to_string());
    } else {
        params.replace = Some(format!("function({})", at(params_start).text));
    }
    edits[significant[arrow]].drop = true;
    edits[significant[arrow + 1]].drop = true;

    let mut close = String::new();
    if !block {
        edits[significant[body_start]].before.push("{return ".to_string());
        close.push('}');
    }
    let uses_this = (body_start..=body_end)
        .any(|r| at(r).is(TokenKind::Ident, "this") && !(r > 0 && at(r - 1).is(TokenKind::Punct, ".")));
    if uses_this {
        close.push_str(".bind(this)");
    }
    if !close.is_empty() {
        // Arrows are visited outermost first, so inner closers go in front.
        edits[significant[body_end]].after.insert(0, close);
    }
}

fn matching_open(tokens: &[Token<'_>], significant: &[usize], close: usize) -> Option<usize> {
    let mut depth = 0usize;
    for rank in (0..=close).rev() {
        let token = &tokens[significant[rank]];
        if token.kind != TokenKind::Punct {
            continue;
        }
        match token.text {
            ")" | "]" | "}" => depth += 1,
            "(" | "[" | "{" => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(rank);
                }
            }
            _ => {}
        }
    }
    None
}

fn matching_close(tokens: &[Token<'_>], significant: &[usize], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (rank, &i) in significant.iter().enumerate().skip(open) {
        let token = &tokens[i];
        if token.kind != TokenKind::Punct {
            continue;
        }
        match token.text {
            "(" | "[" | "{" => depth += 1,
            ")" | "]" | "}" => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(rank);
                }
            }
            _ => {}
        }
    }
    None
}

/// Last significant rank of an arrow's expression body.
fn expression_end(tokens: &[Token<'_>], significant: &[usize], start: usize) -> usize {
    let mut depth = 0usize;
    let mut pending_ternaries = 0usize;
    let mut last = start;

    for rank in start..significant.len() {
        let i = significant[rank];
        let token = &tokens[i];
        let punct = token.kind == TokenKind::Punct;

        if rank > start && depth == 0 {
            if punct && matches!(token.text, "," | ";" | ")" | "]" | "}") {
                break;
            }
            if token.is(TokenKind::Punct, ":") && pending_ternaries == 0 {
                break;
            }
            let prev = significant[rank - 1];
            let line_break = tokens[prev + 1..i].iter().any(|t| t.has_newline());
            if line_break && ends_operand(&tokens[prev]) && starts_operand(token) {
                break;
            }
        }

        if punct {
            match token.text {
                "(" | "[" | "{" => depth += 1,
                ")" | "]" | "}" => depth = depth.saturating_sub(1),
                "?" if depth == 0 && is_conditional(tokens, i) => pending_ternaries += 1,
                ":" if depth == 0 => pending_ternaries = pending_ternaries.saturating_sub(1),
                _ => {}
            }
        }
        last = rank;
    }
    last
}

/// `?.` and `??` are not conditionals.
fn is_conditional(tokens: &[Token<'_>], i: usize) -> bool {
    let next = tokens.get(i + 1).map(|t| t.text);
    let prev = i.checked_sub(1).map(|j| tokens[j].text);
    !matches!(next, Some("?" | ".")) && prev != Some("?")
}

fn ends_operand(token: &Token<'_>) -> bool {
    match token.kind {
        TokenKind::Ident => !is_operator_keyword(token.text),
        TokenKind::Number | TokenKind::String | TokenKind::Template | TokenKind::Regex => true,
        TokenKind::Punct => matches!(token.text, ")" | "]" | "}"),
        _ => false,
    }
}

fn starts_operand(token: &Token<'_>) -> bool {
    match token.kind {
        TokenKind::Ident => !matches!(token.text, "in" | "instanceof"),
        TokenKind::Number | TokenKind::String | TokenKind::Template => true,
        _ => false,
    }
}

fn source_mapping_url() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?m)^[ \t]*//[#@][ \t]*sourceMappingURL=\S*[ \t]*$").ok()).as_ref()
}

/// Join the whole sequence into one bundle.
#[derive(Debug, Clone)]
pub struct Concat {
    bundle: String,
}

impl Concat {
    pub fn new(bundle: impl Into<String>) -> Self {
        Self { bundle: bundle.into() }
    }
}

impl Transform for Concat {
    fn apply(&self, inputs: &[Artifact], ctx: &StageContext<'_>) -> Result<Vec<Produced>, TransformError> {
        let mut out = String::new();
        let mut fragment = SourceMap::new();
        let mut base_line = 0u32;

        for (n, input) in inputs.iter().enumerate() {
            let text = utf8(input, ctx)?;
            let text = match source_mapping_url() {
                Some(re) => re.replace_all(text, ""),
                None => text.into(),
            };

            if n > 0 {
                out.push('\n');
                base_line += 1;
            }

            let source = fragment.add_source(input.id(), input.text());
            for (line, content) in text.split('\n').enumerate() {
                if content.trim().is_empty() {
                    continue;
                }
                fragment.add_mapping(Mapping {
                    generated_line: base_line + line as u32,
                    generated_column: 0,
                    source,
                    original_line: line as u32,
                    original_column: 0,
                });
            }

            base_line += text.matches('\n').count() as u32;
            out.push_str(&text);
        }

        tracing::debug!(bundle = %self.bundle, inputs = inputs.len(), "concatenated scripts");
        let bundle = Artifact::new(self.bundle.clone(), ArtifactKind::Script, out);
        Ok(vec![Produced::with_fragment(bundle, fragment)])
    }
}

/// Strip comments and redundant whitespace.
///
/// Line breaks that automatic semicolon insertion may depend on are kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct Minify;

impl Transform for Minify {
    fn apply(&self, inputs: &[Artifact], ctx: &StageContext<'_>) -> Result<Vec<Produced>, TransformError> {
        inputs
            .iter()
            .map(|input| {
                let text = utf8(input, ctx)?;
                let emitter = minify(input.id(), text).map_err(|e| lex_error(ctx, input.id(), e))?;
                let artifact = input.derive(input.id(), ArtifactKind::Script, emitter.out);
                Ok(Produced::with_fragment(artifact, emitter.fragment))
            })
            .collect()
    }
}

fn minify(id: &str, text: &str) -> Result<Emitter, LexError> {
    let tokens = tokenize(text)?;
    let mut emitter = Emitter::new(id, text);
    let mut prev: Option<&Token<'_>> = None;
    let mut gap = false;
    let mut newline = false;

    for token in &tokens {
        if token.kind.is_trivia() {
            gap = true;
            newline |= token.has_newline();
            continue;
        }

        if let Some(p) = prev {
            if newline && !newline_redundant(p, token) {
                emitter.raw("\n");
            } else if gap && needs_space(p, token) {
                emitter.raw(" ");
            }
        }

        emitter.token(token.text, token);
        prev = Some(token);
        gap = false;
        newline = false;
    }

    if !emitter.out.is_empty() {
        emitter.raw("\n");
    }
    Ok(emitter)
}

fn newline_redundant(prev: &Token<'_>, next: &Token<'_>) -> bool {
    (prev.kind == TokenKind::Punct && matches!(prev.text, ";" | "{" | "," | "(" | "["))
        || (next.kind == TokenKind::Punct && matches!(next.text, "}" | ")" | "]"))
}

fn needs_space(prev: &Token<'_>, next: &Token<'_>) -> bool {
    let (Some(a), Some(b)) = (prev.text.chars().next_back(), next.text.chars().next()) else {
        return false;
    };
    let word = |c: char| c.is_alphanumeric() || c == '_' || c == '$';

    (word(a) && word(b))
        || (prev.kind == TokenKind::Regex && word(b))
        || (prev.kind == TokenKind::Number && b == '.')
        || (matches!(a, '+' | '-') && a == b)
        || (a == '/' && matches!(b, '/' | '*'))
}

/// Whether the preset rewrites anything.
pub fn needs_transpile(preset: ScriptPreset) -> bool {
    preset != ScriptPreset::Esnext
}
