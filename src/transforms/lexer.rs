//! Script tokenizer
//!
//! Splits script source into tokens precise enough to rewrite or strip text
//! without touching string, template or regular-expression literals. It is
//! not a parser: punctuation is emitted one character at a time and
//! keywords are plain identifiers.

use std::fmt;

/// Kind of a lexical token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Whitespace without a line break
    Whitespace,
    /// Whitespace containing at least one line break
    Newline,
    LineComment,
    BlockComment,
    String,
    Template,
    Regex,
    Number,
    /// Identifier or keyword
    Ident,
    /// Single punctuation character
    Punct,
}

impl TokenKind {
    /// Whitespace and comments.
    pub fn is_trivia(self) -> bool {
        matches!(
            self,
            TokenKind::Whitespace | TokenKind::Newline | TokenKind::LineComment | TokenKind::BlockComment
        )
    }
}

/// A token borrowed from the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    /// Zero-based line of the first character
    pub line: u32,
    /// Zero-based column (in characters) of the first character
    pub column: u32,
}

impl Token<'_> {
    pub fn is(&self, kind: TokenKind, text: &str) -> bool {
        self.kind == kind && self.text == text
    }

    /// Whether the token spans a line break.
    pub fn has_newline(&self) -> bool {
        self.kind == TokenKind::Newline || (self.kind == TokenKind::BlockComment && self.text.contains('\n'))
    }
}

/// Unterminated literal or comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    /// 1-based line where the offending token starts
    pub line: u32,
    pub message: String,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for LexError {}

/// Keywords after which a `/` starts a regular expression literal.
const OPERATOR_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do", "else",
    "yield", "await",
];

/// Whether an identifier is a keyword that expects an operand after it.
pub fn is_operator_keyword(text: &str) -> bool {
    OPERATOR_KEYWORDS.contains(&text)
}

struct Cursor<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, chars: src.char_indices().collect(), pos: 0, line: 0, column: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).map(|&(_, c)| c)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn offset(&self) -> usize {
        self.chars.get(self.pos).map_or(self.src.len(), |&(i, _)| i)
    }

    fn eat_while(&mut self, pred: impl Fn(char) -> bool) {
        while self.peek().is_some_and(&pred) {
            self.bump();
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn error(line: u32, message: &str) -> LexError {
    LexError { line: line + 1, message: message.to_string() }
}

/// Tokenize script source.
///
/// Concatenating the `text` of every token reproduces `src` exactly.
pub fn tokenize(src: &str) -> Result<Vec<Token<'_>>, LexError> {
    let mut cur = Cursor::new(src);
    let mut tokens: Vec<Token<'_>> = Vec::new();
    let mut last_significant: Option<usize> = None;

    while let Some(c) = cur.peek() {
        let (start, line, column) = (cur.offset(), cur.line, cur.column);

        let kind = match c {
            c if c.is_whitespace() => {
                let mut newline = false;
                while let Some(w) = cur.peek().filter(|w| w.is_whitespace()) {
                    newline |= w == '\n';
                    cur.bump();
                }
                if newline {
                    TokenKind::Newline
                } else {
                    TokenKind::Whitespace
                }
            }
            '/' if cur.peek_at(1) == Some('/') => {
                cur.eat_while(|c| c != '\n');
                TokenKind::LineComment
            }
            '/' if cur.peek_at(1) == Some('*') => {
                cur.bump();
                cur.bump();
                loop {
                    match cur.bump() {
                        None => return Err(error(line, "unterminated comment")),
                        Some('*') if cur.peek() == Some('/') => {
                            cur.bump();
                            break;
                        }
                        Some(_) => {}
                    }
                }
                TokenKind::BlockComment
            }
            '"' | '\'' => {
                scan_string(&mut cur, c)?;
                TokenKind::String
            }
            '`' => {
                scan_template(&mut cur)?;
                TokenKind::Template
            }
            '/' if regex_allowed(last_significant.map(|i| &tokens[i])) => {
                scan_regex(&mut cur)?;
                TokenKind::Regex
            }
            c if c.is_ascii_digit() || (c == '.' && cur.peek_at(1).is_some_and(|d| d.is_ascii_digit())) => {
                scan_number(&mut cur);
                TokenKind::Number
            }
            c if is_ident_start(c) => {
                cur.eat_while(is_ident_continue);
                TokenKind::Ident
            }
            _ => {
                cur.bump();
                TokenKind::Punct
            }
        };

        if !kind.is_trivia() {
            last_significant = Some(tokens.len());
        }
        tokens.push(Token { kind, text: &src[start..cur.offset()], line, column });
    }

    Ok(tokens)
}

fn regex_allowed(previous: Option<&Token<'_>>) -> bool {
    match previous {
        None => true,
        Some(t) => match t.kind {
            TokenKind::Punct => !matches!(t.text, ")" | "]" | "}"),
            TokenKind::Ident => is_operator_keyword(t.text),
            _ => false,
        },
    }
}

fn scan_string(cur: &mut Cursor<'_>, quote: char) -> Result<(), LexError> {
    let line = cur.line;
    cur.bump();
    loop {
        match cur.bump() {
            None | Some('\n') => return Err(error(line, "unterminated string literal")),
            Some('\\') => {
                cur.bump();
            }
            Some(c) if c == quote => return Ok(()),
            Some(_) => {}
        }
    }
}

fn scan_template(cur: &mut Cursor<'_>) -> Result<(), LexError> {
    let line = cur.line;
    cur.bump();
    loop {
        match cur.bump() {
            None => return Err(error(line, "unterminated template literal")),
            Some('\\') => {
                cur.bump();
            }
            Some('`') => return Ok(()),
            Some('$') if cur.peek() == Some('{') => {
                cur.bump();
                scan_substitution(cur, line)?;
            }
            Some(_) => {}
        }
    }
}

/// Skip a `${ ... }` body, including nested braces and literals.
fn scan_substitution(cur: &mut Cursor<'_>, line: u32) -> Result<(), LexError> {
    let mut depth = 1u32;
    while depth > 0 {
        match cur.peek() {
            None => return Err(error(line, "unterminated template literal")),
            Some(q @ ('"' | '\'')) => scan_string(cur, q)?,
            Some('`') => scan_template(cur)?,
            Some(c) => {
                match c {
                    '{' => depth += 1,
                    '}' => depth -= 1,
                    _ => {}
                }
                cur.bump();
            }
        }
    }
    Ok(())
}

/// Piece of a template literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplatePart<'a> {
    /// Raw text between substitutions, escapes untouched
    Text(&'a str),
    /// Expression source inside `${ }`
    Substitution(&'a str),
}

/// Split a template token into alternating text and substitutions.
///
/// The result always starts and ends with a `Text` part.
pub fn template_parts(template: &str) -> Result<Vec<TemplatePart<'_>>, LexError> {
    let mut cur = Cursor::new(template);
    let mut parts = Vec::new();
    cur.bump();
    let mut start = cur.offset();
    loop {
        match cur.peek() {
            None => return Err(error(0, "unterminated template literal")),
            Some('\\') => {
                cur.bump();
                cur.bump();
            }
            Some('`') => {
                parts.push(TemplatePart::Text(&template[start..cur.offset()]));
                return Ok(parts);
            }
            Some('$') if cur.peek_at(1) == Some('{') => {
                parts.push(TemplatePart::Text(&template[start..cur.offset()]));
                cur.bump();
                cur.bump();
                let expr = cur.offset();
                scan_substitution(&mut cur, 0)?;
                // The closing brace has been consumed.
                parts.push(TemplatePart::Substitution(&template[expr..cur.offset() - 1]));
                start = cur.offset();
            }
            Some(_) => {
                cur.bump();
            }
        }
    }
}

fn scan_regex(cur: &mut Cursor<'_>) -> Result<(), LexError> {
    let line = cur.line;
    cur.bump();
    let mut in_class = false;
    loop {
        match cur.bump() {
            None | Some('\n') => return Err(error(line, "unterminated regular expression")),
            Some('\\') => {
                cur.bump();
            }
            Some('[') => in_class = true,
            Some(']') => in_class = false,
            Some('/') if !in_class => break,
            Some(_) => {}
        }
    }
    cur.eat_while(is_ident_continue);
    Ok(())
}

fn scan_number(cur: &mut Cursor<'_>) {
    while let Some(c) = cur.peek() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
            let exponent = matches!(c, 'e' | 'E');
            cur.bump();
            if exponent && matches!(cur.peek(), Some('+' | '-')) {
                cur.bump();
            }
        } else {
            break;
        }
    }
}
