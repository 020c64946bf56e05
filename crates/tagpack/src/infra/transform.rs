//! Transform collaborators: minifiers, transpiler, autoprefixer and module resolution.
//!
//! The bundler only sees the [`Transformer`] trait. [`BuiltinTransformer`] is a dependency-free
//! implementation good enough for typical hand-written sites; anything heavier (a real
//! transpiler, a full module bundler) plugs in by implementing the trait.

use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::domain::errors::TransformError;
use crate::domain::model::{AssetFamily, TransformSnapshot, TranspileTarget};
use crate::infra::modules;

static CLOSING_SCRIPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</script").unwrap());
static CLOSING_STYLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</style").unwrap());
static PREFIXABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(^|[{;\s])(user-select|appearance|backdrop-filter|text-size-adjust|mask-image|box-decoration-break|hyphens)(\s*:\s*[^;}]+)",
    )
    .unwrap()
});
static EMPTY_RULE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^{};]+\{\s*\}").unwrap());
static TRAILING_SEMICOLON: Lazy<Regex> = Lazy::new(|| Regex::new(r";+\s*\}").unwrap());
static REPEATED_SEMICOLON: Lazy<Regex> = Lazy::new(|| Regex::new(r";(\s*;)+").unwrap());

/// Entry point handed to module resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleEntry {
    File(PathBuf),
    /// An inline `<script type="module">` body; relative imports resolve from `base_dir`.
    Inline { code: String, base_dir: PathBuf },
}

/// Rolled-up module code plus every file that contributed to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedModule {
    pub code: String,
    pub files: Vec<PathBuf>,
}

/// Opaque code transforms consumed by the bundler.
pub trait Transformer {
    fn minify_script(&self, code: &str) -> Result<String, TransformError>;
    fn transpile(&self, code: &str, target: TranspileTarget) -> Result<String, TransformError>;
    fn minify_css(&self, code: &str) -> Result<String, TransformError>;
    fn optimize_css(&self, code: &str) -> Result<String, TransformError>;
    fn autoprefix(&self, code: &str) -> Result<String, TransformError>;
    fn resolve_module(&self, entry: &ModuleEntry) -> Result<ResolvedModule, TransformError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinTransformer;

impl Transformer for BuiltinTransformer {
    fn minify_script(&self, code: &str) -> Result<String, TransformError> {
        ScriptMinifier::new(code).run()
    }

    fn transpile(&self, code: &str, target: TranspileTarget) -> Result<String, TransformError> {
        tracing::debug!(
            target = target.as_str(),
            "built-in transformer does not lower syntax; code passed through"
        );
        Ok(code.to_string())
    }

    fn minify_css(&self, code: &str) -> Result<String, TransformError> {
        minify_css(code)
    }

    fn optimize_css(&self, code: &str) -> Result<String, TransformError> {
        let code = REPEATED_SEMICOLON.replace_all(code, ";");
        let code = TRAILING_SEMICOLON.replace_all(&code, "}");
        let mut code = code.into_owned();
        // Removing one empty rule can empty its enclosing block.
        loop {
            let next = EMPTY_RULE.replace_all(&code, "").into_owned();
            if next == code {
                return Ok(code);
            }
            code = next;
        }
    }

    fn autoprefix(&self, code: &str) -> Result<String, TransformError> {
        Ok(PREFIXABLE
            .replace_all(code, |caps: &Captures| {
                let (lead, property, rest) = (&caps[1], &caps[2], &caps[3]);
                let prefixes: &[&str] = match property {
                    "user-select" | "text-size-adjust" | "hyphens" => &["-webkit-", "-moz-"],
                    _ => &["-webkit-"],
                };
                let mut out = lead.to_string();
                for prefix in prefixes {
                    out.push_str(&format!("{prefix}{property}{rest};"));
                }
                out.push_str(&format!("{property}{rest}"));
                out
            })
            .into_owned())
    }

    fn resolve_module(&self, entry: &ModuleEntry) -> Result<ResolvedModule, TransformError> {
        modules::resolve(entry)
    }
}

/// Run the script pipeline for one bundle: transpile, wrap, minify.
pub fn process_script(
    transformer: &dyn Transformer,
    code: &str,
    snapshot: &TransformSnapshot,
) -> Result<String, TransformError> {
    let mut code = code.to_string();
    if snapshot.transpile_script.is_enabled() {
        code = transformer.transpile(&code, snapshot.transpile_script)?;
    }
    if snapshot.iife_script {
        code = format!("(function(){{\n{code}\n}})();");
    }
    if snapshot.minify_script {
        code = transformer.minify_script(&code)?;
    }
    Ok(code)
}

/// Run the stylesheet pipeline for one bundle: prefix, optimize, minify.
pub fn process_style(
    transformer: &dyn Transformer,
    code: &str,
    snapshot: &TransformSnapshot,
) -> Result<String, TransformError> {
    let mut code = code.to_string();
    if snapshot.autoprefix_css {
        code = transformer.autoprefix(&code)?;
    }
    if snapshot.optimize_css {
        code = transformer.optimize_css(&code)?;
    }
    if snapshot.minify_css {
        code = transformer.minify_css(&code)?;
    }
    Ok(code)
}

/// Escape closing tags of the enclosing element kind so an injected payload cannot end its own
/// container early.
pub fn sanitize_inline(family: AssetFamily, code: &str) -> String {
    match family {
        AssetFamily::Script => CLOSING_SCRIPT
            .replace_all(code, |caps: &Captures| format!("\\u003c{}", &caps[0][1..]))
            .into_owned(),
        AssetFamily::Style => CLOSING_STYLE
            .replace_all(code, |caps: &Captures| format!("\\3c {}", &caps[0][1..]))
            .into_owned(),
    }
}

fn minify_css(code: &str) -> Result<String, TransformError> {
    let bytes = code.as_bytes();
    let mut out = String::with_capacity(code.len());
    let mut pending_space = false;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = code[i + 2..]
                    .find("*/")
                    .ok_or_else(|| TransformError::StyleSyntax {
                        offset: i,
                        message: "unterminated comment".into(),
                    })?;
                i += end + 4;
            }
            quote @ (b'"' | b'\'') => {
                let end = skip_quoted(bytes, i, quote).ok_or_else(|| {
                    TransformError::StyleSyntax {
                        offset: i,
                        message: "unterminated string".into(),
                    }
                })?;
                flush_css_space(&mut out, &mut pending_space, quote);
                out.push_str(&code[i..end]);
                i = end;
            }
            b' ' | b'\t' | b'\n' | b'\r' | b'\x0c' => {
                pending_space = true;
                i += 1;
            }
            byte => {
                // Copy one full character.
                let len = code[i..].chars().next().map_or(1, char::len_utf8);
                flush_css_space(&mut out, &mut pending_space, byte);
                out.push_str(&code[i..i + len]);
                i += len;
            }
        }
    }
    Ok(out.trim().to_string())
}

fn flush_css_space(out: &mut String, pending: &mut bool, next: u8) {
    if std::mem::take(pending) {
        let after_tight = matches!(
            out.as_bytes().last(),
            None | Some(b'{' | b'}' | b':' | b';' | b',')
        );
        let before_tight = matches!(next, b'{' | b'}' | b';' | b',');
        if !after_tight && !before_tight {
            out.push(' ');
        }
    }
}

/// Index one past the closing quote of the string starting at `start`.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> Option<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return None,
            c if c == quote => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

const REGEX_PRECEDING_KEYWORDS: &[&str] = &[
    "return",
    "typeof",
    "instanceof",
    "in",
    "of",
    "new",
    "delete",
    "void",
    "throw",
    "case",
    "do",
    "else",
    "yield",
    "await",
];

/// Comment-stripping, whitespace-collapsing script minifier.
///
/// Strings, template literals and regular expression literals are copied verbatim. Newlines
/// survive wherever dropping them could change automatic semicolon insertion.
struct ScriptMinifier<'a> {
    src: &'a str,
    bytes: &'a [u8],
    out: String,
    pending_space: bool,
    pending_newline: bool,
    last_word: String,
}

impl<'a> ScriptMinifier<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            out: String::with_capacity(src.len()),
            pending_space: false,
            pending_newline: false,
            last_word: String::new(),
        }
    }

    fn error(&self, offset: usize, message: &str) -> TransformError {
        TransformError::ScriptSyntax {
            offset,
            message: message.to_string(),
        }
    }

    fn run(mut self) -> Result<String, TransformError> {
        let mut i = 0;
        while i < self.bytes.len() {
            let byte = self.bytes[i];
            match byte {
                b' ' | b'\t' | b'\r' | b'\x0c' => {
                    self.pending_space = true;
                    i += 1;
                }
                b'\n' => {
                    self.pending_newline = true;
                    i += 1;
                }
                b'/' if self.bytes.get(i + 1) == Some(&b'/') => {
                    i = self.src[i..]
                        .find('\n')
                        .map_or(self.bytes.len(), |at| i + at);
                }
                b'/' if self.bytes.get(i + 1) == Some(&b'*') => {
                    let end = self.src[i + 2..]
                        .find("*/")
                        .ok_or_else(|| self.error(i, "unterminated comment"))?;
                    if self.src[i..i + end + 4].contains('\n') {
                        self.pending_newline = true;
                    } else {
                        self.pending_space = true;
                    }
                    i += end + 4;
                }
                b'/' if self.regex_allowed() => {
                    let end = self.skip_regex(i)?;
                    self.emit(i, end);
                    i = end;
                }
                b'"' | b'\'' => {
                    let end = skip_quoted(self.bytes, i, byte)
                        .ok_or_else(|| self.error(i, "unterminated string literal"))?;
                    self.emit(i, end);
                    i = end;
                }
                b'`' => {
                    let end = self.skip_template(i)?;
                    self.emit(i, end);
                    i = end;
                }
                _ if is_word_byte(byte) => {
                    let mut end = i;
                    while end < self.bytes.len() && is_word_byte(self.bytes[end]) {
                        end += 1;
                    }
                    self.emit(i, end);
                    self.last_word = self.src[i..end].to_string();
                    i = end;
                }
                _ => {
                    self.emit(i, i + 1);
                    i += 1;
                }
            }
        }
        Ok(self.out.trim().to_string())
    }

    /// Append `src[start..end]`, first deciding what the pending whitespace collapses to.
    fn emit(&mut self, start: usize, end: usize) {
        let next = self.bytes[start];
        let prev = self.out.as_bytes().last().copied();
        let newline = std::mem::take(&mut self.pending_newline);
        let space = std::mem::take(&mut self.pending_space);

        if let Some(prev) = prev {
            if newline && !newline_droppable(prev, next) {
                self.out.push('\n');
            } else if (newline || space) && needs_space(prev, next) {
                self.out.push(' ');
            }
        }

        if !is_word_byte(next) {
            self.last_word.clear();
        }
        self.out.push_str(&self.src[start..end]);
    }

    fn regex_allowed(&self) -> bool {
        match self.out.as_bytes().last() {
            None => true,
            Some(b')' | b']' | b'}' | b'"' | b'\'' | b'`') => false,
            Some(&last) if is_word_byte(last) => {
                REGEX_PRECEDING_KEYWORDS.contains(&self.last_word.as_str())
            }
            Some(_) => true,
        }
    }

    fn skip_regex(&self, start: usize) -> Result<usize, TransformError> {
        let mut i = start + 1;
        let mut in_class = false;
        while i < self.bytes.len() {
            match self.bytes[i] {
                b'\\' => i += 2,
                b'\n' => break,
                b'[' => {
                    in_class = true;
                    i += 1;
                }
                b']' => {
                    in_class = false;
                    i += 1;
                }
                b'/' if !in_class => {
                    i += 1;
                    while i < self.bytes.len() && self.bytes[i].is_ascii_alphabetic() {
                        i += 1;
                    }
                    return Ok(i);
                }
                _ => i += 1,
            }
        }
        Err(self.error(start, "unterminated regular expression"))
    }

    fn skip_template(&self, start: usize) -> Result<usize, TransformError> {
        let mut i = start + 1;
        while i < self.bytes.len() {
            match self.bytes[i] {
                b'\\' => i += 2,
                b'`' => return Ok(i + 1),
                b'$' if self.bytes.get(i + 1) == Some(&b'{') => {
                    i = self.skip_substitution(i + 2)?;
                }
                _ => i += 1,
            }
        }
        Err(self.error(start, "unterminated template literal"))
    }

    /// Skip a `${ ... }` body starting just after the `{`.
    fn skip_substitution(&self, start: usize) -> Result<usize, TransformError> {
        let mut depth = 1;
        let mut i = start;
        while i < self.bytes.len() {
            match self.bytes[i] {
                b'{' => {
                    depth += 1;
                    i += 1;
                }
                b'}' => {
                    depth -= 1;
                    i += 1;
                    if depth == 0 {
                        return Ok(i);
                    }
                }
                quote @ (b'"' | b'\'') => {
                    i = skip_quoted(self.bytes, i, quote)
                        .ok_or_else(|| self.error(i, "unterminated string literal"))?;
                }
                b'`' => i = self.skip_template(i)?,
                _ => i += 1,
            }
        }
        Err(self.error(start, "unterminated template substitution"))
    }
}

fn is_word_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'$' || byte >= 0x80
}

fn needs_space(prev: u8, next: u8) -> bool {
    (is_word_byte(prev) && is_word_byte(next))
        || (prev == b'+' && next == b'+')
        || (prev == b'-' && next == b'-')
        || (prev == b'/' && matches!(next, b'/' | b'*'))
        || (prev == b'.' && next.is_ascii_digit())
}

/// A newline between `prev` and `next` can go when neither side could end or start a statement.
fn newline_droppable(prev: u8, next: u8) -> bool {
    matches!(
        prev,
        b'{' | b'(' | b'[' | b',' | b';' | b':' | b'=' | b'*' | b'%' | b'&' | b'|' | b'^' | b'!'
            | b'~' | b'?' | b'<' | b'>'
    ) || matches!(
        next,
        b')' | b']' | b'}' | b',' | b';' | b':' | b'.' | b'?' | b'=' | b'*' | b'%' | b'&' | b'|'
            | b'^' | b'<' | b'>'
    )
}
