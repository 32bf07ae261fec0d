use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::debug;
use xlcompare_common::FormulaError;

/// One token of a normalized formula
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FormulaToken {
    /// Upper-cased function name
    Function(String),
    /// Cell, range, whole row/column or structured reference, with sheet prefix and `$` markers
    Reference(String),
    Number(String),
    Text(String),
    Boolean(bool),
    Error(String),
    /// Defined name or any other bare identifier
    Name(String),
    Operator(String),
    OpenParen,
    CloseParen,
    Separator,
    /// `;` between rows of an array constant
    RowSeparator,
    OpenBrace,
    CloseBrace,
}

impl FormulaToken {
    pub fn is_reference(&self) -> bool {
        matches!(self, FormulaToken::Reference(_))
    }

    /// Functions, operators and punctuation: the shape of the formula without its operands.
    pub fn is_skeleton(&self) -> bool {
        matches!(
            self,
            FormulaToken::Function(_)
                | FormulaToken::Operator(_)
                | FormulaToken::OpenParen
                | FormulaToken::CloseParen
                | FormulaToken::Separator
                | FormulaToken::RowSeparator
                | FormulaToken::OpenBrace
                | FormulaToken::CloseBrace
        )
    }
}

impl fmt::Display for FormulaToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormulaToken::Function(s)
            | FormulaToken::Reference(s)
            | FormulaToken::Number(s)
            | FormulaToken::Error(s)
            | FormulaToken::Name(s)
            | FormulaToken::Operator(s) => f.write_str(s),
            FormulaToken::Text(s) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
            FormulaToken::Boolean(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            FormulaToken::OpenParen => f.write_str("("),
            FormulaToken::CloseParen => f.write_str(")"),
            FormulaToken::Separator => f.write_str(","),
            FormulaToken::RowSeparator => f.write_str(";"),
            FormulaToken::OpenBrace => f.write_str("{"),
            FormulaToken::CloseBrace => f.write_str("}"),
        }
    }
}

/// Canonical token form of a formula
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedFormula {
    tokens: Vec<FormulaToken>,
}

impl NormalizedFormula {
    pub fn tokens(&self) -> &[FormulaToken] {
        &self.tokens
    }

    pub fn skeleton(&self) -> Vec<&FormulaToken> {
        self.tokens.iter().filter(|t| t.is_skeleton()).collect()
    }

    pub fn references(&self) -> Vec<&FormulaToken> {
        self.tokens.iter().filter(|t| t.is_reference()).collect()
    }

    /// Operands that are neither references nor skeleton tokens (literals and names)
    pub fn literals(&self) -> Vec<&FormulaToken> {
        self.tokens
            .iter()
            .filter(|t| !t.is_skeleton() && !t.is_reference())
            .collect()
    }

    /// Compact rendering with `=` prefix, e.g. `=SUM(A1,A2)`
    pub fn canonical_text(&self) -> String {
        let mut out = String::from("=");
        for token in &self.tokens {
            out.push_str(&token.to_string());
        }
        out
    }
}

/// Text used when a formula cannot be tokenized: trimmed, without the leading `=`.
pub fn opaque_formula_text(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed.strip_prefix('=').unwrap_or(trimmed).trim()
}

/// Tokenize a formula into its canonical form.
///
/// Whitespace outside string literals and quoted sheet names is dropped, as is an optional
/// leading `=`. Function names, references, names and error literals are upper-cased;
/// `$` markers are kept because they change meaning.
pub fn normalize_formula(raw: &str) -> Result<NormalizedFormula, FormulaError> {
    let chars: Vec<char> = raw.trim().chars().collect();
    let mut tokens = Vec::new();
    let mut i = if chars.first() == Some(&'=') { 1 } else { 0 };
    let mut paren_depth = 0usize;
    let mut brace_depth = 0usize;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '"' => {
                let (text, next) = read_quoted(&chars, i, '"')
                    .ok_or(FormulaError::UnterminatedString(i))?;
                tokens.push(FormulaToken::Text(text));
                i = next;
            }
            '\'' => {
                let (sheet, next) = read_quoted(&chars, i, '\'')
                    .ok_or(FormulaError::UnterminatedSheetName(i))?;
                let prefix = format!("'{}'", sheet.replace('\'', "''").to_uppercase());
                if chars.get(next) == Some(&'!') {
                    let (word, after) = read_word(&chars, next + 1)?;
                    tokens.push(FormulaToken::Reference(format!(
                        "{}!{}",
                        prefix,
                        word.to_uppercase()
                    )));
                    i = after;
                } else {
                    tokens.push(FormulaToken::Name(prefix));
                    i = next;
                }
            }
            '(' => {
                paren_depth += 1;
                tokens.push(FormulaToken::OpenParen);
                i += 1;
            }
            ')' => {
                if paren_depth == 0 {
                    return Err(FormulaError::UnexpectedClose(i));
                }
                paren_depth -= 1;
                tokens.push(FormulaToken::CloseParen);
                i += 1;
            }
            '{' => {
                brace_depth += 1;
                tokens.push(FormulaToken::OpenBrace);
                i += 1;
            }
            '}' => {
                if brace_depth == 0 {
                    return Err(FormulaError::UnbalancedBrace(i));
                }
                brace_depth -= 1;
                tokens.push(FormulaToken::CloseBrace);
                i += 1;
            }
            ';' if brace_depth > 0 => {
                tokens.push(FormulaToken::RowSeparator);
                i += 1;
            }
            // Outside array constants `;` is the locale variant of the argument separator
            ',' | ';' => {
                tokens.push(FormulaToken::Separator);
                i += 1;
            }
            '#' => {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '/' || chars[i] == '_')
                {
                    i += 1;
                }
                if i < chars.len() && (chars[i] == '!' || chars[i] == '?') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                tokens.push(FormulaToken::Error(literal.to_uppercase()));
            }
            '<' | '>' => {
                let two = matches!(
                    (c, chars.get(i + 1)),
                    ('<', Some('=')) | ('<', Some('>')) | ('>', Some('='))
                );
                let len = if two { 2 } else { 1 };
                tokens.push(FormulaToken::Operator(chars[i..i + len].iter().collect()));
                i += len;
            }
            c if is_word_start(c) => {
                let (word, next) = read_word(&chars, i)?;
                let followed_by_paren = chars[next..]
                    .iter()
                    .find(|c| !c.is_whitespace())
                    .map_or(false, |c| *c == '(');
                tokens.push(classify_word(&word, followed_by_paren));
                i = next;
            }
            other => {
                tokens.push(FormulaToken::Operator(other.to_string()));
                i += 1;
            }
        }
    }

    if paren_depth > 0 {
        return Err(FormulaError::UnclosedParen(paren_depth));
    }
    if brace_depth > 0 {
        return Err(FormulaError::UnbalancedBrace(chars.len()));
    }

    Ok(NormalizedFormula { tokens })
}

fn is_word_start(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '$' | '\\' | '[')
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '$' | '\\' | ':' | '!')
}

/// Read a quoted run starting at `start` (the opening quote); doubled quotes escape.
/// Returns the unescaped content and the index after the closing quote.
fn read_quoted(chars: &[char], start: usize, quote: char) -> Option<(String, usize)> {
    let mut out = String::new();
    let mut i = start + 1;
    loop {
        let c = *chars.get(i)?;
        if c == quote {
            if chars.get(i + 1) == Some(&quote) {
                out.push(quote);
                i += 2;
            } else {
                return Some((out, i + 1));
            }
        } else {
            out.push(c);
            i += 1;
        }
    }
}

/// Read an identifier, number or reference. Bracketed blocks (structured references)
/// are taken whole; an exponent sign is absorbed into numeric words.
fn read_word(chars: &[char], start: usize) -> Result<(String, usize), FormulaError> {
    let mut word = String::new();
    let mut i = start;

    while i < chars.len() {
        let c = chars[i];
        if c == '[' {
            let open = i;
            let mut depth = 0usize;
            loop {
                let Some(&b) = chars.get(i) else {
                    return Err(FormulaError::UnterminatedBracket(open));
                };
                word.push(b);
                i += 1;
                match b {
                    '[' => depth += 1,
                    ']' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
            }
        } else if is_word_char(c) {
            word.push(c);
            i += 1;
        } else if (c == '+' || c == '-')
            && is_exponent_prefix(&word)
            && chars.get(i + 1).map_or(false, |d| d.is_ascii_digit())
        {
            word.push(c);
            i += 1;
        } else {
            break;
        }
    }

    Ok((word, i))
}

fn is_exponent_prefix(word: &str) -> bool {
    let Some(mantissa) = word.strip_suffix(['e', 'E']) else {
        return false;
    };
    !mantissa.is_empty()
        && mantissa.chars().all(|c| c.is_ascii_digit() || c == '.')
        && mantissa.chars().any(|c| c.is_ascii_digit())
}

fn number_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([0-9]+\.?[0-9]*|\.[0-9]+)(E[+-]?[0-9]+)?$").expect("valid number pattern")
    })
}

fn reference_part_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:(\$?[A-Z]{1,3}\$?[0-9]+)|(\$?[A-Z]{1,3})|(\$?[0-9]+))$")
            .expect("valid reference pattern")
    })
}

fn classify_word(word: &str, followed_by_paren: bool) -> FormulaToken {
    let upper = word.to_uppercase();

    if followed_by_paren {
        return FormulaToken::Function(upper);
    }
    if upper == "TRUE" || upper == "FALSE" {
        return FormulaToken::Boolean(upper == "TRUE");
    }
    if number_pattern().is_match(&upper) {
        return FormulaToken::Number(upper);
    }
    if looks_like_reference(&upper) {
        return FormulaToken::Reference(upper);
    }
    FormulaToken::Name(upper)
}

fn looks_like_reference(upper: &str) -> bool {
    if upper.contains('[') {
        return true;
    }
    let (has_sheet, body) = match upper.rfind('!') {
        Some(pos) => (true, &upper[pos + 1..]),
        None => (false, upper),
    };

    let parts: Vec<&str> = body.split(':').collect();
    let pattern = reference_part_pattern();
    let mut all_cells = true;
    for part in &parts {
        let Some(caps) = pattern.captures(part) else {
            return has_sheet;
        };
        if caps.get(1).is_none() {
            all_cells = false;
        }
    }

    // A lone column or row label is only a reference as part of a range
    all_cells || parts.len() > 1
}

/// Caller-owned memo of normalization results, shared across sheet tasks.
#[derive(Debug, Default)]
pub struct FormulaCache {
    entries: RwLock<HashMap<String, Result<Arc<NormalizedFormula>, FormulaError>>>,
}

impl FormulaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize `raw`, reusing a previous result for identical text.
    pub fn normalize(&self, raw: &str) -> Result<Arc<NormalizedFormula>, FormulaError> {
        if let Ok(entries) = self.entries.read() {
            if let Some(hit) = entries.get(raw) {
                return hit.clone();
            }
        }

        let result = normalize_formula(raw).map(Arc::new);
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(raw.to_string(), result.clone());
        } else {
            debug!("Formula cache lock poisoned; result not stored");
        }
        result
    }

    /// Number of distinct formula texts seen
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}
