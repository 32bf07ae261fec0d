use thiserror::Error;

#[derive(Error, Debug)]
pub enum XlCompareError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Sheet shape mismatch in '{sheet}': {detail}")]
    SheetShapeMismatch { sheet: String, detail: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Failed to load workbook: {0}")]
    Load(String),

    #[error("Comparison cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, XlCompareError>;

/// A formula that could not be tokenized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormulaError {
    #[error("unbalanced ')' at offset {0}")]
    UnexpectedClose(usize),

    #[error("{0} unclosed '(' at end of formula")]
    UnclosedParen(usize),

    #[error("unbalanced '{{' or '}}' at offset {0}")]
    UnbalancedBrace(usize),

    #[error("unterminated string literal starting at offset {0}")]
    UnterminatedString(usize),

    #[error("unterminated quoted sheet name starting at offset {0}")]
    UnterminatedSheetName(usize),

    #[error("unterminated '[' starting at offset {0}")]
    UnterminatedBracket(usize),
}

/// Macro source that could not be split into procedures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModuleParseError {
    #[error("procedure '{name}' starting at line {line} is never closed")]
    Unterminated { name: String, line: usize },

    #[error("'{text}' at line {line} does not close any procedure")]
    StrayEnd { text: String, line: usize },

    #[error("procedure '{inner}' at line {line} starts inside '{outer}'")]
    Nested {
        outer: String,
        inner: String,
        line: usize,
    },

    #[error("'{text}' at line {line} closes '{name}' with the wrong keyword")]
    MismatchedEnd {
        name: String,
        text: String,
        line: usize,
    },
}
