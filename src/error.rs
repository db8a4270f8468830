//! Error types for the record store

use std::fmt;

use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, PbError>;

/// Record store errors
///
/// Engine and registry calls fail fast with one of these; nothing is retried
/// internally.
#[derive(Error, Debug)]
pub enum PbError {
    #[error("malformed path: {0}")]
    MalformedPath(String),

    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("unknown type: {name}{}", suggest(.suggestion))]
    UnknownType {
        name: String,
        suggestion: Option<String>,
    },

    #[error("field not found: {name}{}", suggest(.suggestion))]
    FieldNotFound {
        name: String,
        suggestion: Option<String>,
    },

    #[error("array index is out-of-range: {index} : {len}")]
    IndexOutOfRange { index: String, len: usize },

    #[error("map key not found: {0}")]
    MapKeyNotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Coercion failure; the message is the bare kind-specific text, e.g. `not int32`
    #[error("{0}")]
    InvalidValue(String),

    #[error("failed to decode {type_name}: {reason}")]
    Decode { type_name: String, reason: String },

    #[error("already imported: {0}")]
    AlreadyImported(String),

    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    #[error("schema file already exists: {0}")]
    FileExists(String),

    #[error("failed to load schemas\n{}", render_diagnostics(.0))]
    SchemaLoad(Vec<SchemaDiagnostic>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] config_crate::ConfigError),
}

impl PbError {
    pub(crate) fn not_kind(kind: &str) -> Self {
        PbError::InvalidValue(format!("not {}", kind))
    }
}

fn suggest(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean '{}'?)", s),
        None => String::new(),
    }
}

fn render_diagnostics(diagnostics: &[SchemaDiagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// A single schema compiler error with its source position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDiagnostic {
    pub file: String,
    /// 1-based; 0 when the compiler reported no position
    pub line: usize,
    /// 1-based; 0 when the compiler reported no position
    pub column: usize,
    pub message: String,
}

impl fmt::Display for SchemaDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "error:{}:{}:{}:{}",
            self.file, self.line, self.column, self.message
        )
    }
}
