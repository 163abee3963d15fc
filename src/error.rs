use std::fmt;

use thiserror::Error;

use crate::datatype::FieldType;

#[derive(Error, Debug)]
pub enum FcError {
    #[error("Schema error: {0}")]
    Schema(String),
    #[error("Syntax error: {}", join(.0))]
    Syntax(Vec<SyntaxError>),
    #[error("Compile error: {}", join(.0))]
    Semantic(Vec<DslError>),
    #[error("Storage integrity error: {0}")]
    StorageIntegrity(String),
    #[error("Unauthorized: {0}")]
    Authorization(String),
    #[error("Execution error: {0}")]
    Execution(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, FcError>;

impl FcError {
    /// Semantic errors of a failed compilation, empty for any other kind.
    pub fn semantic(&self) -> &[DslError] {
        match self {
            FcError::Semantic(errors) => errors,
            _ => &[],
        }
    }
}

// Helper conversions
impl From<rusqlite::Error> for FcError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}
impl From<config::ConfigError> for FcError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
impl From<serde_json::Error> for FcError {
    fn from(e: serde_json::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

/// A position-tagged failure reported by the DSL grammar.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} at {}:{}", self.message, self.line, self.col)
    }
}

/// Semantic problems found while compiling DSL text against a schema.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DslError {
    #[error("Entity '{0}' not found")]
    UnknownEntity(String),
    #[error("Property '{property}' not found in entity '{entity}'")]
    UnknownProperty { entity: String, property: String },
    #[error("Expecting typeOf {declared} for '{target}'. Trying to assign a {attempted}")]
    TypeMismatch {
        target: String,
        declared: FieldType,
        attempted: FieldType,
    },
    #[error("Expecting an input value for '{0}'")]
    MissingValue(String),
    #[error("Updating an owned reference/collection is not supported. Update '{0}' using the @parent field")]
    OwnedMutation(String),
    #[error("Property '{0}' is not an input")]
    NotInput(String),
    #[error("Malformed value for '{target}': {expected}")]
    Shape { target: String, expected: String },
    #[error("Invalid pagination: {0}")]
    Pagination(String),
    #[error("Query already contains the '?{0}' parameter")]
    ParameterCollision(String),
    #[error("Expecting an argument value for '?{name}' ({target})")]
    UnresolvedParameter { name: String, target: String },
    #[error("Invalid path '{path}'. Please complete the path with one of {valid:?}")]
    InvalidPath { path: String, valid: Vec<String> },
    #[error("Invalid value for '{target}': {reason}")]
    InvalidValue { target: String, reason: String },
    #[error("Order index {order} is used more than once in '{entity}'")]
    DuplicateOrder { entity: String, order: i64 },
    #[error("Value rejected by the check of '{0}'")]
    CheckFailed(String),
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
