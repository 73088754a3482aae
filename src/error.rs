//! Error handling for echoform.
//! Defines the error taxonomy of a processing pass and the crate-wide `EchoformResult` alias.

use std::io;
use thiserror::Error;

/// Custom error types for echoform operations.
///
/// Every variant aborts the current pass. Recoverable anomalies are reported
/// through [`crate::processor::Warning`] instead.
#[derive(Error, Debug)]
pub enum EchoformError {
    /// Represents errors that occur during file system operations
    #[error("IO error: {0}.")]
    IoError(#[from] io::Error),

    /// A file system call failed on a known path
    #[error("IO error on '{path}': {source}.")]
    PathIoError {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Malformed directive options (bad pattern fragment, illegal characters)
    #[error("Delimiter error: {0}.")]
    DelimiterError(String),

    /// The first and second options parse disagree
    #[error("Statement consistency error: {0}")]
    StatementConsistencyError(String),

    /// A `var` statement declared with `=` failed to resolve
    #[error("Declaration error in '{statement}': {source}")]
    DeclarationError {
        statement: String,
        #[source]
        source: Box<EchoformError>,
    },

    /// A `var` statement that cannot be declared as written
    #[error("Invalid declaration of '{name}': {reason}")]
    InvalidDeclaration { name: String, reason: String },

    /// Read, fetch, parse or load failure for a resource
    #[error("Resource error for '{uri}': {reason}")]
    ResourceError { uri: String, reason: String },

    /// Malformed pipeline, non-callable action or failing action
    #[error("Expression error in '{expression}': {reason}")]
    ExpressionError { expression: String, reason: String },

    /// Output path equals the source path or exists as a non-file
    #[error("Output conflict: {0}")]
    OutputConflictError(String),

    /// Network fetch failed
    #[error("Request '{url}' failed: {reason}")]
    HttpError {
        url: String,
        status: Option<u16>,
        reason: String,
    },

    /// The HTTP client could not be set up
    #[error("HTTP client error: {0}")]
    HttpClientError(#[from] reqwest::Error),

    /// A regular expression assembled from delimiters failed to compile
    #[error("Regex error: {0}")]
    RegexError(#[from] regex::Error),
}

/// Convenience type alias for Results with [`EchoformError`] as the error type.
pub type EchoformResult<T> = std::result::Result<T, EchoformError>;

impl EchoformError {
    /// Wraps an I/O error with the path it happened on.
    pub fn path_io<P: AsRef<std::path::Path>>(path: P, source: io::Error) -> Self {
        EchoformError::PathIoError { path: path.as_ref().display().to_string(), source }
    }

    /// Builds a resource error from any displayable cause.
    pub fn resource<U: Into<String>, R: std::fmt::Display>(uri: U, reason: R) -> Self {
        EchoformError::ResourceError { uri: uri.into(), reason: reason.to_string() }
    }

    /// Builds an expression error from any displayable cause.
    pub fn expression<E: Into<String>, R: std::fmt::Display>(expression: E, reason: R) -> Self {
        EchoformError::ExpressionError { expression: expression.into(), reason: reason.to_string() }
    }

    /// Whether the underlying cause is a missing file.
    pub fn is_not_found(&self) -> bool {
        match self {
            EchoformError::IoError(e) | EchoformError::PathIoError { source: e, .. } => {
                e.kind() == io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

/// Default error handler that prints the error and exits the program.
///
/// # Arguments
/// * `err` - The error to handle
/// * `code` - Process exit status
pub fn default_error_handler(err: EchoformError, code: i32) -> ! {
    eprintln!("{}", err);
    std::process::exit(code);
}
