// src/error.rs

//! Error types for the build engine
//!
//! Every pipeline step returns [`Result`]; only the outermost entry point
//! logs and exits. [`ErrorKind`] is the serializable discriminant used to
//! rebuild errors that cross the worker socket.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Recipe failed to parse
    #[error("{path}:{line}:{column}: {message}")]
    RecipeSyntax {
        path: String,
        line: usize,
        column: usize,
        message: String,
    },

    /// Pass one attempted something the sandbox forbids
    #[error("restricted operation in recipe: {0}")]
    RestrictedViolation(String),

    /// A required build variable was absent after decoding
    #[error("required variable '{0}' is not set")]
    MissingRequiredVar(String),

    /// A build variable had the wrong shape (e.g. non-integer release)
    #[error("invalid value for variable '{name}': {reason}")]
    InvalidVar { name: String, reason: String },

    #[error("checksum mismatch for {source_name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        source_name: String,
        expected: String,
        actual: String,
    },

    #[error("sources and checksums differ in length ({sources} sources, {checksums} checksums)")]
    ChecksumLengthMismatch { sources: usize, checksums: usize },

    #[error("dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("dependency not found: {0}")]
    DependencyMissing(String),

    /// A hook or subprocess exited non-zero
    #[error("{0}")]
    ExecFailed(String),

    #[error("packager error: {0}")]
    PackagerError(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("architecture not supported by recipe: host {host}, recipe {}", .supported.join(", "))]
    UnsupportedArchitecture { host: String, supported: Vec<String> },

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("download error: {0}")]
    DownloadError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("worker error: {0}")]
    WorkerError(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err.to_string())
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        Error::IoError(err.to_string())
    }
}

/// Serializable error discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RecipeSyntax,
    RestrictedViolation,
    MissingRequiredVar,
    InvalidVar,
    ChecksumMismatch,
    ChecksumLengthMismatch,
    DependencyCycle,
    DependencyMissing,
    ExecFailed,
    PackagerError,
    Cancelled,
    UnsupportedArchitecture,
    Io,
    Parse,
    Download,
    NotFound,
    Config,
    Worker,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::RecipeSyntax { .. } => ErrorKind::RecipeSyntax,
            Error::RestrictedViolation(_) => ErrorKind::RestrictedViolation,
            Error::MissingRequiredVar(_) => ErrorKind::MissingRequiredVar,
            Error::InvalidVar { .. } => ErrorKind::InvalidVar,
            Error::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            Error::ChecksumLengthMismatch { .. } => ErrorKind::ChecksumLengthMismatch,
            Error::DependencyCycle(_) => ErrorKind::DependencyCycle,
            Error::DependencyMissing(_) => ErrorKind::DependencyMissing,
            Error::ExecFailed(_) => ErrorKind::ExecFailed,
            Error::PackagerError(_) => ErrorKind::PackagerError,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::UnsupportedArchitecture { .. } => ErrorKind::UnsupportedArchitecture,
            Error::IoError(_) => ErrorKind::Io,
            Error::ParseError(_) => ErrorKind::Parse,
            Error::DownloadError(_) => ErrorKind::Download,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::ConfigError(_) => ErrorKind::Config,
            Error::WorkerError(_) => ErrorKind::Worker,
        }
    }

    /// Rebuild an error received from a worker
    ///
    /// Structured variants lose their fields on the wire; the remote message
    /// is carried in the closest string-bearing variant of the same kind.
    pub fn from_remote(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::RecipeSyntax => Error::RecipeSyntax {
                path: String::new(),
                line: 0,
                column: 0,
                message,
            },
            ErrorKind::RestrictedViolation => Error::RestrictedViolation(message),
            ErrorKind::MissingRequiredVar => Error::MissingRequiredVar(message),
            ErrorKind::InvalidVar => Error::InvalidVar {
                name: String::new(),
                reason: message,
            },
            ErrorKind::DependencyMissing => Error::DependencyMissing(message),
            ErrorKind::ExecFailed => Error::ExecFailed(message),
            ErrorKind::PackagerError => Error::PackagerError(message),
            ErrorKind::Cancelled => Error::Cancelled,
            ErrorKind::Io => Error::IoError(message),
            ErrorKind::Parse => Error::ParseError(message),
            ErrorKind::Download => Error::DownloadError(message),
            ErrorKind::NotFound => Error::NotFound(message),
            ErrorKind::Config => Error::ConfigError(message),
            ErrorKind::ChecksumMismatch
            | ErrorKind::ChecksumLengthMismatch
            | ErrorKind::DependencyCycle
            | ErrorKind::UnsupportedArchitecture
            | ErrorKind::Worker => Error::WorkerError(format!("{kind}: {message}")),
        }
    }

    /// Wire message for [`Error::from_remote`]
    ///
    /// Variants that rebuild into a string-bearing variant carry only their
    /// inner text so the round trip does not double the prefix.
    pub fn remote_message(&self) -> String {
        match self {
            Error::RecipeSyntax { .. } => self.to_string(),
            Error::RestrictedViolation(m)
            | Error::MissingRequiredVar(m)
            | Error::DependencyMissing(m)
            | Error::ExecFailed(m)
            | Error::PackagerError(m)
            | Error::IoError(m)
            | Error::ParseError(m)
            | Error::DownloadError(m)
            | Error::NotFound(m)
            | Error::ConfigError(m) => m.clone(),
            Error::InvalidVar { name, reason } => format!("{name}: {reason}"),
            _ => self.to_string(),
        }
    }
}
