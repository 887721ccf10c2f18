// src/error.rs
//! Error handling for the whole pipeline.
//!
//! Configuration problems (missing files, bad descriptors, cycles) and I/O failures
//! propagate to the element build. Recoverable conditions such as assignment misses are
//! surfaced as [`Error::NoAssignment`] so callers can downgrade them to a warning.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type. `Send + Sync + 'static` so it can cross worker threads.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O failure on a specific file.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed JSON in a descriptor, payload, material table or artifact.
    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A referenced source file does not exist.
    #[error("can not access {0}")]
    MissingSource(PathBuf),

    /// Structurally valid JSON that does not describe something buildable.
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// Malformed line in a mesh stream.
    #[error("parse error in {path} line {line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("unknown element '{0}'")]
    UnknownElement(String),

    #[error("element '{element}' has no variant '{variant}'")]
    UnknownVariant { element: String, variant: String },

    /// Nested element references loop back onto an element already being built.
    #[error("cyclic nested element reference: {}", .0.join(" -> "))]
    CyclicReference(Vec<String>),

    /// No material assignment pattern matched the path.
    #[error("no material assignments match for {0}")]
    NoAssignment(String),

    #[error("invalid assignment pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// The build was cancelled between elements.
    #[error("build cancelled")]
    Cancelled,

    /// Simple custom message.
    #[error("{0}")]
    Custom(String),

    /// Context chaining.
    #[error("{message}: {source}")]
    WithContext {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    #[inline]
    pub fn msg(msg: &'static str) -> Self {
        Self::Custom(msg.into())
    }

    #[inline]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    #[inline]
    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }

    /// Add context to any error (chainable, like `.context()` in anyhow).
    #[inline]
    pub fn context<C: Into<String>>(self, context: C) -> Self {
        Self::WithContext {
            message: context.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error once context layers are peeled off.
    pub fn root(&self) -> &Error {
        match self {
            Error::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    #[inline]
    pub fn is_cycle(&self) -> bool {
        matches!(self.root(), Error::CyclicReference(_))
    }

    #[inline]
    pub fn is_no_assignment(&self) -> bool {
        matches!(self.root(), Error::NoAssignment(_))
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Error::Cancelled)
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

/// Convenient `Result` alias, use `crate::Result<T>` everywhere.
pub type Result<T> = std::result::Result<T, Error>;
