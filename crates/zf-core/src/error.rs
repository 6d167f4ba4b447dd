//! Error types for zf-core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for zf operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for handler resolution and dispatch
#[derive(Debug, Error)]
pub enum Error {
    /// No entry, sub-namespace or loadable file for a name
    #[error("handler \"{name}\" not found under \"{}\"", root.display())]
    HandlerNotFound { name: String, root: PathBuf },

    /// A handler file resolved but did not yield a usable handler
    #[error("invalid handler \"{name}\": {reason}")]
    InvalidHandler { name: String, reason: String },

    /// Keyword invocation without a value for a default-less parameter
    #[error("'{param}' is required when calling '{handler}'")]
    MissingRequiredArgument { param: String, handler: String },

    /// Dispatch found no rule for the method/path
    #[error("no route matched: {method} {path}")]
    NoRouteMatched { method: String, path: String },

    /// Invalid HTTP method
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// Invalid path or URI
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Configuration could not be read or merged
    #[error("Config error: {0}")]
    Config(String),

    /// Failure raised by a handler body
    #[error("Handler error: {0}")]
    Handler(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for handler bodies reporting their own failure
    pub fn handler(message: impl Into<String>) -> Self {
        Error::Handler(message.into())
    }
}
