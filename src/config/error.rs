//! Configuration error types.

use thiserror::Error;

/// Configuration-related errors. All of them are fatal at plugin start:
/// a module with a broken configuration must not load.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The configuration bytes are not a JSON document.
    #[error("invalid json: {0:?}")]
    InvalidJson(String),

    /// The document is JSON but a known field has the wrong shape.
    #[error("invalid configuration document: {0}")]
    InvalidDocument(String),

    /// `default_directives` names a directive set that is not declared.
    #[error("directive map not found for default directive: {0:?}")]
    UnknownDefaultDirectives(String),

    /// An authority references a directive set that is not declared.
    #[error("directive map not found for authority {authority}: {name:?}")]
    UnknownAuthorityDirectives {
        /// The authority whose reference is dangling.
        authority: String,
        /// The missing directive-set name.
        name: String,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
