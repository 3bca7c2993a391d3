//! Engine error types.

use thiserror::Error;

/// Errors raised while compiling directive sets or driving a transaction.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A directive the bundled engine does not understand.
    #[error("unknown directive {0:?}")]
    UnknownDirective(String),

    /// A directive with a malformed argument.
    #[error("invalid directive {directive:?}: {message}")]
    InvalidDirective {
        /// The directive name.
        directive: String,
        /// What was wrong with it.
        message: String,
    },

    /// A `SecRule` that does not fit the supported grammar.
    #[error("invalid rule: {0}")]
    InvalidRule(String),

    /// A regular expression that failed to compile.
    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// The regex compiler's complaint.
        #[source]
        source: regex::Error,
    },

    /// The transaction was closed twice.
    #[error("transaction already closed")]
    TransactionClosed,
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
