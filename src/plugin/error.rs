//! Plugin start errors.

use crate::config::ConfigError;
use crate::engine::EngineError;
use crate::registry::RegistryError;
use thiserror::Error;

/// Why plugin start failed. Every variant is fatal: the module must not
/// load with a partial configuration.
#[derive(Debug, Error)]
pub enum StartError {
    /// The configuration document failed to parse or validate.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A declared directive set is neither the default nor referenced by
    /// any authority.
    #[error("Unknown directives {0:?}")]
    UnknownDirectives(String),

    /// A directive set failed to compile.
    #[error("failed to compile directive set {name:?}: {source}")]
    Compile {
        /// The directive-set name.
        name: String,
        /// The engine's complaint.
        #[source]
        source: EngineError,
    },

    /// The engine registry rejected a registration.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
