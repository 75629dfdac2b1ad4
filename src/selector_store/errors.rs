//! Configuration store error taxonomy
//!
//! Any failure during `load` is fatal to the snapshot being built; the
//! active snapshot is never touched by a failed load.

use std::path::PathBuf;

/// Errors raised while loading or resolving selector configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A document failed schema validation (bad kind, params, name, bounds).
    #[error("schema validation failed in {file}: {reason}")]
    SchemaValidation { file: String, reason: String },

    /// Circular `extends` or template reference.
    #[error("inheritance error in scope {scope:?}: {reason}")]
    Inheritance { scope: String, reason: String },

    /// Structural configuration problem (duplicate semantic names).
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
