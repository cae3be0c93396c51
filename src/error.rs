//! Error taxonomy at the pipeline boundary.
//!
//! Internal stages return `anyhow::Result` with context attached along the way.
//! [`CrunchError`] is what leaves the library: configuration problems are
//! reported as-is, everything else is wrapped once, after cleanup, so the
//! caller knows that tables and the engine connection were released.

use thiserror::Error;

pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_USAGE: i32 = 2;

#[derive(Debug, Error)]
pub enum CrunchError {
    #[error("Invalid options: {0}")]
    Config(String),
    #[error("Not implemented: {0}")]
    NotImplemented(String),
    #[error("Crunch failed (cleanup was performed): {source:#}")]
    Failed {
        #[source]
        source: anyhow::Error,
    },
}

impl CrunchError {
    pub fn config(message: impl Into<String>) -> Self {
        CrunchError::Config(message.into())
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        CrunchError::NotImplemented(message.into())
    }

    /// Wraps a pipeline failure, unless it already is a configuration-class error.
    pub fn failed(source: anyhow::Error) -> Self {
        match source.downcast::<CrunchError>() {
            Ok(CrunchError::Failed { source }) => CrunchError::Failed { source },
            Ok(other) => other,
            Err(source) => CrunchError::Failed { source },
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            CrunchError::Config(_) | CrunchError::NotImplemented(_) => EXIT_USAGE,
            CrunchError::Failed { .. } => EXIT_FAILURE,
        }
    }
}
