use std::fmt;
use thiserror::Error;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Failures raised by the simulation core.
///
/// `Configuration` errors describe a systemic setup problem and abort whatever
/// is running. `DataQuality` errors are fatal for a single simulation but an
/// optimization sweep skips the affected candidate and keeps going.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Data quality error: {message}")]
    DataQuality { message: String },

    #[error("Optimization interrupted before any candidate completed")]
    Interrupted,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn data_quality(message: impl Into<String>) -> Self {
        Self::DataQuality {
            message: message.into(),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    pub fn is_data_quality(&self) -> bool {
        matches!(self, Self::DataQuality { .. })
    }

    /// Wrap a persistence failure, keeping its whole context chain.
    pub fn storage(error: impl fmt::Display) -> Self {
        Self::Storage(format!("{:#}", error))
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Context};

    #[test]
    fn storage_errors_keep_context_chain() {
        let failure: anyhow::Result<()> = Err(anyhow!("database is locked"));
        let err = EngineError::storage(failure.context("storing ticker AAPL").unwrap_err());
        assert!(err.is_storage());
        assert!(!err.is_configuration() && !err.is_data_quality());
        assert_eq!(
            err.to_string(),
            "Storage error: storing ticker AAPL: database is locked"
        );
    }
}
