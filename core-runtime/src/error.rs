use thiserror::Error;

/// Startup errors: engine assembly and logging setup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A policy value or config field is out of range
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required host capability was not provided
    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, Error>;
