//! Error types for the Ajime deployer

use thiserror::Error;

/// Main error type for the Ajime deployer
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Bad or ambiguous credential file, bad settings or input source
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Device address missing or the device could not be reached
    #[error("Transport error: {0}")]
    TransportError(String),

    /// A remote command exited non-zero in assert mode
    #[error("Remote command `{command}` failed with status {status}: {stderr}")]
    RemoteCommandError {
        command: String,
        status: i32,
        stderr: String,
    },

    /// Malformed service placement descriptor
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// More than one placement node claims the same address
    #[error("Integrity error: {0}")]
    IntegrityError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// Whether this error ends the whole deployment run rather than just the
    /// current device.
    pub fn aborts_run(&self, continue_on_failure: bool) -> bool {
        match self {
            DeployError::ConfigError(_) => true,
            DeployError::RemoteCommandError { .. } => !continue_on_failure,
            DeployError::TransportError(_)
            | DeployError::DecodeError(_)
            | DeployError::IntegrityError(_) => false,
            DeployError::IoError(_) | DeployError::JsonError(_) | DeployError::Internal(_) => {
                !continue_on_failure
            }
        }
    }
}
