use thiserror::Error;

/// Main error type for the pluggable transport server
#[derive(Debug, Error)]
pub enum PtError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse configuration (line {line}): {message}")]
    ConfigParse { line: usize, message: String },

    #[error("Missing required configuration section: [{0}]")]
    MissingConfigSection(String),

    #[error("Missing required configuration field: {section}.{key}")]
    MissingConfigField { section: String, key: String },

    #[error("Duplicate configuration section: [{0}]")]
    DuplicateSection(String),

    #[error("Duplicate option '{key}' in section [{section}]")]
    DuplicateOption { section: String, key: String },

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // Start errors
    #[error("Failed to spawn PT executable: {0}")]
    SpawnError(String),

    #[error("PT handshake failed: {0}")]
    HandshakeError(String),

    #[error("PT did not finish starting within {0:?}")]
    StartupTimeout(std::time::Duration),

    // Runtime errors
    #[error("PT runtime failure: {0}")]
    RuntimeFailure(String),

    #[error("Failed to stop PT executable (pid {0}): {1}")]
    StopError(u32, String),

    #[error("Signal error: {0}")]
    SignalError(String),

    #[error("Supervisor is in invalid state for this operation: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PtError {
    /// Whether the error was raised while loading or validating configuration
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            PtError::ConfigError(_)
                | PtError::InvalidConfig(_)
                | PtError::ConfigParse { .. }
                | PtError::MissingConfigSection(_)
                | PtError::MissingConfigField { .. }
                | PtError::DuplicateSection(_)
                | PtError::DuplicateOption { .. }
                | PtError::ConfigValidationError(_)
        )
    }

    /// Whether the error means the PT never reached the running state
    pub fn is_start(&self) -> bool {
        matches!(
            self,
            PtError::SpawnError(_) | PtError::HandshakeError(_) | PtError::StartupTimeout(_)
        )
    }

    /// Process exit code reported by the CLI for this error
    pub fn exit_code(&self) -> u8 {
        if self.is_config() {
            2
        } else if self.is_start() {
            3
        } else {
            4
        }
    }
}

/// Result type alias for PT server operations
pub type Result<T> = std::result::Result<T, PtError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_by_category() {
        let missing = PtError::MissingConfigField {
            section: "common".to_string(),
            key: "exec".to_string(),
        };
        assert_eq!(missing.exit_code(), 2);
        assert_eq!(PtError::SpawnError("nope".to_string()).exit_code(), 3);
        assert_eq!(
            PtError::StartupTimeout(std::time::Duration::from_secs(1)).exit_code(),
            3
        );
        assert_eq!(PtError::RuntimeFailure("pipe".to_string()).exit_code(), 4);
    }

    #[test]
    fn test_display_names_location() {
        let err = PtError::DuplicateOption {
            section: "transports".to_string(),
            key: "obfs4".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Duplicate option 'obfs4' in section [transports]"
        );

        let err = PtError::ConfigParse {
            line: 7,
            message: "expected 'key = value'".to_string(),
        };
        assert!(err.to_string().contains("line 7"));
    }
}
