use thiserror::Error;

#[derive(Error, Debug)]
pub enum McpError {
    #[error("client already registered: {0}")]
    DuplicateId(String),

    #[error("client not found: {0}")]
    ClientNotFound(String),

    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),

    #[error("{transport} transport requires '{parameter}' in connection parameters")]
    MissingParameter {
        transport: String,
        parameter: String,
    },

    #[error("invalid connection parameter '{parameter}': {reason}")]
    InvalidParameter { parameter: String, reason: String },

    #[error("failed to start session: {0}")]
    SpawnFailure(String),

    #[error("session initialize failed: {0}")]
    InitializeFailure(String),

    #[error("tool discovery failed: {0}")]
    DiscoveryFailure(String),

    #[error("client not connected: {0}")]
    NotConnected(String),

    #[error("tool call '{tool}' failed: {message}")]
    CallFailure { tool: String, message: String },

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("remote error {code}: {message}")]
    Protocol { code: i32, message: String },

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<figment::Error> for McpError {
    fn from(e: figment::Error) -> Self {
        McpError::ConfigError(e.to_string())
    }
}

impl From<validator::ValidationErrors> for McpError {
    fn from(e: validator::ValidationErrors) -> Self {
        McpError::InvalidConfig(e.to_string())
    }
}

impl McpError {
    pub fn missing(transport: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self::MissingParameter {
            transport: transport.into(),
            parameter: parameter.into(),
        }
    }

    pub fn invalid(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Errors raised while resolving parameters, before anything was started.
    pub fn is_parameter_error(&self) -> bool {
        matches!(
            self,
            Self::MissingParameter { .. } | Self::InvalidParameter { .. } | Self::UnsupportedTransport(_)
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DuplicateId(_) => "DUPLICATE_ID",
            Self::ClientNotFound(_) => "CLIENT_NOT_FOUND",
            Self::UnsupportedTransport(_) => "UNSUPPORTED_TRANSPORT",
            Self::MissingParameter { .. } => "MISSING_PARAMETER",
            Self::InvalidParameter { .. } => "INVALID_PARAMETER",
            Self::SpawnFailure(_) => "SPAWN_FAILURE",
            Self::InitializeFailure(_) => "INITIALIZE_FAILURE",
            Self::DiscoveryFailure(_) => "DISCOVERY_FAILURE",
            Self::NotConnected(_) => "NOT_CONNECTED",
            Self::CallFailure { .. } => "CALL_FAILURE",
            Self::TransportError(_) => "TRANSPORT_ERROR",
            Self::Protocol { .. } => "PROTOCOL_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type McpResult<T> = Result<T, McpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_parameter_message() {
        let err = McpError::missing("streaming-endpoint", "url");
        assert_eq!(
            err.to_string(),
            "streaming-endpoint transport requires 'url' in connection parameters"
        );
        assert_eq!(err.error_code(), "MISSING_PARAMETER");
        assert!(err.is_parameter_error());
    }

    #[test]
    fn test_call_failure_is_not_parameter_error() {
        let err = McpError::CallFailure {
            tool: "list_dir".to_string(),
            message: "boom".to_string(),
        };
        assert!(!err.is_parameter_error());
        assert_eq!(err.error_code(), "CALL_FAILURE");
    }
}
