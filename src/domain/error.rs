use thiserror::Error;

/// Failure to establish (or re-establish) the transport to a controller
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectError {
    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Connection to {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("Handshake with {endpoint} failed: {message}")]
    Handshake { endpoint: String, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No printer named '{0}' is configured")]
    UnknownPrinter(String),

    #[error("Session was closed by the operator")]
    Closed,
}

/// Terminal outcome of a single request
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Controller error {code}: {message}")]
    ControllerError { code: i64, message: String },

    #[error("Malformed protocol frame: {0}")]
    ProtocolMalformed(String),
}

/// Errors raised by the command pipeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Script aborted at line {line}: {source}")]
    ScriptAborted {
        line: usize,
        #[source]
        source: RpcError,
    },

    #[error("Unknown built-in command: {0}")]
    UnknownBuiltin(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Unknown printer: {0}")]
    UnknownPrinter(String),

    #[error("No active printer selected")]
    NoActivePrinter,

    #[error("Refused: {0}")]
    Refused(String),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    EmergencyStop(#[from] EmergencyStopError),
}

/// Emergency stop failures are surfaced immediately and never retried
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmergencyStopError {
    #[error("Emergency stop not sent: printer '{0}' is not connected")]
    NotConnected(String),

    #[error("Emergency stop write to '{printer}' failed: {message}")]
    WriteFailed { printer: String, message: String },
}

/// Raw transport failures, below the request layer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Transport closed")]
    Closed,
}

/// Moonriver unified error type
#[derive(Error, Debug)]
pub enum MoonriverError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    EmergencyStop(#[from] EmergencyStopError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("TUI error: {0}")]
    TuiError(String),

    #[error("Output error: {0}")]
    Output(String),
}

pub type MoonriverResult<T> = Result<T, MoonriverError>;

impl From<TransportError> for ConnectError {
    fn from(err: TransportError) -> Self {
        ConnectError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_abort_display_includes_line() {
        let err = PipelineError::ScriptAborted {
            line: 7,
            source: RpcError::ControllerError {
                code: 400,
                message: "Unknown command".to_string(),
            },
        };
        let text = err.to_string();
        assert!(text.contains("line 7"));
        assert!(text.contains("Unknown command"));
    }

    #[test]
    fn test_rpc_error_converts_into_pipeline_error() {
        let err: PipelineError = RpcError::Timeout.into();
        assert_eq!(err, PipelineError::Rpc(RpcError::Timeout));
    }

    #[test]
    fn test_top_level_conversion() {
        let err: MoonriverError = EmergencyStopError::NotConnected("voron".to_string()).into();
        assert!(matches!(err, MoonriverError::EmergencyStop(_)));
        assert!(err.to_string().contains("voron"));
    }
}
