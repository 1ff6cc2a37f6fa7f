use moonriver::core::communication::codec::{decode, Frame};
use moonriver::core::pipeline::parse_line;
use moonriver::domain::error::{
    ConnectError, EmergencyStopError, MoonriverError, MoonriverResult, PipelineError, RpcError, TransportError,
};
use std::error::Error;

/// Error handling and resilience tests
#[cfg(test)]
mod error_handling_tests {
    use super::*;

    #[test]
    fn test_error_types_display() {
        let errors: Vec<MoonriverError> = vec![
            ConnectError::Timeout {
                endpoint: "ws://voron.local/websocket".to_string(),
            }
            .into(),
            RpcError::ControllerError {
                code: 400,
                message: "Unknown command".to_string(),
            }
            .into(),
            PipelineError::NoActivePrinter.into(),
            EmergencyStopError::NotConnected("voron".to_string()).into(),
            MoonriverError::Config {
                message: "bad printer table".to_string(),
            },
            MoonriverError::TuiError("terminal lost".to_string()),
            MoonriverError::Output("broken pipe".to_string()),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty(), "Error display should not be empty");
        }
    }

    #[test]
    fn test_script_abort_keeps_rpc_source() {
        let error = PipelineError::ScriptAborted {
            line: 7,
            source: RpcError::Timeout,
        };
        assert_eq!(error.to_string(), "Script aborted at line 7: Request timed out");

        let source = error.source().expect("abort should carry its cause");
        assert_eq!(source.to_string(), RpcError::Timeout.to_string());
    }

    #[test]
    fn test_errors_convert_into_moonriver_error() {
        let rpc: MoonriverError = PipelineError::from(RpcError::ConnectionLost).into();
        assert!(matches!(rpc, MoonriverError::Pipeline(PipelineError::Rpc(RpcError::ConnectionLost))));
        assert_eq!(rpc.to_string(), "Connection lost");

        let transport: ConnectError = TransportError::Closed.into();
        assert_eq!(transport, ConnectError::Transport("Transport closed".to_string()));

        let io: MoonriverError = std::io::Error::new(std::io::ErrorKind::NotFound, "script.gcode").into();
        assert!(io.to_string().contains("script.gcode"));
    }

    #[test]
    fn test_error_propagation() {
        fn pick(name: &str) -> MoonriverResult<()> {
            Err(ConnectError::UnknownPrinter(name.to_string()))?
        }

        let err = pick("ghost").unwrap_err();
        assert!(matches!(err, MoonriverError::Connect(ConnectError::UnknownPrinter(_))));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_malformed_frames_do_not_panic() {
        let inputs = [
            "",
            "not json",
            "[]",
            "{}",
            r#"{"jsonrpc":"2.0"}"#,
            r#"{"jsonrpc":"2.0","id":"seven","result":{}}"#,
            r#"{"jsonrpc":"2.0","method":42}"#,
        ];

        for input in inputs {
            assert!(
                matches!(decode(input), Frame::Malformed { .. }),
                "expected '{}' to be malformed",
                input
            );
        }
    }

    #[test]
    fn test_invalid_builtins_are_rejected() {
        assert!(matches!(parse_line(":frobnicate"), Err(PipelineError::UnknownBuiltin(_))));
        assert!(matches!(parse_line(":printer"), Err(PipelineError::InvalidArguments(_))));
        assert!(matches!(parse_line(":connect"), Err(PipelineError::InvalidArguments(_))));
    }
}
