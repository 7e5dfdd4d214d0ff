// Test suite for the utils module
// Covers the error conversions used across the hub and the console.

use crate::utils::error::{ChatError, Result};

mod error_tests {
    use super::*;

    /// Test the Result type alias
    #[test]
    fn test_result_type() {
        fn returns_result() -> Result<String> {
            Ok("success".to_string())
        }

        assert_eq!(returns_result().unwrap(), "success");
    }

    /// Test error message formatting
    #[test]
    fn test_error_formatting() {
        let error_cases = vec![
            (ChatError::InvalidArguments("Bad input".to_string()), "Invalid arguments: Bad input"),
            (ChatError::ParseError("Syntax error".to_string()), "Parse error: Syntax error"),
            (ChatError::NotFound("join request 4".to_string()), "Resource not found: join request 4"),
            (ChatError::SettingsError("readonly".to_string()), "Settings error: readonly"),
            (ChatError::ConsoleError("closed".to_string()), "Console error: closed"),
            (ChatError::SystemError("General error".to_string()), "System error: General error"),
        ];

        for (error, expected) in error_cases {
            assert_eq!(format!("{}", error), expected);
        }
    }

    /// Test conversion from ParseIntError
    #[test]
    fn test_parse_int_error_conversion() {
        let parse_error = "not_a_number".parse::<usize>().unwrap_err();
        let chat_error: ChatError = parse_error.into();
        assert!(matches!(chat_error, ChatError::ParseError(_)));
    }

    /// Test conversion from AddrParseError
    #[test]
    fn test_addr_parse_error_conversion() {
        let addr_error = "not-an-ip:80".parse::<std::net::SocketAddr>().unwrap_err();
        let chat_error: ChatError = addr_error.into();
        assert!(matches!(chat_error, ChatError::ParseError(_)));
    }

    /// An invalid search pattern is an operator input error
    #[test]
    fn test_regex_error_conversion() {
        let regex_error = regex::Regex::new("(unclosed").unwrap_err();
        let chat_error: ChatError = regex_error.into();
        assert!(matches!(chat_error, ChatError::InvalidArguments(_)));
    }

    /// Test conversion from TOML deserialization error
    #[test]
    fn test_toml_de_error_conversion() {
        let result: std::result::Result<toml::Table, toml::de::Error> =
            toml::from_str("invalid toml [");
        let chat_error: ChatError = result.unwrap_err().into();
        assert!(matches!(chat_error, ChatError::SettingsError(_)));
    }

    /// Test error propagation with the question mark operator
    #[test]
    fn test_error_propagation() {
        fn parse_capacity(input: &str) -> Result<usize> {
            Ok(input.parse::<usize>()?)
        }

        assert_eq!(parse_capacity("8").unwrap(), 8);
        match parse_capacity("eight") {
            Err(ChatError::ParseError(msg)) => assert!(msg.contains("invalid digit")),
            other => panic!("Expected ParseError, got {:?}", other),
        }
    }

    /// Test IO error with different error kinds
    #[test]
    fn test_io_error_kinds() {
        let kinds = [
            std::io::ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied,
            std::io::ErrorKind::ConnectionReset,
            std::io::ErrorKind::TimedOut,
        ];

        for kind in kinds {
            let chat_error: ChatError = std::io::Error::new(kind, "test message").into();
            match chat_error {
                ChatError::IoError(e) => assert_eq!(e.kind(), kind),
                _ => panic!("Expected IoError for {:?}", kind),
            }
        }
    }
}

mod tracing_tests {
    use crate::utils::tracing::setup_tracing;

    /// Repeated setup is harmless
    #[test]
    fn test_setup_tracing_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("trace.log");
        setup_tracing(&trace);
        setup_tracing(&trace);
        tracing::info!("tracing ready");
    }
}
