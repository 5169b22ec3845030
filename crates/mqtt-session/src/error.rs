use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MqttError>;

/// Transport and protocol failures observed while talking to a broker.
#[derive(Debug, Clone, Error)]
pub enum MqttError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Connection refused by broker (code {code:#04x}): {reason}")]
    ConnectionRefused { code: u8, reason: &'static str },

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Unsupported broker URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("No broker endpoints configured")]
    NoEndpoints,

    #[error("Connection closed by peer")]
    ConnectionClosedByPeer,

    #[error("Not connected")]
    NotConnected,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl MqttError {
    /// A refusal is a definitive answer from a broker; other failures are
    /// local to one endpoint and leave the remaining endpoints worth trying.
    #[must_use]
    pub fn is_broker_refusal(&self) -> bool {
        matches!(self, Self::ConnectionRefused { .. })
    }
}

impl From<std::io::Error> for MqttError {
    fn from(err: std::io::Error) -> Self {
        MqttError::Io(err.to_string())
    }
}

/// Failures of the session lifecycle operations.
///
/// Every variant is terminal for the call that produced it. Nothing is retried
/// internally and no partially initialised session is ever handed out.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no active execution context: session operations must run inside a managed iteration")]
    MissingExecutionContext,

    #[error("TLS configuration error: {0}")]
    Configuration(String),

    #[error("MQTT handshake did not complete within {}ms", .timeout.as_millis())]
    HandshakeTimeout { timeout: Duration },

    #[error("MQTT handshake failed: {0}")]
    Handshake(#[source] MqttError),
}

impl SessionError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingExecutionContext => ErrorKind::MissingExecutionContext,
            Self::Configuration(_) => ErrorKind::ConfigurationError,
            Self::HandshakeTimeout { .. } => ErrorKind::HandshakeTimeout,
            Self::Handshake(_) => ErrorKind::HandshakeError,
        }
    }

    #[must_use]
    pub fn to_fault(&self) -> HostFault {
        HostFault::from(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    MissingExecutionContext,
    ConfigurationError,
    HandshakeTimeout,
    HandshakeError,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingExecutionContext => "MissingExecutionContext",
            Self::ConfigurationError => "ConfigurationError",
            Self::HandshakeTimeout => "HandshakeTimeout",
            Self::HandshakeError => "HandshakeError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the host receives when an operation fails: a stable kind to branch on
/// and a message for humans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostFault {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&SessionError> for HostFault {
    fn from(err: &SessionError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for HostFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MqttError::ConnectionRefused {
            code: 0x05,
            reason: "not authorized",
        };
        assert_eq!(
            err.to_string(),
            "Connection refused by broker (code 0x05): not authorized"
        );

        let err = SessionError::HandshakeTimeout {
            timeout: Duration::from_millis(2000),
        };
        assert_eq!(
            err.to_string(),
            "MQTT handshake did not complete within 2000ms"
        );
    }

    #[test]
    fn test_error_from_io() {
        use std::io;
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "test");
        let mqtt_err: MqttError = io_err.into();
        match mqtt_err {
            MqttError::Io(e) => assert!(e.contains("test")),
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_kinds() {
        assert_eq!(
            SessionError::MissingExecutionContext.kind(),
            ErrorKind::MissingExecutionContext
        );
        assert_eq!(
            SessionError::Configuration("bad".into()).kind(),
            ErrorKind::ConfigurationError
        );
        assert_eq!(
            SessionError::Handshake(MqttError::NoEndpoints).kind(),
            ErrorKind::HandshakeError
        );
        assert_eq!(ErrorKind::HandshakeTimeout.to_string(), "HandshakeTimeout");
    }

    #[test]
    fn test_host_fault_keeps_handshake_detail() {
        let err = SessionError::Handshake(MqttError::ConnectionRefused {
            code: 0x04,
            reason: "bad user name or password",
        });
        let fault = err.to_fault();
        assert_eq!(fault.kind, ErrorKind::HandshakeError);
        assert!(fault.message.contains("bad user name or password"));

        let json = serde_json::to_value(&fault).unwrap();
        assert_eq!(json["kind"], "HandshakeError");
    }

    #[test]
    fn test_broker_refusal() {
        assert!(MqttError::ConnectionRefused {
            code: 0x86,
            reason: "bad user name or password"
        }
        .is_broker_refusal());
        assert!(!MqttError::ConnectionError("reset".into()).is_broker_refusal());
    }
}
