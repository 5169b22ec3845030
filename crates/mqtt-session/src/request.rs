use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_KEEP_ALIVE_SECS: u16 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProtocolVersion {
    #[default]
    #[serde(rename = "3.1.1")]
    V311,
    #[serde(rename = "5")]
    V5,
}

impl ProtocolVersion {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            ProtocolVersion::V311 => 4,
            ProtocolVersion::V5 => 5,
        }
    }
}

impl From<ProtocolVersion> for u8 {
    fn from(version: ProtocolVersion) -> Self {
        version.as_u8()
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            4 => Ok(ProtocolVersion::V311),
            5 => Ok(ProtocolVersion::V5),
            _ => Err(()),
        }
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_keep_alive_secs() -> u16 {
    DEFAULT_KEEP_ALIVE_SECS
}

fn default_clean_session() -> bool {
    true
}

/// Everything the caller supplies to open one session.
///
/// Deserializes from the camelCase surface hosts use, e.g.
/// `{"endpoints": ["tcp://broker:1883"], "clientId": "t1", "timeoutMs": 2000}`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequest {
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub tls_enabled: bool,
    #[serde(default)]
    pub tls_ca_path: Option<PathBuf>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u16,
    #[serde(default)]
    pub protocol_version: ProtocolVersion,
}

impl fmt::Debug for ConnectionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRequest")
            .field("endpoints", &self.endpoints)
            .field("username", &self.username)
            .field(
                "password",
                &if self.password.is_empty() { "" } else { "[REDACTED]" },
            )
            .field("clean_session", &self.clean_session)
            .field("client_id", &self.client_id)
            .field("timeout_ms", &self.timeout_ms)
            .field("tls_enabled", &self.tls_enabled)
            .field("tls_ca_path", &self.tls_ca_path)
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("protocol_version", &self.protocol_version)
            .finish()
    }
}

impl Default for ConnectionRequest {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            username: String::new(),
            password: String::new(),
            clean_session: true,
            client_id: String::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            tls_enabled: false,
            tls_ca_path: None,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            protocol_version: ProtocolVersion::V311,
        }
    }
}

impl ConnectionRequest {
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    #[must_use]
    pub fn with_endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endpoints.extend(endpoints.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    #[must_use]
    pub fn with_clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    /// Sub-millisecond precision is truncated.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis().min(u128::from(u64::MAX)) as u64;
        self
    }

    /// Enables TLS. `ca_path` selects strict verification against that bundle;
    /// `None` selects the unverified mode described on
    /// [`TlsPolicy::InsecureSkipVerify`](crate::TlsPolicy::InsecureSkipVerify).
    #[must_use]
    pub fn with_tls(mut self, ca_path: Option<PathBuf>) -> Self {
        self.tls_enabled = true;
        self.tls_ca_path = ca_path;
        self
    }

    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive_secs = u16::try_from(keep_alive.as_secs()).unwrap_or(u16::MAX);
        self
    }

    #[must_use]
    pub fn with_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(u64::from(self.keep_alive_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let request = ConnectionRequest::new("t1")
            .with_endpoint("tcp://a:1883")
            .with_endpoints(["tcp://b:1883", "tcp://a:1883"])
            .with_credentials("user", "pass")
            .with_clean_session(false)
            .with_timeout(Duration::from_millis(2500))
            .with_tls(Some(PathBuf::from("/etc/ca.pem")));

        assert_eq!(
            request.endpoints,
            vec!["tcp://a:1883", "tcp://b:1883", "tcp://a:1883"]
        );
        assert_eq!(request.client_id, "t1");
        assert!(!request.clean_session);
        assert_eq!(request.timeout(), Duration::from_millis(2500));
        assert!(request.tls_enabled);
        assert_eq!(request.keep_alive(), Duration::from_secs(30));
    }

    #[test]
    fn test_deserialize_camel_case() {
        let request: ConnectionRequest = serde_json::from_str(
            r#"{
                "endpoints": ["broker:1883"],
                "username": "u",
                "password": "p",
                "cleanSession": true,
                "clientId": "t1",
                "timeoutMs": 2000,
                "tlsEnabled": true,
                "tlsCaPath": "/tmp/ca.pem"
            }"#,
        )
        .unwrap();

        assert_eq!(request.endpoints, vec!["broker:1883"]);
        assert_eq!(request.client_id, "t1");
        assert_eq!(request.timeout_ms, 2000);
        assert!(request.tls_enabled);
        assert_eq!(request.tls_ca_path, Some(PathBuf::from("/tmp/ca.pem")));
        assert_eq!(request.protocol_version, ProtocolVersion::V311);
    }

    #[test]
    fn test_deserialize_defaults() {
        let request: ConnectionRequest =
            serde_json::from_str(r#"{"clientId": "x", "protocolVersion": "5"}"#).unwrap();
        assert!(request.endpoints.is_empty());
        assert!(request.clean_session);
        assert_eq!(request.timeout_ms, 5_000);
        assert_eq!(request.protocol_version, ProtocolVersion::V5);
    }

    #[test]
    fn test_debug_redacts_password() {
        let request = ConnectionRequest::new("t1").with_credentials("user", "hunter2");
        let debug = format!("{request:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_protocol_version_bytes() {
        assert_eq!(ProtocolVersion::V311.as_u8(), 4);
        assert_eq!(u8::from(ProtocolVersion::V5), 5);
        assert_eq!(ProtocolVersion::try_from(4), Ok(ProtocolVersion::V311));
        assert!(ProtocolVersion::try_from(3).is_err());
    }
}
