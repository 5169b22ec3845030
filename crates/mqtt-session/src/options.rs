use crate::error::{MqttError, Result};
use crate::request::{ConnectionRequest, ProtocolVersion};
use crate::security::TlsPolicy;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Tcp,
    Tls,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Tcp => 1883,
            Scheme::Tls => 8883,
        }
    }
}

/// A broker endpoint after URL parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    /// Parses `scheme://host[:port][/path]` or a bare `host[:port]`.
    ///
    /// # Errors
    ///
    /// Returns an error for schemes this client cannot dial or an invalid port.
    pub fn parse(address: &str) -> Result<Self> {
        let (scheme, rest) = match address.split_once("://") {
            None => (Scheme::Tcp, address),
            Some(("tcp" | "mqtt", rest)) => (Scheme::Tcp, rest),
            Some(("ssl" | "tls" | "mqtts" | "tcps", rest)) => (Scheme::Tls, rest),
            Some((other, _)) => return Err(MqttError::UnsupportedScheme(other.to_string())),
        };

        let (host, port) = Self::split_host_port(rest, scheme.default_port())?;
        if host.is_empty() {
            return Err(MqttError::ConnectionError(format!(
                "Missing host in broker address: {address}"
            )));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
        })
    }

    fn split_host_port(address: &str, default_port: u16) -> Result<(&str, u16)> {
        let address_without_path = address.split('/').next().unwrap_or(address);

        if let Some(bracketed) = address_without_path.strip_prefix('[') {
            let (host, tail) = bracketed.split_once(']').ok_or_else(|| {
                MqttError::ConnectionError(format!("Invalid IPv6 address: {address}"))
            })?;
            return match tail.strip_prefix(':') {
                Some(port_str) => Ok((host, Self::parse_port(port_str)?)),
                None => Ok((host, default_port)),
            };
        }

        if let Some((host, port_str)) = address_without_path.rsplit_once(':') {
            Ok((host, Self::parse_port(port_str)?))
        } else {
            Ok((address_without_path, default_port))
        }
    }

    fn parse_port(port_str: &str) -> Result<u16> {
        port_str
            .parse::<u16>()
            .map_err(|_| MqttError::ConnectionError(format!("Invalid port: {port_str}")))
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.scheme {
            Scheme::Tcp => "tcp",
            Scheme::Tls => "ssl",
        };
        if self.host.contains(':') {
            write!(f, "{scheme}://[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{scheme}://{}:{}", self.host, self.port)
        }
    }
}

/// Fully assembled options handed to a [`Connector`](crate::Connector).
///
/// Servers are kept verbatim and in caller order; parsing happens per endpoint
/// at dial time so one bad entry only fails that entry.
#[derive(Clone)]
pub struct ConnectionOptions {
    pub servers: Vec<String>,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub clean_session: bool,
    pub keep_alive: Duration,
    pub protocol_version: ProtocolVersion,
    pub tls: Option<TlsPolicy>,
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("servers", &self.servers)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field(
                "password",
                &if self.password.is_empty() { "" } else { "[REDACTED]" },
            )
            .field("clean_session", &self.clean_session)
            .field("keep_alive", &self.keep_alive)
            .field("protocol_version", &self.protocol_version)
            .field("tls", &self.tls)
            .finish()
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            client_id: String::new(),
            username: String::new(),
            password: String::new(),
            clean_session: true,
            keep_alive: Duration::from_secs(30),
            protocol_version: ProtocolVersion::V311,
            tls: None,
        }
    }
}

impl ConnectionOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_request(request: &ConnectionRequest, tls: Option<TlsPolicy>) -> Self {
        let mut options = Self::new()
            .with_client_id(&request.client_id)
            .with_credentials(&request.username, &request.password)
            .with_clean_session(request.clean_session)
            .with_keep_alive(request.keep_alive())
            .with_protocol_version(request.protocol_version);
        for server in &request.endpoints {
            options = options.add_server(server);
        }
        if let Some(policy) = tls {
            options = options.with_tls(policy);
        }
        options
    }

    /// Appends a server. Duplicates are kept.
    #[must_use]
    pub fn add_server(mut self, server: impl Into<String>) -> Self {
        self.servers.push(server.into());
        self
    }

    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
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

    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub fn with_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    #[must_use]
    pub fn with_tls(mut self, policy: TlsPolicy) -> Self {
        self.tls = Some(policy);
        self
    }
}
