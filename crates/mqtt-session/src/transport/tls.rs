use crate::error::{MqttError, Result};
use crate::security::TlsPolicy;
use crate::transport::tcp::{TcpConfig, TcpTransport};
use crate::transport::Transport;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub tcp: TcpConfig,
    pub server_name: String,
    pub client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// # Errors
    ///
    /// Returns an error if the policy cannot be turned into a client config.
    pub fn new(host: impl Into<String>, port: u16, policy: &TlsPolicy) -> Result<Self> {
        let host = host.into();
        Ok(Self {
            tcp: TcpConfig::new(host.clone(), port),
            server_name: host,
            client_config: policy.client_config()?,
        })
    }

    #[must_use]
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }
}

pub struct TlsTransport {
    config: TlsConfig,
    stream: Option<TlsStream<TcpStream>>,
}

impl TlsTransport {
    #[must_use]
    pub fn new(config: TlsConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

impl Transport for TlsTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Err(MqttError::ConnectionError("Already connected".to_string()));
        }

        let server_name = ServerName::try_from(self.config.server_name.clone()).map_err(|e| {
            MqttError::ConnectionError(format!(
                "Invalid TLS server name {}: {e}",
                self.config.server_name
            ))
        })?;

        let tcp = TcpTransport::dial(&self.config.tcp).await?;
        let connector = TlsConnector::from(Arc::clone(&self.config.client_config));
        let stream = connector.connect(server_name, tcp).await.map_err(|e| {
            MqttError::ConnectionError(format!(
                "TLS handshake with {} failed: {e}",
                self.config.server_name
            ))
        })?;

        debug!(server_name = %self.config.server_name, "TLS session established");
        self.stream = Some(stream);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(MqttError::NotConnected)?;
        Ok(stream.read(buf).await?)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(MqttError::NotConnected)?;
        stream.write_all(buf).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.is_connected()
    }
}
