use crate::error::{MqttError, Result};
use crate::transport::Transport;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TcpConfig {
    pub host: String,
    pub port: u16,
    pub nodelay: bool,
}

impl TcpConfig {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            nodelay: true,
        }
    }

    #[must_use]
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

#[derive(Debug)]
pub struct TcpTransport {
    config: TcpConfig,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    #[must_use]
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Dials the configured address and hands back the raw stream, for
    /// transports layered on top of TCP.
    pub(crate) async fn dial(config: &TcpConfig) -> Result<TcpStream> {
        let stream = TcpStream::connect((config.host.as_str(), config.port))
            .await
            .map_err(|e| {
                MqttError::ConnectionError(format!(
                    "Failed to connect to {}:{}: {e}",
                    config.host, config.port
                ))
            })?;
        stream.set_nodelay(config.nodelay)?;
        debug!(host = %config.host, port = config.port, "TCP connection established");
        Ok(stream)
    }
}

impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Err(MqttError::ConnectionError("Already connected".to_string()));
        }
        self.stream = Some(Self::dial(&self.config).await?);
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
