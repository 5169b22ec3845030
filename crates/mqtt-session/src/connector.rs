//! Dialing a broker and holding the resulting live session.

use crate::error::{MqttError, Result};
use crate::options::{BrokerAddress, ConnectionOptions, Scheme};
use crate::packet::{self, ConnAck, ConnectPacket, FrameBuffer};
use crate::request::ProtocolVersion;
use crate::transport::{
    TcpConfig, TcpTransport, TlsConfig, TlsTransport, Transport, TransportType,
};
use bytes::BytesMut;
use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, trace, warn};

const READ_BUFFER_SIZE: usize = 4096;

/// Performs the transport + protocol handshake for a set of options.
///
/// The session manager only ever talks to this trait, which keeps the concrete
/// protocol client out of its public surface and lets tests substitute a
/// scripted broker.
pub trait Connector: Send + Sync {
    type Session: Session;

    /// Connects to the first endpoint that completes the handshake.
    ///
    /// # Errors
    ///
    /// Returns the failure of the handshake. The caller bounds the wait.
    fn connect(
        &self,
        options: &ConnectionOptions,
    ) -> impl Future<Output = Result<Self::Session>> + Send;
}

/// An established session. The only thing to do with one is end it.
pub trait Session: Send + 'static {
    fn client_id(&self) -> &str;

    fn broker(&self) -> &str;

    fn session_present(&self) -> bool;

    /// Disconnects, allowing up to `grace` for protocol-level cleanup before
    /// the transport is closed forcibly. Best effort: never fails.
    fn disconnect(self, grace: Duration) -> impl Future<Output = ()> + Send;
}

/// The network-backed connector: TCP or TLS, MQTT 3.1.1 or 5.0.
#[derive(Debug, Clone, Copy, Default)]
pub struct MqttConnector;

impl MqttConnector {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn build_transport(
        address: &BrokerAddress,
        options: &ConnectionOptions,
    ) -> Result<TransportType> {
        match (&options.tls, address.scheme) {
            (Some(policy), _) => {
                let config = TlsConfig::new(address.host.clone(), address.port, policy)?;
                Ok(TransportType::Tls(Box::new(TlsTransport::new(config))))
            }
            (None, Scheme::Tcp) => Ok(TransportType::Tcp(TcpTransport::new(TcpConfig::new(
                address.host.clone(),
                address.port,
            )))),
            (None, Scheme::Tls) => Err(MqttError::ConnectionError(format!(
                "{address} requires TLS but encryption is not enabled"
            ))),
        }
    }

    #[instrument(skip(self, options), fields(client_id = %options.client_id), level = "debug")]
    async fn connect_endpoint(
        &self,
        server: &str,
        options: &ConnectionOptions,
    ) -> Result<MqttSession> {
        let address = BrokerAddress::parse(server)?;
        let mut transport = Self::build_transport(&address, options)?;
        transport.connect().await?;

        let mut buf = BytesMut::with_capacity(128);
        Self::connect_packet(options).encode(&mut buf)?;
        transport.write(&buf).await?;
        trace!(endpoint = %address, bytes = buf.len(), "CONNECT sent");

        let mut frames = FrameBuffer::new();
        let connack =
            Self::read_connack(&mut transport, &mut frames, options.protocol_version).await?;

        let session = MqttSession::start(
            transport,
            frames,
            options.client_id.clone(),
            address.to_string(),
            connack.session_present,
            options.keep_alive,
        );
        Ok(session)
    }

    fn connect_packet(options: &ConnectionOptions) -> ConnectPacket<'_> {
        let username = (!options.username.is_empty()).then_some(options.username.as_str());
        let mut password = (!options.password.is_empty()).then_some(options.password.as_bytes());
        if password.is_some()
            && username.is_none()
            && options.protocol_version == ProtocolVersion::V311
        {
            debug!("MQTT 3.1.1 forbids a password without a user name; omitting password");
            password = None;
        }

        ConnectPacket {
            protocol_version: options.protocol_version,
            client_id: &options.client_id,
            clean_session: options.clean_session,
            keep_alive_secs: u16::try_from(options.keep_alive.as_secs()).unwrap_or(u16::MAX),
            username,
            password,
        }
    }

    async fn read_connack(
        transport: &mut TransportType,
        frames: &mut FrameBuffer,
        version: ProtocolVersion,
    ) -> Result<ConnAck> {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            if let Some(frame) = frames.next_frame()? {
                if frame.packet_type() != packet::CONNACK {
                    return Err(MqttError::ProtocolError(format!(
                        "Expected CONNACK, received packet type {:#04x}",
                        frame.packet_type()
                    )));
                }
                return ConnAck::decode(frame.body)?.into_result(version);
            }

            let n = transport.read(&mut buf).await?;
            if n == 0 {
                return Err(MqttError::ConnectionClosedByPeer);
            }
            frames.extend(&buf[..n]);
        }
    }
}

impl Connector for MqttConnector {
    type Session = MqttSession;

    async fn connect(&self, options: &ConnectionOptions) -> Result<MqttSession> {
        let mut last_error = None;

        for server in &options.servers {
            match self.connect_endpoint(server, options).await {
                Ok(session) => {
                    info!(
                        client_id = %options.client_id,
                        endpoint = %session.broker(),
                        session_present = session.session_present(),
                        "Connected to MQTT broker"
                    );
                    return Ok(session);
                }
                Err(e) if e.is_broker_refusal() => {
                    warn!(
                        client_id = %options.client_id,
                        endpoint = %server,
                        error = %e,
                        "Broker refused connection"
                    );
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        client_id = %options.client_id,
                        endpoint = %server,
                        error = %e,
                        "Failed to connect to endpoint"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(MqttError::NoEndpoints))
    }
}

/// A live MQTT session. A background task owns the transport, answers
/// keep-alive and notices a broker-side close.
#[derive(Debug)]
pub struct MqttSession {
    client_id: String,
    broker: String,
    session_present: bool,
    shutdown_tx: oneshot::Sender<Duration>,
    task: JoinHandle<()>,
}

impl MqttSession {
    fn start(
        transport: TransportType,
        frames: FrameBuffer,
        client_id: String,
        broker: String,
        session_present: bool,
        keep_alive: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let io = SessionIo {
            transport,
            frames,
            client_id: client_id.clone(),
            keep_alive,
        };
        let task = tokio::spawn(io.run(shutdown_rx));

        Self {
            client_id,
            broker,
            session_present,
            shutdown_tx,
            task,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Session for MqttSession {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn broker(&self) -> &str {
        &self.broker
    }

    fn session_present(&self) -> bool {
        self.session_present
    }

    async fn disconnect(self, grace: Duration) {
        let Self {
            client_id,
            shutdown_tx,
            mut task,
            ..
        } = self;

        if shutdown_tx.send(grace).is_err() {
            debug!(client_id = %client_id, "Session already closed before disconnect");
        }

        if tokio::time::timeout(grace, &mut task).await.is_err() {
            warn!(
                client_id = %client_id,
                grace_ms = grace.as_millis(),
                "Disconnect grace period elapsed, closing transport"
            );
            task.abort();
        }
    }
}

struct SessionIo {
    transport: TransportType,
    frames: FrameBuffer,
    client_id: String,
    keep_alive: Duration,
}

impl SessionIo {
    async fn run(mut self, mut shutdown: oneshot::Receiver<Duration>) {
        let pinging = !self.keep_alive.is_zero();
        let period = if pinging {
            self.keep_alive
        } else {
            Duration::from_secs(3600)
        };
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut awaiting_pong = false;
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        // Bytes that arrived together with the CONNACK.
        if !matches!(self.drain_frames(&mut awaiting_pong), Ok(true)) {
            let _ = self.transport.close().await;
            return;
        }

        loop {
            tokio::select! {
                grace = &mut shutdown => {
                    // A dropped session handle closes without grace.
                    self.close_gracefully(grace.unwrap_or(Duration::ZERO)).await;
                    return;
                }
                _ = ticker.tick(), if pinging => {
                    if awaiting_pong {
                        warn!(
                            client_id = %self.client_id,
                            "No PINGRESP within keep-alive interval, closing session"
                        );
                        let _ = self.transport.close().await;
                        return;
                    }
                    let mut out = BytesMut::with_capacity(2);
                    packet::encode_pingreq(&mut out);
                    if let Err(e) = self.transport.write(&out).await {
                        warn!(client_id = %self.client_id, error = %e, "Failed to send PINGREQ");
                        return;
                    }
                    awaiting_pong = true;
                }
                read = self.transport.read(&mut buf) => {
                    match read {
                        Ok(0) => {
                            info!(client_id = %self.client_id, "Connection closed by broker");
                            return;
                        }
                        Ok(n) => {
                            self.frames.extend(&buf[..n]);
                            match self.drain_frames(&mut awaiting_pong) {
                                Ok(true) => {}
                                Ok(false) => return,
                                Err(e) => {
                                    warn!(
                                        client_id = %self.client_id,
                                        error = %e,
                                        "Closing session after malformed packet"
                                    );
                                    let _ = self.transport.close().await;
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            warn!(client_id = %self.client_id, error = %e, "Session read failed");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Returns `Ok(false)` once the broker has ended the session.
    fn drain_frames(&mut self, awaiting_pong: &mut bool) -> Result<bool> {
        while let Some(frame) = self.frames.next_frame()? {
            match frame.packet_type() {
                packet::PINGRESP => *awaiting_pong = false,
                packet::DISCONNECT => {
                    let reason = frame.body.first().copied().unwrap_or(0);
                    info!(
                        client_id = %self.client_id,
                        reason_code = reason,
                        "Broker sent DISCONNECT"
                    );
                    return Ok(false);
                }
                other => {
                    trace!(client_id = %self.client_id, packet_type = other, "Ignoring packet");
                }
            }
        }
        Ok(true)
    }

    async fn close_gracefully(&mut self, grace: Duration) {
        let deadline = Instant::now() + grace;

        let mut out = BytesMut::with_capacity(2);
        packet::encode_disconnect(&mut out);
        match tokio::time::timeout_at(deadline, self.transport.write(&out)).await {
            Ok(Ok(())) => debug!(client_id = %self.client_id, "DISCONNECT sent"),
            Ok(Err(e)) => {
                debug!(client_id = %self.client_id, error = %e, "Failed to send DISCONNECT");
            }
            Err(_) => debug!(client_id = %self.client_id, "Timed out sending DISCONNECT"),
        }

        if let Ok(Err(e)) = tokio::time::timeout_at(deadline, self.transport.close()).await {
            debug!(client_id = %self.client_id, error = %e, "Transport close failed");
        }
    }
}
