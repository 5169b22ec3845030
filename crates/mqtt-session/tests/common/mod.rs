#![allow(dead_code)]

use mqtt_session::packet::{self, FrameBuffer};
use mqtt_session::{ConnectionOptions, Connector, MqttError, Session};
use parking_lot::Mutex;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

#[derive(Debug, Clone)]
pub enum Behavior {
    AcceptImmediately,
    AcceptAfter(Duration),
    NeverRespond,
    Reject(MqttError),
}

/// Scripted connector that counts calls and remembers the options it got.
#[derive(Clone)]
pub struct MockConnector {
    behavior: Behavior,
    pub calls: Arc<AtomicUsize>,
    pub disconnects: Arc<AtomicUsize>,
    pub last_options: Arc<Mutex<Option<ConnectionOptions>>>,
}

impl MockConnector {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
            disconnects: Arc::new(AtomicUsize::new(0)),
            last_options: Arc::new(Mutex::new(None)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<ConnectionOptions> {
        self.last_options.lock().clone()
    }

    fn session(&self, options: &ConnectionOptions) -> MockSession {
        MockSession {
            client_id: options.client_id.clone(),
            broker: options.servers.first().cloned().unwrap_or_default(),
            disconnects: Arc::clone(&self.disconnects),
        }
    }
}

impl Connector for MockConnector {
    type Session = MockSession;

    async fn connect(&self, options: &ConnectionOptions) -> mqtt_session::Result<MockSession> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock() = Some(options.clone());

        match &self.behavior {
            Behavior::AcceptImmediately => Ok(self.session(options)),
            Behavior::AcceptAfter(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(self.session(options))
            }
            Behavior::NeverRespond => std::future::pending().await,
            Behavior::Reject(e) => Err(e.clone()),
        }
    }
}

#[derive(Debug)]
pub struct MockSession {
    client_id: String,
    broker: String,
    disconnects: Arc<AtomicUsize>,
}

impl Session for MockSession {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn broker(&self) -> &str {
        &self.broker
    }

    fn session_present(&self) -> bool {
        false
    }

    async fn disconnect(self, _grace: Duration) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// How the loopback broker answers a CONNECT.
#[derive(Debug, Clone, Copy)]
pub enum BrokerMode {
    /// CONNACK with this return code, then serve PINGREQ until the client leaves.
    Connack { return_code: u8, session_present: bool },
    /// Read the CONNECT and never answer.
    Silent,
}

impl BrokerMode {
    pub fn accept() -> Self {
        Self::Connack {
            return_code: 0,
            session_present: false,
        }
    }

    pub fn refuse(return_code: u8) -> Self {
        Self::Connack {
            return_code,
            session_present: false,
        }
    }
}

/// Packet types the broker saw from its one client, in order.
pub type Observed = JoinHandle<Vec<u8>>;

pub async fn spawn_broker(mode: BrokerMode) -> (SocketAddr, Observed) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve(stream, mode).await
    });
    (addr, task)
}

pub async fn spawn_tls_broker(mode: BrokerMode, identity: &TestIdentity) -> (SocketAddr, Observed) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = identity.acceptor();
    let task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        match acceptor.accept(stream).await {
            Ok(tls) => serve(tls, mode).await,
            Err(_) => Vec::new(),
        }
    });
    (addr, task)
}

/// A port nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

async fn serve<S>(mut stream: S, mode: BrokerMode) -> Vec<u8>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut frames = FrameBuffer::new();
    let mut observed = Vec::new();
    let mut buf = [0u8; 1024];

    loop {
        while let Some(frame) = frames.next_frame().unwrap() {
            observed.push(frame.packet_type());
            match (frame.packet_type(), mode) {
                (
                    packet::CONNECT,
                    BrokerMode::Connack {
                        return_code,
                        session_present,
                    },
                ) => {
                    let flags = u8::from(session_present);
                    stream
                        .write_all(&[packet::CONNACK, 0x02, flags, return_code])
                        .await
                        .unwrap();
                    if return_code != 0 {
                        let _ = stream.shutdown().await;
                        return observed;
                    }
                }
                (packet::PINGREQ, _) => {
                    stream.write_all(&[packet::PINGRESP, 0x00]).await.unwrap();
                }
                (packet::DISCONNECT, _) => return observed,
                _ => {}
            }
        }

        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return observed,
            Ok(n) => frames.extend(&buf[..n]),
        }
    }
}

/// Self-signed broker certificate for `localhost` and `127.0.0.1`.
pub struct TestIdentity {
    pub cert_pem: String,
    cert_der: CertificateDer<'static>,
    key_der: Vec<u8>,
}

impl TestIdentity {
    pub fn generate() -> Self {
        let certified = rcgen::generate_simple_self_signed(vec![
            "localhost".to_string(),
            "127.0.0.1".to_string(),
        ])
        .unwrap();
        Self {
            cert_pem: certified.cert.pem(),
            cert_der: certified.cert.der().clone(),
            key_der: certified.key_pair.serialize_der(),
        }
    }

    pub fn ca_bundle(&self) -> NamedTempFile {
        write_bundle(&self.cert_pem)
    }

    fn acceptor(&self) -> TlsAcceptor {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone()));
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![self.cert_der.clone()], key)
            .unwrap();
        TlsAcceptor::from(Arc::new(config))
    }
}

pub fn write_bundle(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}
