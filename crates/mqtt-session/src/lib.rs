//! # MQTT Session Lifecycle
//!
//! Opens one authenticated, optionally encrypted MQTT session under a caller
//! supplied deadline, and closes it again with a bounded grace period.
//!
//! The crate is meant to sit behind a host runtime (a load-test executor, a
//! scripting binding) that owns the notion of a running iteration. Every
//! operation therefore takes an explicit [`ExecutionContext`] and refuses to
//! do anything when it is absent.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mqtt_session::{ConnectionRequest, ExecutionContext, SessionManager};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = SessionManager::new();
//!     let ctx = ExecutionContext::new(1, 0);
//!
//!     let request = ConnectionRequest::new("load-test-1")
//!         .with_endpoint("tcp://localhost:1883")
//!         .with_credentials("user", "secret")
//!         .with_timeout(Duration::from_secs(2));
//!
//!     let handle = manager.establish(&ctx, &request).await?;
//!     manager.terminate(&ctx, handle, Duration::from_secs(1)).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## TLS
//!
//! With `tls_enabled` set, a CA bundle path makes the session verify the broker
//! strictly against exactly those certificates. Without a path the session is
//! encrypted but the broker certificate is **not** verified; see
//! [`TlsPolicy::InsecureSkipVerify`].

#![warn(clippy::pedantic)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

pub mod connector;
pub mod context;
pub mod error;
pub mod options;
pub mod packet;
pub mod request;
pub mod security;
pub mod session;
pub mod transport;

pub use connector::{Connector, MqttConnector, MqttSession, Session};
pub use context::{ExecutionContext, RunState};
pub use error::{ErrorKind, HostFault, MqttError, Result, SessionError};
pub use options::{BrokerAddress, ConnectionOptions, Scheme};
pub use request::{ConnectionRequest, ProtocolVersion};
pub use security::{resolve_tls_policy, TlsPolicy};
pub use session::{SessionHandle, SessionInfo, SessionManager};
