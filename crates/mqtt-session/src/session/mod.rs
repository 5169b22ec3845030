//! Session establishment and teardown.

mod handle;

pub use handle::SessionHandle;

use crate::connector::{Connector, MqttConnector, Session};
use crate::context::ExecutionContext;
use crate::error::SessionError;
use crate::options::ConnectionOptions;
use crate::request::ConnectionRequest;
use crate::security::resolve_tls_policy;
use handle::SessionTable;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// What the broker told us about an established session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub client_id: String,
    pub broker: String,
    pub session_present: bool,
}

/// Owns every session it established and hands out [`SessionHandle`]s.
///
/// The manager can be shared between tasks; calls on different handles are
/// independent. Calling `establish` and `terminate` concurrently for the same
/// handle is not supported.
pub struct SessionManager<C: Connector = MqttConnector> {
    connector: C,
    sessions: SessionTable<C::Session>,
}

impl SessionManager {
    /// A manager that dials real brokers.
    pub fn new() -> Self {
        Self::with_connector(MqttConnector::new())
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector> SessionManager<C> {
    pub fn with_connector(connector: C) -> Self {
        Self {
            connector,
            sessions: SessionTable::new(),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Opens a session and waits at most `request.timeout()` for the broker
    /// to accept it.
    ///
    /// No handle exists unless this returns `Ok`. On timeout the in-flight
    /// attempt is dropped, closing whatever socket it had opened.
    ///
    /// # Errors
    ///
    /// - [`SessionError::MissingExecutionContext`] when `ctx` is not a live run;
    ///   nothing else is attempted.
    /// - [`SessionError::Configuration`] when the CA bundle is unusable; no
    ///   connection is attempted.
    /// - [`SessionError::HandshakeTimeout`] when the deadline passes first.
    /// - [`SessionError::Handshake`] when every endpoint failed or the broker
    ///   refused the connection.
    #[instrument(
        skip(self, ctx, request),
        fields(
            client_id = %request.client_id,
            endpoints = request.endpoints.len(),
            timeout_ms = request.timeout_ms,
            tls = request.tls_enabled,
        ),
        err(Display)
    )]
    pub async fn establish(
        &self,
        ctx: &ExecutionContext,
        request: &ConnectionRequest,
    ) -> Result<SessionHandle, SessionError> {
        let Some(run) = ctx.state() else {
            return Err(SessionError::MissingExecutionContext);
        };
        debug!(vu = run.vu_id(), iteration = run.iteration(), "Establishing session");

        let policy = resolve_tls_policy(request.tls_enabled, request.tls_ca_path.as_deref())?;
        let options = ConnectionOptions::from_request(request, policy);
        let timeout = request.timeout();

        let session = match tokio::time::timeout(timeout, self.connector.connect(&options)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => return Err(SessionError::Handshake(e)),
            Err(_) => return Err(SessionError::HandshakeTimeout { timeout }),
        };

        let broker = session.broker().to_string();
        let session_present = session.session_present();
        let handle = self.sessions.insert(session);
        info!(%handle, %broker, session_present, "Session established");
        Ok(handle)
    }

    /// Disconnects a session, granting it up to `timeout` to say goodbye
    /// before the transport is closed.
    ///
    /// Teardown is best effort: once the context check passes this returns
    /// `Ok` whatever happens on the wire. Unknown handles are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingExecutionContext`] when `ctx` is not a
    /// live run. The session is left untouched in that case.
    #[instrument(skip(self, ctx, timeout), fields(timeout_ms = timeout.as_millis()), err(Display))]
    pub async fn terminate(
        &self,
        ctx: &ExecutionContext,
        handle: SessionHandle,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        if ctx.state().is_none() {
            return Err(SessionError::MissingExecutionContext);
        }

        let Some(session) = self.sessions.remove(handle) else {
            warn!(%handle, "Terminate called for an unknown or already terminated session");
            return Ok(());
        };

        let client_id = session.client_id().to_string();
        session.disconnect(timeout).await;
        info!(%handle, client_id = %client_id, "Session terminated");
        Ok(())
    }

    pub fn session_info(&self, handle: SessionHandle) -> Option<SessionInfo> {
        self.sessions.with(handle, |session| SessionInfo {
            client_id: session.client_id().to_string(),
            broker: session.broker().to_string(),
            session_present: session.session_present(),
        })
    }

    pub fn contains(&self, handle: SessionHandle) -> bool {
        self.sessions.with(handle, |_| ()).is_some()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}
