#![allow(clippy::struct_excessive_bools)]

use anyhow::{Context, Result};
use clap::Args;
use mqtt_session::{
    ConnectionRequest, ExecutionContext, ProtocolVersion, SessionError, SessionManager,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::signal;
use tracing::{debug, info, warn};

use super::parsers::{parse_duration_millis, parse_duration_secs, parse_protocol_version};

#[derive(Args, Debug)]
pub struct ConnectCommand {
    /// Broker URL (tcp://, mqtt://, ssl://, mqtts://). Repeat to add failover endpoints
    #[arg(long = "url", short = 'U')]
    pub urls: Vec<String>,

    /// Load the request from a JSON file; flags given on the command line override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Username for authentication
    #[arg(long, short)]
    pub username: Option<String>,

    /// Password for authentication
    #[arg(long, short = 'P', env = "MQTT_SESSION_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Client ID (default: mqtt-session-<pid>)
    #[arg(long, short)]
    pub client_id: Option<String>,

    /// Resume the broker-side session instead of starting clean
    #[arg(long)]
    pub no_clean_session: bool,

    /// Handshake deadline (e.g., 2s, 1500ms; bare numbers are milliseconds)
    #[arg(long, value_parser = parse_duration_millis)]
    pub timeout: Option<u64>,

    /// Encrypt the connection
    #[arg(long)]
    pub tls: bool,

    /// CA bundle (PEM) to verify the broker against; implies --tls
    #[arg(long)]
    pub ca_cert: Option<PathBuf>,

    /// Keep alive interval (e.g., 30s, 1m; 0 disables)
    #[arg(long, short = 'k', value_parser = parse_duration_secs)]
    pub keep_alive: Option<u16>,

    /// MQTT protocol version (3.1.1 or 5)
    #[arg(long, value_parser = parse_protocol_version)]
    pub protocol_version: Option<ProtocolVersion>,

    /// How long to keep each session open before terminating it
    #[arg(long, default_value = "0", value_parser = parse_duration_millis)]
    pub hold: u64,

    /// Grace period for a clean disconnect
    #[arg(long, default_value = "1000", value_parser = parse_duration_millis)]
    pub close_timeout: u64,

    /// Number of establish/terminate iterations
    #[arg(long, short = 'n', default_value = "1")]
    pub iterations: u64,

    /// Virtual user id reported in the execution context
    #[arg(long, default_value = "1")]
    pub vu: u64,
}

impl ConnectCommand {
    fn build_request(&self) -> Result<ConnectionRequest> {
        let mut request = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                serde_json::from_str::<ConnectionRequest>(&raw)
                    .with_context(|| format!("Invalid request in {}", path.display()))?
            }
            None => ConnectionRequest::default(),
        };

        if !self.urls.is_empty() {
            request.endpoints.clone_from(&self.urls);
        }
        if let Some(username) = &self.username {
            request.username.clone_from(username);
        }
        if let Some(password) = &self.password {
            request.password.clone_from(password);
        }
        if let Some(client_id) = &self.client_id {
            request.client_id.clone_from(client_id);
        }
        if request.client_id.is_empty() {
            request.client_id = format!("mqtt-session-{}", std::process::id());
        }
        if self.no_clean_session {
            request.clean_session = false;
        }
        if let Some(timeout) = self.timeout {
            request.timeout_ms = timeout;
        }
        if self.tls || self.ca_cert.is_some() {
            request.tls_enabled = true;
        }
        if let Some(ca_cert) = &self.ca_cert {
            request.tls_ca_path = Some(ca_cert.clone());
        }
        if let Some(keep_alive) = self.keep_alive {
            request.keep_alive_secs = keep_alive;
        }
        if let Some(version) = self.protocol_version {
            request.protocol_version = version;
        }

        if request.endpoints.is_empty() {
            anyhow::bail!(
                "At least one broker is required. Use --url or \"endpoints\" in --config"
            );
        }
        Ok(request)
    }
}

enum Outcome {
    Completed,
    Interrupted,
}

pub async fn execute(cmd: ConnectCommand, verbose: bool, debug: bool) -> Result<()> {
    crate::init_basic_tracing(verbose, debug);

    let request = cmd.build_request()?;
    debug!(?request, "Connection request");

    let hold = Duration::from_millis(cmd.hold);
    let close_timeout = Duration::from_millis(cmd.close_timeout);
    let manager = SessionManager::new();

    let mut failed = 0u64;
    let mut ran = 0u64;
    for iteration in 0..cmd.iterations {
        let ctx = ExecutionContext::new(cmd.vu, iteration);
        ran += 1;

        let outcome = run_iteration(&manager, &ctx, &request, iteration, hold, close_timeout).await;
        ctx.expire();

        match outcome {
            Ok(Outcome::Completed) => {}
            Ok(Outcome::Interrupted) => {
                info!("Interrupted, stopping after iteration {iteration}");
                break;
            }
            Err(err) => {
                failed += 1;
                report_failure(iteration, &err)?;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {ran} iterations failed");
    }
    Ok(())
}

async fn run_iteration(
    manager: &SessionManager,
    ctx: &ExecutionContext,
    request: &ConnectionRequest,
    iteration: u64,
    hold: Duration,
    close_timeout: Duration,
) -> Result<Outcome, SessionError> {
    let started = Instant::now();
    let handle = manager.establish(ctx, request).await?;
    let connect_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    if let Some(session) = manager.session_info(handle) {
        let line = serde_json::json!({
            "iteration": iteration,
            "handle": handle.to_string(),
            "connectMs": connect_ms,
            "session": session,
        });
        println!("{line}");
    }

    let outcome = if hold.is_zero() {
        Outcome::Completed
    } else {
        tokio::select! {
            () = tokio::time::sleep(hold) => Outcome::Completed,
            _ = signal::ctrl_c() => Outcome::Interrupted,
        }
    };

    manager.terminate(ctx, handle, close_timeout).await?;
    Ok(outcome)
}

fn report_failure(iteration: u64, err: &SessionError) -> Result<()> {
    warn!(iteration, error = %err, "Iteration failed");
    let fault = serde_json::to_string(&err.to_fault()).context("Failed to encode fault")?;
    eprintln!("{fault}");
    Ok(())
}
