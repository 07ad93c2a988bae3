//! # Socket Plugin Client
//!
//! Lazily connects to a plugin's Unix domain socket. The socket path may not
//! exist yet when the client is created (the plugin process may still be
//! starting), so connecting polls for the path and dials on a fixed retry
//! interval until the caller's bound elapses. Each dial attempt is bounded on
//! its own by the shorter dial timeout.
//!
//! A failed or timed-out round trip drops the connection so that the next
//! call reconnects from scratch.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, timeout, timeout_at, Instant};
use tracing::debug;

use super::protocol::{self, PluginRequest, PluginResponse};
use super::{IngressPlugin, PluginError, PluginInfoResponse, PluginResult};
use crate::config::ClientConfig;

#[derive(Debug)]
struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn round_trip(&mut self, request: &PluginRequest) -> PluginResult<PluginResponse> {
        let line = protocol::encode(request)?;
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| PluginError::Connection(e.to_string()))?;
        self.writer
            .flush()
            .await
            .map_err(|e| PluginError::Connection(e.to_string()))?;

        let mut response = String::new();
        let read = self
            .reader
            .read_line(&mut response)
            .await
            .map_err(|e| PluginError::Connection(e.to_string()))?;
        if read == 0 {
            return Err(PluginError::Connection(
                "plugin closed the connection".to_string(),
            ));
        }
        protocol::decode(&response)
    }
}

/// Unix socket implementation of [`IngressPlugin`]
#[derive(Debug)]
pub struct SocketPluginClient {
    addr: String,
    config: ClientConfig,
    conn: Mutex<Option<Connection>>,
    closed: AtomicBool,
}

impl SocketPluginClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self::with_config(addr, ClientConfig::default())
    }

    pub fn with_config(addr: impl Into<String>, config: ClientConfig) -> Self {
        Self {
            addr: addr.into(),
            config,
            conn: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> &str {
        &self.addr
    }

    /// Establish the connection, retrying until `deadline`
    pub async fn connect(&self, deadline: Instant) -> PluginResult<()> {
        let mut guard = timeout_at(deadline, self.conn.lock())
            .await
            .map_err(|_| PluginError::timeout("waiting for plugin connection", None))?;
        self.ensure_connected(&mut guard, deadline).await
    }

    async fn ensure_connected(
        &self,
        slot: &mut Option<Connection>,
        deadline: Instant,
    ) -> PluginResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PluginError::Closed);
        }
        if slot.is_some() {
            return Ok(());
        }
        if self.addr.is_empty() {
            return Err(PluginError::EmptyAddress);
        }

        let mut last_error: Option<PluginError> = None;
        let mut next_attempt = Instant::now();
        loop {
            tokio::select! {
                biased;
                _ = sleep_until(next_attempt) => {
                    match self.dial(deadline).await {
                        Ok(conn) => {
                            debug!(addr = %self.addr, "Connected to plugin socket");
                            *slot = Some(conn);
                            return Ok(());
                        }
                        Err(e) => {
                            debug!(addr = %self.addr, error = %e, "Plugin socket not ready, will retry");
                            last_error = Some(e);
                            next_attempt = Instant::now() + self.config.connect_retry_interval();
                        }
                    }
                }
                _ = sleep_until(deadline) => {
                    return Err(PluginError::timeout(
                        "connecting to plugin socket",
                        last_error.as_ref(),
                    ));
                }
            }
        }
    }

    async fn dial(&self, deadline: Instant) -> PluginResult<Connection> {
        tokio::fs::metadata(&self.addr)
            .await
            .map_err(|e| PluginError::SocketUnavailable {
                path: self.addr.clone(),
                message: e.to_string(),
            })?;

        let remaining = deadline.saturating_duration_since(Instant::now());
        let bound = self.config.dial_timeout().min(remaining);
        let stream = timeout(bound, UnixStream::connect(&self.addr))
            .await
            .map_err(|_| PluginError::Dial {
                path: self.addr.clone(),
                message: format!("dial timed out after {}ms", bound.as_millis()),
            })?
            .map_err(|e| PluginError::Dial {
                path: self.addr.clone(),
                message: e.to_string(),
            })?;

        let (reader, writer) = stream.into_split();
        Ok(Connection {
            reader: BufReader::new(reader),
            writer,
        })
    }

    async fn call(&self, request: PluginRequest, bound: Duration) -> PluginResult<PluginResponse> {
        let deadline = Instant::now() + bound;
        let operation = request.method();

        let mut guard = timeout_at(deadline, self.conn.lock())
            .await
            .map_err(|_| PluginError::timeout(operation, None))?;
        self.ensure_connected(&mut guard, deadline).await?;

        let Some(conn) = guard.as_mut() else {
            return Err(PluginError::Closed);
        };

        match timeout_at(deadline, conn.round_trip(&request)).await {
            Err(_) => {
                *guard = None;
                Err(PluginError::timeout(operation, None))
            }
            Ok(Err(e)) => {
                *guard = None;
                Err(e)
            }
            Ok(Ok(PluginResponse::Error { message })) => Err(PluginError::Remote(message)),
            Ok(Ok(response)) => Ok(response),
        }
    }
}

fn unexpected(operation: &str, response: &PluginResponse) -> PluginError {
    PluginError::Protocol(format!("unexpected response to {operation}: {response:?}"))
}

#[async_trait]
impl IngressPlugin for SocketPluginClient {
    async fn probe(&self, timeout: Duration) -> PluginResult<bool> {
        match self.call(PluginRequest::Probe, timeout).await? {
            PluginResponse::Probe { healthy } => Ok(healthy),
            other => Err(unexpected("probe", &other)),
        }
    }

    async fn info(&self, timeout: Duration) -> PluginResult<PluginInfoResponse> {
        match self.call(PluginRequest::Info, timeout).await? {
            PluginResponse::Info(info) => Ok(info),
            other => Err(unexpected("info", &other)),
        }
    }

    async fn create_routes(&self, alloc_id: &str, timeout: Duration) -> PluginResult<()> {
        let request = PluginRequest::CreateRoutes {
            alloc_id: alloc_id.to_string(),
        };
        match self.call(request, timeout).await? {
            PluginResponse::Ack => Ok(()),
            other => Err(unexpected("create_routes", &other)),
        }
    }

    async fn change_or_delete_routes(&self, alloc_id: &str, timeout: Duration) -> PluginResult<()> {
        let request = PluginRequest::ChangeOrDeleteRoutes {
            alloc_id: alloc_id.to_string(),
        };
        match self.call(request, timeout).await? {
            PluginResponse::Ack => Ok(()),
            other => Err(unexpected("change_or_delete_routes", &other)),
        }
    }

    async fn close(&self) -> PluginResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut guard = self.conn.lock().await;
        if let Some(mut conn) = guard.take() {
            // The peer sees EOF either way
            let _ = conn.writer.shutdown().await;
        }
        Ok(())
    }
}
