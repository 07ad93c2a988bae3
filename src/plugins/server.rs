//! Plugin-side helper serving the wire protocol over a Unix listener.
//!
//! Each accepted connection runs in its own task owned by a `JoinSet`, so
//! cancelling the shutdown token stops the accept loop and tears down every
//! open connection before [`serve`] returns.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::protocol::{self, PluginRequest, PluginResponse};
use super::PluginInfoResponse;

/// Implemented by plugin processes; errors are reported to the caller as text
#[async_trait]
pub trait PluginHandler: Send + Sync + 'static {
    async fn probe(&self) -> Result<bool, String>;
    async fn info(&self) -> Result<PluginInfoResponse, String>;
    async fn create_routes(&self, alloc_id: &str) -> Result<(), String>;
    async fn change_or_delete_routes(&self, alloc_id: &str) -> Result<(), String>;
}

async fn dispatch(handler: &dyn PluginHandler, request: PluginRequest) -> PluginResponse {
    let result = match request {
        PluginRequest::Probe => handler
            .probe()
            .await
            .map(|healthy| PluginResponse::Probe { healthy }),
        PluginRequest::Info => handler.info().await.map(PluginResponse::Info),
        PluginRequest::CreateRoutes { alloc_id } => handler
            .create_routes(&alloc_id)
            .await
            .map(|_| PluginResponse::Ack),
        PluginRequest::ChangeOrDeleteRoutes { alloc_id } => handler
            .change_or_delete_routes(&alloc_id)
            .await
            .map(|_| PluginResponse::Ack),
    };
    result.unwrap_or_else(|message| PluginResponse::Error { message })
}

async fn handle_connection(stream: UnixStream, handler: Arc<dyn PluginHandler>) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "Plugin connection read failed");
                return;
            }
        }

        let response = match protocol::decode::<PluginRequest>(&line) {
            Ok(request) => dispatch(handler.as_ref(), request).await,
            Err(e) => PluginResponse::Error {
                message: e.to_string(),
            },
        };

        let encoded = match protocol::encode(&response) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(error = %e, "Failed to encode plugin response");
                return;
            }
        };
        if writer.write_all(encoded.as_bytes()).await.is_err() {
            return;
        }
    }
}

/// Serve `handler` on `listener` until `shutdown` is cancelled
pub async fn serve(
    listener: UnixListener,
    handler: Arc<dyn PluginHandler>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                connections.spawn(handle_connection(stream, handler.clone()));
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    connections.shutdown().await;
    Ok(())
}
