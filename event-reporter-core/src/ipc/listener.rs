//! Unix socket listener exposing the enqueue endpoint

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;

use crate::error::Result;
use crate::store::EventStore;
use crate::types::from_nanos;

use super::lock::EndpointLock;
use super::protocol::{
    ErrorCode, Introspection, QueueParams, Request, Response, METHOD_INTROSPECT, METHOD_QUEUE,
};

/// The daemon's local endpoint.
///
/// Holds the endpoint lock for its whole life; the socket file is removed
/// when the listener is dropped.
pub struct Listener {
    listener: UnixListener,
    socket_path: PathBuf,
    store: Arc<EventStore>,
    _lock: EndpointLock,
}

impl Listener {
    /// Claim `socket_path` and start listening on it.
    ///
    /// Fails with `NameTaken` when another instance owns the path. Must be
    /// called from within a tokio runtime.
    pub fn bind(socket_path: &Path, store: Arc<EventStore>) -> Result<Self> {
        let lock = EndpointLock::acquire(socket_path)?;

        // We own the name, so anything at the path is left over from a crash.
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }

        let listener = UnixListener::bind(socket_path)?;
        tracing::info!(socket = %socket_path.display(), "Listening for events");

        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
            store,
            _lock: lock,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until `shutdown` flips to true.
    ///
    /// Each connection is served on its own task.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let store = self.store.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, store).await {
                                tracing::debug!(error = %e, "IPC connection closed with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept IPC connection");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!(socket = %self.socket_path.display(), "IPC listener stopped");
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        // Runs before the lock field is released.
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

async fn handle_connection(stream: UnixStream, store: Arc<EventStore>) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = dispatch(&line, &store).await;

        let mut frame = serde_json::to_string(&response)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        frame.push('\n');
        writer.write_all(frame.as_bytes()).await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Decode one request frame and run it.
async fn dispatch(line: &str, store: &Arc<EventStore>) -> Response {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            return Response::error(String::new(), ErrorCode::ParseError, format!("invalid request: {}", e))
        }
    };

    match request.method.as_str() {
        METHOD_QUEUE => {
            let params: QueueParams = match serde_json::from_value(request.params) {
                Ok(params) => params,
                Err(e) => return Response::error(request.id, ErrorCode::InvalidParams, e.to_string()),
            };
            queue(request.id, params, store.clone()).await
        }
        METHOD_INTROSPECT => match serde_json::to_value(Introspection::current()) {
            Ok(value) => Response::success(request.id, value),
            Err(e) => Response::error(request.id, ErrorCode::Internal, e.to_string()),
        },
        other => Response::error(
            request.id,
            ErrorCode::MethodNotFound,
            format!("unknown method: {}", other),
        ),
    }
}

async fn queue(id: String, params: QueueParams, store: Arc<EventStore>) -> Response {
    let timestamp = from_nanos(params.timestamp_nanos);
    let result = tokio::task::spawn_blocking(move || store.queue(&params.details, timestamp)).await;

    match result {
        Ok(Ok(())) => Response::ok(id),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Failed to queue event");
            Response::error(id, ErrorCode::QueueFailed, e.to_string())
        }
        Err(e) => {
            tracing::error!(error = %e, "Queue task failed");
            Response::error(id, ErrorCode::Internal, e.to_string())
        }
    }
}
