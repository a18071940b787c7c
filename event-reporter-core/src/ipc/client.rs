//! Producer-side IPC client
//!
//! Opens a new connection per request and exchanges one frame each way.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::error::{Error, Result};

use super::protocol::{
    Introspection, QueueParams, Request, Response, METHOD_INTROSPECT, METHOD_QUEUE,
};

/// Client for a running daemon's enqueue endpoint
#[derive(Debug, Clone)]
pub struct Client {
    socket_path: PathBuf,
}

impl Client {
    /// Create a new client for the given socket path
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Queue one occurrence of an event.
    ///
    /// Returns once the daemon has persisted it.
    pub async fn queue(&self, details: &[u8], timestamp_nanos: i64) -> Result<()> {
        let params = QueueParams {
            details: details.to_vec(),
            timestamp_nanos,
        };
        self.request(METHOD_QUEUE, params).await?;
        Ok(())
    }

    /// Ask the daemon what it serves
    pub async fn introspect(&self) -> Result<Introspection> {
        let value = self.request(METHOD_INTROSPECT, ()).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn request<P: Serialize>(&self, method: &str, params: P) -> Result<serde_json::Value> {
        let request = Request::new(method, params)?;

        let stream = UnixStream::connect(&self.socket_path).await?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let mut frame = serde_json::to_string(&request)?;
        frame.push('\n');
        writer.write_all(frame.as_bytes()).await?;
        writer.flush().await?;

        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(Error::Ipc {
                code: "disconnected".to_string(),
                message: "daemon closed the connection without answering".to_string(),
            });
        }

        let response: Response = serde_json::from_str(&line)?;
        if response.id != request.id {
            return Err(Error::Ipc {
                code: "protocol".to_string(),
                message: format!(
                    "response id mismatch: expected {}, got {}",
                    request.id, response.id
                ),
            });
        }

        match response.error {
            Some(error) => Err(Error::Ipc {
                code: error.code.as_str().to_string(),
                message: error.message,
            }),
            None => Ok(response.result.unwrap_or(serde_json::Value::Null)),
        }
    }
}
