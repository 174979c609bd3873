//! Raw SCPI socket adapter
//!
//! Most LAN instruments (Rigol, Siglent, Keysight) accept SCPI on a plain TCP
//! port, conventionally 5025. Commands are terminated with `\n` and every
//! reply is a single `\n`-terminated line.
//!
//! A query that times out still gets its reply eventually. The link counts
//! those owed replies and discards that many lines before reading the answer
//! to the next query, so replies never drift onto later commands.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::TransportError;
use crate::traits::ScpiEndpoint;

const WRITE_TERMINATOR: &str = "\n";

struct Link {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// Replies still owed for queries that timed out
    stale: usize,
}

impl Link {
    /// Next reply line, skipping stale ones. `None` on end of stream.
    async fn read_reply(&mut self) -> std::io::Result<Option<String>> {
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            if self.stale == 0 {
                return Ok(Some(line));
            }
            self.stale -= 1;
            debug!(reply = %line.trim(), "discarded late reply");
        }
    }
}

/// SCPI over TCP
pub struct SocketAdapter {
    resource: String,
    timeout: Duration,
    link: Mutex<Option<Link>>,
}

impl SocketAdapter {
    /// Connect to `host:port`
    ///
    /// # Arguments
    /// * `resource` - Resource string used in logs and errors
    /// * `timeout` - Bound on the connect and on every query
    ///
    /// # Errors
    /// `Connection` if the host does not accept within `timeout`.
    pub async fn connect(
        resource: &str,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let connect_error = |reason: String| TransportError::Connection {
            resource: resource.to_string(),
            reason,
        };

        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| connect_error(format!("no answer within {:?}", timeout)))?
            .map_err(|e| connect_error(e.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| connect_error(e.to_string()))?;

        let (read_half, write_half) = stream.into_split();
        debug!(resource, "socket session opened");

        Ok(Self {
            resource: resource.to_string(),
            timeout,
            link: Mutex::new(Some(Link {
                reader: BufReader::new(read_half),
                writer: write_half,
                stale: 0,
            })),
        })
    }

    fn comm_error(&self, reason: impl Into<String>) -> TransportError {
        TransportError::Communication {
            resource: self.resource.clone(),
            reason: reason.into(),
        }
    }

    async fn send(&self, link: &mut Link, cmd: &str) -> Result<(), TransportError> {
        let line = format!("{}{}", cmd, WRITE_TERMINATOR);
        link.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.comm_error(format!("write of '{}' failed: {}", cmd, e)))?;
        link.writer
            .flush()
            .await
            .map_err(|e| self.comm_error(format!("flush after '{}' failed: {}", cmd, e)))
    }
}

#[async_trait]
impl ScpiEndpoint for SocketAdapter {
    fn resource(&self) -> &str {
        &self.resource
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn write(&self, cmd: &str) -> Result<(), TransportError> {
        let mut guard = self.link.lock().await;
        let link = guard
            .as_mut()
            .ok_or_else(|| TransportError::Closed(self.resource.clone()))?;
        self.send(link, cmd).await?;
        debug!(resource = %self.resource, cmd, "SCPI write");
        Ok(())
    }

    async fn query_with_timeout(
        &self,
        cmd: &str,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        let mut guard = self.link.lock().await;
        let link = guard
            .as_mut()
            .ok_or_else(|| TransportError::Closed(self.resource.clone()))?;
        self.send(link, cmd).await?;

        let outcome = tokio::time::timeout(timeout, link.read_reply()).await;
        let read = match outcome {
            Ok(read) => read,
            Err(_) => {
                link.stale += 1;
                return Err(TransportError::Timeout {
                    command: cmd.to_string(),
                    timeout,
                });
            }
        };
        let reply = read
            .map_err(|e| self.comm_error(format!("read after '{}' failed: {}", cmd, e)))?
            .ok_or_else(|| self.comm_error("connection closed by instrument"))?;

        let reply = reply.trim().to_string();
        debug!(resource = %self.resource, cmd, reply = %reply, "SCPI query");
        Ok(reply)
    }

    async fn close(&self) -> Result<(), TransportError> {
        let link = self.link.lock().await.take();
        if let Some(mut link) = link {
            link.writer
                .shutdown()
                .await
                .map_err(|e| self.comm_error(format!("shutdown failed: {}", e)))?;
            debug!(resource = %self.resource, "socket session closed");
        }
        Ok(())
    }
}
