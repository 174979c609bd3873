//! ScpiEndpoint instrument trait
//!
//! Hardware-agnostic interface for SCPI command execution.
//! Implementations handle protocol-specific details (raw socket, VISA, mock).

use async_trait::async_trait;
use std::time::Duration;

use crate::error::TransportError;

/// SCPI endpoint instrument trait
///
/// One value of this trait is one open session to one device. Handles are
/// shared as `Arc<dyn ScpiEndpoint>`, so every method takes `&self` and the
/// adapter serializes access internally (a `tokio::sync::Mutex` around the
/// link). Commands are executed in call order.
///
/// ## Error Recovery
/// Failed queries do NOT auto-clear instrument errors. Persistent errors may
/// require `reset()` to factory defaults.
///
/// ## Lifetime
/// `close()` is idempotent. Any other call after `close()` fails with
/// [`TransportError::Closed`].
#[async_trait]
pub trait ScpiEndpoint: Send + Sync {
    /// Resource string this session was opened with
    fn resource(&self) -> &str;

    /// Default timeout applied to queries
    fn timeout(&self) -> Duration;

    /// Send command without expecting response
    ///
    /// # Arguments
    /// * `cmd` - SCPI command string (e.g., "*RST", "OUTP:STAT ON")
    ///
    /// # Errors
    /// - `Communication` on transport failure
    /// - `Closed` after `close()`
    async fn write(&self, cmd: &str) -> Result<(), TransportError>;

    /// Send command and read the (trimmed) textual reply
    ///
    /// Uses the session's default timeout.
    ///
    /// # Errors
    /// - `Communication` on transport failure
    /// - `Timeout` when no reply arrives in time
    /// - `Closed` after `close()`
    async fn query(&self, cmd: &str) -> Result<String, TransportError> {
        self.query_with_timeout(cmd, self.timeout()).await
    }

    /// Send command and read the reply with an explicit timeout
    async fn query_with_timeout(
        &self,
        cmd: &str,
        timeout: Duration,
    ) -> Result<String, TransportError>;

    /// Release the underlying session. Idempotent.
    async fn close(&self) -> Result<(), TransportError>;

    /// Query instrument identity (*IDN?)
    ///
    /// # Returns
    /// - Identity string (e.g., "Agilent Technologies,34461A,MY53202914,A.02.14")
    async fn identify(&self) -> Result<String, TransportError> {
        self.query("*IDN?").await
    }

    /// Reset instrument to factory defaults (*RST)
    async fn reset(&self) -> Result<(), TransportError> {
        self.write("*RST").await
    }
}
