//! VISA Hardware Adapter for GPIB/USB/Ethernet instruments
//!
//! Provides a [`ScpiEndpoint`] over the VISA library, supporting instruments
//! via GPIB, USBTMC, VXI-11/HiSLIP and serial.
//!
//! visa-rs is synchronous, so every call runs on Tokio's blocking pool. The
//! resource manager is kept alive next to the instrument session because
//! closing it would close every session it opened.
//!
//! The session's own I/O timeout is set to the adapter timeout at open, so a
//! blocking read gives up (and releases the link) no later than the async
//! timeout around it.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::TransportError;
use crate::traits::ScpiEndpoint;

#[cfg(feature = "instrument_visa")]
use std::io::{BufRead, BufReader, Write};
#[cfg(feature = "instrument_visa")]
use std::sync::{Arc, Mutex};
#[cfg(feature = "instrument_visa")]
use tracing::debug;
#[cfg(feature = "instrument_visa")]
use visa_rs::prelude::*;

#[cfg(feature = "instrument_visa")]
const LINE_TERMINATOR: &str = "\n";

/// Search expression for every attached instrument
pub const FIND_ALL_INSTRUMENTS: &str = "?*::INSTR";

#[cfg(feature = "instrument_visa")]
struct VisaLink {
    _rm: DefaultRM,
    instr: Instrument,
}

/// VISA adapter for instrument communication
///
/// Supports resource strings like:
/// - "GPIB0::1::INSTR" (GPIB interface)
/// - "USB0::0x1AB1::0x0E11::DP8C172001883::INSTR" (USB)
/// - "TCPIP0::192.168.1.100::INSTR" (Ethernet/LXI)
pub struct VisaAdapter {
    resource: String,
    timeout: Duration,
    #[cfg(feature = "instrument_visa")]
    link: Arc<Mutex<Option<VisaLink>>>,
}

#[cfg(feature = "instrument_visa")]
impl VisaAdapter {
    /// Open a VISA session
    ///
    /// # Errors
    /// `Connection` if the resource manager or the resource cannot be opened.
    pub async fn open(resource: String, timeout: Duration) -> Result<Self, TransportError> {
        let resource_for_task = resource.clone();
        let link = tokio::task::spawn_blocking(move || {
            let connect_error = |reason: String| TransportError::Connection {
                resource: resource_for_task.clone(),
                reason,
            };
            let rm = DefaultRM::new()
                .map_err(|e| connect_error(format!("VISA resource manager: {}", e)))?;
            let name = std::ffi::CString::new(resource_for_task.as_str())
                .map_err(|e| connect_error(e.to_string()))?;
            let instr = rm
                .open(&name.into(), AccessMode::NO_LOCK, timeout)
                .map_err(|e| connect_error(e.to_string()))?;
            let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
            let io_timeout = attribute::AttrTmoValue::new_checked(timeout_ms)
                .ok_or_else(|| connect_error(format!("invalid VISA timeout {}ms", timeout_ms)))?;
            instr
                .set_attr(io_timeout)
                .map_err(|e| connect_error(format!("failed to set VISA timeout: {}", e)))?;
            Ok::<VisaLink, TransportError>(VisaLink { _rm: rm, instr })
        })
        .await
        .map_err(|e| TransportError::Connection {
            resource: resource.clone(),
            reason: format!("VISA open task failed: {}", e),
        })??;

        debug!(resource = %resource, timeout_ms = timeout.as_millis() as u64, "VISA session opened");
        Ok(Self {
            resource,
            timeout,
            link: Arc::new(Mutex::new(Some(link))),
        })
    }

    /// Run one blocking exchange: write `cmd`, optionally read one line back
    async fn exchange(&self, cmd: &str, expect_reply: bool) -> Result<String, TransportError> {
        let link = Arc::clone(&self.link);
        let resource = self.resource.clone();
        let line = format!("{}{}", cmd, LINE_TERMINATOR);
        let command = cmd.to_string();

        tokio::task::spawn_blocking(move || {
            let comm_error = |reason: String| TransportError::Communication {
                resource: resource.clone(),
                reason,
            };
            let mut guard = link.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let link = guard
                .as_mut()
                .ok_or_else(|| TransportError::Closed(resource.clone()))?;

            link.instr
                .write_all(line.as_bytes())
                .map_err(|e| comm_error(format!("VISA write failed for '{}': {}", command, e)))?;
            if !expect_reply {
                return Ok(String::new());
            }

            let mut reply = String::new();
            BufReader::new(&link.instr)
                .read_line(&mut reply)
                .map_err(|e| comm_error(format!("VISA read failed for '{}': {}", command, e)))?;
            Ok(reply.trim().to_string())
        })
        .await
        .map_err(|e| TransportError::Communication {
            resource: self.resource.clone(),
            reason: format!("VISA I/O task failed: {}", e),
        })?
    }
}

#[cfg(not(feature = "instrument_visa"))]
impl VisaAdapter {
    /// VISA support not compiled in
    ///
    /// # Errors
    /// Always `FeatureNotEnabled("instrument_visa")`.
    pub async fn open(resource: String, _timeout: Duration) -> Result<Self, TransportError> {
        let _ = resource;
        Err(TransportError::FeatureNotEnabled("instrument_visa".to_string()))
    }

    async fn exchange(&self, _cmd: &str, _expect_reply: bool) -> Result<String, TransportError> {
        Err(TransportError::FeatureNotEnabled("instrument_visa".to_string()))
    }
}

/// Resource strings of every instrument the VISA library can see
///
/// # Errors
/// `Connection` if the resource manager cannot be opened or the search fails.
#[cfg(feature = "instrument_visa")]
pub async fn list_resources() -> Result<Vec<String>, TransportError> {
    let list_error = |reason: String| TransportError::Connection {
        resource: FIND_ALL_INSTRUMENTS.to_string(),
        reason,
    };

    tokio::task::spawn_blocking(move || {
        let rm = DefaultRM::new()
            .map_err(|e| list_error(format!("VISA resource manager: {}", e)))?;
        let expr = std::ffi::CString::new(FIND_ALL_INSTRUMENTS)
            .map_err(|e| list_error(e.to_string()))?;
        let mut list = rm
            .find_res_list(&expr.into())
            .map_err(|e| list_error(format!("VISA search failed: {}", e)))?;

        let mut resources = Vec::new();
        while let Some(id) = list
            .find_next()
            .map_err(|e| list_error(format!("VISA search failed: {}", e)))?
        {
            resources.push(id.to_string());
        }
        debug!(count = resources.len(), "VISA resources listed");
        Ok(resources)
    })
    .await
    .map_err(|e| list_error(format!("VISA search task failed: {}", e)))?
}

/// VISA support not compiled in
///
/// # Errors
/// Always `FeatureNotEnabled("instrument_visa")`.
#[cfg(not(feature = "instrument_visa"))]
pub async fn list_resources() -> Result<Vec<String>, TransportError> {
    Err(TransportError::FeatureNotEnabled("instrument_visa".to_string()))
}

#[async_trait]
impl ScpiEndpoint for VisaAdapter {
    fn resource(&self) -> &str {
        &self.resource
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn write(&self, cmd: &str) -> Result<(), TransportError> {
        self.exchange(cmd, false).await.map(|_| ())
    }

    async fn query_with_timeout(
        &self,
        cmd: &str,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        tokio::time::timeout(timeout, self.exchange(cmd, true))
            .await
            .map_err(|_| TransportError::Timeout {
                command: cmd.to_string(),
                timeout,
            })?
    }

    async fn close(&self) -> Result<(), TransportError> {
        #[cfg(feature = "instrument_visa")]
        {
            let link = Arc::clone(&self.link);
            let closed = tokio::task::spawn_blocking(move || {
                link.lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .take()
                    .is_some()
            })
            .await
            .unwrap_or(false);
            if closed {
                debug!(resource = %self.resource, "VISA session closed");
            }
        }
        Ok(())
    }
}
