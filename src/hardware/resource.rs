//! Resource strings and opening sessions
//!
//! Accepts the VISA resource string forms found on bench instruments and
//! routes each to the adapter that can serve it:
//!
//! | Form | Adapter |
//! |---|---|
//! | `TCPIP0::192.168.1.10::5025::SOCKET` | [`SocketAdapter`] |
//! | `192.168.1.10:5025` | [`SocketAdapter`] |
//! | `TCPIP0::192.168.2.2::INSTR`, `TCPIP0::host::inst0::INSTR` | [`VisaAdapter`] |
//! | `USB0::0x1AB1::0x0E11::DP8C172001883::INSTR` | [`VisaAdapter`] |
//! | `GPIB0::5::INSTR`, `ASRL1::INSTR` | [`VisaAdapter`] |
//! | `mock::<name>` | [`MockInstrument`] |

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{MockInstrument, SocketAdapter, VisaAdapter};
use crate::error::TransportError;
use crate::traits::ScpiEndpoint;

static SOCKET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^TCPIP\d*::([^:]+)::(\d+)::SOCKET$").expect("valid regex")
});

static HOST_PORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9][A-Za-z0-9.\-]*):(\d+)$").expect("valid regex")
});

static VISA_INSTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(TCPIP\d*::[^:]+(::[^:]+)?|USB\d*::[^:]+::[^:]+::[^:]+(::\d+)?|GPIB\d*::\d+(::\d+)?|ASRL[^:]*)::INSTR$",
    )
    .expect("valid regex")
});

/// Where an instrument lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceAddress {
    /// Raw SCPI over TCP
    Socket {
        /// Host name or IP address
        host: String,
        /// TCP port, usually 5025
        port: u16,
    },
    /// Anything the VISA library resolves (LXI/VXI-11, USBTMC, GPIB, serial)
    Visa(String),
    /// In-memory mock instrument
    Mock(String),
}

impl ResourceAddress {
    /// Parse a resource string
    ///
    /// # Errors
    /// `TransportError::Connection` when the string matches no known form.
    pub fn parse(resource: &str) -> Result<Self, TransportError> {
        let resource = resource.trim();

        if let Some(name) = resource.strip_prefix("mock::") {
            if !name.is_empty() {
                return Ok(Self::Mock(name.to_string()));
            }
        }

        if let Some(caps) = SOCKET_RE
            .captures(resource)
            .or_else(|| HOST_PORT_RE.captures(resource))
        {
            let port = caps[2].parse::<u16>().map_err(|_| TransportError::Connection {
                resource: resource.to_string(),
                reason: format!("port '{}' out of range", &caps[2]),
            })?;
            return Ok(Self::Socket {
                host: caps[1].to_string(),
                port,
            });
        }

        if VISA_INSTR_RE.is_match(resource) {
            return Ok(Self::Visa(resource.to_string()));
        }

        Err(TransportError::Connection {
            resource: resource.to_string(),
            reason: "malformed resource string".to_string(),
        })
    }
}

impl FromStr for ResourceAddress {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socket { host, port } => write!(f, "TCPIP0::{}::{}::SOCKET", host, port),
            Self::Visa(resource) => f.write_str(resource),
            Self::Mock(name) => write!(f, "mock::{}", name),
        }
    }
}

/// Opens instrument sessions
///
/// Session setup and discovery open resources through this trait;
/// [`DefaultOpener`] forwards to [`open`].
#[async_trait]
pub trait Opener: Send + Sync {
    /// Open `resource` with the given default timeout
    async fn open(
        &self,
        resource: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn ScpiEndpoint>, TransportError>;
}

/// Opener backed by the real transports
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultOpener;

#[async_trait]
impl Opener for DefaultOpener {
    async fn open(
        &self,
        resource: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn ScpiEndpoint>, TransportError> {
        open(resource, timeout).await
    }
}

/// Open a session to `resource`
///
/// # Errors
/// - `Connection` if the string is malformed or the device unreachable
/// - `FeatureNotEnabled` for VISA resources without `instrument_visa`
pub async fn open(resource: &str, timeout: Duration) -> Result<Arc<dyn ScpiEndpoint>, TransportError> {
    let address = ResourceAddress::parse(resource)?;
    debug!(resource, %address, "opening instrument session");

    match address {
        ResourceAddress::Socket { host, port } => {
            let adapter = SocketAdapter::connect(resource, &host, port, timeout).await?;
            Ok(Arc::new(adapter))
        }
        ResourceAddress::Visa(resource) => {
            let adapter = VisaAdapter::open(resource, timeout).await?;
            Ok(Arc::new(adapter))
        }
        ResourceAddress::Mock(name) => Ok(Arc::new(MockInstrument::new(format!("mock::{}", name)))),
    }
}
