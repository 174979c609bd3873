//! Bench session
//!
//! Owns the open instrument handles for one run. Opening is all-or-nothing:
//! if any enabled instrument fails to open or initialize, everything opened
//! so far is closed again and the failing instrument is reported.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::InstrumentConfig;
use crate::error::{SweepError, TransportError};
use crate::hardware::Opener;
use crate::sweep::Meters;
use crate::traits::ScpiEndpoint;

/// Open instruments keyed by their configured id
pub struct BenchSession {
    instruments: BTreeMap<String, Arc<dyn ScpiEndpoint>>,
}

impl std::fmt::Debug for BenchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BenchSession")
            .field("instruments", &self.instruments.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl BenchSession {
    /// Open and initialize every enabled instrument
    ///
    /// Each instrument is opened with its own timeout, sent `*RST` when
    /// `reset` is set, then sent its `init` commands in order.
    ///
    /// # Errors
    /// `SweepError::Setup` naming the first instrument that failed. No handle
    /// stays open in that case.
    pub async fn open(
        instruments: &[InstrumentConfig],
        opener: &dyn Opener,
    ) -> Result<Self, SweepError> {
        let mut session = Self {
            instruments: BTreeMap::new(),
        };

        for config in instruments.iter().filter(|c| c.enabled) {
            match open_one(config, opener).await {
                Ok(handle) => {
                    info!(id = %config.id, resource = %config.resource, "instrument ready");
                    session.instruments.insert(config.id.clone(), handle);
                }
                Err(source) => {
                    warn!(id = %config.id, error = %source, "instrument setup failed");
                    session.close_all().await;
                    return Err(SweepError::Setup {
                        device: config.id.clone(),
                        source,
                    });
                }
            }
        }

        Ok(session)
    }

    /// Handle of instrument `id`
    pub fn get(&self, id: &str) -> Option<Arc<dyn ScpiEndpoint>> {
        self.instruments.get(id).cloned()
    }

    /// Like [`get`](Self::get), failing with `SweepError::InvalidSpec`
    pub fn require(&self, id: &str) -> Result<Arc<dyn ScpiEndpoint>, SweepError> {
        self.get(id)
            .ok_or_else(|| SweepError::InvalidSpec(format!("instrument '{}' is not open", id)))
    }

    /// Every open handle, for use as sweep meters
    pub fn meters(&self) -> Meters {
        self.instruments.clone()
    }

    /// Ids of the open instruments, sorted
    pub fn ids(&self) -> Vec<&str> {
        self.instruments.keys().map(String::as_str).collect()
    }

    /// Number of open instruments
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// Whether no instrument is open
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Close every handle
    ///
    /// Close failures are logged; the remaining handles are still closed.
    pub async fn close_all(&mut self) {
        for (id, handle) in std::mem::take(&mut self.instruments) {
            match handle.close().await {
                Ok(()) => debug!(%id, "instrument closed"),
                Err(e) => warn!(%id, error = %e, "failed to close instrument"),
            }
        }
    }
}

async fn open_one(
    config: &InstrumentConfig,
    opener: &dyn Opener,
) -> Result<Arc<dyn ScpiEndpoint>, TransportError> {
    let handle = opener.open(&config.resource, config.timeout()).await?;

    if let Err(e) = initialize(handle.as_ref(), config).await {
        if let Err(close_err) = handle.close().await {
            warn!(id = %config.id, error = %close_err, "close after failed init");
        }
        return Err(e);
    }
    Ok(handle)
}

async fn initialize(handle: &dyn ScpiEndpoint, config: &InstrumentConfig) -> Result<(), TransportError> {
    if config.reset {
        handle.reset().await?;
    }
    for command in &config.init {
        handle.write(command).await?;
    }
    Ok(())
}
