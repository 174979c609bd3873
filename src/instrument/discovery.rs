//! Bench discovery
//!
//! Opens a list of resources, asks each for `*IDN?`, and keys the live
//! handles by model number so sweeps can say `DP832` instead of an address.
//! [`discover_attached`] builds the list itself from every instrument the
//! VISA library can see.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::identity::{model_number, Identity};
use crate::error::TransportError;
use crate::hardware::{self, Opener};
use crate::traits::ScpiEndpoint;

/// A device found during discovery
#[derive(Clone)]
pub struct DiscoveredDevice {
    /// Resource string the device was opened with
    pub resource: String,
    /// Parsed `*IDN?` reply
    pub identity: Identity,
    /// Open session, owned by the caller from here on
    pub handle: Arc<dyn ScpiEndpoint>,
}

impl std::fmt::Debug for DiscoveredDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveredDevice")
            .field("resource", &self.resource)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Open and identify every resource
///
/// Devices that cannot be opened or identified are logged and skipped; the
/// handles of skipped devices are closed. When two devices report the same
/// model the later ones are keyed `MODEL#2`, `MODEL#3`, ...
pub async fn discover<S: AsRef<str>>(
    resources: &[S],
    opener: &dyn Opener,
    timeout: Duration,
) -> BTreeMap<String, DiscoveredDevice> {
    let mut devices = BTreeMap::new();

    for resource in resources.iter().map(AsRef::as_ref) {
        let (handle, reply) = match identify(resource, opener, timeout).await {
            Ok(found) => found,
            Err(e) => {
                warn!(resource, error = %e, "skipping device");
                continue;
            }
        };

        let model = model_number(&reply);
        let key = unique_key(&devices, &model);
        info!(resource, model = %key, "identified {}", reply);
        devices.insert(
            key,
            DiscoveredDevice {
                resource: resource.to_string(),
                identity: Identity::parse(&reply),
                handle,
            },
        );
    }

    devices
}

/// Enumerate every attached instrument and [`discover`] them
///
/// # Errors
/// - `FeatureNotEnabled` without `instrument_visa`
/// - `Connection` if the VISA search itself fails
pub async fn discover_attached(
    opener: &dyn Opener,
    timeout: Duration,
) -> Result<BTreeMap<String, DiscoveredDevice>, TransportError> {
    let resources = hardware::list_resources().await?;
    info!(count = resources.len(), "attached resources found");
    Ok(discover(&resources, opener, timeout).await)
}

async fn identify(
    resource: &str,
    opener: &dyn Opener,
    timeout: Duration,
) -> Result<(Arc<dyn ScpiEndpoint>, String), TransportError> {
    let handle = opener.open(resource, timeout).await?;
    match handle.identify().await {
        Ok(reply) => Ok((handle, reply)),
        Err(e) => {
            if let Err(close_err) = handle.close().await {
                warn!(resource, error = %close_err, "close after failed identify");
            }
            Err(e)
        }
    }
}

fn unique_key<V>(taken: &BTreeMap<String, V>, model: &str) -> String {
    if !taken.contains_key(model) {
        return model.to_string();
    }
    (2..)
        .map(|n| format!("{}#{}", model, n))
        .find(|key| !taken.contains_key(key))
        .unwrap_or_else(|| model.to_string())
}
