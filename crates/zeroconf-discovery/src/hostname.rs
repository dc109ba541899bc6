//! Local hostname derivation.
//!
//! The primary source is the system hostname. When it is empty or cannot be
//! read, a stable identifier `<prefix>-<installation id>` is used instead.

use std::path::PathBuf;
use tracing::{debug, warn};
use zeroconf_core::config::HostnameConfig;

use crate::error::{DiscoveryError, Result};

const MACHINE_ID_PATH: &str = "/etc/machine-id";

/// Where hostnames and installation ids come from.
pub trait HostnameSource: Send + Sync {
    /// The platform's hostname, if it reports one.
    fn local_hostname(&self) -> Option<String>;

    /// A stable per-installation identifier, if one exists.
    fn installation_id(&self) -> Option<String>;
}

/// Hostname source backed by the operating system.
#[derive(Debug, Clone)]
pub struct SystemHostname {
    configured_id: Option<String>,
    machine_id_path: PathBuf,
}

impl SystemHostname {
    pub fn new(config: &HostnameConfig) -> Self {
        Self {
            configured_id: config.installation_id.clone(),
            machine_id_path: PathBuf::from(MACHINE_ID_PATH),
        }
    }
}

impl HostnameSource for SystemHostname {
    fn local_hostname(&self) -> Option<String> {
        match hostname::get() {
            Ok(name) => Some(name.to_string_lossy().into_owned()),
            Err(e) => {
                warn!(error = %e, "Failed to read system hostname");
                None
            }
        }
    }

    fn installation_id(&self) -> Option<String> {
        if let Some(id) = &self.configured_id {
            return Some(id.clone());
        }

        std::fs::read_to_string(&self.machine_id_path)
            .map(|id| id.trim().to_string())
            .ok()
    }
}

/// Derives the hostname reported to callers.
///
/// # Errors
///
/// Returns [`DiscoveryError::HostnameUnavailable`] when the source has
/// neither a hostname nor an installation id.
pub fn derive_hostname(source: &dyn HostnameSource, prefix: &str) -> Result<String> {
    if let Some(name) = source.local_hostname() {
        let name = name.trim();
        if !name.is_empty() {
            return Ok(name.to_string());
        }
    }

    match source.installation_id() {
        Some(id) if !id.trim().is_empty() => {
            let fallback = format!("{}-{}", prefix, id.trim());
            debug!(hostname = %fallback, "System hostname empty, using installation id");
            Ok(fallback)
        }
        _ => Err(DiscoveryError::HostnameUnavailable(
            "system hostname is empty and no installation id is available".to_string(),
        )),
    }
}
