//! Core types for the zeroconf bridge.
//!
//! This module defines the identities and records that flow between a caller,
//! the session manager, and the platform discovery service: composite service
//! keys, descriptors to advertise, raw platform records, and the translated
//! wire shapes delivered back to callers.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use uuid::Uuid;

/// Composite identity of a publication or a watch.
///
/// Equality and hashing are structural over all three fields, so two keys
/// built independently from the same strings address the same session.
/// Watches carry an empty `name`.
///
/// # Examples
///
/// ```
/// use zeroconf_core::types::ServiceKey;
///
/// let a = ServiceKey::new("local.", "printer", "_ipp._tcp.");
/// let b = ServiceKey::new("local.".to_string(), "printer".to_string(), "_ipp._tcp.".to_string());
/// assert_eq!(a, b);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    pub domain: String,
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: String,
}

impl ServiceKey {
    pub fn new(
        domain: impl Into<String>,
        name: impl Into<String>,
        service_type: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            name: name.into(),
            service_type: service_type.into(),
        }
    }

    /// Key addressing a watch on `service_type` within `domain`.
    pub fn watch(service_type: impl Into<String>, domain: impl Into<String>) -> Self {
        Self::new(domain, String::new(), service_type)
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}{}", self.service_type, self.domain)
        } else {
            write!(f, "{}.{}{}", self.name, self.service_type, self.domain)
        }
    }
}

/// Unique identifier for one session instance.
///
/// Two sessions may share a [`ServiceKey`] over time (watch, unwatch, watch
/// again); the session id tells them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a new random session identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address-family hint supplied by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    #[default]
    Any,
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// Returns true if `addr` satisfies this hint.
    pub fn accepts(&self, addr: &IpAddr) -> bool {
        match self {
            AddressFamily::Any => true,
            AddressFamily::Ipv4 => addr.is_ipv4(),
            AddressFamily::Ipv6 => addr.is_ipv6(),
        }
    }

    /// Picks the address to report for this hint. `Any` prefers IPv4.
    pub fn select(&self, addresses: &[IpAddr]) -> Option<IpAddr> {
        match self {
            AddressFamily::Any => addresses
                .iter()
                .find(|addr| addr.is_ipv4())
                .or_else(|| addresses.first())
                .copied(),
            _ => addresses.iter().find(|addr| self.accepts(addr)).copied(),
        }
    }
}

impl FromStr for AddressFamily {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "any" => Ok(AddressFamily::Any),
            "ipv4" => Ok(AddressFamily::Ipv4),
            "ipv6" => Ok(AddressFamily::Ipv6),
            other => Err(ValidationError::invalid_value(
                "addressFamily",
                format!("unknown address family '{}'", other),
            )),
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::Any => write!(f, "any"),
            AddressFamily::Ipv4 => write!(f, "ipv4"),
            AddressFamily::Ipv6 => write!(f, "ipv6"),
        }
    }
}

/// A service the caller wants advertised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    #[serde(rename = "type")]
    pub service_type: String,
    pub domain: String,
    pub name: String,
    pub port: u16,
    #[serde(default)]
    pub txt_record: BTreeMap<String, String>,
    #[serde(default)]
    pub address_family: AddressFamily,
}

impl ServiceDescriptor {
    pub fn new(
        service_type: impl Into<String>,
        domain: impl Into<String>,
        name: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            service_type: service_type.into(),
            domain: domain.into(),
            name: name.into(),
            port,
            txt_record: BTreeMap::new(),
            address_family: AddressFamily::Any,
        }
    }

    pub fn with_txt(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.txt_record.insert(key.into(), value.into());
        self
    }

    pub fn with_address_family(mut self, family: AddressFamily) -> Self {
        self.address_family = family;
        self
    }

    /// The registry key for this publication.
    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(&self.domain, &self.name, &self.service_type)
    }

    /// Structural checks only: non-empty type and name, non-zero port.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.service_type.trim().is_empty() {
            return Err(ValidationError::missing_field("type"));
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::missing_field("name"));
        }
        if self.port == 0 {
            return Err(ValidationError::invalid_value("port", "port cannot be 0"));
        }
        Ok(())
    }
}

/// A service record as reported by the platform discovery service.
///
/// Records reported on `found` carry only their identity; host, port,
/// addresses and attributes are filled in by resolution.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiscoveredRecord {
    pub domain: String,
    pub name: String,
    pub service_type: String,
    /// Host representation, `"<hostname>/<address>"` when an address is known.
    pub host: Option<String>,
    pub port: u16,
    pub addresses: Vec<IpAddr>,
    /// Opaque TXT attribute payloads.
    pub attributes: BTreeMap<String, Vec<u8>>,
}

impl DiscoveredRecord {
    /// Creates an unresolved record carrying only its identity.
    pub fn unresolved(
        domain: impl Into<String>,
        name: impl Into<String>,
        service_type: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            name: name.into(),
            service_type: service_type.into(),
            ..Default::default()
        }
    }

    pub fn identity(&self) -> ServiceKey {
        ServiceKey::new(&self.domain, &self.name, &self.service_type)
    }

    pub fn is_resolved(&self) -> bool {
        self.host.is_some()
    }
}

/// Translated service shape delivered to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedService {
    pub domain: String,
    #[serde(rename = "type")]
    pub service_type: String,
    pub name: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default)]
    pub txt_record: BTreeMap<String, String>,
}

/// Kind of watch notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchAction {
    Added,
    Removed,
    Resolved,
}

impl fmt::Display for WatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchAction::Added => write!(f, "added"),
            WatchAction::Removed => write!(f, "removed"),
            WatchAction::Resolved => write!(f, "resolved"),
        }
    }
}

/// One delivery on a watch's event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub action: WatchAction,
    pub service: ResolvedService,
}

impl WatchEvent {
    pub fn new(action: WatchAction, service: ResolvedService) -> Self {
        Self { action, service }
    }
}

/// Terminal payload of a successful `register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterOutcome {
    pub action: String,
    pub service: String,
}

impl RegisterOutcome {
    pub fn registered(name: impl Into<String>) -> Self {
        Self {
            action: "registered".to_string(),
            service: name.into(),
        }
    }
}
