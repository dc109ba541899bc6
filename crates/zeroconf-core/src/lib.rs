//! # zeroconf-core
//!
//! Core types, error handling, and configuration for the zeroconf bridge.
//!
//! - **Types**: `ServiceKey` (structural composite identity), service
//!   descriptors, raw platform records, and the translated wire shapes
//!   (`ResolvedService`, `WatchEvent`, `RegisterOutcome`).
//! - **Errors**: Serializable configuration and validation errors.
//! - **Configuration**: YAML files layered with environment overrides.
//!
//! ## Example
//!
//! ```
//! use zeroconf_core::types::{AddressFamily, ServiceDescriptor};
//!
//! let desc = ServiceDescriptor::new("_http._tcp.", "local.", "web", 8080)
//!     .with_txt("path", "/")
//!     .with_address_family(AddressFamily::Ipv4);
//!
//! assert!(desc.validate().is_ok());
//! ```

pub mod config;
pub mod discovery_config;
pub mod error;
pub mod types;

// Re-export commonly used types for convenience
pub use config::BridgeConfig;
pub use discovery_config::DiscoveryConfig;
pub use error::{ConfigError, CoreError, Result, ValidationError};
pub use types::{
    AddressFamily, DiscoveredRecord, RegisterOutcome, ResolvedService, ServiceDescriptor,
    ServiceKey, SessionId, WatchAction, WatchEvent,
};
