//! DNS-SD session manager for the zeroconf bridge
//!
//! This crate lets a caller advertise services on the local network and
//! watch service types for `added` / `removed` / `resolved` notifications:
//! - Tracks publications and watches keyed by structural [`ServiceKey`]
//! - Resolves discovered services one at a time per watch, in discovery
//!   order, with a settling pause between resolves
//! - Translates platform records into the caller-facing wire shape
//! - Delivers every operation's outcome exactly once through a [`Callback`]
//!
//! # Architecture
//!
//! The [`SessionManager`] never speaks mDNS itself. It drives a
//! [`DiscoveryPlatform`]; [`MdnsPlatform`] implements one on the `mdns-sd`
//! daemon. Each watch runs as its own task that owns the caller's event sink
//! and its [`ResolutionQueue`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use zeroconf_core::{AddressFamily, BridgeConfig};
//! use zeroconf_discovery::{ChannelSink, MdnsPlatformFactory, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BridgeConfig::default();
//!     let factory = Arc::new(MdnsPlatformFactory::new(config.discovery.clone()));
//!     let manager = SessionManager::new(&config, factory)?;
//!
//!     let (callback, events) = ChannelSink::callback();
//!     manager.watch("_http._tcp.", "local.", AddressFamily::Any, callback);
//!
//!     while let Ok(delivery) = events.recv().await {
//!         println!("{:?}", delivery);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! [`ServiceKey`]: zeroconf_core::ServiceKey

pub mod error;
pub mod hostname;
pub mod manager;
pub mod mdns;
pub mod platform;
pub mod queue;
pub mod registry;
pub mod session;
pub mod sink;
pub mod translate;
mod watch;

pub use error::{DiscoveryError, ErrorReply, PlatformOperation, Result, SessionKind};
pub use hostname::{derive_hostname, HostnameSource, SystemHostname};
pub use manager::{ManagerStatus, SessionManager};
pub use mdns::{MdnsPlatform, MdnsPlatformFactory};
pub use platform::{BrowseEvent, DiscoveryPlatform, PlatformFactory, Subscription, SubscriptionId};
pub use queue::{ResolutionQueue, ResolveDisposition};
pub use registry::Registry;
pub use session::{PublicationInfo, PublishState, WatchInfo, WatchState};
pub use sink::{Callback, CallbackSink, ChannelSink, Delivery};
pub use translate::{translate, TranslationError};
