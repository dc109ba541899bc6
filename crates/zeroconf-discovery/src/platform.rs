//! Seams to the platform discovery service.
//!
//! The session manager never speaks a discovery protocol itself. It drives a
//! [`DiscoveryPlatform`], which advertises, browses and resolves on its
//! behalf and pushes browse events onto a channel per subscription.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;
use zeroconf_core::types::{AddressFamily, DiscoveredRecord, ServiceDescriptor, ServiceKey};

use crate::error::Result;

/// Identifies one browse subscription on a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events a platform reports for a browse subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum BrowseEvent {
    /// A service instance appeared (unresolved)
    Found(DiscoveredRecord),
    /// A service instance disappeared
    Lost(DiscoveredRecord),
    /// The subscription failed and will deliver nothing further
    Failed { code: String, message: String },
}

/// An active browse subscription.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub events: async_channel::Receiver<BrowseEvent>,
}

/// The platform discovery service.
///
/// Implementations must fail fast; the session manager imposes no timeouts
/// on these calls.
#[async_trait]
pub trait DiscoveryPlatform: Send + Sync {
    /// Advertises `descriptor`. Returns the name the platform registered,
    /// which may differ from the requested one after conflict resolution.
    async fn advertise(&self, descriptor: &ServiceDescriptor, hostname: Option<&str>)
        -> Result<String>;

    /// Withdraws a previous advertisement.
    async fn withdraw(&self, key: &ServiceKey) -> Result<()>;

    /// Starts browsing for `service_type` in `domain`.
    async fn discover(
        &self,
        service_type: &str,
        domain: &str,
        family: AddressFamily,
    ) -> Result<Subscription>;

    /// Stops a browse subscription. Its event channel closes afterwards.
    async fn stop_discovery(&self, subscription: SubscriptionId) -> Result<()>;

    /// Expands a found record into full connection details.
    async fn resolve(
        &self,
        record: &DiscoveredRecord,
        family: AddressFamily,
    ) -> Result<DiscoveredRecord>;

    /// Releases the platform handle.
    async fn shutdown(&self) -> Result<()>;
}

/// Builds platform instances; used again on every reinitialization.
pub trait PlatformFactory: Send + Sync {
    fn create(&self) -> Result<Arc<dyn DiscoveryPlatform>>;
}

impl<F> PlatformFactory for F
where
    F: Fn() -> Result<Arc<dyn DiscoveryPlatform>> + Send + Sync,
{
    fn create(&self) -> Result<Arc<dyn DiscoveryPlatform>> {
        self()
    }
}
