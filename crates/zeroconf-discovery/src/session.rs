//! Publish and watch session records held by the registry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use zeroconf_core::types::{AddressFamily, ServiceDescriptor, ServiceKey, SessionId};

use crate::error::SessionKind;
use crate::platform::SubscriptionId;

/// Entries stored in a registry namespace.
pub trait Session {
    const KIND: SessionKind;

    fn id(&self) -> SessionId;
}

/// Lifecycle of a publication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishState {
    Registering,
    Registered,
    Unregistering,
    Unregistered,
    Failed,
}

/// An advertised (or being-advertised) service.
#[derive(Debug, Clone)]
pub struct PublishSession {
    pub id: SessionId,
    pub descriptor: ServiceDescriptor,
    /// Name confirmed by the platform, which may rename on conflict.
    pub registered_name: Option<String>,
    pub state: PublishState,
    pub created_at: DateTime<Utc>,
}

impl PublishSession {
    pub fn new(descriptor: ServiceDescriptor) -> Self {
        Self {
            id: SessionId::new(),
            descriptor,
            registered_name: None,
            state: PublishState::Registering,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> ServiceKey {
        self.descriptor.key()
    }

    pub fn mark_registered(&mut self, name: String) {
        self.registered_name = Some(name);
        self.state = PublishState::Registered;
    }

    pub fn mark_failed(&mut self) {
        self.state = PublishState::Failed;
    }
}

impl Session for PublishSession {
    const KIND: SessionKind = SessionKind::Publish;

    fn id(&self) -> SessionId {
        self.id
    }
}

/// Lifecycle of a watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchState {
    /// Subscription requested, not yet confirmed by the platform
    Starting,
    Watching,
    Unwatching,
    Stopped,
    DiscoveryFailed,
}

/// A browse subscription and the worker that drives it.
///
/// The worker task exclusively owns the caller's event sink and the
/// resolution queue; the session keeps the handles needed to stop it.
#[derive(Debug)]
pub struct WatchSession {
    pub id: SessionId,
    pub key: ServiceKey,
    pub family: AddressFamily,
    pub subscription: Option<SubscriptionId>,
    pub state: WatchState,
    pub cancel: CancellationToken,
    pub worker: Option<JoinHandle<()>>,
    pub created_at: DateTime<Utc>,
}

impl WatchSession {
    pub fn new(key: ServiceKey, family: AddressFamily) -> Self {
        Self {
            id: SessionId::new(),
            key,
            family,
            subscription: None,
            state: WatchState::Starting,
            cancel: CancellationToken::new(),
            worker: None,
            created_at: Utc::now(),
        }
    }
}

impl Session for WatchSession {
    const KIND: SessionKind = SessionKind::Watch;

    fn id(&self) -> SessionId {
        self.id
    }
}

/// Read-only view of one publication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicationInfo {
    pub key: ServiceKey,
    pub registered_name: Option<String>,
    pub state: PublishState,
    pub port: u16,
    pub created_at: DateTime<Utc>,
}

impl From<&PublishSession> for PublicationInfo {
    fn from(session: &PublishSession) -> Self {
        Self {
            key: session.key(),
            registered_name: session.registered_name.clone(),
            state: session.state,
            port: session.descriptor.port,
            created_at: session.created_at,
        }
    }
}

/// Read-only view of one watch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchInfo {
    pub key: ServiceKey,
    pub family: AddressFamily,
    pub state: WatchState,
    pub created_at: DateTime<Utc>,
}

impl From<&WatchSession> for WatchInfo {
    fn from(session: &WatchSession) -> Self {
        Self {
            key: session.key.clone(),
            family: session.family,
            state: session.state,
            created_at: session.created_at,
        }
    }
}
