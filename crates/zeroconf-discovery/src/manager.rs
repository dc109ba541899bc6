//! Discovery session manager.
//!
//! Every operation is dispatched onto the tokio runtime captured at
//! construction and returns a [`JoinHandle`] that completes after the
//! operation's terminal delivery. Operations hold a read guard on the current
//! platform for their whole duration; [`SessionManager::reinitialize`] and
//! [`SessionManager::shutdown`] take the write guard, so they wait for every
//! in-flight operation before tearing the platform down.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zeroconf_core::config::{BridgeConfig, HostnameConfig};
use zeroconf_core::types::{AddressFamily, RegisterOutcome, ServiceDescriptor, ServiceKey};
use zeroconf_core::{ConfigError, DiscoveryConfig};

use crate::error::{DiscoveryError, PlatformOperation, Result};
use crate::hostname::{derive_hostname, HostnameSource, SystemHostname};
use crate::platform::{DiscoveryPlatform, PlatformFactory};
use crate::registry::Registry;
use crate::session::{
    PublicationInfo, PublishSession, PublishState, WatchInfo, WatchSession, WatchState,
};
use crate::sink::Callback;
use crate::watch::WatchWorker;

/// The live platform handle and the hostname derived alongside it.
struct Runtime {
    platform: Arc<dyn DiscoveryPlatform>,
    hostname: Option<String>,
}

/// Point-in-time view of the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStatus {
    pub initialized: bool,
    pub hostname: Option<String>,
    pub publications: Vec<PublicationInfo>,
    pub watches: Vec<WatchInfo>,
}

struct Inner {
    config: DiscoveryConfig,
    hostname_config: HostnameConfig,
    hostname_source: Arc<dyn HostnameSource>,
    factory: Arc<dyn PlatformFactory>,
    registry: Arc<Registry>,
    runtime: RwLock<Option<Runtime>>,
    handle: Handle,
}

/// Tracks publications and watches against a discovery platform.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Creates a manager using the system hostname.
    ///
    /// Must be called from within a tokio runtime; operations are spawned
    /// onto that runtime.
    pub fn new(config: &BridgeConfig, factory: Arc<dyn PlatformFactory>) -> Result<Self> {
        let source = Arc::new(SystemHostname::new(&config.hostname));
        Self::with_hostname_source(config, factory, source)
    }

    /// Creates a manager with a custom hostname source.
    pub fn with_hostname_source(
        config: &BridgeConfig,
        factory: Arc<dyn PlatformFactory>,
        hostname_source: Arc<dyn HostnameSource>,
    ) -> Result<Self> {
        config
            .discovery
            .validate()
            .map_err(|reason| DiscoveryError::Config(ConfigError::validation_failed(reason)))?;

        let handle = Handle::try_current().map_err(|e| {
            DiscoveryError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
        })?;

        let mut inner = Inner {
            config: config.discovery.clone(),
            hostname_config: config.hostname.clone(),
            hostname_source,
            factory,
            registry: Arc::new(Registry::new()),
            runtime: RwLock::new(None),
            handle,
        };

        let runtime = inner.build_runtime()?;
        info!(
            hostname = runtime.hostname.as_deref().unwrap_or("<unavailable>"),
            domain = %inner.config.domain_suffix,
            "Discovery session manager started"
        );
        inner.runtime = RwLock::new(Some(runtime));

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Reports the local hostname.
    pub fn get_hostname(&self, callback: Callback) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        self.inner.handle.spawn(async move {
            callback.finish(inner.hostname().await.map(Some));
        })
    }

    /// The local hostname, or `HostnameUnavailable`.
    pub async fn hostname(&self) -> Result<String> {
        self.inner.hostname().await
    }

    /// Advertises `descriptor`. Replies `{action: "registered", service}`.
    pub fn register(&self, descriptor: ServiceDescriptor, callback: Callback) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        self.inner.handle.spawn(async move {
            callback.finish(inner.register(descriptor).await.map(Some));
        })
    }

    /// Withdraws the publication for (`service_type`, `domain`, `name`).
    pub fn unregister(
        &self,
        service_type: &str,
        domain: &str,
        name: &str,
        callback: Callback,
    ) -> JoinHandle<()> {
        let key = self.inner.key(service_type, domain, name);
        let inner = Arc::clone(&self.inner);
        self.inner.handle.spawn(async move {
            callback.finish::<()>(inner.unregister(key).await.map(|_| None));
        })
    }

    /// Withdraws every publication.
    pub fn stop(&self, callback: Callback) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        self.inner.handle.spawn(async move {
            callback.finish::<()>(inner.stop().await.map(|_| None));
        })
    }

    /// Starts watching `service_type` in `domain`.
    ///
    /// The callback is acknowledged immediately and then receives a
    /// `{action, service}` event per transition until the watch ends. A
    /// failed subscription ends the stream with one error.
    pub fn watch(
        &self,
        service_type: &str,
        domain: &str,
        family: AddressFamily,
        callback: Callback,
    ) -> JoinHandle<()> {
        let key = self.inner.key(service_type, domain, "");
        let inner = Arc::clone(&self.inner);
        callback.ack();
        self.inner
            .handle
            .spawn(async move { inner.watch(key, family, callback).await })
    }

    /// Stops the watch for (`service_type`, `domain`).
    pub fn unwatch(&self, service_type: &str, domain: &str, callback: Callback) -> JoinHandle<()> {
        let key = self.inner.key(service_type, domain, "");
        let inner = Arc::clone(&self.inner);
        self.inner.handle.spawn(async move {
            callback.finish::<()>(inner.unwatch(key).await.map(|_| None));
        })
    }

    /// Stops every watch.
    pub fn close(&self, callback: Callback) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        self.inner.handle.spawn(async move {
            callback.finish::<()>(inner.close().await.map(|_| None));
        })
    }

    /// Tears everything down and rebuilds the platform.
    pub fn reinitialize(&self, callback: Callback) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        self.inner.handle.spawn(async move {
            callback.finish::<()>(inner.reinitialize().await.map(|_| None));
        })
    }

    /// Tears everything down without rebuilding. Later operations fail with
    /// `NotInitialized` until [`SessionManager::reinitialize`] succeeds.
    pub fn shutdown(&self, callback: Callback) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        self.inner.handle.spawn(async move {
            inner.shutdown().await;
            callback.success();
        })
    }

    pub async fn status(&self) -> ManagerStatus {
        let guard = self.inner.runtime.read().await;
        let (publications, watches) = self.inner.registry.snapshot();
        ManagerStatus {
            initialized: guard.is_some(),
            hostname: guard.as_ref().and_then(|rt| rt.hostname.clone()),
            publications,
            watches,
        }
    }
}

impl Inner {
    /// Builds a key, defaulting an empty domain to the configured suffix.
    fn key(&self, service_type: &str, domain: &str, name: &str) -> ServiceKey {
        ServiceKey::new(self.domain_or_default(domain), name, service_type)
    }

    fn domain_or_default(&self, domain: &str) -> String {
        if domain.trim().is_empty() {
            self.config.domain_suffix.clone()
        } else {
            domain.to_string()
        }
    }

    fn build_runtime(&self) -> Result<Runtime> {
        let platform = self.factory.create()?;
        let hostname = match derive_hostname(
            self.hostname_source.as_ref(),
            &self.hostname_config.prefix,
        ) {
            Ok(hostname) => Some(hostname),
            Err(e) => {
                warn!(error = %e, "No local hostname available");
                None
            }
        };

        Ok(Runtime { platform, hostname })
    }

    async fn hostname(&self) -> Result<String> {
        let guard = self.runtime.read().await;
        let runtime = guard.as_ref().ok_or(DiscoveryError::NotInitialized)?;
        runtime.hostname.clone().ok_or_else(|| {
            DiscoveryError::HostnameUnavailable(
                "system hostname is empty and no installation id is available".to_string(),
            )
        })
    }

    async fn register(&self, mut descriptor: ServiceDescriptor) -> Result<RegisterOutcome> {
        let guard = self.runtime.read().await;
        let runtime = guard.as_ref().ok_or(DiscoveryError::NotInitialized)?;

        descriptor.domain = self.domain_or_default(&descriptor.domain);
        descriptor.validate()?;

        let key = descriptor.key();
        let session = PublishSession::new(descriptor.clone());
        let session_id = session.id;
        self.registry.put_publication(session)?;

        debug!(service = %key, port = descriptor.port, "Advertising service");
        match runtime
            .platform
            .advertise(&descriptor, runtime.hostname.as_deref())
            .await
        {
            Ok(registered_name) => {
                let promoted = self.registry.publications(|table| {
                    let pending = table.get(&key).map_or(false, |session| {
                        session.id == session_id && session.state == PublishState::Registering
                    });
                    if pending {
                        if let Some(session) = table.get_mut(&key) {
                            session.mark_registered(registered_name.clone());
                        }
                    }
                    pending
                });

                if !promoted {
                    // Unregistered or stopped while advertise was in flight.
                    debug!(service = %key, "Withdrawing publication cancelled during registration");
                    if let Err(e) = runtime.platform.withdraw(&key).await {
                        warn!(service = %key, error = %e, "Failed to withdraw service");
                    }
                    self.registry
                        .publications(|table| table.remove_if(&key, session_id));
                    return Err(DiscoveryError::collaborator(
                        PlatformOperation::Advertise,
                        "withdrawn",
                        format!("{} was unregistered during registration", key),
                    ));
                }

                info!(service = %key, registered_name = %registered_name, "Service registered");
                Ok(RegisterOutcome::registered(registered_name))
            }
            Err(e) => {
                if let Some(mut session) = self
                    .registry
                    .publications(|table| table.remove_if(&key, session_id))
                {
                    session.mark_failed();
                }
                warn!(service = %key, error = %e, "Failed to register service");
                Err(e)
            }
        }
    }

    async fn unregister(&self, key: ServiceKey) -> Result<()> {
        let guard = self.runtime.read().await;
        let runtime = guard.as_ref().ok_or(DiscoveryError::NotInitialized)?;

        let Some(mut session) = self.registry.take_publication(&key)? else {
            info!(service = %key, "Unregistered while registering, withdrawal deferred");
            return Ok(());
        };
        session.state = PublishState::Unregistering;

        runtime.platform.withdraw(&key).await?;
        session.state = PublishState::Unregistered;
        info!(service = %key, "Service unregistered");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let guard = self.runtime.read().await;
        let runtime = guard.as_ref().ok_or(DiscoveryError::NotInitialized)?;
        self.withdraw_all(&runtime.platform).await;
        Ok(())
    }

    /// Drains the publish namespace and withdraws each entry exactly once.
    async fn withdraw_all(&self, platform: &Arc<dyn DiscoveryPlatform>) {
        let sessions = self.registry.take_publications();
        if sessions.is_empty() {
            return;
        }

        let count = sessions.len();
        let results = join_all(sessions.into_iter().map(|session| async move {
            let key = session.key();
            let result = platform.withdraw(&key).await;
            (key, result)
        }))
        .await;

        for (key, result) in results {
            if let Err(e) = result {
                warn!(service = %key, error = %e, "Failed to withdraw service");
            }
        }
        info!(count, "Withdrew all publications");
    }

    async fn watch(&self, key: ServiceKey, family: AddressFamily, callback: Callback) {
        let guard = self.runtime.read().await;
        let Some(runtime) = guard.as_ref() else {
            callback.error(&DiscoveryError::NotInitialized);
            return;
        };

        let session = WatchSession::new(key.clone(), family);
        let session_id = session.id;
        let cancel = session.cancel.clone();
        if let Err(e) = self.registry.put_watch(session) {
            callback.error(&e);
            return;
        }

        let subscription = match runtime
            .platform
            .discover(&key.service_type, &key.domain, family)
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                self.registry.watches(|table| table.remove_if(&key, session_id));
                warn!(watch = %key, error = %e, "Failed to start discovery");
                callback.error(&e);
                return;
            }
        };

        let subscription_id = subscription.id;
        let worker = WatchWorker {
            key: key.clone(),
            session_id,
            family,
            suffix: self.config.domain_suffix.clone(),
            settle_delay: self.config.settle_delay(),
            queue_capacity: self.config.resolve_queue_capacity,
            platform: Arc::clone(&runtime.platform),
            registry: Arc::clone(&self.registry),
            events: subscription.events,
            cancel: cancel.clone(),
            callback,
        };
        let worker = self.handle.spawn(worker.run());

        let installed = self.registry.watches(|table| match table.get_mut(&key) {
            Some(session) if session.id == session_id => {
                session.subscription = Some(subscription_id);
                session.state = WatchState::Watching;
                session.worker = Some(worker);
                true
            }
            _ => false,
        });

        if installed {
            info!(watch = %key, family = %family, "Watching for services");
            return;
        }

        // Unwatched while the subscription was starting.
        debug!(watch = %key, "Watch removed during startup, stopping discovery");
        cancel.cancel();
        if let Err(e) = runtime.platform.stop_discovery(subscription_id).await {
            warn!(watch = %key, error = %e, "Failed to stop discovery");
        }
    }

    async fn unwatch(&self, key: ServiceKey) -> Result<()> {
        let guard = self.runtime.read().await;
        let runtime = guard.as_ref().ok_or(DiscoveryError::NotInitialized)?;

        let session = self.registry.remove_watch(&key)?;
        stop_watch(&runtime.platform, session).await?;
        info!(watch = %key, "Watch stopped");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let guard = self.runtime.read().await;
        let runtime = guard.as_ref().ok_or(DiscoveryError::NotInitialized)?;
        self.stop_all_watches(&runtime.platform).await;
        Ok(())
    }

    async fn stop_all_watches(&self, platform: &Arc<dyn DiscoveryPlatform>) {
        let sessions = self.registry.remove_all_watches();
        if sessions.is_empty() {
            return;
        }

        let count = sessions.len();
        let results = join_all(sessions.into_iter().map(|session| async move {
            let key = session.key.clone();
            (key, stop_watch(platform, session).await)
        }))
        .await;

        for (key, result) in results {
            if let Err(e) = result {
                warn!(watch = %key, error = %e, "Failed to stop watch");
            }
        }
        info!(count, "Stopped all watches");
    }

    async fn teardown(&self, runtime: &Runtime) {
        self.withdraw_all(&runtime.platform).await;
        self.stop_all_watches(&runtime.platform).await;
        if let Err(e) = runtime.platform.shutdown().await {
            warn!(error = %e, "Platform shutdown failed");
        }
    }

    async fn reinitialize(&self) -> Result<()> {
        let mut guard = self.runtime.write().await;
        if let Some(previous) = guard.take() {
            self.teardown(&previous).await;
        }

        let runtime = self.build_runtime()?;
        info!(
            hostname = runtime.hostname.as_deref().unwrap_or("<unavailable>"),
            "Discovery session manager reinitialized"
        );
        *guard = Some(runtime);
        Ok(())
    }

    async fn shutdown(&self) {
        let mut guard = self.runtime.write().await;
        match guard.take() {
            Some(runtime) => {
                self.teardown(&runtime).await;
                info!("Discovery session manager shut down");
            }
            None => debug!("Discovery session manager already shut down"),
        }
    }
}

/// Cancels a watch worker, stops its subscription and waits for the worker
/// to exit so the caller's sink receives nothing further.
async fn stop_watch(platform: &Arc<dyn DiscoveryPlatform>, mut session: WatchSession) -> Result<()> {
    session.state = WatchState::Unwatching;
    session.cancel.cancel();

    let stopped = match session.subscription {
        Some(subscription) => platform.stop_discovery(subscription).await,
        None => Ok(()),
    };

    if let Some(worker) = session.worker.take() {
        if let Err(e) = worker.await {
            warn!(watch = %session.key, error = %e, "Watch worker ended abnormally");
        }
    }

    session.state = WatchState::Stopped;
    stopped
}
