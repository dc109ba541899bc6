//! Common test utilities: a scripted in-memory discovery platform

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use zeroconf_core::config::BridgeConfig;
use zeroconf_core::types::{AddressFamily, DiscoveredRecord, ServiceDescriptor, ServiceKey};
use zeroconf_discovery::{
    BrowseEvent, Callback, ChannelSink, Delivery, DiscoveryError, DiscoveryPlatform,
    HostnameSource, PlatformFactory, PlatformOperation, Result, SessionManager, Subscription,
    SubscriptionId,
};

/// One call the manager made on the platform.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Advertise(ServiceKey),
    Withdraw(ServiceKey),
    Discover(String),
    StopDiscovery(SubscriptionId),
    Resolve(String),
    Shutdown,
}

/// A resolve waiting for the test to answer it.
pub struct PendingResolve {
    pub record: DiscoveredRecord,
    pub started_at: Instant,
    reply: oneshot::Sender<Result<DiscoveredRecord>>,
}

impl PendingResolve {
    /// Answers with a resolved copy of the record.
    pub fn complete(self) {
        let resolved = resolved(&self.record);
        let _ = self.reply.send(Ok(resolved));
    }

    pub fn fail(self) {
        let _ = self.reply.send(Err(DiscoveryError::collaborator(
            PlatformOperation::Resolve,
            "3",
            "resolve rejected",
        )));
    }
}

/// The record a completed resolve reports.
pub fn resolved(record: &DiscoveredRecord) -> DiscoveredRecord {
    let mut resolved = record.clone();
    resolved.host = Some(format!("{}.local/10.0.0.7", record.name));
    resolved.port = 8080;
    resolved
        .attributes
        .insert("path".to_string(), b"/".to_vec());
    resolved
}

/// Unresolved record as the platform reports it on found/lost.
pub fn record(name: &str) -> DiscoveredRecord {
    DiscoveredRecord::unresolved("local.", name, "_http._tcp.local.")
}

#[derive(Default)]
pub struct FakePlatform {
    calls: Mutex<Vec<Call>>,
    browsers: Mutex<HashMap<SubscriptionId, (String, async_channel::Sender<BrowseEvent>)>>,
    resolves: Mutex<VecDeque<PendingResolve>>,
    resolve_arrived: Notify,
    resolving: AtomicUsize,
    max_resolving: AtomicUsize,
    advertised: Mutex<HashSet<ServiceKey>>,
    advertise_gate: Mutex<Option<oneshot::Receiver<()>>>,
    advertise_arrived: Notify,
    pub fail_advertise: AtomicBool,
    pub fail_withdraw: AtomicBool,
    pub fail_discover: AtomicBool,
}

impl FakePlatform {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| matches(call)).count()
    }

    pub fn resolved_names(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Resolve(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn max_concurrent_resolves(&self) -> usize {
        self.max_resolving.load(Ordering::SeqCst)
    }

    pub fn active_browsers(&self) -> usize {
        self.browsers.lock().len()
    }

    /// Pushes a browse event to every subscription for `service_type`.
    pub async fn emit(&self, service_type: &str, event: BrowseEvent) {
        let senders: Vec<_> = self
            .browsers
            .lock()
            .values()
            .filter(|(ty, _)| ty == service_type)
            .map(|(_, tx)| tx.clone())
            .collect();
        assert!(!senders.is_empty(), "no subscription for {}", service_type);
        for tx in senders {
            tx.send(event.clone()).await.expect("subscription closed");
        }
    }

    /// Waits until the manager issues its next resolve.
    pub async fn next_resolve(&self) -> PendingResolve {
        loop {
            let arrived = self.resolve_arrived.notified();
            if let Some(pending) = self.resolves.lock().pop_front() {
                return pending;
            }
            arrived.await;
        }
    }

    pub fn pending_resolves(&self) -> usize {
        self.resolves.lock().len()
    }

    /// Closes every subscription for `service_type` from the platform side.
    pub fn close_browse(&self, service_type: &str) {
        for (ty, tx) in self.browsers.lock().values() {
            if ty == service_type {
                tx.close();
            }
        }
    }

    /// Makes the next advertise wait until the returned sender fires.
    pub fn hold_advertise(&self) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        *self.advertise_gate.lock() = Some(gate);
        release
    }

    /// Waits until at least `count` advertise calls have been made.
    pub async fn wait_for_advertise(&self, count: usize) {
        loop {
            let arrived = self.advertise_arrived.notified();
            if self.count(|call| matches!(call, Call::Advertise(_))) >= count {
                return;
            }
            arrived.await;
        }
    }

    /// Keys the platform is currently advertising.
    pub fn advertised(&self) -> Vec<ServiceKey> {
        self.advertised.lock().iter().cloned().collect()
    }
}

#[async_trait]
impl DiscoveryPlatform for FakePlatform {
    async fn advertise(
        &self,
        descriptor: &ServiceDescriptor,
        _hostname: Option<&str>,
    ) -> Result<String> {
        self.calls.lock().push(Call::Advertise(descriptor.key()));
        self.advertise_arrived.notify_waiters();

        let gate = self.advertise_gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        if self.fail_advertise.load(Ordering::SeqCst) {
            return Err(DiscoveryError::collaborator(
                PlatformOperation::Advertise,
                "0",
                "internal error",
            ));
        }
        self.advertised.lock().insert(descriptor.key());
        Ok(descriptor.name.clone())
    }

    async fn withdraw(&self, key: &ServiceKey) -> Result<()> {
        self.calls.lock().push(Call::Withdraw(key.clone()));
        self.advertised.lock().remove(key);
        if self.fail_withdraw.load(Ordering::SeqCst) {
            return Err(DiscoveryError::collaborator(
                PlatformOperation::Withdraw,
                "0",
                "internal error",
            ));
        }
        Ok(())
    }

    async fn discover(
        &self,
        service_type: &str,
        _domain: &str,
        _family: AddressFamily,
    ) -> Result<Subscription> {
        self.calls
            .lock()
            .push(Call::Discover(service_type.to_string()));
        if self.fail_discover.load(Ordering::SeqCst) {
            return Err(DiscoveryError::collaborator(
                PlatformOperation::Discover,
                "0",
                "internal error",
            ));
        }

        let (tx, rx) = async_channel::unbounded();
        let id = SubscriptionId::new();
        self.browsers
            .lock()
            .insert(id, (service_type.to_string(), tx));
        Ok(Subscription { id, events: rx })
    }

    async fn stop_discovery(&self, subscription: SubscriptionId) -> Result<()> {
        self.calls.lock().push(Call::StopDiscovery(subscription));
        match self.browsers.lock().remove(&subscription) {
            Some(_) => Ok(()),
            None => Err(DiscoveryError::collaborator(
                PlatformOperation::StopDiscovery,
                "unknown_subscription",
                subscription.to_string(),
            )),
        }
    }

    async fn resolve(
        &self,
        record: &DiscoveredRecord,
        _family: AddressFamily,
    ) -> Result<DiscoveredRecord> {
        self.calls.lock().push(Call::Resolve(record.name.clone()));
        let now = self.resolving.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_resolving.fetch_max(now, Ordering::SeqCst);

        let (reply, answer) = oneshot::channel();
        self.resolves.lock().push_back(PendingResolve {
            record: record.clone(),
            started_at: Instant::now(),
            reply,
        });
        self.resolve_arrived.notify_waiters();

        let outcome = answer.await.unwrap_or_else(|_| {
            Err(DiscoveryError::collaborator(
                PlatformOperation::Resolve,
                "dropped",
                "test dropped the resolve",
            ))
        });
        self.resolving.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn shutdown(&self) -> Result<()> {
        self.calls.lock().push(Call::Shutdown);
        self.browsers.lock().clear();
        Ok(())
    }
}

/// Hands out a fresh [`FakePlatform`] per call and remembers each one.
#[derive(Default)]
pub struct FakeFactory {
    created: Mutex<Vec<Arc<FakePlatform>>>,
    pub fail: AtomicBool,
}

impl FakeFactory {
    pub fn latest(&self) -> Arc<FakePlatform> {
        self.created
            .lock()
            .last()
            .cloned()
            .expect("no platform created yet")
    }

    pub fn created(&self) -> usize {
        self.created.lock().len()
    }
}

impl PlatformFactory for FakeFactory {
    fn create(&self) -> Result<Arc<dyn DiscoveryPlatform>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DiscoveryError::collaborator(
                PlatformOperation::Discover,
                "init",
                "discovery service unavailable",
            ));
        }
        let platform = Arc::new(FakePlatform::default());
        self.created.lock().push(Arc::clone(&platform));
        Ok(platform)
    }
}

/// Hostname source with fixed answers.
pub struct FixedHostname {
    pub hostname: Option<String>,
    pub installation_id: Option<String>,
}

impl HostnameSource for FixedHostname {
    fn local_hostname(&self) -> Option<String> {
        self.hostname.clone()
    }

    fn installation_id(&self) -> Option<String> {
        self.installation_id.clone()
    }
}

pub fn config_with_settle(settle: Duration) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.discovery.settle_delay_ms = settle.as_millis() as u64;
    config
}

/// A manager over a [`FakeFactory`] with the default one second settle.
pub fn manager() -> (SessionManager, Arc<FakeFactory>) {
    manager_with(config_with_settle(Duration::from_secs(1)), Some("testhost"))
}

/// Routes manager logs through the test harness; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn manager_with(
    config: BridgeConfig,
    hostname: Option<&str>,
) -> (SessionManager, Arc<FakeFactory>) {
    init_tracing();
    let factory = Arc::new(FakeFactory::default());
    let source = Arc::new(FixedHostname {
        hostname: hostname.map(str::to_string),
        installation_id: Some("0123abcd".to_string()),
    });
    let manager = SessionManager::with_hostname_source(&config, factory.clone(), source)
        .expect("failed to build manager");
    (manager, factory)
}

pub fn descriptor(name: &str) -> ServiceDescriptor {
    ServiceDescriptor::new("_http._tcp.", "local.", name, 8080)
}

/// A callback plus the receiver its deliveries land on.
pub fn callback() -> (Callback, async_channel::Receiver<Delivery>) {
    ChannelSink::callback()
}

/// Receives the next delivery, failing the test if none arrives.
pub async fn next(rx: &async_channel::Receiver<Delivery>) -> Delivery {
    tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("callback channel closed")
}

/// Expects the next delivery to be a watch event and returns (action, name).
pub async fn next_event(rx: &async_channel::Receiver<Delivery>) -> (String, String) {
    match next(rx).await {
        Delivery::Event(value) => (
            value["action"].as_str().unwrap_or_default().to_string(),
            value["service"]["name"].as_str().unwrap_or_default().to_string(),
        ),
        other => panic!("expected event, got {:?}", other),
    }
}

/// Expects a terminal error and returns its code.
pub async fn next_error_code(rx: &async_channel::Receiver<Delivery>) -> String {
    match next(rx).await {
        Delivery::Error(reply) => reply.code,
        other => panic!("expected error, got {:?}", other),
    }
}
