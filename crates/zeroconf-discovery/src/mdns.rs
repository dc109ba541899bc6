//! mDNS backend for the discovery platform, built on the `mdns-sd` daemon.
//!
//! The daemon resolves services on its own as part of browsing. Browse pumps
//! forward `ServiceFound`/`ServiceRemoved` as [`BrowseEvent`]s and stash
//! every `ServiceResolved` in a shared cache; [`MdnsPlatform::resolve`] waits
//! on that cache until the configured deadline.

use async_trait::async_trait;
use dashmap::DashMap;
use mdns_sd::{ServiceDaemon, ServiceEvent as MdnsEvent, ServiceInfo, UnregisterStatus};
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeroconf_core::types::{AddressFamily, DiscoveredRecord, ServiceDescriptor, ServiceKey};
use zeroconf_core::DiscoveryConfig;

use crate::error::{DiscoveryError, PlatformOperation, Result};
use crate::platform::{
    BrowseEvent, DiscoveryPlatform, PlatformFactory, Subscription, SubscriptionId,
};

/// Connection details reported by the daemon for one instance.
#[derive(Debug, Clone, PartialEq)]
struct ResolvedEntry {
    hostname: String,
    port: u16,
    addresses: Vec<IpAddr>,
    attributes: BTreeMap<String, Vec<u8>>,
}

impl ResolvedEntry {
    fn from_info(info: &ServiceInfo) -> Self {
        let mut addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
        addresses.sort();

        let attributes = info
            .get_properties()
            .iter()
            .map(|prop| {
                (
                    prop.key().to_string(),
                    prop.val().map(<[u8]>::to_vec).unwrap_or_default(),
                )
            })
            .collect();

        Self {
            hostname: info.get_hostname().trim_end_matches('.').to_string(),
            port: info.get_port(),
            addresses,
            attributes,
        }
    }

    fn into_record(self, unresolved: &DiscoveredRecord, family: AddressFamily) -> DiscoveredRecord {
        let host = match family.select(&self.addresses) {
            Some(ip) => format!("{}/{}", self.hostname, ip),
            None => self.hostname.clone(),
        };

        DiscoveredRecord {
            domain: unresolved.domain.clone(),
            name: unresolved.name.clone(),
            service_type: unresolved.service_type.clone(),
            host: Some(host),
            port: self.port,
            addresses: self
                .addresses
                .into_iter()
                .filter(|addr| family.accepts(addr))
                .collect(),
            attributes: self.attributes,
        }
    }
}

#[derive(Default)]
struct ResolveCache {
    entries: DashMap<String, ResolvedEntry>,
    updated: Notify,
}

impl ResolveCache {
    /// Drops every cached instance of `ty_domain`.
    fn evict_type(&self, ty_domain: &str) {
        let suffix = format!(".{}", ty_domain);
        self.entries.retain(|fullname, _| !fullname.ends_with(&suffix));
    }
}

struct BrowseHandle {
    ty_domain: String,
    cancel: CancellationToken,
}

/// [`DiscoveryPlatform`] over a local mDNS daemon.
pub struct MdnsPlatform {
    daemon: ServiceDaemon,
    cache: Arc<ResolveCache>,
    publications: DashMap<ServiceKey, String>,
    subscriptions: DashMap<SubscriptionId, BrowseHandle>,
    resolve_timeout: Duration,
    event_capacity: usize,
}

impl MdnsPlatform {
    pub fn new(config: &DiscoveryConfig) -> Result<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| {
            DiscoveryError::collaborator(PlatformOperation::Discover, "daemon_init", e.to_string())
        })?;

        info!(
            resolve_timeout_secs = config.resolve_timeout_secs,
            "mDNS daemon started"
        );

        Ok(Self {
            daemon,
            cache: Arc::new(ResolveCache::default()),
            publications: DashMap::new(),
            subscriptions: DashMap::new(),
            resolve_timeout: config.resolve_timeout(),
            event_capacity: config.event_channel_capacity,
        })
    }
}

#[async_trait]
impl DiscoveryPlatform for MdnsPlatform {
    async fn advertise(
        &self,
        descriptor: &ServiceDescriptor,
        hostname: Option<&str>,
    ) -> Result<String> {
        let ty_domain = ty_domain(&descriptor.service_type, &descriptor.domain);
        let host_name = host_name(hostname.unwrap_or(&descriptor.name), &descriptor.domain);
        let properties: HashMap<String, String> = descriptor
            .txt_record
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        // Any lets the daemon track every interface address; a specific
        // family pins the advertisement to that family's current addresses.
        let info = match descriptor.address_family {
            AddressFamily::Any => ServiceInfo::new(
                &ty_domain,
                &descriptor.name,
                &host_name,
                "",
                descriptor.port,
                properties,
            )
            .map_err(|e| mdns_failure(PlatformOperation::Advertise, e))?
            .enable_addr_auto(),
            family => {
                let addresses = interface_addresses(family)?;
                ServiceInfo::new(
                    &ty_domain,
                    &descriptor.name,
                    &host_name,
                    addresses.as_str(),
                    descriptor.port,
                    properties,
                )
                .map_err(|e| mdns_failure(PlatformOperation::Advertise, e))?
            }
        };

        let fullname = info.get_fullname().to_string();
        self.daemon
            .register(info)
            .map_err(|e| mdns_failure(PlatformOperation::Advertise, e))?;

        debug!(
            fullname = %fullname,
            host = %host_name,
            family = %descriptor.address_family,
            "Service advertised"
        );
        self.publications.insert(descriptor.key(), fullname);
        Ok(descriptor.name.clone())
    }

    async fn withdraw(&self, key: &ServiceKey) -> Result<()> {
        let (_, fullname) = self.publications.remove(key).ok_or_else(|| {
            DiscoveryError::collaborator(
                PlatformOperation::Withdraw,
                "not_advertised",
                format!("{} is not advertised", key),
            )
        })?;

        let status = self
            .daemon
            .unregister(&fullname)
            .map_err(|e| mdns_failure(PlatformOperation::Withdraw, e))?;

        match status.recv_async().await {
            Ok(UnregisterStatus::OK) => {
                debug!(fullname = %fullname, "Service withdrawn");
                Ok(())
            }
            Ok(UnregisterStatus::NotFound) => Err(DiscoveryError::collaborator(
                PlatformOperation::Withdraw,
                "not_found",
                format!("daemon does not know {}", fullname),
            )),
            Err(e) => Err(DiscoveryError::collaborator(
                PlatformOperation::Withdraw,
                "daemon_closed",
                e.to_string(),
            )),
        }
    }

    async fn discover(
        &self,
        service_type: &str,
        domain: &str,
        _family: AddressFamily,
    ) -> Result<Subscription> {
        let ty_domain = ty_domain(service_type, domain);
        let receiver = self
            .daemon
            .browse(&ty_domain)
            .map_err(|e| mdns_failure(PlatformOperation::Discover, e))?;

        let (tx, rx) = async_channel::bounded(self.event_capacity);
        let id = SubscriptionId::new();
        let cancel = CancellationToken::new();
        self.subscriptions.insert(
            id,
            BrowseHandle {
                ty_domain: ty_domain.clone(),
                cancel: cancel.clone(),
            },
        );

        let cache = Arc::clone(&self.cache);
        let domain = domain.to_string();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = receiver.recv_async() => event,
                };

                let forward = match event {
                    Ok(MdnsEvent::ServiceFound(ty, fullname)) => {
                        debug!(service = %fullname, "Service found");
                        Some(BrowseEvent::Found(unresolved_record(&fullname, &ty, &domain)))
                    }
                    Ok(MdnsEvent::ServiceResolved(info)) => {
                        debug!(
                            service = info.get_fullname(),
                            hostname = info.get_hostname(),
                            port = info.get_port(),
                            "Service resolved"
                        );
                        cache
                            .entries
                            .insert(info.get_fullname().to_string(), ResolvedEntry::from_info(&info));
                        cache.updated.notify_waiters();
                        None
                    }
                    Ok(MdnsEvent::ServiceRemoved(ty, fullname)) => {
                        debug!(service = %fullname, "Service removed");
                        cache.entries.remove(&fullname);
                        Some(BrowseEvent::Lost(unresolved_record(&fullname, &ty, &domain)))
                    }
                    Ok(MdnsEvent::SearchStopped(ty)) => {
                        debug!(ty = %ty, "Search stopped");
                        break;
                    }
                    Ok(other) => {
                        debug!(event = ?other, "Ignoring mDNS event");
                        None
                    }
                    Err(e) => Some(BrowseEvent::Failed {
                        code: "daemon_closed".to_string(),
                        message: e.to_string(),
                    }),
                };

                if let Some(event) = forward {
                    let terminal = matches!(event, BrowseEvent::Failed { .. });
                    if tx.send(event).await.is_err() || terminal {
                        break;
                    }
                }
            }
            debug!(ty = %ty_domain, "Browse pump stopped");
        });

        Ok(Subscription { id, events: rx })
    }

    async fn stop_discovery(&self, subscription: SubscriptionId) -> Result<()> {
        let (_, handle) = self.subscriptions.remove(&subscription).ok_or_else(|| {
            DiscoveryError::collaborator(
                PlatformOperation::StopDiscovery,
                "unknown_subscription",
                format!("no subscription {}", subscription),
            )
        })?;

        handle.cancel.cancel();
        self.cache.evict_type(&handle.ty_domain);
        self.daemon
            .stop_browse(&handle.ty_domain)
            .map_err(|e| mdns_failure(PlatformOperation::StopDiscovery, e))
    }

    async fn resolve(
        &self,
        record: &DiscoveredRecord,
        family: AddressFamily,
    ) -> Result<DiscoveredRecord> {
        let fullname = format!("{}.{}", record.name, record.service_type);
        let deadline = tokio::time::Instant::now() + self.resolve_timeout;

        loop {
            let updated = self.cache.updated.notified();
            tokio::pin!(updated);
            updated.as_mut().enable();

            if let Some(entry) = self.cache.entries.get(&fullname) {
                return Ok(entry.clone().into_record(record, family));
            }

            if tokio::time::timeout_at(deadline, updated).await.is_err() {
                return Err(DiscoveryError::collaborator(
                    PlatformOperation::Resolve,
                    "timeout",
                    format!(
                        "{} not resolved within {}s",
                        fullname,
                        self.resolve_timeout.as_secs()
                    ),
                ));
            }
        }
    }

    async fn shutdown(&self) -> Result<()> {
        for entry in self.subscriptions.iter() {
            entry.cancel.cancel();
        }
        self.subscriptions.clear();
        self.publications.clear();

        self.daemon
            .shutdown()
            .map(|_| ())
            .map_err(|e| mdns_failure(PlatformOperation::Shutdown, e))?;
        info!("mDNS daemon shut down");
        Ok(())
    }
}

/// Builds a fresh [`MdnsPlatform`] on every call.
#[derive(Debug, Clone)]
pub struct MdnsPlatformFactory {
    config: DiscoveryConfig,
}

impl MdnsPlatformFactory {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }
}

impl PlatformFactory for MdnsPlatformFactory {
    fn create(&self) -> Result<Arc<dyn DiscoveryPlatform>> {
        Ok(Arc::new(MdnsPlatform::new(&self.config)?))
    }
}

fn mdns_failure(operation: PlatformOperation, err: mdns_sd::Error) -> DiscoveryError {
    DiscoveryError::collaborator(operation, "mdns", err.to_string())
}

/// `("_http._tcp.", "local.")` → `"_http._tcp.local."`.
fn ty_domain(service_type: &str, domain: &str) -> String {
    if service_type.ends_with(domain) {
        service_type.to_string()
    } else {
        format!("{}{}", service_type, domain)
    }
}

/// Fully qualified host name for an advertisement.
fn host_name(host: &str, domain: &str) -> String {
    let host = host.trim_end_matches('.');
    let bare_domain = domain.trim_end_matches('.');
    if host.ends_with(&format!(".{}", bare_domain)) {
        format!("{}.", host)
    } else {
        format!("{}.{}", host, domain)
    }
}

/// Non-loopback interface addresses of `family`, comma separated as
/// `ServiceInfo::new` accepts them.
fn interface_addresses(family: AddressFamily) -> Result<String> {
    let interfaces = if_addrs::get_if_addrs().map_err(|e| {
        DiscoveryError::collaborator(PlatformOperation::Advertise, "interfaces", e.to_string())
    })?;
    let addresses: Vec<IpAddr> = interfaces
        .iter()
        .filter(|interface| !interface.is_loopback())
        .map(|interface| interface.ip())
        .collect();

    join_addresses(family, &addresses).ok_or_else(|| {
        DiscoveryError::collaborator(
            PlatformOperation::Advertise,
            "no_address",
            format!("no {} interface address to advertise on", family),
        )
    })
}

fn join_addresses(family: AddressFamily, addresses: &[IpAddr]) -> Option<String> {
    let selected: Vec<String> = addresses
        .iter()
        .filter(|addr| family.accepts(addr))
        .map(IpAddr::to_string)
        .collect();
    if selected.is_empty() {
        None
    } else {
        Some(selected.join(","))
    }
}

fn unresolved_record(fullname: &str, ty_domain: &str, domain: &str) -> DiscoveredRecord {
    let name = fullname
        .strip_suffix(ty_domain)
        .and_then(|prefix| prefix.strip_suffix('.'))
        .unwrap_or(fullname);
    DiscoveredRecord::unresolved(domain, name, ty_domain)
}
