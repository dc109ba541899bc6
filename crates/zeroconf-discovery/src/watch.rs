//! Per-watch worker.
//!
//! One task per watch consumes the platform's browse events, de-duplicates
//! them by identity, feeds the [`ResolutionQueue`] and issues resolves one at
//! a time. It is the only writer of its queue and the only holder of the
//! caller's event sink, so nothing here needs a lock.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeroconf_core::types::{
    AddressFamily, DiscoveredRecord, ServiceKey, SessionId, WatchAction, WatchEvent,
};

use crate::error::{DiscoveryError, PlatformOperation, Result};
use crate::platform::{BrowseEvent, DiscoveryPlatform};
use crate::queue::{ResolutionQueue, ResolveDisposition};
use crate::registry::Registry;
use crate::session::WatchState;
use crate::sink::Callback;
use crate::translate::translate;

type ResolveTask = (ServiceKey, JoinHandle<Result<DiscoveredRecord>>);

/// Everything a watch worker needs; consumed by [`WatchWorker::run`].
pub(crate) struct WatchWorker {
    pub key: ServiceKey,
    pub session_id: SessionId,
    pub family: AddressFamily,
    pub suffix: String,
    pub settle_delay: Duration,
    pub queue_capacity: Option<usize>,
    pub platform: Arc<dyn DiscoveryPlatform>,
    pub registry: Arc<Registry>,
    pub events: async_channel::Receiver<BrowseEvent>,
    pub cancel: CancellationToken,
    pub callback: Callback,
}

impl WatchWorker {
    pub(crate) async fn run(self) {
        let WatchWorker {
            key,
            session_id,
            family,
            suffix,
            settle_delay,
            queue_capacity,
            platform,
            registry,
            events,
            cancel,
            callback,
        } = self;

        let mut queue = ResolutionQueue::new(queue_capacity);
        let mut present: HashSet<ServiceKey> = HashSet::new();
        let mut in_flight: Option<ResolveTask> = None;
        let mut settle: Option<Pin<Box<Sleep>>> = None;

        debug!(watch = %key, session = %session_id, "Watch worker started");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(watch = %key, "Watch worker cancelled");
                    break;
                }

                (identity, outcome) = wait_resolve(&mut in_flight) => {
                    in_flight = None;
                    match outcome {
                        Ok(resolved) => {
                            if queue.on_resolve_complete(&identity) == ResolveDisposition::Deliver {
                                callback.event(&WatchEvent::new(
                                    WatchAction::Resolved,
                                    translate(&resolved, &suffix),
                                ));
                            } else {
                                debug!(watch = %key, service = %identity, "Discarding resolve for lost service");
                            }
                        }
                        Err(e) => {
                            queue.on_resolve_complete(&identity);
                            warn!(watch = %key, service = %identity, error = %e, "Resolve failed");
                        }
                    }

                    if settle_delay.is_zero() {
                        in_flight = queue
                            .on_settled()
                            .map(|next| spawn_resolve(&platform, next, family));
                    } else {
                        settle = Some(Box::pin(tokio::time::sleep(settle_delay)));
                    }
                }

                _ = wait_settle(&mut settle) => {
                    settle = None;
                    in_flight = queue
                        .on_settled()
                        .map(|next| spawn_resolve(&platform, next, family));
                }

                event = events.recv() => match event {
                    Ok(BrowseEvent::Found(record)) => {
                        let identity = record.identity();
                        if !present.insert(identity.clone()) {
                            debug!(watch = %key, service = %identity, "Duplicate found, ignoring");
                            continue;
                        }

                        callback.event(&WatchEvent::new(
                            WatchAction::Added,
                            translate(&record, &suffix),
                        ));
                        if let Some(record) = queue.on_found(record) {
                            in_flight = Some(spawn_resolve(&platform, record, family));
                        }
                    }
                    Ok(BrowseEvent::Lost(record)) => {
                        let identity = record.identity();
                        if !present.remove(&identity) {
                            debug!(watch = %key, service = %identity, "Lost for unknown service, ignoring");
                            continue;
                        }

                        queue.on_lost(&identity);
                        callback.event(&WatchEvent::new(
                            WatchAction::Removed,
                            translate(&record, &suffix),
                        ));
                    }
                    Ok(BrowseEvent::Failed { code, message }) => {
                        warn!(watch = %key, code = %code, message = %message, "Discovery failed");
                        if retire(&registry, &platform, &key, session_id).await {
                            callback.error(&DiscoveryError::collaborator(
                                PlatformOperation::Discover,
                                code,
                                message,
                            ));
                        }
                        break;
                    }
                    Err(_) => {
                        info!(watch = %key, "Browse subscription ended");
                        if retire(&registry, &platform, &key, session_id).await {
                            callback.error(&DiscoveryError::collaborator(
                                PlatformOperation::Discover,
                                "subscription_closed",
                                format!("browse for {} ended", key),
                            ));
                        }
                        break;
                    }
                },
            }
        }

        if let Some((identity, _)) = in_flight {
            debug!(watch = %key, service = %identity, "Abandoning in-flight resolve");
        }
    }
}

/// Removes this worker's session after the platform ended its subscription
/// and stops that subscription. Returns false when the session was already
/// taken by another teardown path, which then owns the cleanup.
async fn retire(
    registry: &Registry,
    platform: &Arc<dyn DiscoveryPlatform>,
    key: &ServiceKey,
    session_id: SessionId,
) -> bool {
    let Some(mut session) = registry.watches(|table| table.remove_if(key, session_id)) else {
        return false;
    };
    session.state = WatchState::DiscoveryFailed;
    session.cancel.cancel();

    // Without a subscription id the manager is still installing the watch
    // and stops the subscription itself once it finds the session gone.
    if let Some(subscription) = session.subscription {
        if let Err(e) = platform.stop_discovery(subscription).await {
            warn!(watch = %key, error = %e, "Failed to stop discovery");
        }
    }
    debug!(watch = %key, state = ?session.state, "Watch retired");
    true
}

fn spawn_resolve(
    platform: &Arc<dyn DiscoveryPlatform>,
    record: DiscoveredRecord,
    family: AddressFamily,
) -> ResolveTask {
    let platform = Arc::clone(platform);
    let identity = record.identity();
    debug!(service = %identity, "Resolving service");
    let task = tokio::spawn(async move { platform.resolve(&record, family).await });
    (identity, task)
}

async fn wait_resolve(slot: &mut Option<ResolveTask>) -> (ServiceKey, Result<DiscoveredRecord>) {
    let Some((identity, task)) = slot.as_mut() else {
        return std::future::pending().await;
    };

    let outcome = match task.await {
        Ok(outcome) => outcome,
        Err(e) => Err(DiscoveryError::collaborator(
            PlatformOperation::Resolve,
            "task_failed",
            e.to_string(),
        )),
    };
    (identity.clone(), outcome)
}

async fn wait_settle(slot: &mut Option<Pin<Box<Sleep>>>) {
    match slot.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
