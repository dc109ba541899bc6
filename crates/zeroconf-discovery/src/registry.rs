//! Registry of active publish and watch sessions.
//!
//! Two independent namespaces keyed by [`ServiceKey`]. A key may be live in
//! both namespaces at once, but at most once in each. All access goes
//! through one mutex, which is never held across an `.await`.

use parking_lot::Mutex;
use std::collections::HashMap;
use zeroconf_core::types::{ServiceKey, SessionId};

use crate::error::{DiscoveryError, Result};
use crate::session::{
    PublicationInfo, PublishSession, PublishState, Session, WatchInfo, WatchSession,
};

/// One namespace of sessions.
#[derive(Debug)]
pub struct SessionTable<S> {
    sessions: HashMap<ServiceKey, S>,
}

impl<S: Session> SessionTable<S> {
    fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Inserts `session`; the key must not already be live.
    pub fn put(&mut self, key: ServiceKey, session: S) -> Result<()> {
        if self.sessions.contains_key(&key) {
            return Err(DiscoveryError::DuplicateRegistration { kind: S::KIND, key });
        }
        self.sessions.insert(key, session);
        Ok(())
    }

    pub fn remove(&mut self, key: &ServiceKey) -> Result<S> {
        self.sessions
            .remove(key)
            .ok_or_else(|| DiscoveryError::NotFound {
                kind: S::KIND,
                key: key.clone(),
            })
    }

    /// Removes the entry only if it is still the session `id`.
    ///
    /// Used by workers that must not remove a newer session registered under
    /// the same key after their own was replaced.
    pub fn remove_if(&mut self, key: &ServiceKey, id: SessionId) -> Option<S> {
        match self.sessions.get(key) {
            Some(session) if session.id() == id => self.sessions.remove(key),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: &ServiceKey) -> Option<&mut S> {
        self.sessions.get_mut(key)
    }

    pub fn get(&self, key: &ServiceKey) -> Option<&S> {
        self.sessions.get(key)
    }

    /// Removes the sessions `select` returns true for. `select` may update the
    /// sessions it keeps.
    pub fn remove_where(&mut self, mut select: impl FnMut(&mut S) -> bool) -> Vec<S> {
        let keys: Vec<ServiceKey> = self
            .sessions
            .iter_mut()
            .filter_map(|(key, session)| select(session).then(|| key.clone()))
            .collect();
        keys.iter()
            .filter_map(|key| self.sessions.remove(key))
            .collect()
    }

    /// Drains the whole namespace. Iteration order is unspecified.
    pub fn remove_all(&mut self) -> Vec<S> {
        self.sessions.drain().map(|(_, session)| session).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ServiceKey, &S)> {
        self.sessions.iter()
    }
}

#[derive(Debug)]
struct Tables {
    publications: SessionTable<PublishSession>,
    watches: SessionTable<WatchSession>,
}

/// Shared session state for one manager runtime.
#[derive(Debug)]
pub struct Registry {
    tables: Mutex<Tables>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables {
                publications: SessionTable::new(),
                watches: SessionTable::new(),
            }),
        }
    }

    /// Runs `f` with exclusive access to the publish namespace.
    pub fn publications<R>(&self, f: impl FnOnce(&mut SessionTable<PublishSession>) -> R) -> R {
        f(&mut self.tables.lock().publications)
    }

    /// Runs `f` with exclusive access to the watch namespace.
    pub fn watches<R>(&self, f: impl FnOnce(&mut SessionTable<WatchSession>) -> R) -> R {
        f(&mut self.tables.lock().watches)
    }

    pub fn put_publication(&self, session: PublishSession) -> Result<()> {
        let key = session.key();
        self.publications(|table| table.put(key, session))
    }

    /// Removes every advertised publication.
    ///
    /// Entries still waiting on `advertise` stay in the table, marked
    /// `Unregistering`; their register task withdraws them once the platform
    /// answers.
    pub fn take_publications(&self) -> Vec<PublishSession> {
        self.publications(|table| {
            table.remove_where(|session| match session.state {
                PublishState::Registering => {
                    session.state = PublishState::Unregistering;
                    false
                }
                PublishState::Unregistering => false,
                _ => true,
            })
        })
    }

    /// Removes one publication for unregister.
    ///
    /// Returns `None` when the entry is still registering; it is marked
    /// `Unregistering` and withdrawn by its register task instead. A key
    /// already marked that way is reported as not found.
    pub fn take_publication(&self, key: &ServiceKey) -> Result<Option<PublishSession>> {
        self.publications(|table| {
            let state = table.get(key).map(|session| session.state);
            match state {
                Some(PublishState::Registering) => {
                    if let Some(session) = table.get_mut(key) {
                        session.state = PublishState::Unregistering;
                    }
                    Ok(None)
                }
                Some(PublishState::Unregistering) | None => Err(DiscoveryError::NotFound {
                    kind: PublishSession::KIND,
                    key: key.clone(),
                }),
                Some(_) => table.remove(key).map(Some),
            }
        })
    }

    pub fn put_watch(&self, session: WatchSession) -> Result<()> {
        let key = session.key.clone();
        self.watches(|table| table.put(key, session))
    }

    pub fn remove_watch(&self, key: &ServiceKey) -> Result<WatchSession> {
        self.watches(|table| table.remove(key))
    }

    pub fn remove_all_watches(&self) -> Vec<WatchSession> {
        self.watches(|table| table.remove_all())
    }

    pub fn publication_count(&self) -> usize {
        self.tables.lock().publications.len()
    }

    pub fn watch_count(&self) -> usize {
        self.tables.lock().watches.len()
    }

    /// Snapshot both namespaces under one lock acquisition.
    pub fn snapshot(&self) -> (Vec<PublicationInfo>, Vec<WatchInfo>) {
        let tables = self.tables.lock();
        let mut publications: Vec<PublicationInfo> = tables
            .publications
            .iter()
            .map(|(_, session)| session.into())
            .collect();
        let mut watches: Vec<WatchInfo> = tables
            .watches
            .iter()
            .map(|(_, session)| session.into())
            .collect();
        publications.sort_by(|a, b| a.key.cmp(&b.key));
        watches.sort_by(|a, b| a.key.cmp(&b.key));
        (publications, watches)
    }
}
