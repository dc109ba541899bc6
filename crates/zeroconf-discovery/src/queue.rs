//! Per-watch resolution queue.
//!
//! Discovery bursts can report many services at once, and platform
//! discovery services limit how many resolves may be outstanding. The queue
//! keeps at most one resolve in flight, issues resolves in discovery order,
//! and enforces a settling pause between consecutive resolves.
//!
//! The queue performs no I/O. Its owner (the watch worker) feeds it events
//! and acts on what it returns:
//!
//! ```text
//!  on_found ──► Idle? ──yes──► resolve now ──► on_resolve_complete ──► Settling
//!                 │                                                      │
//!                 no ──► pending (FIFO) ◄──── on_settled pops next ◄─────┘
//! ```

use std::collections::VecDeque;
use tracing::warn;
use zeroconf_core::types::{DiscoveredRecord, ServiceKey};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    Resolving { identity: ServiceKey, tombstoned: bool },
    Settling,
}

/// What the owner should do with a finished resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveDisposition {
    /// Emit the result to the caller
    Deliver,
    /// The service was lost while resolving; discard the result
    Suppress,
}

/// FIFO of discovered-but-unresolved records for one watch.
#[derive(Debug)]
pub struct ResolutionQueue {
    pending: VecDeque<DiscoveredRecord>,
    phase: Phase,
    capacity: Option<usize>,
}

impl ResolutionQueue {
    /// Creates a queue. `capacity` bounds pending records; when full the
    /// oldest pending record is dropped.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            pending: VecDeque::new(),
            phase: Phase::Idle,
            capacity,
        }
    }

    /// Records a newly found service.
    ///
    /// Returns the record when it should be resolved immediately, which
    /// happens only when nothing is pending, in flight, or settling.
    pub fn on_found(&mut self, record: DiscoveredRecord) -> Option<DiscoveredRecord> {
        if self.phase == Phase::Idle && self.pending.is_empty() {
            self.phase = Phase::Resolving {
                identity: record.identity(),
                tombstoned: false,
            };
            return Some(record);
        }

        if let Some(capacity) = self.capacity {
            if self.pending.len() >= capacity {
                if let Some(dropped) = self.pending.pop_front() {
                    warn!(
                        service = %dropped.identity(),
                        capacity,
                        "Resolution queue full, dropping oldest pending service"
                    );
                }
            }
        }

        self.pending.push_back(record);
        None
    }

    /// Forgets a service that disappeared.
    ///
    /// Pending records with this identity are removed; an in-flight resolve
    /// for it is tombstoned so its result is suppressed. Returns true if
    /// anything was removed or tombstoned.
    pub fn on_lost(&mut self, identity: &ServiceKey) -> bool {
        let before = self.pending.len();
        self.pending.retain(|record| &record.identity() != identity);
        let mut changed = self.pending.len() != before;

        if let Phase::Resolving {
            identity: in_flight,
            tombstoned,
        } = &mut self.phase
        {
            if in_flight == identity && !*tombstoned {
                *tombstoned = true;
                changed = true;
            }
        }

        changed
    }

    /// Marks the in-flight resolve for `identity` finished and enters the
    /// settling phase.
    pub fn on_resolve_complete(&mut self, identity: &ServiceKey) -> ResolveDisposition {
        let disposition = match &self.phase {
            Phase::Resolving {
                identity: in_flight,
                tombstoned,
            } if in_flight == identity => {
                if *tombstoned {
                    ResolveDisposition::Suppress
                } else {
                    ResolveDisposition::Deliver
                }
            }
            other => {
                warn!(service = %identity, phase = ?other, "Resolve completed for a service not in flight");
                ResolveDisposition::Suppress
            }
        };

        self.phase = Phase::Settling;
        disposition
    }

    /// Ends the settling pause. Returns the next record to resolve, or
    /// returns to idle when nothing is pending.
    pub fn on_settled(&mut self) -> Option<DiscoveredRecord> {
        if self.phase != Phase::Settling {
            return None;
        }

        match self.pending.pop_front() {
            Some(record) => {
                self.phase = Phase::Resolving {
                    identity: record.identity(),
                    tombstoned: false,
                };
                Some(record)
            }
            None => {
                self.phase = Phase::Idle;
                None
            }
        }
    }

    pub fn in_flight(&self) -> Option<&ServiceKey> {
        match &self.phase {
            Phase::Resolving { identity, .. } => Some(identity),
            _ => None,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
