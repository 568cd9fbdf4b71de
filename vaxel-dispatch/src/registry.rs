//! Override and local-delivery registries.
//!
//! Both registries are read-mostly: mutation happens on process attach/detach
//! and override installation, while dispatch reads them on every produced
//! event. Readers work from a cloned snapshot taken under a read lock, so a
//! writer can never corrupt an in-flight fan-out iteration.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use vaxel_core::events::pool::EventPool;
use vaxel_core::events::{Event, EventMask, SwitchIndex};
use vaxel_core::queue::DelayQueue;

use crate::error::DispatchError;

/// Identity of a consumer process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid{}", self.0)
    }
}

/// Per-switch handler that replaces default delivery entirely.
///
/// The handler receives the producer's reference and owns it: it must release
/// the event (directly or after handing it elsewhere) exactly once.
pub trait OverrideHandler: Send + Sync {
    fn handle(&self, pool: &EventPool, event: Event);
}

/// Map of `switch index -> override handler`.
pub struct OverrideRegistry {
    handlers: RwLock<HashMap<SwitchIndex, Arc<dyn OverrideHandler>>>,
}

impl OverrideRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Installs an override. At most one handler per switch; installing over
    /// an existing one is a configuration error.
    pub fn set(
        &self,
        switch: SwitchIndex,
        handler: Arc<dyn OverrideHandler>,
    ) -> Result<(), DispatchError> {
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&switch) {
            return Err(DispatchError::OverrideExists(switch));
        }
        handlers.insert(switch, handler);
        Ok(())
    }

    /// Removes the override for a switch, restoring default delivery.
    pub fn clear(&self, switch: SwitchIndex) -> Option<Arc<dyn OverrideHandler>> {
        self.handlers.write().remove(&switch)
    }

    pub fn lookup(&self, switch: SwitchIndex) -> Option<Arc<dyn OverrideHandler>> {
        self.handlers.read().get(&switch).cloned()
    }
}

impl Default for OverrideRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// One per-process consumer registration.
#[derive(Clone)]
pub struct LocalDelivery {
    pub process: ProcessId,
    pub mask: EventMask,
    pub queue: Arc<DelayQueue>,
}

/// Table of local delivery registrations, bounded by configuration.
pub struct LocalDeliveryRegistry {
    entries: RwLock<Vec<LocalDelivery>>,
    max_registrations: usize,
}

impl LocalDeliveryRegistry {
    pub fn new(max_registrations: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            max_registrations,
        }
    }

    /// Registers a process. A process has at most one registration.
    pub fn register(
        &self,
        process: ProcessId,
        mask: EventMask,
        queue: Arc<DelayQueue>,
    ) -> Result<(), DispatchError> {
        let mut entries = self.entries.write();
        if entries.iter().any(|entry| entry.process == process) {
            return Err(DispatchError::ProcessRegistered(process));
        }
        if entries.len() >= self.max_registrations {
            return Err(DispatchError::RegistryFull(self.max_registrations));
        }
        entries.push(LocalDelivery {
            process,
            mask,
            queue,
        });
        Ok(())
    }

    /// Removes a registration. The caller owns closing the returned queue.
    pub fn deregister(&self, process: ProcessId) -> Option<LocalDelivery> {
        let mut entries = self.entries.write();
        let pos = entries.iter().position(|entry| entry.process == process)?;
        Some(entries.remove(pos))
    }

    /// Snapshot for fan-out iteration.
    pub fn snapshot(&self) -> Vec<LocalDelivery> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
