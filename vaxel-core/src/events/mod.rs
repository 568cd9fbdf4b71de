//! ## vaxel-core::events
//! **Typed, pooled, reference-counted event records**
//!
//! An [`Event`] is a handle into the [`pool::EventPool`] slot arena: slot
//! index plus generation counter, so a handle that outlives its slot's reuse
//! is rejected instead of touching someone else's payload. Handles are
//! deliberately not `Clone`; additional references are minted through
//! [`pool::EventPool::retain`] and every handle goes back through
//! [`pool::EventPool::release`].

use std::fmt;

use bytes::Bytes;

use crate::time::Nanos;

pub mod pool;
pub mod stats;

/// Asynchronous hardware condition carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum EventKind {
    /// A port link went up or down.
    LinkTransition = 0,
    /// Periodic MAC-address-table aging sweep.
    MacAging = 1,
    /// Hardware table-change notification.
    TableChange = 2,
    /// Packet-arrival interrupt with a packet buffer payload.
    PacketRx = 3,
}

impl EventKind {
    pub const COUNT: usize = 4;

    /// All kinds, in bit order.
    pub const ALL: [EventKind; EventKind::COUNT] = [
        EventKind::LinkTransition,
        EventKind::MacAging,
        EventKind::TableChange,
        EventKind::PacketRx,
    ];

    /// The capability-mask bit for this kind.
    #[inline]
    pub fn bit(self) -> u32 {
        1 << self as u32
    }
}

/// Capability bitmask over event kinds, one bit per [`EventKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventMask(u32);

impl EventMask {
    pub const EMPTY: EventMask = EventMask(0);

    /// Mask covering every kind.
    pub fn all() -> Self {
        EventKind::ALL
            .iter()
            .fold(EventMask::EMPTY, |mask, kind| mask.with(*kind))
    }

    /// Mask covering exactly the given kinds.
    pub fn of(kinds: &[EventKind]) -> Self {
        kinds
            .iter()
            .fold(EventMask::EMPTY, |mask, kind| mask.with(*kind))
    }

    #[inline]
    pub fn with(self, kind: EventKind) -> Self {
        EventMask(self.0 | kind.bit())
    }

    #[inline]
    pub fn contains(self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

/// Delivery urgency. Ordering is meaningful: `Low < Normal < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

/// Stable event identity, unique for the lifetime of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Index of the switch unit an event pertains to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwitchIndex(pub u16);

impl fmt::Display for SwitchIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sw{}", self.0)
    }
}

/// Immutable-after-creation event descriptor carried inside every handle.
#[derive(Debug, Clone, Copy)]
pub struct EventMeta {
    pub id: EventId,
    pub kind: EventKind,
    pub priority: Priority,
    pub switch: SwitchIndex,
    /// Allocation timestamp in clock nanoseconds.
    pub created_at: Nanos,
}

/// Full pooled record. The final snapshot of this is what free-notify
/// listeners observe.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub meta: EventMeta,
    /// Delivery deadline, stamped on first schedule and immutable after.
    pub due: Option<Nanos>,
    /// Opaque payload, typically a packet buffer.
    pub payload: Bytes,
}

/// Reference-counted handle to a pooled event.
///
/// Carries a copy of the immutable metadata so queues and consumers can read
/// it without touching the pool lock. Payload access goes through the pool's
/// accessor contract.
#[derive(Debug)]
pub struct Event {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
    pub(crate) meta: EventMeta,
}

impl Event {
    #[inline]
    pub fn id(&self) -> EventId {
        self.meta.id
    }

    #[inline]
    pub fn kind(&self) -> EventKind {
        self.meta.kind
    }

    #[inline]
    pub fn priority(&self) -> Priority {
        self.meta.priority
    }

    #[inline]
    pub fn switch(&self) -> SwitchIndex {
        self.meta.switch
    }

    #[inline]
    pub fn created_at(&self) -> Nanos {
        self.meta.created_at
    }

    #[inline]
    pub fn meta(&self) -> EventMeta {
        self.meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_bits_are_disjoint() {
        for (i, a) in EventKind::ALL.iter().enumerate() {
            for (j, b) in EventKind::ALL.iter().enumerate() {
                if i != j {
                    assert_eq!(a.bit() & b.bit(), 0);
                }
            }
        }
    }

    #[test]
    fn mask_membership() {
        let mask = EventMask::of(&[EventKind::MacAging, EventKind::PacketRx]);
        assert!(mask.contains(EventKind::MacAging));
        assert!(mask.contains(EventKind::PacketRx));
        assert!(!mask.contains(EventKind::LinkTransition));
        assert!(!mask.contains(EventKind::TableChange));
        assert!(EventMask::all().contains(EventKind::TableChange));
        assert!(EventMask::EMPTY.is_empty());
    }

    #[test]
    fn priority_is_ordered() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Critical);
    }
}
