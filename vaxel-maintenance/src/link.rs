//! Link-transition event production.
//!
//! The platform's interrupt layer reports port link changes here; each report
//! becomes a `LinkTransition` event through the dispatcher. Every call is
//! non-blocking and log-and-drop on backpressure.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{trace, warn};

use vaxel_core::events::{EventKind, Priority, SwitchIndex};
use vaxel_dispatch::Dispatcher;

/// Observed port link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Down = 0,
    Up = 1,
}

/// Payload of a `LinkTransition` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkChange {
    pub port: u16,
    pub state: LinkState,
}

impl LinkChange {
    pub fn to_payload(self) -> Bytes {
        let port = self.port.to_be_bytes();
        Bytes::copy_from_slice(&[port[0], port[1], self.state as u8])
    }

    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        match payload {
            [hi, lo, state] => Some(Self {
                port: u16::from_be_bytes([*hi, *lo]),
                state: match state {
                    0 => LinkState::Down,
                    1 => LinkState::Up,
                    _ => return None,
                },
            }),
            _ => None,
        }
    }
}

/// Turns platform link-change reports into dispatched events.
pub struct LinkMonitor {
    dispatcher: Arc<Dispatcher>,
}

impl LinkMonitor {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Interrupt-reachable entry point; never blocks, never retries.
    pub fn on_link_change(&self, switch: SwitchIndex, port: u16, state: LinkState) {
        let change = LinkChange { port, state };
        match self.dispatcher.produce(
            switch,
            EventKind::LinkTransition,
            Priority::High,
            change.to_payload(),
            Duration::ZERO,
        ) {
            Ok(report) if report.is_partial() => {
                warn!(%switch, port, ?state, "link transition partially delivered")
            }
            Ok(_) => trace!(%switch, port, ?state, "link transition dispatched"),
            Err(err) => warn!(%switch, port, ?state, %err, "link transition dropped"),
        }
    }
}
