//! # vaxel-dispatch
//!
//! Delivery layer of the Vaxel event stack: the dispatcher that routes every
//! produced event to a per-switch override handler or fans it out to the
//! global and local delay queues, the registries behind those two paths, and
//! the consumer worker loops that drain the queues.

pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod worker;

pub use dispatcher::{DeliveryTarget, DispatchReport, Dispatcher};
pub use error::DispatchError;
pub use registry::{LocalDelivery, OverrideHandler, ProcessId};
pub use worker::{DeliveryWorker, EventConsumer};
