//! # vaxel-maintenance
//!
//! Maintenance producers of the Vaxel event stack: the periodic aging
//! scheduler, the interrupt-triggered table-change path, and the link
//! monitor. All of them synthesize events through the dispatcher instead of
//! touching table or port state directly.

pub mod link;
pub mod scheduler;

pub use link::{LinkChange, LinkMonitor, LinkState};
pub use scheduler::{AgingScheduler, NotifySource, TableNotifyHandle};
