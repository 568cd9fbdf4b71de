//! # vaxel-engine
//!
//! Wires the Vaxel event notification core together: one [`SwitchStack`]
//! owns the pool, the dispatcher, the global and local consumer workers, and
//! the aging scheduler, with documented construction and shutdown ordering.

pub mod error;
pub mod runtime;

pub use error::EngineError;
pub use runtime::SwitchStack;
