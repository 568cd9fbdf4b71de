use thiserror::Error;

use vaxel_core::events::pool::PoolError;
use vaxel_core::events::SwitchIndex;

use crate::registry::ProcessId;

/// Dispatch-layer error conditions.
///
/// Registration conflicts are configuration errors and propagate loudly;
/// queue-full conditions never surface here, they are aggregated into the
/// dispatch report instead.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("switch {0} already has an override handler")]
    OverrideExists(SwitchIndex),

    #[error("process {0} already registered for local delivery")]
    ProcessRegistered(ProcessId),

    #[error("local delivery registration limit ({0}) reached")]
    RegistryFull(usize),

    #[error("event pool error: {0}")]
    Pool(#[from] PoolError),
}
