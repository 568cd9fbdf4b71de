use thiserror::Error;

use vaxel_config::ConfigError;
use vaxel_dispatch::DispatchError;

/// Stack-level error type.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("worker spawn failed: {0}")]
    Spawn(#[from] std::io::Error),
}
