//! Custom validation functions for configuration.
//!
//! Provides shared validation logic used across multiple configuration modules.

use validator::ValidationError;

/// Validate that a worker thread name prefix fits the Linux 15-character
/// thread name limit once a numeric suffix is appended.
pub fn validate_thread_prefix(name: &str) -> Result<(), ValidationError> {
    let valid = !name.is_empty()
        && name.len() <= 11
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_thread_prefix"))
    }
}
