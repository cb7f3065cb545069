//! Error types for wg-fleet
//!
//! Each subsystem defines its own error enum; this module aggregates them
//! for callers that drive the whole stack.

use thiserror::Error;

use crate::allocator::AllocError;
use crate::cidr::CidrError;
use crate::config::ConfigError;
use crate::driver::DriverError;
use crate::quick_config::CodecError;
use crate::registry::RegistryError;
use crate::scanner::ScanError;

/// Top-level error type for wg-fleet
#[derive(Debug, Error)]
pub enum FleetError {
    /// CIDR parsing errors
    #[error("CIDR error: {0}")]
    Cidr(#[from] CidrError),

    /// Host resource scan errors
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    /// Allocation errors (pool exhaustion)
    #[error("Allocation error: {0}")]
    Alloc(#[from] AllocError),

    /// Driver errors (external tools, sysfs)
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// Configuration-codec errors
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Registry errors (duplicate or unknown tunnels)
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Fleet configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Result with `FleetError`
pub type Result<T> = std::result::Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let err: FleetError = AllocError::NoFreeAddress.into();
        assert!(matches!(err, FleetError::Alloc(AllocError::NoFreeAddress)));

        let err: FleetError = RegistryError::AlreadyRunning("t1".into()).into();
        assert!(err.to_string().contains("t1"));
    }
}
