//! Hook into the persisted configuration store.

use crate::error::UplinkError;

/// The part of the configuration store the controller writes to.
///
/// `request_recovery` sets the persistent "force recovery mode" flag so
/// the device boots into its recovery workflow after the restart.
pub trait RecoveryStore {
    fn request_recovery(&mut self) -> Result<(), UplinkError>;
}

/// Remembers requests in memory only. Used by tests and dry runs.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryRecoveryStore {
    pub requests: u32,
}

impl RecoveryStore for MemoryRecoveryStore {
    fn request_recovery(&mut self) -> Result<(), UplinkError> {
        self.requests += 1;
        Ok(())
    }
}
