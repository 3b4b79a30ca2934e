//! Per-context tuning.

use serde::{Deserialize, Serialize};

use crate::EcsError;

/// Storage and scheduling parameters for one [`Context`](crate::Context).
///
/// Deserializes from partial documents; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EcsConfig {
    /// Rows per chunk. Must be non-zero.
    pub chunk_capacity: usize,
    /// Worker threads are `available_parallelism / worker_divisor`, at least
    /// one. Must be non-zero.
    pub worker_divisor: usize,
    /// Run system chunk loops on the worker pool. When `false` every system
    /// runs on the calling thread.
    pub parallel: bool,
    /// Entity records reserved up front.
    pub initial_entity_capacity: usize,
}

impl Default for EcsConfig {
    fn default() -> Self {
        Self {
            chunk_capacity: 256,
            worker_divisor: 2,
            parallel: true,
            initial_entity_capacity: 512,
        }
    }
}

impl EcsConfig {
    pub fn validate(&self) -> Result<(), EcsError> {
        if self.chunk_capacity == 0 {
            return Err(EcsError::InvalidConfig("chunk_capacity must be non-zero".into()));
        }
        if self.chunk_capacity > u32::MAX as usize {
            return Err(EcsError::InvalidConfig(format!(
                "chunk_capacity {} exceeds {}",
                self.chunk_capacity,
                u32::MAX
            )));
        }
        if self.worker_divisor == 0 {
            return Err(EcsError::InvalidConfig("worker_divisor must be non-zero".into()));
        }
        Ok(())
    }

    /// Size of the worker pool this configuration asks for.
    pub fn worker_threads(&self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(1);
        (cores / self.worker_divisor.max(1)).max(1)
    }
}
