//! Peripheral configuration

use std::time::Duration;

/// Peripheral configuration
#[derive(Debug, Clone, Default)]
pub struct PeripheralConfig {
    /// Fragment reassembly configuration
    pub reassembly: ReassemblyConfig,

    /// Transaction lifecycle configuration
    pub transaction: TransactionConfig,
}

/// Fragment reassembly configuration
#[derive(Debug, Clone)]
pub struct ReassemblyConfig {
    /// Idle time after which a partial message is evicted.
    ///
    /// The peripheral maintenance task runs at half this period.
    pub timeout: Duration,

    /// Concurrent partial messages allowed per link
    pub max_buffers: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_buffers: 32,
        }
    }
}

/// Transaction lifecycle configuration
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    /// Time a request waits for its reply before the pending entry is
    /// reclaimed
    pub timeout: Duration,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}
