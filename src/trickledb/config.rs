//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Tunables shared by the partition manager, the plan compiler and the
/// buffer engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Target rows per partition used by `prepare_table` callers
    pub partition_size_hint: u64,
    /// Prefix of generated buffer table names
    pub buffer_prefix: String,
    /// Confidence level for `PROGRESSIVE_CONFIDENCE` half-widths
    pub confidence_level: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            partition_size_hint: 1_000_000,
            buffer_prefix: "progressive_buffer_".to_string(),
            confidence_level: 0.95,
        }
    }
}
