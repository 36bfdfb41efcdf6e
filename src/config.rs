use serde::{Deserialize, Serialize};

/// Messages drained per wake cycle unless configured otherwise.
pub const DEFAULT_MAX_DRAIN_BATCH: usize = 1000;

/// Tunables applied to a socket adapter at creation.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BridgeConfig {
    /// Upper bound on messages delivered per wake cycle. Lowering it makes
    /// the event loop more responsive at the cost of per-socket throughput.
    pub max_drain_batch: Option<usize>,
}

impl BridgeConfig {
    /// Effective drain bound; always at least one.
    #[inline]
    pub fn drain_batch(&self) -> usize {
        self.max_drain_batch
            .unwrap_or(DEFAULT_MAX_DRAIN_BATCH)
            .max(1)
    }
}
