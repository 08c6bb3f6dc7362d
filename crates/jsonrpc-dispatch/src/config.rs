use std::time::Duration;

/// Tuning knobs for an [`crate::RpcServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Contexts kept on the free list after release
    pub max_idle_contexts: usize,
    /// Output buffers kept on the free list after release
    pub max_idle_buffers: usize,
    /// Capacity a released context or buffer may keep, in bytes
    pub max_retained_buffer_capacity: usize,
    /// Per-item deadline inside a batch. `None` waits for every handler.
    pub batch_item_timeout: Option<Duration>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_idle_contexts: 1024,
            max_idle_buffers: 1024,
            max_retained_buffer_capacity: 64 * 1024, // 64KB
            batch_item_timeout: None,
        }
    }
}
