/// Maximum ids per posting block. Policy knob, no algorithmic significance.
pub const BLOCK_MAX: u16 = 256;

/// Posting sets at or below this size use the compact inline representation.
pub const COMPACT_THRESHOLD: u16 = 64;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum driving-list size before the intersector splits work across
    /// the thread pool.
    pub parallelize_min_ids: usize,
    /// Worker count for the block-parallel intersect.
    pub concurrency: usize,
    /// Default search budget for filter iterators, microseconds. None means
    /// no budget.
    pub filter_timeout_us: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            parallelize_min_ids: 4096,                 // below this, sequential wins
            concurrency: num_cpus::get().max(1),
            filter_timeout_us: Some(30_000_000),       // 30 seconds
        }
    }
}
