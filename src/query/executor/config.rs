/// Tuning knobs for one pipeline execution
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Capacity of the item channel between two operators
    pub item_channel_capacity: usize,

    /// Capacity of an index connection's entry channel
    pub entry_channel_capacity: usize,

    /// Items counted locally before phase counters are flushed
    pub phase_update_count: u64,

    /// Keys fetched per keyspace round trip
    pub fetch_batch_size: usize,

    /// Copies a parallel operator makes of its child by default
    pub max_parallelism: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            item_channel_capacity: 256,
            entry_channel_capacity: 512,
            phase_update_count: 100,
            fetch_batch_size: 16,
            max_parallelism: 4,
        }
    }
}
