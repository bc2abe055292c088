//! Runtime tunables

/// Sizing of the semi-space heap
///
/// All sizes are in machine words per semi-space; the heap as a whole reserves twice as much.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapConfig {
    pub initial_words: usize,
    pub max_words: usize,
    pub grow_increment_words: usize,
    /// Occupancy above `grow_numerator / grow_denominator` of capacity triggers growth
    pub grow_numerator: usize,
    pub grow_denominator: usize,
}

impl HeapConfig {
    /// Returns the initial capacity clamped to the maximum and rounded to the allocation granule
    pub(crate) fn clamped_initial_words(&self) -> usize {
        crate::boxed::round_up_even(self.initial_words.min(self.max_words).max(2))
    }
}

impl Default for HeapConfig {
    fn default() -> HeapConfig {
        HeapConfig {
            initial_words: 64 * 1024,
            max_words: 64 * 1024 * 1024,
            grow_increment_words: 64 * 1024,
            grow_numerator: 3,
            grow_denominator: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub heap: HeapConfig,
    /// Checkpoints executed before the time slice expires
    pub time_slice: u32,
    /// Log every collection at `info` instead of `debug`
    pub gc_messages: bool,
    /// Log a summary of the run at `info` instead of `debug`
    pub statistics: bool,
}

impl Default for EngineConfig {
    fn default() -> EngineConfig {
        EngineConfig {
            heap: HeapConfig::default(),
            time_slice: 10_000,
            gc_messages: false,
            statistics: false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn initial_words_clamped() {
        let config = HeapConfig {
            initial_words: 101,
            max_words: 64,
            ..HeapConfig::default()
        };

        assert_eq!(64, config.clamped_initial_words());

        let config = HeapConfig {
            initial_words: 7,
            ..HeapConfig::default()
        };

        assert_eq!(8, config.clamped_initial_words());
    }
}
