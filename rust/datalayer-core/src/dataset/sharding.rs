// rust/datalayer-core/src/dataset/sharding.rs

use crate::config::{Phase, ShardConfig};
use crate::error::{DataLayerError, Result};

/// Decide whether a worker owns the record at `global_offset`.
///
/// Records are dealt round-robin: worker `r` of `n` owns every offset with
/// `offset % n == r`. During the test phase every worker owns every record,
/// since evaluation is not sharded.
///
/// `worker_count` must be non-zero.
pub fn owns(global_offset: u64, worker_count: u64, worker_rank: u64, phase: Phase) -> bool {
    phase == Phase::Test || global_offset % worker_count == worker_rank
}

/// Validated sharding parameters for one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSelector {
    worker_count: u64,
    worker_rank: u64,
    phase: Phase,
}

impl ShardSelector {
    /// Creates a selector for `worker_rank` out of `worker_count` workers.
    ///
    /// # Errors
    ///
    /// Returns an error if `worker_count` is zero or the rank is out of range.
    pub fn new(worker_count: u64, worker_rank: u64, phase: Phase) -> Result<Self> {
        if worker_count == 0 {
            return Err(DataLayerError::config("worker_count must be greater than 0"));
        }
        if worker_rank >= worker_count {
            return Err(DataLayerError::config(format!(
                "worker_rank {} out of range (worker_count: {})",
                worker_rank, worker_count
            )));
        }
        Ok(Self {
            worker_count,
            worker_rank,
            phase,
        })
    }

    pub fn from_config(config: &ShardConfig) -> Result<Self> {
        Self::new(config.worker_count, config.worker_rank, config.phase)
    }

    /// A selector that owns every record.
    pub fn single() -> Self {
        Self {
            worker_count: 1,
            worker_rank: 0,
            phase: Phase::Train,
        }
    }

    #[inline]
    pub fn owns(&self, global_offset: u64) -> bool {
        owns(global_offset, self.worker_count, self.worker_rank, self.phase)
    }

    pub fn worker_count(&self) -> u64 {
        self.worker_count
    }

    pub fn worker_rank(&self) -> u64 {
        self.worker_rank
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ranks_partition_offsets() {
        let total = 103u64;

        for workers in 1..=6u64 {
            let mut seen = HashSet::new();

            for rank in 0..workers {
                let selector = ShardSelector::new(workers, rank, Phase::Train).unwrap();
                for offset in (0..total).filter(|&o| selector.owns(o)) {
                    // Disjoint: no offset is owned by two ranks.
                    assert!(seen.insert(offset), "offset {} owned twice", offset);
                }
            }

            assert_eq!(seen.len() as u64, total);
        }
    }

    #[test]
    fn test_round_robin_assignment() {
        let owned: Vec<u64> = (0..10).filter(|&o| owns(o, 3, 1, Phase::Train)).collect();
        assert_eq!(owned, vec![1, 4, 7]);
    }

    #[test]
    fn test_test_phase_is_not_sharded() {
        let selector = ShardSelector::new(4, 3, Phase::Test).unwrap();
        assert!((0..20).all(|o| selector.owns(o)));
    }

    #[test]
    fn test_single_owns_everything() {
        let selector = ShardSelector::single();
        assert!((0..20).all(|o| selector.owns(o)));
        assert_eq!(selector.worker_count(), 1);
        assert_eq!(selector.worker_rank(), 0);
    }

    #[test]
    fn test_invalid_selector() {
        assert!(ShardSelector::new(0, 0, Phase::Train).is_err());
        assert!(ShardSelector::new(2, 2, Phase::Train).is_err());
    }
}
