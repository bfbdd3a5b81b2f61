//! Partitioning of `[0, N)` into batch-sized shards.

use std::ops::Range;

use crate::error::QueryError;

/// A partition of `[0, total)` into contiguous ranges of at most
/// `shard_size` items. The last shard may be shorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardPlan {
    total: usize,
    shard_size: usize,
}

impl ShardPlan {
    pub fn new(total: usize, shard_size: usize) -> Result<Self, QueryError> {
        if shard_size == 0 {
            return Err(QueryError::InvalidConfig(
                "shard size must be at least 1".into(),
            ));
        }
        Ok(Self { total, shard_size })
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn shard_size(&self) -> usize {
        self.shard_size
    }

    /// Number of shards.
    pub fn len(&self) -> usize {
        self.total.div_ceil(self.shard_size)
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// The item range covered by shard `index`.
    pub fn shard(&self, index: usize) -> Option<Range<usize>> {
        let start = index.checked_mul(self.shard_size)?;
        if start >= self.total {
            return None;
        }
        Some(start..(start + self.shard_size).min(self.total))
    }

    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.len()).filter_map(move |i| self.shard(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_shard_size_rejected() {
        assert!(matches!(
            ShardPlan::new(10, 0),
            Err(QueryError::InvalidConfig(_))
        ));
    }

    #[test]
    fn empty_plan_has_no_shards() {
        let plan = ShardPlan::new(0, 5).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.len(), 0);
        assert_eq!(plan.ranges().count(), 0);
    }

    #[test]
    fn last_shard_is_short() {
        let plan = ShardPlan::new(10, 4).unwrap();
        let ranges: Vec<_> = plan.ranges().collect();
        assert_eq!(ranges, vec![0..4, 4..8, 8..10]);
        assert_eq!(plan.shard(3), None);
    }

    #[test]
    fn ranges_cover_exactly_once() {
        for total in 0..60 {
            for size in 1..15 {
                let plan = ShardPlan::new(total, size).unwrap();
                let mut seen = vec![0u8; total];
                for range in plan.ranges() {
                    assert!(range.len() <= size, "shard larger than {size}");
                    assert!(!range.is_empty());
                    for i in range {
                        seen[i] += 1;
                    }
                }
                assert!(
                    seen.iter().all(|n| *n == 1),
                    "gap or overlap for total={total} size={size}"
                );
                assert_eq!(plan.ranges().count(), plan.len());
            }
        }
    }
}
