//! Open-shard topology (component C).

use crate::shard::{Shard, ShardId};
use std::collections::HashSet;

/// An ordered view of the currently-open shards of one stream.
#[derive(Debug, Clone)]
pub struct Topology {
    /// Ascending by `start`.
    shards: Vec<Shard>,
    pub hash_space_max: u128,
}

impl Topology {
    /// Build the open-shard view from the raw shard list returned by the
    /// control plane. A shard is open iff its id never appears as `parent`
    /// or `adjacent_parent` of another shard in the set.
    pub fn from_raw(all: Vec<Shard>, hash_space_max: u128) -> Self {
        let mut closed: HashSet<ShardId> = HashSet::new();
        for s in &all {
            if let Some(p) = &s.parent {
                closed.insert(p.clone());
            }
            if let Some(p) = &s.adjacent_parent {
                closed.insert(p.clone());
            }
        }
        let mut shards: Vec<Shard> = all.into_iter().filter(|s| !closed.contains(&s.id)).collect();
        shards.sort_by_key(|s| s.start);
        Self {
            shards,
            hash_space_max,
        }
    }

    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    pub fn count(&self) -> usize {
        self.shards.len()
    }

    /// Fractional coverage of `shard` as `width / (H+1)`, expressed as an
    /// exact rational (numerator, denominator) to avoid float drift -
    /// see Design Note on float-vs-fixed-point arithmetic. `H+1` saturates
    /// at `u128::MAX` in the degenerate case `H == u128::MAX`, where the
    /// true denominator (`2^128`) has no `u128` representation; `coverage`
    /// is a diagnostic, not load-bearing arithmetic, so that's acceptable.
    pub fn coverage(&self, shard: &Shard) -> (u128, u128) {
        (shard.width(), self.hash_space_max.saturating_add(1))
    }

    /// True iff every open shard's width equals `(H+1)/N` exactly, i.e. the
    /// topology is the `N`-way equal partition of `[0, H]`. Because all
    /// arithmetic here is over fixed-width integers, equality is checked
    /// exactly rather than against the `1e-9` float tolerance the spec
    /// allows for drift-prone floating comparisons - integer arithmetic
    /// has no drift to tolerate.
    pub fn is_balanced(&self) -> bool {
        let n = self.shards.len() as u128;
        if n == 0 {
            return false;
        }
        let (lo, rem) = crate::planner::total_div_rem(self.hash_space_max, n);
        if rem == 0 {
            self.shards.iter().all(|s| s.width() == lo)
        } else {
            let hi = lo + 1;
            self.shards.iter().all(|s| {
                let w = s.width();
                w == lo || w == hi
            })
        }
    }

    /// Invariant check: ranges are pairwise disjoint and their union is
    /// exactly `[0, H]`.
    pub fn covers_full_space(&self) -> bool {
        if self.shards.is_empty() {
            return false;
        }
        if self.shards[0].start != 0 {
            return false;
        }
        for w in self.shards.windows(2) {
            if w[0].end + 1 != w[1].start {
                return false;
            }
        }
        self.shards.last().unwrap().end == self.hash_space_max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, u128, u128)]) -> Vec<Shard> {
        pairs.iter().map(|(id, s, e)| Shard::new(*id, *s, *e)).collect()
    }

    #[test]
    fn open_shard_excludes_parents() {
        let mut all = raw(&[("s1", 0, 9), ("s2", 10, 19)]);
        let mut child = Shard::new("s3", 0, 19);
        child.parent = Some("s1".into());
        child.adjacent_parent = Some("s2".into());
        all.push(child);
        let topo = Topology::from_raw(all, 19);
        assert_eq!(topo.count(), 1);
        assert_eq!(topo.shards()[0].id, "s3");
    }

    #[test]
    fn balanced_three_way_over_h_128() {
        let h: u128 = u128::MAX;
        let (w, _) = crate::planner::total_div_rem(h, 3);
        let shards = vec![
            Shard::new("a", 0, w - 1),
            Shard::new("b", w, 2 * w - 1),
            Shard::new("c", 2 * w, h),
        ];
        let topo = Topology::from_raw(shards, h);
        assert!(topo.is_balanced());
        assert!(topo.covers_full_space());
    }

    #[test]
    fn unbalanced_topology_is_detected() {
        let topo = Topology::from_raw(raw(&[("a", 0, 5), ("b", 6, 19)]), 19);
        assert!(!topo.is_balanced());
    }
}
