//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

//! Opt-in hash-sharded parallel build, behind the `par-build` feature.
//!
//! Rather than striping one table by a lock array, the whole table is
//! split into `N` private shards up front; producer closures each own one
//! shard exclusively, so no locking is needed during the parallel phase.
//! Shards are folded back into a single table in one serial pass, which is
//! also the only point the merged table gets rebalanced.

use rayon::prelude::*;

use crate::table::LflowTable;

pub struct ShardedBuilder {
    shards: Vec<LflowTable>,
}

impl ShardedBuilder {
    pub fn new(shard_count: usize) -> Self {
        let n = shard_count.max(1).next_power_of_two();
        ShardedBuilder {
            shards: (0..n).map(|_| LflowTable::new()).collect(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Runs `build_fn` once per shard, in parallel, handing each call
    /// exclusive mutable access to its own shard index.
    pub fn build<F>(&mut self, build_fn: F)
    where
        F: Fn(usize, &mut LflowTable) + Sync,
    {
        self.shards
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, shard)| build_fn(i, shard));
    }

    /// Folds every shard into a single table.
    pub fn merge(self) -> LflowTable {
        let mut shards = self.shards.into_iter();
        let mut merged = shards.next().unwrap_or_default();
        for shard in shards {
            merged.absorb(shard);
        }
        merged
    }
}
