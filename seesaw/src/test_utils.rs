// Copyright 2026 seesaw Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Test utilities.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;

use crate::{
    evicter::Evicter,
    rebalance::{plan, EvicterSnapshot},
};

/// An in-memory [`Evicter`] that records the budgets installed on it.
///
/// The balancer only reads and writes counters through the trait, so a shard
/// can be simulated by bumping the counters by hand: [`record_load`] accounts
/// loaded bytes, [`set_in_memory_size`] pins the resident size.
///
/// [`record_load`]: StubEvicter::record_load
/// [`set_in_memory_size`]: StubEvicter::set_in_memory_size
#[derive(Debug, Default)]
pub struct StubEvicter {
    memory_limit: AtomicU64,
    bytes_loaded: AtomicU64,
    in_memory_size: AtomicU64,
    updates: Mutex<Vec<u64>>,
}

impl StubEvicter {
    /// Creates a stub with the given initial budget and zeroed counters.
    pub fn new(memory_limit: u64) -> Self {
        Self::with_state(memory_limit, 0, 0)
    }

    /// Creates a stub with the given budget, loaded bytes and resident size.
    pub fn with_state(memory_limit: u64, bytes_loaded: u64, in_memory_size: u64) -> Self {
        Self {
            memory_limit: AtomicU64::new(memory_limit),
            bytes_loaded: AtomicU64::new(bytes_loaded),
            in_memory_size: AtomicU64::new(in_memory_size),
            updates: Mutex::new(vec![]),
        }
    }

    /// Accounts `bytes` as loaded and resident.
    pub fn record_load(&self, bytes: u64) {
        self.bytes_loaded.fetch_add(bytes, Ordering::Relaxed);
        self.in_memory_size.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Overrides the resident size.
    pub fn set_in_memory_size(&self, bytes: u64) {
        self.in_memory_size.store(bytes, Ordering::Relaxed);
    }

    /// Budgets installed on this stub so far, in order.
    pub fn updates(&self) -> Vec<u64> {
        self.updates.lock().clone()
    }
}

impl Evicter for StubEvicter {
    fn memory_limit(&self) -> u64 {
        self.memory_limit.load(Ordering::Relaxed)
    }

    fn bytes_loaded(&self) -> u64 {
        self.bytes_loaded.load(Ordering::Relaxed)
    }

    fn in_memory_size(&self) -> u64 {
        self.in_memory_size.load(Ordering::Relaxed)
    }

    fn update_memory_limit(&self, limit: u64) {
        self.memory_limit.store(limit, Ordering::Relaxed);
        self.bytes_loaded.store(0, Ordering::Relaxed);
        self.updates.lock().push(limit);
    }
}

/// A standalone rebalance round over stub shards, without a balancer.
///
/// Runs the same planning step a live round runs between snapshot and apply.
/// Useful for probing the split a given load pattern produces, and for
/// benchmarks.
#[derive(Debug)]
pub struct RoundPlan {
    batch: Vec<EvicterSnapshot>,
    total_bytes_loaded: u64,
}

impl RoundPlan {
    /// Creates a round over `(memory_limit, bytes_loaded)` shard pairs.
    pub fn from_shards(shards: &[(u64, u64)]) -> Self {
        let batch = shards
            .iter()
            .map(|&(memory_limit, bytes_loaded)| {
                let evicter: Arc<dyn Evicter> = Arc::new(StubEvicter::with_state(memory_limit, bytes_loaded, 0));
                EvicterSnapshot::capture(&evicter)
            })
            .collect();
        let total_bytes_loaded = shards.iter().map(|&(_, bytes_loaded)| bytes_loaded).sum();
        Self {
            batch,
            total_bytes_loaded,
        }
    }

    /// Plans the round against the given budget and returns the new budgets,
    /// in shard order.
    ///
    /// Panics if the budget is zero or the round has no shards, which a live
    /// round treats as a no-op.
    pub fn solve(self, total_cache_size: u64) -> Vec<u64> {
        assert!(total_cache_size > 0, "budget must be positive");
        assert!(!self.batch.is_empty(), "round has no shards");
        let total_evicters = self.batch.len();
        let mut batches = [self.batch];
        plan(&mut batches, total_cache_size, self.total_bytes_loaded, total_evicters);
        let [batch] = batches;
        batch.into_iter().map(|entry| entry.new_size).collect()
    }
}
