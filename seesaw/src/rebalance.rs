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

use std::sync::Arc;

use crate::evicter::{evicter_addr, Evicter};

/// Point-in-time view of one registered evicter, taken under its worker's
/// registry lock.
///
/// Holding the `Arc` keeps the allocation alive for the rest of the round, so
/// the identity key stays unambiguous even if the shard is dropped after
/// deregistration.
#[derive(Debug)]
pub(crate) struct EvicterSnapshot {
    pub evicter: Arc<dyn Evicter>,
    pub old_size: u64,
    pub bytes_loaded: u64,
    pub new_size: u64,
}

impl EvicterSnapshot {
    pub fn capture(evicter: &Arc<dyn Evicter>) -> Self {
        Self {
            evicter: evicter.clone(),
            old_size: evicter.memory_limit(),
            bytes_loaded: evicter.bytes_loaded(),
            new_size: 0,
        }
    }

    pub fn addr(&self) -> usize {
        evicter_addr(&self.evicter)
    }
}

/// Computes the new budget of every snapshot entry in place.
///
/// Shards that loaded more than their budget share predicts grow, shards that
/// loaded less shrink, and a correction pass spreads the rounding remainder so
/// the new budgets sum to `total_cache_size` exactly. Callers guarantee a
/// non-zero budget and at least one entry.
pub(crate) fn plan(
    batches: &mut [Vec<EvicterSnapshot>],
    total_cache_size: u64,
    total_bytes_loaded: u64,
    total_evicters: usize,
) {
    let planned = allocate(batches, total_cache_size, total_bytes_loaded);
    let extra = total_cache_size as i64 - planned as i64;
    distribute_remainder(batches, extra, total_evicters);
}

/// Feedback step: each shard's budget moves by the difference between what it
/// actually loaded and what its current share of the budget predicts,
/// `old_size / total_cache_size * total_bytes_loaded`, clamped at zero.
/// Returns the sum of the planned budgets.
fn allocate(batches: &mut [Vec<EvicterSnapshot>], total_cache_size: u64, total_bytes_loaded: u64) -> u64 {
    let mut planned = 0;
    for entry in batches.iter_mut().flatten() {
        let mut expected = entry.old_size as f64;
        expected /= total_cache_size as f64;
        expected *= total_bytes_loaded as f64;

        let mut new_size = entry.bytes_loaded as i64;
        new_size -= expected as i64;
        new_size += entry.old_size as i64;
        entry.new_size = new_size.max(0) as u64;
        planned += entry.new_size;
    }
    planned
}

/// Correction step: truncation and zero-clamping leave the plan off the budget
/// by `extra` bytes. Spread the difference in per-pass steps of
/// `extra / total_evicters` (falling back to single bytes once that truncates
/// to zero), zeroing out entries that cannot absorb a full negative step.
///
/// Loop bookkeeping keeps `extra = total_cache_size - sum(new_size)`, so a
/// negative `extra` always leaves at least one positive entry to take the next
/// step, and every pass moves `extra` strictly toward zero without crossing
/// it.
fn distribute_remainder(batches: &mut [Vec<EvicterSnapshot>], mut extra: i64, total_evicters: usize) {
    while extra != 0 {
        let mut delta = extra / total_evicters as i64;
        if delta == 0 {
            delta = extra.signum();
        }
        for entry in batches.iter_mut().flatten() {
            if extra == 0 {
                break;
            }
            let adjusted = entry.new_size as i64 + delta;
            if adjusted >= 0 {
                entry.new_size = adjusted as u64;
                extra -= delta;
            } else {
                extra += entry.new_size as i64;
                entry.new_size = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    use super::*;
    use crate::test_utils::StubEvicter;

    fn snapshot(old_size: u64, bytes_loaded: u64) -> EvicterSnapshot {
        let evicter: Arc<dyn Evicter> = Arc::new(StubEvicter::with_state(old_size, bytes_loaded, 0));
        EvicterSnapshot::capture(&evicter)
    }

    fn run(mut batches: Vec<Vec<EvicterSnapshot>>, total_cache_size: u64) -> Vec<u64> {
        let total_bytes_loaded = batches.iter().flatten().map(|e| e.bytes_loaded).sum();
        let total_evicters = batches.iter().map(|b| b.len()).sum();
        plan(&mut batches, total_cache_size, total_bytes_loaded, total_evicters);
        batches.iter().flatten().map(|e| e.new_size).collect_vec()
    }

    #[test]
    fn test_budget_follows_load() {
        // The hot shard loaded twice its fair share, the cold one a quarter.
        let batches = vec![vec![snapshot(600, 400)], vec![snapshot(400, 100)]];
        assert_eq!(run(batches, 1000), vec![700, 300]);
    }

    #[test]
    fn test_rounding_remainder_returned_to_budget() {
        // Truncated expectations overshoot by two bytes; the correction pass
        // takes them back one byte at a time.
        let batches = vec![vec![snapshot(3, 2), snapshot(3, 2), snapshot(4, 2)]];
        let sizes = run(batches, 10);
        assert_eq!(sizes, vec![3, 3, 4]);
        assert_eq!(sizes.iter().sum::<u64>(), 10);
    }

    #[test]
    fn test_idle_round_keeps_budgets() {
        let batches = vec![vec![snapshot(600, 0)], vec![snapshot(400, 0)]];
        assert_eq!(run(batches, 1000), vec![600, 400]);
    }

    #[test]
    fn test_starved_shard_donates_everything() {
        // All load went to one shard; the other bottoms out at zero and the
        // correction pass funnels the whole budget to the hot one.
        let batches = vec![vec![snapshot(500, 0), snapshot(500, 5000)]];
        assert_eq!(run(batches, 1000), vec![0, 1000]);
    }

    #[test]
    fn test_single_evicter_absorbs_full_budget() {
        let batches = vec![vec![snapshot(100, 0)]];
        assert_eq!(run(batches, 1000), vec![1000]);
    }

    #[test]
    fn test_undersized_budgets_grow_to_budget() {
        // Current limits sum to less than the budget, e.g. right after the
        // budget was raised. Conservation still pulls the sum up to it.
        let batches = vec![vec![snapshot(10, 5)], vec![snapshot(30, 5)]];
        let sizes = run(batches, 1000);
        assert_eq!(sizes.iter().sum::<u64>(), 1000);
    }

    #[test]
    fn test_conservation_randomized() {
        let mut rng = SmallRng::seed_from_u64(42);
        for _ in 0..200 {
            let total_cache_size = rng.random_range(1..=1_000_000);
            let workers = rng.random_range(1..=4);
            let evicters = rng.random_range(1..=24);

            let mut batches: Vec<Vec<EvicterSnapshot>> = (0..workers).map(|_| vec![]).collect_vec();
            for i in 0..evicters {
                let old_size = rng.random_range(0..=total_cache_size);
                let bytes_loaded = rng.random_range(0..=2 * total_cache_size);
                batches[i % workers].push(snapshot(old_size, bytes_loaded));
            }

            let sizes = run(batches, total_cache_size);
            assert_eq!(
                sizes.iter().sum::<u64>(),
                total_cache_size,
                "budget leaked: total {total_cache_size}, sizes {sizes:?}"
            );
        }
    }
}
