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

//! A minimal engine wiring: simulated cache shards report load, the balancer
//! moves budget toward the busy ones.
//!
//! ```bash
//! cargo run --example engine
//! ```

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use seesaw::{BalancerBuilder, Evicter};

const MB: u64 = 1024 * 1024;
const WORKERS: usize = 4;

/// Budget enforcement for one simulated shard, counters only.
#[derive(Debug, Default)]
struct ShardEvicter {
    memory_limit: AtomicU64,
    bytes_loaded: AtomicU64,
    in_memory_size: AtomicU64,
}

impl ShardEvicter {
    fn new(memory_limit: u64) -> Self {
        Self {
            memory_limit: AtomicU64::new(memory_limit),
            ..Default::default()
        }
    }

    fn load(&self, bytes: u64) {
        self.bytes_loaded.fetch_add(bytes, Ordering::Relaxed);
        let limit = self.memory_limit.load(Ordering::Relaxed);
        let size = self.in_memory_size.load(Ordering::Relaxed).saturating_add(bytes);
        self.in_memory_size.store(size.min(limit), Ordering::Relaxed);
    }
}

impl Evicter for ShardEvicter {
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
        // Evict down to the new budget right away.
        self.in_memory_size.fetch_min(limit, Ordering::Relaxed);
    }
}

#[tokio::main]
async fn main() -> seesaw::Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let balancer = BalancerBuilder::new(256 * MB).with_workers(WORKERS).build()?;

    let shards: Vec<Arc<ShardEvicter>> = (0..WORKERS)
        .map(|worker| {
            let shard = Arc::new(ShardEvicter::new(256 * MB / WORKERS as u64));
            balancer.add_evicter(worker, shard.clone());
            shard
        })
        .collect();

    // Skewed traffic, shard 0 sees most of the load.
    for (worker, shard) in shards.iter().enumerate() {
        let balancer = balancer.clone();
        let shard = shard.clone();
        tokio::spawn(async move {
            let weight = if worker == 0 { 16 } else { 1 };
            loop {
                for _ in 0..weight {
                    balancer.notify_access(worker);
                    shard.load(4096);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });
    }

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let budgets: Vec<u64> = shards.iter().map(|shard| shard.memory_limit() / MB).collect();
        tracing::info!(?budgets, read_ahead = balancer.is_read_ahead_enabled(), "budgets in MiB");
    }

    for (worker, shard) in shards.iter().enumerate() {
        let evicter: Arc<dyn Evicter> = shard.clone();
        balancer.remove_evicter(worker, &evicter);
    }
    balancer.close().await
}
