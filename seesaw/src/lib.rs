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

//! Dynamic memory budget rebalancing for sharded caches.
//!
//! A storage engine that splits its buffer cache into independent shards has
//! to decide how much memory each shard may use. `seesaw` manages that split
//! at runtime: every shard exposes an [`Evicter`] enforcing a budget, the
//! engine reports shard accesses, and a background task periodically moves
//! budget away from shards loading little toward shards loading a lot. At the
//! end of every round the shard budgets sum to the configured total exactly,
//! and no budget is negative.
//!
//! The balancer also watches overall usage and permanently disables
//! read-ahead once the cache has filled close to the budget.
//!
//! See [`BalancerBuilder`] for configuration and `examples/engine.rs` for a
//! minimal engine wiring.

mod balancer;
mod error;
mod evicter;
mod metrics;
mod rebalance;
mod runtime;
mod worker;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub mod prelude;
pub use prelude::*;
