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

use std::{fmt::Debug, sync::Arc};

/// Index of a logical worker in the balancer's worker table.
pub type WorkerId = usize;

/// A cache shard whose memory budget is managed by the balancer.
///
/// Each shard exposes its current budget, how many bytes it has loaded since
/// the budget was last set, and its resident size. The balancer reads these
/// during a rebalance round and installs new budgets through
/// [`update_memory_limit`].
///
/// # Contract
///
/// [`update_memory_limit`] must reset the counter behind [`bytes_loaded`] to
/// zero, so each rebalance round observes only the load accumulated since the
/// previous one.
///
/// The read accessors may be called from a worker other than the shard's home
/// worker, concurrently with the shard's own activity. Implementations back
/// them with atomics or equivalent. [`update_memory_limit`] is only invoked
/// from the shard's home worker, serialized with registration changes on that
/// worker.
///
/// [`update_memory_limit`]: Evicter::update_memory_limit
/// [`bytes_loaded`]: Evicter::bytes_loaded
pub trait Evicter: Send + Sync + 'static + Debug {
    /// Current memory budget of the shard, in bytes.
    fn memory_limit(&self) -> u64;

    /// Bytes loaded into the shard since the budget was last updated.
    fn bytes_loaded(&self) -> u64;

    /// Bytes currently resident in the shard.
    fn in_memory_size(&self) -> u64;

    /// Install a new memory budget and reset the bytes-loaded counter.
    fn update_memory_limit(&self, limit: u64);
}

/// Identity key of a registered evicter.
///
/// Two `Arc<dyn Evicter>` clones of the same allocation share the key, so a
/// shard registered by one handle can be deregistered by another.
pub(crate) fn evicter_addr(evicter: &Arc<dyn Evicter>) -> usize {
    Arc::as_ptr(evicter) as *const () as usize
}
