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

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::{
    evicter::{Evicter, WorkerId},
    rebalance::EvicterSnapshot,
};

/// Per-worker state: the evicters homed on the worker, keyed by allocation
/// address, and the access counter feeding the trigger policy.
#[derive(Debug, Default)]
pub(crate) struct WorkerInfo {
    pub evicters: Mutex<HashMap<usize, Arc<dyn Evicter>>>,
    pub access_count: AtomicU64,
}

impl WorkerInfo {
    /// Installs the planned budgets of a rebalance round on this worker and
    /// returns the resident bytes observed while doing so.
    ///
    /// Entries whose evicter was deregistered after the snapshot are skipped.
    /// The registry lock is held across the walk, so registration changes on
    /// this worker cannot interleave with the updates. The access counter is
    /// reset afterwards, also when the batch is empty.
    pub fn apply(&self, entries: &[EvicterSnapshot]) -> u64 {
        let mut cache_in_use = 0;
        {
            let registry = self.evicters.lock();
            for entry in entries {
                if !registry.contains_key(&entry.addr()) {
                    tracing::trace!(addr = entry.addr(), "[applier]: evicter deregistered since snapshot, skipping");
                    continue;
                }
                entry.evicter.update_memory_limit(entry.new_size);
                cache_in_use += entry.evicter.in_memory_size();
            }
        }
        self.access_count.store(0, Ordering::Relaxed);
        cache_in_use
    }
}

/// One worker's slice of a rebalance round, acked with the resident bytes the
/// apply step observed.
pub(crate) struct ApplyJob {
    pub entries: Vec<EvicterSnapshot>,
    pub ack: oneshot::Sender<u64>,
}

/// Task standing in for one logical worker. It serializes budget installs for
/// the worker and exits when the rebalance runner drops its sender.
pub(crate) struct Applier {
    pub worker: WorkerId,
    pub workers: Arc<[WorkerInfo]>,
    pub rx: flume::Receiver<ApplyJob>,
}

impl Applier {
    pub async fn run(self) {
        while let Ok(job) = self.rx.recv_async().await {
            let cache_in_use = self.workers[self.worker].apply(&job.entries);
            // The runner may have given up on the round, e.g. at shutdown.
            let _ = job.ack.send(cache_in_use);
        }
        tracing::trace!(worker = self.worker, "[applier]: exit");
    }
}
