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
    borrow::Cow,
    collections::hash_map::Entry,
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use flume::TrySendError;
use futures_util::future::join_all;
use itertools::Itertools;
use mixtrics::{metrics::BoxedRegistry, registry::noop::NoopMetricsRegistry};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{broadcast, oneshot},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

use crate::{
    error::{Error, Result},
    evicter::{evicter_addr, Evicter, WorkerId},
    metrics::Metrics,
    rebalance::{self, EvicterSnapshot},
    runtime::Spawner,
    worker::{Applier, ApplyJob, WorkerInfo},
};

/// Balancer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerOptions {
    /// Total memory budget shared by all registered shards, in bytes.
    pub total_cache_size: u64,
    /// Number of logical workers shards can be homed on.
    pub workers: usize,
    /// Period of the trigger policy check.
    pub check_interval: Duration,
    /// Accesses since the last round at which the next one is triggered
    /// before the timeout expires.
    pub access_threshold: u64,
    /// Interval after which a round is triggered regardless of accesses, in
    /// milliseconds.
    pub rebalance_timeout_ms: u64,
    /// Numerator of the usage ratio above which read-ahead is disabled.
    pub read_ahead_numerator: u64,
    /// Denominator of the usage ratio above which read-ahead is disabled.
    pub read_ahead_denominator: u64,
}

impl Default for BalancerOptions {
    fn default() -> Self {
        Self {
            total_cache_size: 0,
            workers: std::thread::available_parallelism().map(|p| p.get()).unwrap_or(1),
            check_interval: Duration::from_millis(20),
            access_threshold: 100,
            rebalance_timeout_ms: 500,
            read_ahead_numerator: 9,
            read_ahead_denominator: 10,
        }
    }
}

/// Builder of [`Balancer`].
pub struct BalancerBuilder {
    options: BalancerOptions,
    name: Cow<'static, str>,
    registry: BoxedRegistry,
    spawner: Option<Spawner>,
}

impl Debug for BalancerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalancerBuilder")
            .field("options", &self.options)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl From<BalancerOptions> for BalancerBuilder {
    fn from(options: BalancerOptions) -> Self {
        Self {
            options,
            name: "balancer".into(),
            registry: Box::new(NoopMetricsRegistry),
            spawner: None,
        }
    }
}

impl BalancerBuilder {
    /// Creates a builder with the given total memory budget and default
    /// options.
    pub fn new(total_cache_size: u64) -> Self {
        Self::from(BalancerOptions {
            total_cache_size,
            ..Default::default()
        })
    }

    /// Sets the number of logical workers shards can be homed on.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.options.workers = workers;
        self
    }

    /// Sets the period of the trigger policy check.
    pub fn with_check_interval(mut self, check_interval: Duration) -> Self {
        self.options.check_interval = check_interval;
        self
    }

    /// Sets the access count at which a round is triggered before the timeout
    /// expires.
    pub fn with_access_threshold(mut self, access_threshold: u64) -> Self {
        self.options.access_threshold = access_threshold;
        self
    }

    /// Sets the interval after which a round is triggered regardless of
    /// accesses, in milliseconds.
    pub fn with_rebalance_timeout_ms(mut self, rebalance_timeout_ms: u64) -> Self {
        self.options.rebalance_timeout_ms = rebalance_timeout_ms;
        self
    }

    /// Sets the usage ratio above which read-ahead is permanently disabled.
    pub fn with_read_ahead_ratio(mut self, numerator: u64, denominator: u64) -> Self {
        self.options.read_ahead_numerator = numerator;
        self.options.read_ahead_denominator = denominator;
        self
    }

    /// Sets the name of the balancer for logging and metrics labels.
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the registry the balancer metrics are registered in.
    ///
    /// Default: [`NoopMetricsRegistry`].
    pub fn with_metrics_registry(mut self, registry: BoxedRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Sets the runtime the balancer background tasks run on.
    ///
    /// Default: the runtime [`build`] is called in.
    ///
    /// [`build`]: BalancerBuilder::build
    pub fn with_runtime(mut self, runtime: impl Into<Spawner>) -> Self {
        self.spawner = Some(runtime.into());
        self
    }

    /// Builds the balancer and starts its background tasks.
    pub fn build(self) -> Result<Balancer> {
        let opts = &self.options;
        if opts.workers == 0 {
            return Err(Error::config("worker count must be positive"));
        }
        if opts.check_interval.is_zero() {
            return Err(Error::config("check interval must be positive"));
        }
        if opts.read_ahead_denominator == 0 {
            return Err(Error::config("read-ahead ratio denominator must be positive"));
        }

        let spawner = match self.spawner {
            Some(spawner) => spawner,
            None => Spawner::try_current()
                .ok_or_else(|| Error::config("no tokio runtime in scope, set one with `with_runtime`"))?,
        };

        let metrics = Arc::new(Metrics::new(self.name.clone(), &self.registry));
        metrics.read_ahead.absolute(1);

        let shared = Arc::new(Shared {
            total_cache_size: opts.total_cache_size,
            access_threshold: opts.access_threshold,
            rebalance_timeout_ms: opts.rebalance_timeout_ms,
            read_ahead_numerator: opts.read_ahead_numerator,
            read_ahead_denominator: opts.read_ahead_denominator,
            epoch: Instant::now(),
            last_rebalance_time: AtomicU64::new(0),
            read_ahead_ok: AtomicBool::new(true),
            workers: (0..opts.workers).map(|_| WorkerInfo::default()).collect(),
            metrics,
        });

        let (stop_tx, _) = broadcast::channel(1);
        let (trigger_tx, trigger_rx) = flume::bounded(1);

        let tick = {
            let shared = shared.clone();
            let mut stop_rx = stop_tx.subscribe();
            let check_interval = opts.check_interval;
            spawner.spawn(async move {
                let mut interval = tokio::time::interval(check_interval);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        biased;
                        _ = stop_rx.recv() => break,
                        _ = interval.tick() => shared.on_tick(&trigger_tx),
                    }
                }
                tracing::trace!("[balancer]: tick task exit");
            })
        };

        let (apply_txs, appliers): (Vec<_>, Vec<_>) = (0..opts.workers)
            .map(|worker| {
                let (tx, rx) = flume::unbounded();
                let applier = Applier {
                    worker,
                    workers: shared.workers.clone(),
                    rx,
                };
                (tx, applier)
            })
            .unzip();

        let runner = Runner {
            shared: shared.clone(),
            trigger_rx,
            apply_txs: apply_txs.into_boxed_slice(),
        };
        let runner = spawner.spawn(runner.run());
        let appliers = appliers.into_iter().map(|applier| spawner.spawn(applier.run())).collect_vec();

        tracing::info!(
            name = %self.name,
            total_cache_size = opts.total_cache_size,
            workers = opts.workers,
            "[balancer]: started"
        );

        Ok(Balancer {
            shared,
            stop_tx,
            tasks: Arc::new(Mutex::new(Some(Tasks { tick, runner, appliers }))),
            _spawner: spawner,
        })
    }
}

/// State shared by the balancer handles and its background tasks.
#[derive(Debug)]
struct Shared {
    total_cache_size: u64,
    access_threshold: u64,
    rebalance_timeout_ms: u64,
    read_ahead_numerator: u64,
    read_ahead_denominator: u64,

    /// Base of the balancer's microsecond clock.
    epoch: Instant,
    /// Microseconds since `epoch` at which the last round was triggered.
    last_rebalance_time: AtomicU64,
    read_ahead_ok: AtomicBool,

    workers: Arc<[WorkerInfo]>,
    metrics: Arc<Metrics>,
}

impl Shared {
    fn now_micros(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    /// Trigger policy, evaluated once per check interval.
    ///
    /// A round is triggered when the rebalance timeout has expired since the
    /// last one, or earlier once the workers have accumulated enough accesses.
    /// A trigger finding the slot occupied is folded into the pending round.
    fn on_tick(&self, trigger_tx: &flume::Sender<()>) {
        let now = self.now_micros();
        let last = self.last_rebalance_time.load(Ordering::Relaxed);
        // The timeout is kept in milliseconds, the clock in microseconds.
        if last + self.rebalance_timeout_ms * 1000 > now {
            let accesses: u64 = self
                .workers
                .iter()
                .map(|info| info.access_count.load(Ordering::Relaxed))
                .sum();
            if accesses < self.access_threshold {
                self.metrics.skip.increase(1);
                return;
            }
            tracing::trace!(accesses, "[balancer]: access threshold crossed");
        }
        self.last_rebalance_time.store(now, Ordering::Relaxed);
        match trigger_tx.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => {
                self.metrics.coalesce.increase(1);
                tracing::trace!("[balancer]: round already pending, trigger coalesced");
            }
            Err(TrySendError::Disconnected(())) => {}
        }
    }

    fn add_evicter(&self, worker: WorkerId, evicter: Arc<dyn Evicter>) {
        assert!(
            worker < self.workers.len(),
            "worker {worker} out of range, balancer has {} workers",
            self.workers.len()
        );
        let addr = evicter_addr(&evicter);
        debug_assert!(
            self.unregistered_elsewhere(worker, addr),
            "evicter {addr:#x} already registered on another worker"
        );
        match self.workers[worker].evicters.lock().entry(addr) {
            Entry::Vacant(v) => {
                v.insert(evicter);
            }
            Entry::Occupied(_) => panic!("evicter {addr:#x} already registered on worker {worker}"),
        }
        tracing::debug!(worker, addr, "[balancer]: evicter registered");
    }

    fn remove_evicter(&self, worker: WorkerId, evicter: &Arc<dyn Evicter>) {
        assert!(
            worker < self.workers.len(),
            "worker {worker} out of range, balancer has {} workers",
            self.workers.len()
        );
        let addr = evicter_addr(evicter);
        let prev = self.workers[worker].evicters.lock().remove(&addr);
        assert!(prev.is_some(), "evicter {addr:#x} is not registered on worker {worker}");
        tracing::debug!(worker, addr, "[balancer]: evicter deregistered");
    }

    fn unregistered_elsewhere(&self, worker: WorkerId, addr: usize) -> bool {
        self.workers
            .iter()
            .enumerate()
            .all(|(w, info)| w == worker || !info.evicters.lock().contains_key(&addr))
    }
}

/// Task driving rebalance rounds, one at a time.
///
/// It exits when the tick task drops the trigger sender, after running the
/// rounds still queued. Dropping the apply senders on exit releases the
/// appliers in turn.
struct Runner {
    shared: Arc<Shared>,
    trigger_rx: flume::Receiver<()>,
    apply_txs: Box<[flume::Sender<ApplyJob>]>,
}

impl Runner {
    async fn run(self) {
        while let Ok(()) = self.trigger_rx.recv_async().await {
            self.rebalance().await;
        }
        tracing::trace!("[balancer]: rebalance runner exit");
    }

    async fn rebalance(&self) {
        let start = std::time::Instant::now();

        // Snapshot every worker's registry under its lock.
        let mut batches = Vec::with_capacity(self.shared.workers.len());
        let mut total_evicters = 0;
        let mut total_bytes_loaded = 0;
        for info in self.shared.workers.iter() {
            let entries = {
                let registry = info.evicters.lock();
                registry.values().map(EvicterSnapshot::capture).collect_vec()
            };
            total_evicters += entries.len();
            total_bytes_loaded += entries.iter().map(|entry| entry.bytes_loaded).sum::<u64>();
            batches.push(entries);
        }

        if self.shared.total_cache_size == 0 || total_evicters == 0 {
            self.shared.metrics.noop.increase(1);
            tracing::trace!("[balancer]: nothing to rebalance");
            return;
        }

        rebalance::plan(
            &mut batches,
            self.shared.total_cache_size,
            total_bytes_loaded,
            total_evicters,
        );

        // Ship each batch to its worker and wait for all of them, collecting
        // the resident bytes the workers observed.
        let mut acks = Vec::with_capacity(batches.len());
        for (worker, entries) in batches.into_iter().enumerate() {
            let (ack_tx, ack_rx) = oneshot::channel();
            if self.apply_txs[worker].send(ApplyJob { entries, ack: ack_tx }).is_err() {
                tracing::error!(worker, "[balancer]: apply executor unreachable");
            }
            acks.push(ack_rx);
        }
        let cache_in_use: u64 = join_all(acks).await.into_iter().map(|ack| ack.unwrap_or_default()).sum();

        // One-way gate: once usage crosses the ratio, read-ahead stays off.
        if self.shared.read_ahead_ok.load(Ordering::Relaxed) {
            let ok = cache_in_use * self.shared.read_ahead_denominator
                < self.shared.total_cache_size * self.shared.read_ahead_numerator;
            if !ok {
                self.shared.read_ahead_ok.store(false, Ordering::Relaxed);
                self.shared.metrics.read_ahead.absolute(0);
                tracing::debug!(
                    cache_in_use,
                    total_cache_size = self.shared.total_cache_size,
                    "[balancer]: read-ahead disabled"
                );
            }
        }

        self.shared.metrics.memory_usage.absolute(cache_in_use);
        self.shared.metrics.rebalance.increase(1);
        self.shared.metrics.rebalance_duration.record(start.elapsed().as_secs_f64());
        tracing::debug!(
            total_evicters,
            total_bytes_loaded,
            cache_in_use,
            "[balancer]: rebalance finished"
        );
    }
}

#[derive(Debug)]
struct Tasks {
    tick: JoinHandle<()>,
    runner: JoinHandle<()>,
    appliers: Vec<JoinHandle<()>>,
}

/// Rebalances a fixed memory budget across the cache shards of an engine.
///
/// Shards register an [`Evicter`] on one of the balancer's logical workers
/// and report cache accesses with [`notify_access`]. A background task
/// periodically moves budget toward the shards under heavier load, keeping
/// the sum of all shard budgets equal to the total at the end of every round,
/// and permanently disables read-ahead once the cache has filled close to the
/// budget.
///
/// Handles are cheap clones of the same balancer. Dropping the last handle
/// stops the background tasks; [`close`] stops them gracefully and surfaces
/// task panics.
///
/// [`notify_access`]: Balancer::notify_access
/// [`close`]: Balancer::close
#[derive(Debug, Clone)]
pub struct Balancer {
    shared: Arc<Shared>,
    stop_tx: broadcast::Sender<()>,
    tasks: Arc<Mutex<Option<Tasks>>>,
    _spawner: Spawner,
}

impl Balancer {
    /// Registers an evicter on its home worker.
    ///
    /// The balancer holds a reference to the evicter until it is removed.
    /// Panics if the worker is out of range or the evicter is already
    /// registered.
    pub fn add_evicter(&self, worker: WorkerId, evicter: Arc<dyn Evicter>) {
        self.shared.add_evicter(worker, evicter);
    }

    /// Deregisters an evicter from its home worker.
    ///
    /// A round that already snapshot the evicter will skip it at apply.
    /// Panics if the worker is out of range or the evicter is not registered
    /// on it.
    pub fn remove_evicter(&self, worker: WorkerId, evicter: &Arc<dyn Evicter>) {
        self.shared.remove_evicter(worker, evicter);
    }

    /// Records one cache access on the given worker for the trigger policy.
    #[inline]
    pub fn notify_access(&self, worker: WorkerId) {
        self.shared.workers[worker].access_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether read-ahead is still permitted.
    ///
    /// Starts `true` and latches to `false` for the balancer's lifetime once
    /// observed usage crosses the configured ratio of the budget.
    pub fn is_read_ahead_enabled(&self) -> bool {
        self.shared.read_ahead_ok.load(Ordering::Relaxed)
    }

    /// Total memory budget shared by all registered shards, in bytes.
    pub fn total_cache_size(&self) -> u64 {
        self.shared.total_cache_size
    }

    /// Number of logical workers shards can be homed on.
    pub fn workers(&self) -> usize {
        self.shared.workers.len()
    }

    /// Stops the background tasks and waits for them to finish.
    ///
    /// A round already triggered still runs to completion first. Closing an
    /// already closed balancer is a no-op. Panics if evicters are still
    /// registered.
    pub async fn close(&self) -> Result<()> {
        let live: usize = self.shared.workers.iter().map(|info| info.evicters.lock().len()).sum();
        assert!(live == 0, "balancer closed with {live} evicters still registered");

        let tasks = self.tasks.lock().take();
        let Some(tasks) = tasks else {
            return Ok(());
        };

        // The tick task exits on the stop signal and drops the trigger
        // sender, which lets the runner and the appliers drain and exit in
        // turn.
        let _ = self.stop_tx.send(());
        tasks.tick.await?;
        tasks.runner.await?;
        for applier in tasks.appliers {
            applier.await?;
        }
        tracing::info!("[balancer]: closed");
        Ok(())
    }
}
