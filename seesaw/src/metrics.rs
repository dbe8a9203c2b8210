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

use std::borrow::Cow;

use mixtrics::{
    metrics::{BoxedCounter, BoxedGauge, BoxedHistogram, BoxedRegistry},
    registry::noop::NoopMetricsRegistry,
};

/// Balancer metrics.
#[derive(Debug)]
pub struct Metrics {
    /// Completed rebalance rounds.
    pub rebalance: BoxedCounter,
    /// Ticks that stayed below the access threshold.
    pub skip: BoxedCounter,
    /// Triggers folded into an already pending round.
    pub coalesce: BoxedCounter,
    /// Rounds skipped for a zero budget or an empty registry.
    pub noop: BoxedCounter,
    /// Wall time of a rebalance round, in seconds.
    pub rebalance_duration: BoxedHistogram,
    /// Resident bytes summed over all shards by the latest round.
    pub memory_usage: BoxedGauge,
    /// Read-ahead gate state, `1` open, `0` closed.
    pub read_ahead: BoxedGauge,
}

impl Metrics {
    /// Registers the balancer metric family in `registry` under the given
    /// balancer name.
    pub fn new(name: impl Into<Cow<'static, str>>, registry: &BoxedRegistry) -> Self {
        let name = name.into();

        let op_total = registry.register_counter_vec(
            "seesaw_balancer_op_total".into(),
            "balancer operation counts".into(),
            &["name", "op"],
        );
        let rebalance = op_total.counter(&[name.clone(), "rebalance".into()]);
        let skip = op_total.counter(&[name.clone(), "skip".into()]);
        let coalesce = op_total.counter(&[name.clone(), "coalesce".into()]);
        let noop = op_total.counter(&[name.clone(), "noop".into()]);

        let rebalance_duration = registry
            .register_histogram_vec(
                "seesaw_balancer_rebalance_duration".into(),
                "balancer rebalance round durations".into(),
                &["name"],
            )
            .histogram(&[name.clone()]);

        let memory_usage = registry
            .register_gauge_vec(
                "seesaw_balancer_memory_usage".into(),
                "balancer observed resident bytes".into(),
                &["name"],
            )
            .gauge(&[name.clone()]);

        let read_ahead = registry
            .register_gauge_vec(
                "seesaw_balancer_read_ahead".into(),
                "balancer read-ahead gate state".into(),
                &["name"],
            )
            .gauge(&[name]);

        Self {
            rebalance,
            skip,
            coalesce,
            noop,
            rebalance_duration,
            memory_usage,
            read_ahead,
        }
    }

    /// Builds a noop metrics model for cases metrics are not cared.
    pub fn noop() -> Self {
        let registry: BoxedRegistry = Box::new(NoopMetricsRegistry);
        Self::new("noop", &registry)
    }
}
