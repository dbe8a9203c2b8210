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

use std::{sync::Arc, time::Duration};

use seesaw::{test_utils::StubEvicter, BalancerBuilder, BalancerOptions, Evicter};
use tokio::time::sleep;

const MB: u64 = 1024 * 1024;

fn dyn_evicter(stub: &Arc<StubEvicter>) -> Arc<dyn Evicter> {
    stub.clone()
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_forced_round_moves_budget_toward_load() {
    let balancer = BalancerBuilder::new(1000).with_workers(2).build().unwrap();

    // The hot shard loaded twice its fair share, the cold one a quarter.
    let a = Arc::new(StubEvicter::with_state(600, 400, 0));
    let b = Arc::new(StubEvicter::with_state(400, 100, 0));
    balancer.add_evicter(0, a.clone());
    balancer.add_evicter(1, b.clone());

    // No accesses reported, so the first round fires on the 500ms timeout.
    sleep(Duration::from_millis(520)).await;

    assert_eq!(a.updates(), vec![700]);
    assert_eq!(b.updates(), vec![300]);
    assert_eq!(a.memory_limit() + b.memory_limit(), balancer.total_cache_size());
    // Installing a budget resets the load counters.
    assert_eq!(a.bytes_loaded(), 0);
    assert_eq!(b.bytes_loaded(), 0);
    // Nothing resident yet, read-ahead stays permitted.
    assert!(balancer.is_read_ahead_enabled());

    balancer.remove_evicter(0, &dyn_evicter(&a));
    balancer.remove_evicter(1, &dyn_evicter(&b));
    balancer.close().await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_access_threshold_triggers_round_early() {
    // A timeout far beyond the test so only the access path can trigger.
    let balancer = BalancerBuilder::new(1000)
        .with_workers(2)
        .with_rebalance_timeout_ms(600_000)
        .build()
        .unwrap();

    let stub = Arc::new(StubEvicter::new(100));
    balancer.add_evicter(0, stub.clone());

    // 99 accesses spread over both workers stay below the threshold.
    for _ in 0..60 {
        balancer.notify_access(0);
    }
    for _ in 0..39 {
        balancer.notify_access(1);
    }
    sleep(Duration::from_millis(100)).await;
    assert!(stub.updates().is_empty());

    // The 100th crosses it; the single shard absorbs the whole budget.
    balancer.notify_access(1);
    sleep(Duration::from_millis(30)).await;
    assert_eq!(stub.updates(), vec![1000]);

    // The round reset the counters, so no follow-up round without traffic.
    sleep(Duration::from_millis(300)).await;
    assert_eq!(stub.updates(), vec![1000]);

    for _ in 0..100 {
        balancer.notify_access(0);
    }
    sleep(Duration::from_millis(30)).await;
    assert_eq!(stub.updates(), vec![1000, 1000]);

    balancer.remove_evicter(0, &dyn_evicter(&stub));
    balancer.close().await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_budget_conserved_across_workers() {
    let total = 10_000;
    let balancer = BalancerBuilder::new(total).with_workers(4).build().unwrap();

    // Worker 3 stays empty on purpose.
    let stubs = [
        (0, Arc::new(StubEvicter::with_state(2000, 5000, 0))),
        (0, Arc::new(StubEvicter::with_state(3000, 0, 0))),
        (1, Arc::new(StubEvicter::with_state(1000, 1000, 0))),
        (2, Arc::new(StubEvicter::with_state(4000, 0, 0))),
    ];
    for (worker, stub) in &stubs {
        balancer.add_evicter(*worker, stub.clone());
    }

    sleep(Duration::from_millis(520)).await;
    let round_one: u64 = stubs.iter().map(|(_, stub)| stub.memory_limit()).sum();
    assert_eq!(round_one, total);
    assert!(stubs.iter().all(|(_, stub)| !stub.updates().is_empty()));

    // New load between rounds shifts the split but never the sum.
    stubs[1].1.record_load(4000);
    stubs[3].1.record_load(500);
    sleep(Duration::from_millis(500)).await;
    let round_two: u64 = stubs.iter().map(|(_, stub)| stub.memory_limit()).sum();
    assert_eq!(round_two, total);

    for (worker, stub) in &stubs {
        balancer.remove_evicter(*worker, &dyn_evicter(stub));
    }
    balancer.close().await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_read_ahead_gate_latches() {
    let balancer = BalancerBuilder::new(1000).with_workers(1).build().unwrap();

    let stub = Arc::new(StubEvicter::with_state(1000, 0, 800));
    balancer.add_evicter(0, stub.clone());

    // 80% usage keeps the gate open.
    sleep(Duration::from_millis(520)).await;
    assert!(balancer.is_read_ahead_enabled());

    // Exactly the 9/10 ratio closes it.
    stub.set_in_memory_size(900);
    sleep(Duration::from_millis(500)).await;
    assert!(!balancer.is_read_ahead_enabled());

    // Closed is closed, even after usage drops again.
    stub.set_in_memory_size(0);
    sleep(Duration::from_millis(500)).await;
    assert!(!balancer.is_read_ahead_enabled());

    balancer.remove_evicter(0, &dyn_evicter(&stub));
    balancer.close().await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_zero_budget_round_is_noop() {
    let balancer = BalancerBuilder::new(0).with_workers(1).build().unwrap();

    let stub = Arc::new(StubEvicter::with_state(600, 400, 600));
    balancer.add_evicter(0, stub.clone());

    sleep(Duration::from_millis(1100)).await;
    assert!(stub.updates().is_empty());
    assert_eq!(stub.memory_limit(), 600);
    // The round bails out before the gate check.
    assert!(balancer.is_read_ahead_enabled());

    balancer.remove_evicter(0, &dyn_evicter(&stub));
    balancer.close().await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_close_without_evicters() {
    let balancer = BalancerBuilder::new(64 * MB).build().unwrap();
    sleep(Duration::from_millis(1100)).await;
    balancer.close().await.unwrap();
    // Closing twice is a no-op.
    balancer.close().await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_cloned_handles_share_state() {
    let balancer = BalancerBuilder::new(1000).with_workers(2).build().unwrap();
    let clone = balancer.clone();

    let stub = Arc::new(StubEvicter::new(100));
    clone.add_evicter(1, stub.clone());

    sleep(Duration::from_millis(520)).await;
    assert_eq!(stub.memory_limit(), 1000);

    balancer.remove_evicter(1, &dyn_evicter(&stub));
    clone.close().await.unwrap();
    balancer.close().await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
#[should_panic(expected = "already registered on worker")]
async fn test_duplicate_registration_panics() {
    let balancer = BalancerBuilder::new(1000).with_workers(1).build().unwrap();
    let evicter: Arc<dyn Evicter> = Arc::new(StubEvicter::new(100));
    balancer.add_evicter(0, evicter.clone());
    balancer.add_evicter(0, evicter.clone());
}

#[test_log::test(tokio::test(start_paused = true))]
#[should_panic(expected = "already registered on another worker")]
async fn test_cross_worker_registration_panics() {
    let balancer = BalancerBuilder::new(1000).with_workers(2).build().unwrap();
    let evicter: Arc<dyn Evicter> = Arc::new(StubEvicter::new(100));
    balancer.add_evicter(0, evicter.clone());
    balancer.add_evicter(1, evicter.clone());
}

#[test_log::test(tokio::test(start_paused = true))]
#[should_panic(expected = "is not registered")]
async fn test_remove_unregistered_panics() {
    let balancer = BalancerBuilder::new(1000).with_workers(1).build().unwrap();
    let evicter: Arc<dyn Evicter> = Arc::new(StubEvicter::new(100));
    balancer.remove_evicter(0, &evicter);
}

#[test_log::test(tokio::test(start_paused = true))]
#[should_panic(expected = "out of range")]
async fn test_worker_out_of_range_panics() {
    let balancer = BalancerBuilder::new(1000).with_workers(2).build().unwrap();
    balancer.add_evicter(2, Arc::new(StubEvicter::new(100)));
}

#[test_log::test(tokio::test(start_paused = true))]
#[should_panic(expected = "still registered")]
async fn test_close_with_live_evicters_panics() {
    let balancer = BalancerBuilder::new(1000).with_workers(1).build().unwrap();
    balancer.add_evicter(0, Arc::new(StubEvicter::new(100)));
    let _ = balancer.close().await;
}

#[test_log::test]
fn test_dedicated_runtime_drives_rounds() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    let balancer = BalancerBuilder::new(1000)
        .with_workers(1)
        .with_check_interval(Duration::from_millis(5))
        .with_rebalance_timeout_ms(10)
        .with_runtime(runtime)
        .build()
        .unwrap();

    let stub = Arc::new(StubEvicter::new(100));
    balancer.add_evicter(0, stub.clone());

    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(stub.memory_limit(), 1000);

    balancer.remove_evicter(0, &dyn_evicter(&stub));
    // Dropping the last handle shuts the owned runtime down in the
    // background.
    drop(balancer);
}

#[test_log::test]
fn test_options_serde_round_trip() {
    let options = BalancerOptions {
        total_cache_size: 64 * MB,
        workers: 4,
        check_interval: Duration::from_millis(10),
        access_threshold: 50,
        rebalance_timeout_ms: 200,
        read_ahead_numerator: 4,
        read_ahead_denominator: 5,
    };
    let text = serde_json::to_string(&options).unwrap();
    let back: BalancerOptions = serde_json::from_str(&text).unwrap();
    assert_eq!(back, options);

    let balancer = BalancerBuilder::from(back)
        .with_runtime(tokio::runtime::Runtime::new().unwrap())
        .build()
        .unwrap();
    assert_eq!(balancer.total_cache_size(), 64 * MB);
    assert_eq!(balancer.workers(), 4);
}
