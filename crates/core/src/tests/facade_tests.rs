// Copyright © 2026 Kirky.X
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

//! Read-through scenarios across both tiers and the single-flight path

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::memory_facade;
use crate::cache::{CacheFacade, PrefixSetting};
use crate::codec::CacheKey;
use crate::types::{CacheError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Item {
    id: String,
    num: i64,
}

fn records() -> Vec<PrefixSetting> {
    vec![PrefixSetting::new(
        "records",
        Duration::from_secs(10),
        Duration::from_secs(60),
    )]
}

fn key(id: &str) -> CacheKey {
    CacheKey::new("records", id).expect("valid key")
}

/// Loader returning `Item { id, num }` after `delay`, counting its calls.
fn counting_loader(
    calls: Arc<AtomicUsize>,
    id: &'static str,
    num: i64,
    delay: Duration,
) -> impl FnOnce() -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<Item>>> + Send>>
{
    move || {
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(Some(Item {
                id: id.to_string(),
                num,
            }))
        })
    }
}

async fn exploding_origin() -> Result<Option<Item>> {
    panic!("origin exploded")
}

#[tokio::test(start_paused = true)]
async fn test_local_then_shared_ttl_windows() {
    let (facade, shards) = memory_facade(&["server1"], records());
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key("r1");

    let first = facade
        .get_by_func(&k, counting_loader(calls.clone(), "r1", 80, Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(first.num, 80);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(facade.local().get("records:r1").is_some());
    assert!(shards[0].contains("ca:records:r1"));

    // inside the local TTL
    tokio::time::advance(Duration::from_secs(5)).await;
    let second: Item = facade
        .get_by_func(&k, counting_loader(calls.clone(), "r1", 0, Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(second, first);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // local expired, shared still live
    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(facade.local().get("records:r1").is_none());
    let third: Item = facade
        .get_by_func(&k, counting_loader(calls.clone(), "r1", 0, Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(third, first);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(facade.local().get("records:r1").is_some());

    let stats = facade.stats();
    assert_eq!(stats.local_hits, 1);
    assert_eq!(stats.shared_hits, 1);
    assert_eq!(stats.loads, 1);

    // both tiers expired
    tokio::time::advance(Duration::from_secs(50)).await;
    let fourth: Item = facade
        .get_by_func(&k, counting_loader(calls.clone(), "r1", 81, Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(fourth.num, 81);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_fifty_concurrent_callers_one_origin_call() {
    let (facade, _) = memory_facade(&["server1", "server2"], records());
    let calls = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let facade = facade.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                facade
                    .get_by_func(
                        &key("r2"),
                        counting_loader(calls, "r2", 2, Duration::from_millis(100)),
                    )
                    .await
            })
        })
        .collect();

    for handle in handles {
        let item = handle.await.unwrap().unwrap();
        assert_eq!(item.id, "r2");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(facade.coordinator().joins(), 49);
    assert_eq!(facade.stats().in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn test_origin_error_shared_and_never_cached() {
    let (facade, shards) = memory_facade(&["server1"], records());
    let calls = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let facade = facade.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                facade
                    .get_by_func::<Item, _, _>(&key("r3"), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Err(CacheError::origin("connection reset"))
                    })
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(
            handle.await.unwrap(),
            Err(CacheError::Origin("connection reset".to_string()))
        );
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert!(shards[0].is_empty());
    assert!(facade.local().is_empty());
    assert_eq!(facade.get::<Item>(&key("r3")).await, Err(CacheError::Miss));
    assert_eq!(facade.stats().load_errors, 1);
}

#[tokio::test]
async fn test_mget_matches_get_with_one_shard_down() {
    let (facade, shards) = memory_facade(&["server1", "server2", "server3"], records());
    let keys: Vec<CacheKey> = (0..30).map(|i| key(&format!("r{}", i))).collect();
    for (i, k) in keys.iter().enumerate().take(24) {
        let item = Item {
            id: k.id().to_string(),
            num: i as i64,
        };
        facade.set(k, &item).await.unwrap();
    }
    facade.local().clear();

    let down = "server2";
    shards[1].set_reachable(false);

    let batched = facade.mget::<Item>(&keys).await.into_slots();
    assert_eq!(batched.len(), keys.len());

    for (k, slot) in keys.iter().zip(batched) {
        let single = facade.get::<Item>(k).await;
        let shard = facade.shared().unwrap().locate(k);
        match (slot.into_result(), single) {
            (Ok(a), Ok(b)) => assert_eq!(a, b),
            (Err(a), Err(b)) if a.is_backend() => {
                assert!(b.is_backend());
                assert_eq!(shard, down);
            }
            (Err(a), Err(b)) => {
                assert_eq!(a, b);
                assert_ne!(shard, down);
            }
            (a, b) => panic!("mget {:?} != get {:?} for {}", a, b, k),
        }
    }
}

#[tokio::test]
async fn test_mget_by_func_loads_unreachable_shard_keys_from_origin() {
    let (facade, shards) = memory_facade(&["server1", "server2"], records());
    let keys: Vec<CacheKey> = (0..20).map(|i| key(&format!("r{}", i))).collect();
    shards[0].set_reachable(false);

    let calls = Arc::new(AtomicUsize::new(0));
    let loader_calls = calls.clone();
    let result = facade
        .mget_by_func(&keys, move |k: &CacheKey| {
            let calls = loader_calls.clone();
            let id = k.id().to_string();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Some(Item { id, num: 1 }))
            }
        })
        .await;

    assert_eq!(result.hits(), 20);
    assert_eq!(calls.load(Ordering::SeqCst), 20);
}

#[tokio::test(start_paused = true)]
async fn test_loader_panic_releases_all_waiters() {
    let (facade, _) = memory_facade(&["server1"], records());

    let waiters: Vec<_> = (0..5)
        .map(|_| {
            let facade = facade.clone();
            tokio::spawn(async move {
                facade
                    .get_by_func(&key("boom"), || async {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        exploding_origin().await
                    })
                    .await
            })
        })
        .collect();

    for waiter in waiters {
        assert!(matches!(
            waiter.await.unwrap(),
            Err(CacheError::LoaderPanicked(_))
        ));
    }

    // nothing stuck, nothing cached
    assert_eq!(facade.coordinator().in_flight(), 0);
    let calls = Arc::new(AtomicUsize::new(0));
    let item = facade
        .get_by_func(&key("boom"), counting_loader(calls.clone(), "boom", 1, Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(item.num, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_caller_leaves_load_running() {
    let (facade, _) = memory_facade(&["server1"], records());
    let calls = Arc::new(AtomicUsize::new(0));

    let patient = {
        let facade = facade.clone();
        let calls = calls.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            facade
                .get_by_func(
                    &key("r5"),
                    counting_loader(calls, "r5", 5, Duration::from_millis(100)),
                )
                .await
        })
    };

    let impatient = facade
        .get_by_func_until(
            &key("r5"),
            counting_loader(calls.clone(), "r5", 5, Duration::from_millis(100)),
            tokio::time::sleep(Duration::from_millis(20)),
        )
        .await;
    assert_eq!(impatient, Err(CacheError::Cancelled));

    let item = patient.await.unwrap().unwrap();
    assert_eq!(item.num, 5);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // the load populated the tiers for later callers
    assert_eq!(facade.get::<Item>(&key("r5")).await.unwrap(), item);
}

#[tokio::test]
async fn test_clear_all_resets_every_prefix() {
    let mut settings = records();
    settings.push(PrefixSetting::new(
        "users",
        Duration::from_secs(10),
        Duration::from_secs(60),
    ));
    let (facade, shards): (CacheFacade, _) = memory_facade(&["server1"], settings);

    facade.set(&key("r1"), &1_i64).await.unwrap();
    facade
        .set(&CacheKey::new("users", "u1").unwrap(), &2_i64)
        .await
        .unwrap();

    assert_eq!(facade.clear_all().await.unwrap(), 4);
    assert!(shards[0].is_empty());
    assert!(facade.local().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_huge_prefix_ttls_are_clamped() {
    let forever = Duration::from_secs(u64::MAX);
    let (facade, shards) = memory_facade(
        &["server1"],
        vec![PrefixSetting::new("records", forever, forever)],
    );

    facade.set(&key("r9"), &9_i64).await.unwrap();
    let loaded: i64 = facade
        .get_by_func(&key("r10"), || async { Ok(Some(10_i64)) })
        .await
        .unwrap();
    assert_eq!(loaded, 10);

    tokio::time::advance(Duration::from_secs(86400 * 365)).await;
    assert_eq!(facade.get::<i64>(&key("r9")).await.unwrap(), 9);
    assert_eq!(facade.get::<i64>(&key("r10")).await.unwrap(), 10);
    assert!(shards[0].contains("ca:records:r10"));
}
