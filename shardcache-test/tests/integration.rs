//! End-to-end scenarios driving the real cluster client against
//! [`shardcache_test::FakeShard`] endpoints instead of a live Redis.

use serial_test::serial;
use shardcache::{Cache, CacheConfig, CachedValue, ClusterCache, ClusterConfig, RouterKind};
use shardcache_core::HostMap;
use shardcache_test::FakeShard;

#[test]
fn single_host_round_trip() {
    let shard = FakeShard::spawn();
    let cache = Cache::connect(shard.host_config("primary"), CacheConfig::new());

    assert_eq!(cache.get::<String>("k").unwrap(), None);
    assert!(cache.set("k", &"v".to_string(), None).unwrap());
    assert_eq!(cache.get::<String>("k").unwrap(), Some("v".to_string()));
    assert!(cache.delete("k").unwrap());
    assert_eq!(cache.get::<String>("k").unwrap(), None);
}

#[test]
fn namespace_isolation() {
    let shard = FakeShard::spawn();
    let a = Cache::connect(shard.host_config("primary"), CacheConfig::new());
    let b = Cache::connect(
        shard.host_config("primary"),
        CacheConfig::new().with_namespace("t:"),
    );

    assert!(a.set("k", &"v".to_string(), None).unwrap());
    assert_eq!(b.get::<String>("k").unwrap(), None);
    assert_eq!(a.get::<String>("k").unwrap(), Some("v".to_string()));
}

#[test]
fn get_many_of_one_key_matches_get() {
    let shard = FakeShard::spawn();
    let cache = Cache::connect(shard.host_config("primary"), CacheConfig::new());
    assert!(cache.set("k", &"v".to_string(), None).unwrap());

    let single = cache.get::<String>("k").unwrap();
    let many = cache.get_many::<String>(&["k"]).unwrap();
    assert_eq!(many, vec![single]);
}

#[test]
fn empty_many_operations_are_trivially_satisfied() {
    let shard = FakeShard::spawn();
    let cache = Cache::connect(shard.host_config("primary"), CacheConfig::new());

    assert_eq!(cache.get_many::<String>(&[]).unwrap(), Vec::<Option<String>>::new());
    assert!(cache.set_many::<String>(&[], None).unwrap());
    assert!(cache.delete_many(&[]).unwrap());
}

fn four_shard_cluster() -> (Vec<FakeShard>, ClusterCache) {
    let shards: Vec<FakeShard> = (0..4).map(|_| FakeShard::spawn()).collect();
    let mut hosts = HostMap::new();
    for (i, shard) in shards.iter().enumerate() {
        let name = format!("h{i}");
        hosts.insert(name.clone().into(), shard.host_config(name));
    }
    let cache = ClusterCache::new(ClusterConfig::new(hosts).with_router(RouterKind::Consistent));
    (shards, cache)
}

#[test]
fn cluster_fanout_preserves_caller_order() {
    let (_shards, cache) = four_shard_cluster();
    let keys: Vec<String> = (0..10).map(|i| format!("key-{i}")).collect();
    for (i, key) in keys.iter().enumerate() {
        assert!(cache.set(key, &i.to_string(), None).unwrap());
    }

    let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    let values: Vec<Option<String>> = cache.get_many(&refs).unwrap();
    let expected: Vec<Option<String>> = (0..10).map(|i| Some(i.to_string())).collect();
    assert_eq!(values, expected);
}

#[test]
fn cluster_set_many_and_delete_many_fan_out_across_shards() {
    let (_shards, cache) = four_shard_cluster();
    let mapping: Vec<(&str, String)> = vec![
        ("a", "1".to_string()),
        ("b", "2".to_string()),
        ("c", "3".to_string()),
        ("d", "4".to_string()),
    ];
    assert!(cache.set_many(&mapping, None).unwrap());

    let keys = ["a", "b", "c", "d"];
    let values: Vec<Option<String>> = cache.get_many(&keys).unwrap();
    assert_eq!(
        values,
        vec![
            Some("1".to_string()),
            Some("2".to_string()),
            Some("3".to_string()),
            Some("4".to_string()),
        ]
    );

    assert!(cache.delete_many(&keys).unwrap());
    let after: Vec<Option<String>> = cache.get_many(&keys).unwrap();
    assert_eq!(after, vec![None, None, None, None]);
}

// `batch_mode()` documents itself as not safe for concurrent re-entry on
// the same façade instance; these two tests exercise that state machine
// back to back and are marked #[serial] the way the teacher crate guards
// tests that touch shared, non-thread-safe state.
#[test]
#[serial]
fn batch_memoize_resolves_in_registration_order_and_then_caches() {
    let shard = FakeShard::spawn();
    let cache = Cache::connect(shard.host_config("primary"), CacheConfig::new());

    let scope = cache.batch_mode();
    let mut pending = Vec::new();
    for i in 0..10i32 {
        let arg = i.to_string();
        let value = cache
            .memoize::<i32, _>(
                "shardcache_test::integration",
                "identity",
                None,
                &[arg.as_str()],
                &[],
                None,
                move || i,
            )
            .unwrap();
        match value {
            CachedValue::Pending(promise) => {
                assert!(promise.is_pending());
                pending.push(promise);
            }
            CachedValue::Ready(_) => panic!("memoize in batch mode must return a pending promise"),
        }
    }
    scope.finish().unwrap();

    for (i, promise) in pending.into_iter().enumerate() {
        assert!(promise.is_resolved());
        assert_eq!(promise.value(), Some(i as i32));
    }

    // A subsequent normal-mode call for the same key must hit the cache
    // instead of recomputing.
    let cached = cache
        .memoize::<i32, _>(
            "shardcache_test::integration",
            "identity",
            None,
            &["0"],
            &[],
            None,
            || panic!("must not recompute a cached memoized call"),
        )
        .unwrap();
    match cached {
        CachedValue::Ready(value) => assert_eq!(value, 0),
        CachedValue::Pending(_) => panic!("expected a ready value in normal mode"),
    }
}

#[test]
#[serial]
fn batch_cancel_resolves_nothing_and_leaves_cache_empty() {
    let shard = FakeShard::spawn();
    let cache = Cache::connect(shard.host_config("primary"), CacheConfig::new());

    let scope = cache.batch_mode();
    let value = cache
        .memoize::<i32, _>(
            "shardcache_test::integration",
            "cancelled",
            None,
            &[],
            &[],
            None,
            || 42,
        )
        .unwrap();
    let promise = match value {
        CachedValue::Pending(p) => p,
        CachedValue::Ready(_) => panic!("expected pending"),
    };
    scope.cancel();

    assert!(promise.is_pending());
    assert_eq!(cache.get::<i32>("shardcache_test::integration cancelled").unwrap(), None);
}

#[test]
fn invalidate_evicts_the_same_key_memoize_would_write() {
    use std::cell::Cell;
    use std::rc::Rc;

    let shard = FakeShard::spawn();
    let cache = Cache::connect(shard.host_config("primary"), CacheConfig::new());

    let calls = Rc::new(Cell::new(0));
    let compute = {
        let calls = Rc::clone(&calls);
        move || {
            calls.set(calls.get() + 1);
            7
        }
    };
    let first = cache
        .memoize::<i32, _>("m", "f", None, &["x"], &[], None, compute)
        .unwrap()
        .into_value();
    assert_eq!(first, Some(7));
    assert_eq!(calls.get(), 1);

    assert!(cache.invalidate("m", "f", None, &["x"], &[]).unwrap());

    let calls_after_invalidate = Rc::new(Cell::new(0));
    let compute_again = {
        let calls = Rc::clone(&calls_after_invalidate);
        move || {
            calls.set(calls.get() + 1);
            9
        }
    };
    let second = cache
        .memoize::<i32, _>("m", "f", None, &["x"], &[], None, compute_again)
        .unwrap()
        .into_value();
    assert_eq!(
        calls_after_invalidate.get(),
        1,
        "invalidated entry should have recomputed"
    );
    assert_eq!(second, Some(9));
}
