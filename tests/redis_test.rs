// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Redis-backed integration tests.
//!
//! These run against a live server and are ignored by default:
//!
//! ```text
//! REDIS_URL=redis://127.0.0.1/ cargo test -- --ignored
//! ```

use probkit::backend::RedisBackend;
use probkit::bloom::BloomFilter;
use probkit::bloom::RedisBloomFilter;
use probkit::countmin::CountMinSketch;
use probkit::countmin::RedisCountMinSketch;
use probkit::cuckoo::CuckooFilter;
use probkit::cuckoo::RedisCuckooFilter;
use probkit::error::ErrorKind;
use probkit::hll::HyperLogLog;
use probkit::hll::RedisHyperLogLog;
use probkit::topk::RedisTopK;
use probkit::topk::TopK;

fn backend() -> RedisBackend {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
    RedisBackend::open(&url).expect("redis url must parse")
}

#[test]
#[ignore = "requires a running Redis server"]
fn test_bloom_basic_membership() {
    let backend = backend();
    let mut filter = RedisBloomFilter::with_accuracy(&backend, 1000, 0.001).unwrap();
    filter.insert_str("John").unwrap();
    filter.insert_str("Alice").unwrap();

    assert!(filter.lookup_str("John").unwrap());
    assert!(filter.lookup_str("Alice").unwrap());
    assert!(!filter.lookup_str("Jane").unwrap());
    assert!(filter.positive_rate().unwrap() > 0.0);
}

#[test]
#[ignore = "requires a running Redis server"]
fn test_bloom_metadata_reattach() {
    let backend = backend();
    let mut filter = RedisBloomFilter::with_accuracy(&backend, 100, 0.01).unwrap();
    filter.insert_str("shared").unwrap();

    let mut attached =
        RedisBloomFilter::from_metadata_key(&backend, filter.metadata_key()).unwrap();
    assert_eq!(attached.size(), filter.size());
    assert!(attached.lookup_str("shared").unwrap());

    // Writes through the second client are visible to the first.
    attached.insert_str("both").unwrap();
    assert!(filter.lookup_str("both").unwrap());
}

#[test]
#[ignore = "requires a running Redis server"]
fn test_bloom_cross_backend_portability() {
    let backend = backend();

    // Memory -> redis.
    let local = BloomFilter::with_accuracy(1000, 0.001);
    local.insert_str("John");
    local.insert_str("Alice");
    let mut remote = RedisBloomFilter::import(&backend, &local.export().unwrap()).unwrap();
    assert!(remote.lookup_str("John").unwrap());
    assert!(remote.lookup_str("Alice").unwrap());
    assert!(!remote.lookup_str("Jane").unwrap());

    // Redis -> memory.
    remote.insert_str("Carol").unwrap();
    let back = BloomFilter::import(&remote.export().unwrap()).unwrap();
    assert!(back.lookup_str("John"));
    assert!(back.lookup_str("Carol"));
    assert!(!back.lookup_str("Jane"));
}

#[test]
#[ignore = "requires a running Redis server"]
fn test_bloom_stream_io_is_unsupported() {
    let backend = backend();
    let mut filter = RedisBloomFilter::with_accuracy(&backend, 10, 0.01).unwrap();
    let mut buffer = Vec::new();
    assert_eq!(
        filter.write_to(&mut buffer).unwrap_err().kind(),
        ErrorKind::Unsupported
    );
    assert_eq!(
        filter.read_from(&mut buffer.as_slice()).unwrap_err().kind(),
        ErrorKind::Unsupported
    );
}

#[test]
#[ignore = "requires a running Redis server"]
fn test_cuckoo_add_delete_add() {
    let backend = backend();
    let mut filter = RedisCuckooFilter::with_accuracy(&backend, 20, 4, 500, 0.01).unwrap();
    filter.insert(b"cat", false).unwrap();
    filter.insert(b"dog", false).unwrap();

    assert!(filter.lookup(b"cat").unwrap());
    assert!(!filter.lookup(b"elephant").unwrap());
    assert_eq!(filter.length().unwrap(), 2);

    assert!(filter.remove(b"dog").unwrap());
    assert!(!filter.lookup(b"dog").unwrap());
    assert!(!filter.remove(b"dog").unwrap());
    assert_eq!(filter.length().unwrap(), 1);
}

#[test]
#[ignore = "requires a running Redis server"]
fn test_cuckoo_full_rollback() {
    let backend = backend();
    let mut filter = RedisCuckooFilter::new(&backend, 5, 1, 3).unwrap();
    for item in [&b"one"[..], b"two", b"three", b"four", b"five"] {
        filter.insert(item, false).unwrap();
    }
    let snapshot = filter.export().unwrap();

    let err = filter.insert(b"six", false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FilterFull);
    assert_eq!(filter.export().unwrap(), snapshot);
}

#[test]
#[ignore = "requires a running Redis server"]
fn test_cuckoo_cross_backend_portability() {
    let backend = backend();
    let local = CuckooFilter::new(32, 2, 3).unwrap();
    for i in 0..20 {
        local.insert(format!("item-{i}").as_bytes(), false).unwrap();
    }

    let mut remote = RedisCuckooFilter::import(&backend, &local.export().unwrap(), true).unwrap();
    assert_eq!(remote.length().unwrap(), local.length());
    for i in 0..20 {
        assert!(remote.lookup(format!("item-{i}").as_bytes()).unwrap());
    }

    let back = CuckooFilter::import(&remote.export().unwrap()).unwrap();
    assert!(back.equals(&local));
}

#[test]
#[ignore = "requires a running Redis server"]
fn test_cuckoo_metadata_reattach() {
    let backend = backend();
    let mut filter = RedisCuckooFilter::new(&backend, 16, 2, 3).unwrap();
    filter.insert(b"cat", false).unwrap();

    let mut attached =
        RedisCuckooFilter::from_metadata_key(&backend, filter.metadata_key()).unwrap();
    assert_eq!(attached.size(), 16);
    assert!(attached.lookup(b"cat").unwrap());
    assert_eq!(attached.length().unwrap(), 1);
}

#[test]
#[ignore = "requires a running Redis server"]
fn test_countmin_basic_counts() {
    let backend = backend();
    let mut sketch = RedisCountMinSketch::from_estimates(&backend, 0.001, 0.999).unwrap();
    sketch.update_once(b"foo").unwrap();
    sketch.update_once(b"foo").unwrap();
    sketch.update_once(b"bar").unwrap();

    assert_eq!(sketch.count(b"foo").unwrap(), 2);
    assert_eq!(sketch.count(b"bar").unwrap(), 1);
    assert_eq!(sketch.count(b"baz").unwrap(), 0);
    assert_eq!(sketch.all_sum(), 3);
}

#[test]
#[ignore = "requires a running Redis server"]
fn test_countmin_merge() {
    let backend = backend();
    let mut a = RedisCountMinSketch::new(&backend, 3, 128).unwrap();
    let mut b = RedisCountMinSketch::new(&backend, 3, 128).unwrap();
    a.update(b"x", 2).unwrap();
    b.update(b"x", 3).unwrap();

    a.merge(&b).unwrap();
    assert_eq!(a.count(b"x").unwrap(), 5);

    let mut c = RedisCountMinSketch::new(&backend, 2, 128).unwrap();
    assert_eq!(a.merge(&c).unwrap_err().kind(), ErrorKind::ShapeMismatch);
    assert_eq!(c.count(b"x").unwrap(), 0);
}

#[test]
#[ignore = "requires a running Redis server"]
fn test_countmin_cross_backend_portability() {
    let backend = backend();
    let local = CountMinSketch::new(3, 256).unwrap();
    local.update(b"foo", 7);
    local.update(b"bar", 2);

    let mut remote = RedisCountMinSketch::import(&backend, &local.export().unwrap()).unwrap();
    assert_eq!(remote.count(b"foo").unwrap(), 7);
    assert_eq!(remote.count(b"bar").unwrap(), 2);
    assert_eq!(remote.count(b"baz").unwrap(), 0);

    let back = CountMinSketch::import(&remote.export().unwrap()).unwrap();
    assert!(back.equals(&local));
}

#[test]
#[ignore = "requires a running Redis server"]
fn test_hll_cardinality() {
    let backend = backend();
    let mut log = RedisHyperLogLog::new(&backend, 128).unwrap();
    for i in 0..1000 {
        log.update(i.to_string().as_bytes()).unwrap();
    }
    let estimate = log.count(true, true).unwrap();
    assert!((estimate as f64 - 1000.0).abs() <= 20.0, "got {estimate}");
}

#[test]
#[ignore = "requires a running Redis server"]
fn test_hll_merge_and_equals() {
    let backend = backend();
    let mut a = RedisHyperLogLog::new(&backend, 64).unwrap();
    let mut b = RedisHyperLogLog::new(&backend, 64).unwrap();
    for i in 0..300 {
        a.update(format!("{i}").as_bytes()).unwrap();
        b.update(format!("{i}").as_bytes()).unwrap();
    }
    assert!(a.equals(&b).unwrap());
    a.merge(&b).unwrap();
    assert!(a.equals(&b).unwrap());
}

#[test]
#[ignore = "requires a running Redis server"]
fn test_hll_cross_backend_portability() {
    let backend = backend();
    let local = HyperLogLog::new(128).unwrap();
    for i in 0..1000 {
        local.update(i.to_string().as_bytes());
    }

    let mut remote = RedisHyperLogLog::import(&backend, &local.export().unwrap(), true).unwrap();
    assert_eq!(remote.count(true, true).unwrap(), local.count(true, true));

    let back = HyperLogLog::import(&remote.export().unwrap()).unwrap();
    assert!(back.equals(&local));
}

#[test]
#[ignore = "requires a running Redis server"]
fn test_topk_ordering() {
    let backend = backend();
    let mut topk = RedisTopK::new(&backend, 5, 0.001, 0.999).unwrap();
    let stream: &[(&str, u64)] = &[
        ("apple", 5),
        ("banana", 3),
        ("carrot", 3),
        ("grape", 2),
        ("peach", 2),
        ("plum", 2),
        ("mango", 1),
        ("orange", 1),
        ("kiwi", 1),
        ("pineapple", 1),
        ("melon", 1),
    ];
    for (element, count) in stream {
        for _ in 0..*count {
            topk.insert(element.as_bytes(), 1).unwrap();
        }
    }

    let values = topk.values().unwrap();
    assert_eq!(values.len(), 5);
    assert_eq!(values[0].element, "apple");
    assert_eq!(values[0].count, 5);
    for pair in values.windows(2) {
        assert!(
            pair[0].count > pair[1].count
                || (pair[0].count == pair[1].count && pair[0].element < pair[1].element)
        );
    }
}

#[test]
#[ignore = "requires a running Redis server"]
fn test_topk_metadata_reattach() {
    let backend = backend();
    let mut topk = RedisTopK::new(&backend, 3, 0.001, 0.999).unwrap();
    topk.insert(b"apple", 5).unwrap();

    let mut attached = RedisTopK::from_metadata_key(&backend, topk.metadata_key()).unwrap();
    assert_eq!(attached.k(), 3);
    let values = attached.values().unwrap();
    assert_eq!(values[0].element, "apple");
}

#[test]
#[ignore = "requires a running Redis server"]
fn test_topk_cross_backend_portability() {
    let backend = backend();
    let mut local = TopK::new(5, 0.001, 0.999).unwrap();
    for (element, count) in [("apple", 5u64), ("banana", 3), ("kiwi", 1)] {
        local.insert(element.as_bytes(), count).unwrap();
    }

    let mut remote = RedisTopK::import(&backend, &local.export().unwrap(), true).unwrap();
    let local_values = local.values();
    let remote_values = remote.values().unwrap();
    assert_eq!(local_values, remote_values);

    let back = TopK::import(&remote.export().unwrap()).unwrap();
    assert!(back.equals(&local));
}
