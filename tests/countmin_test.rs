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

use std::sync::Arc;
use std::thread;

use googletest::assert_that;
use googletest::prelude::ge;
use probkit::countmin::CountMinSketch;
use probkit::error::ErrorKind;

#[test]
fn test_basic_counts() {
    let sketch = CountMinSketch::from_estimates(0.001, 0.999).unwrap();
    sketch.update_once(b"foo");
    sketch.update_once(b"foo");
    sketch.update_once(b"bar");

    assert_eq!(sketch.count(b"foo"), 2);
    assert_eq!(sketch.count(b"bar"), 1);
    assert_eq!(sketch.count(b"baz"), 0);
}

#[test]
fn test_weighted_updates() {
    let sketch = CountMinSketch::new(4, 1024).unwrap();
    sketch.update(b"heavy", 1000);
    sketch.update(b"light", 1);
    assert_that!(sketch.count(b"heavy"), ge(1000));
    assert_that!(sketch.count(b"light"), ge(1));
    assert_eq!(sketch.all_sum(), 1001);
}

#[test]
fn test_count_never_underestimates() {
    // A deliberately tiny sketch so collisions are common.
    let sketch = CountMinSketch::new(2, 16).unwrap();
    let mut truth = std::collections::HashMap::new();
    for i in 0..500u32 {
        let item = format!("item-{}", i % 40);
        sketch.update_once(item.as_bytes());
        *truth.entry(item).or_insert(0u64) += 1;
    }
    for (item, count) in truth {
        assert_that!(sketch.count(item.as_bytes()), ge(count));
    }
}

#[test]
fn test_merge_distributivity() {
    let combined = CountMinSketch::from_estimates(0.01, 0.95).unwrap();
    let left = CountMinSketch::from_estimates(0.01, 0.95).unwrap();
    let right = CountMinSketch::from_estimates(0.01, 0.95).unwrap();

    for i in 0..100 {
        let item = format!("left-{i}");
        combined.update(item.as_bytes(), 2);
        left.update(item.as_bytes(), 2);
    }
    for i in 0..100 {
        let item = format!("right-{i}");
        combined.update_once(item.as_bytes());
        right.update_once(item.as_bytes());
    }

    left.merge(&right).unwrap();
    assert!(left.equals(&combined));
    assert_eq!(left.all_sum(), combined.all_sum());
    for i in 0..100 {
        let item = format!("left-{i}");
        assert_eq!(left.count(item.as_bytes()), combined.count(item.as_bytes()));
    }
}

#[test]
fn test_merge_shape_mismatch_leaves_state_untouched() {
    let a = CountMinSketch::new(3, 64).unwrap();
    let b = CountMinSketch::new(3, 128).unwrap();
    a.update(b"x", 5);
    b.update(b"x", 7);

    let err = a.merge(&b).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
    assert_eq!(a.count(b"x"), 5);
    assert_eq!(a.all_sum(), 5);
}

#[test]
fn test_concurrent_updates_sum() {
    let sketch = Arc::new(CountMinSketch::new(4, 2048).unwrap());
    let mut handles = Vec::new();
    for _ in 0..4 {
        let sketch = Arc::clone(&sketch);
        handles.push(thread::spawn(move || {
            for _ in 0..1000 {
                sketch.update_once(b"shared");
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(sketch.count(b"shared"), 4000);
    assert_eq!(sketch.all_sum(), 4000);
}

#[test]
fn test_export_import_round_trip() {
    let sketch = CountMinSketch::new(3, 256).unwrap();
    sketch.update(b"foo", 5);
    sketch.update(b"bar", 9);

    let restored = CountMinSketch::import(&sketch.export().unwrap()).unwrap();
    assert!(sketch.equals(&restored));
    assert_eq!(restored.count(b"foo"), 5);
    assert_eq!(restored.count(b"bar"), 9);
    assert_eq!(restored.all_sum(), 14);
}

#[test]
fn test_stream_round_trip() {
    let sketch = CountMinSketch::new(3, 256).unwrap();
    sketch.update(b"foo", 5);

    let mut buffer = Vec::new();
    sketch.write_to(&mut buffer).unwrap();
    let restored = CountMinSketch::read_from(&mut buffer.as_slice()).unwrap();
    assert!(sketch.equals(&restored));
    assert_eq!(restored.rows(), 3);
    assert_eq!(restored.columns(), 256);
}

#[test]
fn test_malformed_imports() {
    assert!(CountMinSketch::import(b"").is_err());
    assert!(CountMinSketch::import(br#"{"r":0,"c":0,"s":0,"m":[]}"#).is_err());

    let mut truncated = Vec::new();
    CountMinSketch::new(2, 8)
        .unwrap()
        .write_to(&mut truncated)
        .unwrap();
    truncated.truncate(20);
    assert!(CountMinSketch::read_from(&mut truncated.as_slice()).is_err());
}
