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

use googletest::assert_that;
use googletest::prelude::near;
use probkit::error::ErrorKind;
use probkit::hll::HyperLogLog;

#[test]
fn test_cardinality_of_integer_stream() {
    let log = HyperLogLog::new(128).unwrap();
    for i in 0..1000 {
        log.update(i.to_string().as_bytes());
    }
    let estimate = log.count(true, true);
    // Within 2% of the true cardinality for this input set.
    assert_that!(estimate as f64, near(1000.0, 20.0));
}

#[test]
fn test_duplicates_are_not_counted() {
    let log = HyperLogLog::new(128).unwrap();
    for _ in 0..20 {
        for i in 0..500 {
            log.update(format!("user-{i}").as_bytes());
        }
    }
    let estimate = log.count(true, true) as f64;
    assert_that!(estimate, near(500.0, 500.0 * 3.0 * log.accuracy()));
}

#[test]
fn test_invalid_register_counts() {
    assert_eq!(
        HyperLogLog::new(100).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    assert_eq!(
        HyperLogLog::new(96).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    assert!(HyperLogLog::new(16).is_ok());
}

#[test]
fn test_accuracy_shrinks_with_registers() {
    let small = HyperLogLog::new(16).unwrap();
    let large = HyperLogLog::new(4096).unwrap();
    assert!(large.accuracy() < small.accuracy());
    assert!((small.accuracy() - 0.26).abs() < 0.01);
}

#[test]
fn test_merge_is_union() {
    let a = HyperLogLog::new(256).unwrap();
    let b = HyperLogLog::new(256).unwrap();
    // Overlapping streams: the union holds 1500 distinct items.
    for i in 0..1000 {
        a.update(format!("item-{i}").as_bytes());
    }
    for i in 500..1500 {
        b.update(format!("item-{i}").as_bytes());
    }
    a.merge(&b).unwrap();
    let estimate = a.count(true, true) as f64;
    assert_that!(estimate, near(1500.0, 1500.0 * 3.0 * a.accuracy()));
}

#[test]
fn test_merge_shape_mismatch() {
    let a = HyperLogLog::new(128).unwrap();
    let b = HyperLogLog::new(256).unwrap();
    assert_eq!(a.merge(&b).unwrap_err().kind(), ErrorKind::ShapeMismatch);
}

#[test]
fn test_merge_then_equals() {
    let a = HyperLogLog::new(64).unwrap();
    let b = HyperLogLog::new(64).unwrap();
    for i in 0..300 {
        a.update(format!("{i}").as_bytes());
        b.update(format!("{i}").as_bytes());
    }
    assert!(a.equals(&b));
    // Merging an identical log is a no-op on the registers.
    a.merge(&b).unwrap();
    assert!(a.equals(&b));
}

#[test]
fn test_export_import_round_trip() {
    let log = HyperLogLog::new(128).unwrap();
    for i in 0..1000 {
        log.update(i.to_string().as_bytes());
    }
    let restored = HyperLogLog::import(&log.export().unwrap()).unwrap();
    assert!(log.equals(&restored));
    assert_eq!(log.count(true, true), restored.count(true, true));
}

#[test]
fn test_stream_round_trip() {
    let log = HyperLogLog::new(128).unwrap();
    for i in 0..1000 {
        log.update(i.to_string().as_bytes());
    }
    let mut buffer = Vec::new();
    log.write_to(&mut buffer).unwrap();
    let restored = HyperLogLog::read_from(&mut buffer.as_slice()).unwrap();
    assert!(log.equals(&restored));
    assert_eq!(restored.num_registers(), 128);
}

#[test]
fn test_malformed_imports() {
    assert!(HyperLogLog::import(b"nope").is_err());

    let log = HyperLogLog::new(64).unwrap();
    let mut buffer = Vec::new();
    log.write_to(&mut buffer).unwrap();
    buffer.truncate(30);
    assert!(HyperLogLog::read_from(&mut buffer.as_slice()).is_err());
}
