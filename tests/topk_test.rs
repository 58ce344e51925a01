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

use probkit::topk::TopK;

const FRUIT_STREAM: &[(&str, u64)] = &[
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

fn fruit_topk(k: u64) -> TopK {
    let mut topk = TopK::new(k, 0.001, 0.999).unwrap();
    for (element, count) in FRUIT_STREAM {
        for _ in 0..*count {
            topk.insert(element.as_bytes(), 1).unwrap();
        }
    }
    topk
}

#[test]
fn test_heavy_hitters_ordering() {
    let topk = fruit_topk(5);
    let values = topk.values();

    assert_eq!(values.len(), 5);
    assert_eq!(values[0].element, "apple");
    assert_eq!(values[0].count, 5);

    // The remaining entries come from the count 3 and 2 tiers, ordered by
    // count descending with lexicographic ties.
    for value in &values[1..] {
        assert!(value.count == 3 || value.count == 2);
    }
    for pair in values.windows(2) {
        assert!(
            pair[0].count > pair[1].count
                || (pair[0].count == pair[1].count && pair[0].element < pair[1].element)
        );
    }
}

#[test]
fn test_batched_and_single_inserts_agree() {
    let single = fruit_topk(11);

    let mut batched = TopK::new(11, 0.001, 0.999).unwrap();
    for (element, count) in FRUIT_STREAM {
        batched.insert(element.as_bytes(), *count).unwrap();
    }

    let single_names: Vec<_> = single.values().into_iter().map(|v| v.element).collect();
    let batched_names: Vec<_> = batched.values().into_iter().map(|v| v.element).collect();
    assert_eq!(single_names, batched_names);
}

#[test]
fn test_membership() {
    let topk = fruit_topk(5);
    let inserted: Vec<&str> = FRUIT_STREAM.iter().map(|(element, _)| *element).collect();
    let values = topk.values();
    assert!(values.len() <= 5);
    for value in &values {
        assert!(inserted.contains(&value.element.as_str()));
    }
}

#[test]
fn test_k_larger_than_stream() {
    let topk = fruit_topk(32);
    // Every distinct element fits.
    assert_eq!(topk.values().len(), FRUIT_STREAM.len());
}

#[test]
fn test_export_import_round_trip() {
    let topk = fruit_topk(5);
    let restored = TopK::import(&topk.export().unwrap()).unwrap();
    assert!(topk.equals(&restored));
    assert_eq!(topk.values(), restored.values());
}

#[test]
fn test_stream_round_trip() {
    let topk = fruit_topk(5);
    let mut buffer = Vec::new();
    topk.write_to(&mut buffer).unwrap();
    let restored = TopK::read_from(&mut buffer.as_slice()).unwrap();
    assert!(topk.equals(&restored));
    assert_eq!(topk.values(), restored.values());
}

#[test]
fn test_malformed_import() {
    assert!(TopK::import(b"{]").is_err());
}
