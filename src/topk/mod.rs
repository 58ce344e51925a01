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

//! Top-K heavy-hitter tracking.
//!
//! A Top-K structure pairs a Count-Min sketch (for frequency estimates)
//! with a bounded min-heap of the `k` most frequent elements seen so far.
//! An insert updates the sketch, re-estimates the element's frequency, and
//! admits the element into the heap when there is room or its frequency
//! reaches the current minimum; the smallest entry is evicted when the
//! heap overflows.
//!
//! [`TopK`] keeps the heap in process; [`RedisTopK`] keeps it in a
//! server-side sorted set scored by frequency, with the conditional heap
//! update running as one atomic script.
//!
//! # Usage
//!
//! ```rust
//! use probkit::topk::TopK;
//!
//! let mut topk = TopK::new(2, 0.001, 0.999)?;
//! for (item, count) in [("apple", 5u64), ("banana", 3), ("kiwi", 1)] {
//!     topk.insert(item.as_bytes(), count)?;
//! }
//!
//! let values = topk.values();
//! assert_eq!(values[0].element, "apple");
//! assert_eq!(values[0].count, 5);
//! assert_eq!(values[1].element, "banana");
//! # Ok::<(), probkit::error::Error>(())
//! ```

mod mem;
mod redis;

use serde::Deserialize;
use serde::Serialize;

pub use self::mem::TopK;
pub use self::redis::RedisTopK;

use crate::countmin::CountMinEnvelope;

/// One element of a [`TopK::values`] / [`RedisTopK::values`] result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopKElement {
    /// The element bytes, as inserted, interpreted as a string.
    pub element: String,
    /// The element's estimated frequency.
    pub count: u64,
}

/// Orders results the way callers expect them: by count descending, ties
/// broken lexicographically ascending on the element.
pub(crate) fn sort_values(values: &mut [TopKElement]) {
    values.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.element.cmp(&b.element)));
}

/// One heap entry of the backend-neutral JSON envelope.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct HeapEntryEnvelope {
    pub v: String,
    pub f: u64,
}

/// The backend-neutral JSON envelope of a whole Top-K structure.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TopKEnvelope {
    pub k: u64,
    pub e: f64,
    pub a: f64,
    pub s: CountMinEnvelope,
    pub h: Vec<HeapEntryEnvelope>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hk: Option<String>,
}
