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

//! # probkit
//!
//! A library of probabilistic data structures for approximate set membership,
//! frequency estimation, cardinality estimation and heavy-hitter detection:
//!
//! - [`bloom`] — Bloom Filter (membership, no false negatives)
//! - [`cuckoo`] — Cuckoo Filter (membership with deletion)
//! - [`countmin`] — Count-Min Sketch (frequency estimation)
//! - [`hll`] — HyperLogLog (cardinality estimation)
//! - [`topk`] — Top-K (heavy hitters over a Count-Min Sketch)
//!
//! Every structure ships in two interchangeable backends: an **in-process**
//! backend holding state in local memory, and a **Redis-backed** backend
//! holding state on a shared server, with multi-step updates bundled into
//! atomic server-side scripts. The in-process variants are thread-safe; the
//! Redis variants rely on the single-threaded server as the serialization
//! point.
//!
//! Exported JSON envelopes are backend-neutral: a structure exported from the
//! in-process backend can be imported into the Redis backend and vice versa.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]

pub mod backend;
pub mod bitset;
pub mod bloom;
pub mod bucket;
pub mod countmin;
pub mod cuckoo;
pub mod error;
pub mod hash;
pub mod hll;
pub mod keys;
pub mod topk;
