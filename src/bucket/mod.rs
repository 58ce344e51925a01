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

//! Fixed-capacity fingerprint buckets backing the cuckoo filter.
//!
//! A bucket is an ordered array of exactly `capacity` slots, each holding a
//! short fingerprint string or the empty sentinel. [`BucketMem`] keeps the
//! slots in a local vector; [`BucketRedis`] keeps them in a server-side list
//! of exactly `capacity` entries, with the occupancy count tracked in a
//! companion counter key (see [`crate::keys::bucket_length_key`]) so that
//! multi-step mutations can maintain both inside one atomic script.

mod mem;
mod redis;

pub use self::mem::BucketMem;
pub use self::redis::BucketRedis;

/// The sentinel stored in an unoccupied slot.
pub(crate) const EMPTY_SLOT: &str = "";
