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

//! Key generation and naming for the Redis backend.
//!
//! All server-side state lives under randomly generated 16-letter handles.
//! Child keys (cuckoo buckets, Count-Min rows, bucket length counters) are
//! derived from the parent handle by the functions below; keeping the scheme
//! in one place is what lets initializer scripts and readers agree on the
//! names.

use rand::Rng;

const KEY_LEN: usize = 16;
const LETTERS: &[u8; 52] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Generates a random 16-character key drawn from `[A-Za-z]`.
///
/// The space of keys (52^16) is large enough that collisions between
/// concurrently created instances are negligible.
pub fn random_key() -> String {
    let mut rng = rand::thread_rng();
    (0..KEY_LEN)
        .map(|_| LETTERS[rng.gen_range(0..LETTERS.len())] as char)
        .collect()
}

/// Returns the key of bucket `index` of the cuckoo filter stored at
/// `filter_key`.
pub fn cuckoo_bucket_key(filter_key: &str, index: u64) -> String {
    format!("cuckoo_{filter_key}_bucket_{index}")
}

/// Returns the key of row `row` of the Count-Min sketch stored at
/// `sketch_key`.
///
/// The row index is appended in decimal with no separator.
pub fn countmin_row_key(sketch_key: &str, row: u64) -> String {
    format!("{sketch_key}{row}")
}

/// Returns the key of the length counter tracked alongside the bucket list
/// at `bucket_key`.
pub fn bucket_length_key(bucket_key: &str) -> String {
    format!("{bucket_key}_len")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_key_shape() {
        let key = random_key();
        assert_eq!(key.len(), 16);
        assert!(key.bytes().all(|b| b.is_ascii_alphabetic()));
    }

    #[test]
    fn test_random_keys_differ() {
        assert_ne!(random_key(), random_key());
    }

    #[test]
    fn test_child_key_naming() {
        assert_eq!(cuckoo_bucket_key("AbCd", 7), "cuckoo_AbCd_bucket_7");
        assert_eq!(countmin_row_key("AbCd", 2), "AbCd2");
        assert_eq!(bucket_length_key("cuckoo_AbCd_bucket_7"), "cuckoo_AbCd_bucket_7_len");
    }
}
