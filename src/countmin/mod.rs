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

//! Count-Min sketch for frequency estimation.
//!
//! A Count-Min sketch maintains `d` rows of `w` counters. Updating an item
//! adds its weight to one counter per row, at positions derived from one
//! digest by double hashing; the estimate for an item is the minimum of its
//! `d` counters, so counts are never underestimated.
//!
//! [`CountMinSketch`] keeps the matrix in process; [`RedisCountMinSketch`]
//! keeps each row in a server-side list of text counters, with every update
//! and count running as one atomic script over the `d` affected cells.
//!
//! # Usage
//!
//! ```rust
//! use probkit::countmin::CountMinSketch;
//!
//! let sketch = CountMinSketch::from_estimates(0.001, 0.999)?;
//! sketch.update_once(b"foo");
//! sketch.update_once(b"foo");
//! sketch.update_once(b"bar");
//!
//! assert_eq!(sketch.count(b"foo"), 2);
//! assert_eq!(sketch.count(b"bar"), 1);
//! assert_eq!(sketch.count(b"baz"), 0);
//! # Ok::<(), probkit::error::Error>(())
//! ```

mod mem;
mod redis;

use serde::Deserialize;
use serde::Serialize;

pub use self::mem::CountMinSketch;
pub use self::redis::RedisCountMinSketch;

use crate::error::Error;
use crate::hash;

/// Returns `(rows, columns)` for the target relative error and accuracy:
/// `w = ceil(e / error_rate)`, `d = ceil(ln(1 / accuracy))`, both clamped
/// to at least 1.
pub fn dimensions(error_rate: f64, accuracy: f64) -> (u64, u64) {
    let columns = (std::f64::consts::E / error_rate).ceil() as u64;
    let rows = (1.0 / accuracy).ln().ceil() as u64;
    (rows.max(1), columns.max(1))
}

/// Derives the column hit in each of the `rows` rows for one item.
pub(crate) fn cell_positions(data: &[u8], rows: u64, columns: u64) -> Vec<u64> {
    let (h1, h2) = hash::sum128(data);
    (0..rows)
        .map(|row| hash::double_position(h1, h2, row, columns))
        .collect()
}

/// Checks shared construction parameters.
pub(crate) fn check_dimensions(rows: u64, columns: u64) -> Result<(), Error> {
    if rows == 0 || columns == 0 {
        return Err(Error::invalid_argument(
            "count-min rows and columns must be greater than 0",
        ));
    }
    Ok(())
}

/// The backend-neutral JSON envelope: rows, columns, total weight, the full
/// matrix, and (for the Redis backend) the sketch key.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CountMinEnvelope {
    pub r: u64,
    pub c: u64,
    pub s: u64,
    pub m: Vec<Vec<u64>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub k: Option<String>,
}

impl CountMinEnvelope {
    /// Validates that the matrix agrees with the declared dimensions.
    pub(crate) fn check(&self) -> Result<(), Error> {
        check_dimensions(self.r, self.c)?;
        if self.m.len() as u64 != self.r
            || self.m.iter().any(|row| row.len() as u64 != self.c)
        {
            return Err(Error::deserial(
                "envelope matrix does not match the declared dimensions",
            ));
        }
        Ok(())
    }
}
