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

//! HyperLogLog for cardinality estimation.
//!
//! A HyperLogLog keeps `m` registers (a power of two). The top `p = log2 m`
//! bits of an item's digest select a register; the register keeps the
//! maximum rank (position of the first set bit, 1-offset) seen in the
//! remaining bits. The estimate is `alpha * m^2` over the harmonic mean
//! term `sum(2^-register)`, with an optional large-range correction.
//!
//! [`HyperLogLog`] keeps the registers in process; [`RedisHyperLogLog`]
//! keeps them in a server-side list, with update, merge and comparison
//! running as atomic scripts.
//!
//! # Usage
//!
//! ```rust
//! use probkit::hll::HyperLogLog;
//!
//! let log = HyperLogLog::new(128)?;
//! for i in 0..1000 {
//!     log.update(i.to_string().as_bytes());
//! }
//! let estimate = log.count(true, true);
//! assert!((estimate as f64 - 1000.0).abs() / 1000.0 < 0.05);
//! # Ok::<(), probkit::error::Error>(())
//! ```

mod mem;
mod redis;

use serde::Deserialize;
use serde::Serialize;

pub use self::mem::HyperLogLog;
pub use self::redis::RedisHyperLogLog;

use crate::error::Error;
use crate::hash;

/// Returns the bias-correction constant for `m` registers.
pub(crate) fn alpha(num_registers: u64) -> f64 {
    match num_registers {
        16 => 0.673,
        32 => 0.697,
        64 => 0.709,
        m => 0.7213 / (1.0 + 1.079 / m as f64),
    }
}

/// Checks the register count at construction.
///
/// # Panics
///
/// Panics when `num_registers` is zero; a register count that is not a
/// power of two is returned as an error.
pub(crate) fn check_num_registers(num_registers: u64) -> Result<(), Error> {
    assert!(
        num_registers != 0,
        "hyperloglog register count cannot be zero"
    );
    if !num_registers.is_power_of_two() {
        return Err(Error::invalid_argument(format!(
            "hyperloglog register count {num_registers} is not a power of two"
        )));
    }
    Ok(())
}

/// Derives the register slot and rank for one item.
///
/// The slot is the top `prefix_bits` bits of the first digest word; the
/// rank is one plus the number of leading zeros of the remainder, so the
/// smallest recordable rank is 1 and an all-zero remainder yields
/// `64 - prefix_bits + 1`.
pub(crate) fn slot_and_rank(data: &[u8], prefix_bits: u64) -> (u64, u8) {
    let (word, _) = hash::sum128(data);
    let slot = word >> (64 - prefix_bits);
    let rest = word << prefix_bits;
    let rank = if rest == 0 {
        (64 - prefix_bits + 1) as u8
    } else {
        rest.leading_zeros() as u8 + 1
    };
    (slot, rank)
}

/// Estimates the cardinality from the harmonic mean term.
pub(crate) fn estimate(
    harmonic_mean: f64,
    num_registers: u64,
    alpha: f64,
    with_correction: bool,
    with_rounding: bool,
) -> u64 {
    let mut estimation = (alpha * (num_registers as f64).powi(2)) / harmonic_mean;
    let two_pow_32 = 2f64.powi(32);
    if with_correction && estimation > two_pow_32 / 30.0 {
        estimation = -two_pow_32 * (1.0 - estimation / two_pow_32).ln();
    }
    if with_rounding {
        estimation = estimation.round();
    }
    estimation as u64
}

/// The backend-neutral JSON envelope: register count, prefix bits, alpha,
/// the registers, and (for the Redis backend) the list key.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct HllEnvelope {
    pub nr: u64,
    pub nbp: u64,
    pub c: f64,
    pub r: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub k: Option<String>,
}

impl HllEnvelope {
    pub(crate) fn check(&self) -> Result<(), Error> {
        check_num_registers(self.nr)?;
        if self.r.len() as u64 != self.nr {
            return Err(Error::deserial(format!(
                "envelope holds {} registers, expected {}",
                self.r.len(),
                self.nr
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpha_constants() {
        assert_eq!(alpha(16), 0.673);
        assert_eq!(alpha(32), 0.697);
        assert_eq!(alpha(64), 0.709);
        let a128 = alpha(128);
        assert!(a128 > 0.71 && a128 < 0.72);
    }

    #[test]
    fn test_check_num_registers() {
        assert!(check_num_registers(128).is_ok());
        assert!(check_num_registers(100).is_err());
    }

    #[test]
    #[should_panic(expected = "register count cannot be zero")]
    fn test_zero_registers_panics() {
        let _ = check_num_registers(0);
    }

    #[test]
    fn test_slot_and_rank_bounds() {
        for i in 0..64 {
            let (slot, rank) = slot_and_rank(format!("{i}").as_bytes(), 7);
            assert!(slot < 128);
            assert!(rank >= 1 && rank as u64 <= 64 - 7 + 1);
        }
    }

    #[test]
    fn test_estimate_rounding() {
        // A harmonic mean of m (all registers zero) estimates alpha * m.
        let m = 128;
        let raw = estimate(m as f64, m, alpha(m), false, false);
        let rounded = estimate(m as f64, m, alpha(m), false, true);
        assert!(rounded == raw || rounded == raw + 1);
    }
}
