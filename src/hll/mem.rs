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

use std::io::Read;
use std::io::Write;

use byteorder::BigEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
use parking_lot::Mutex;

use crate::error::Error;
use crate::hll::check_num_registers;
use crate::hll::estimate;
use crate::hll::slot_and_rank;
use crate::hll::HllEnvelope;

/// An in-process HyperLogLog.
///
/// Every operation takes the log's single mutex, so concurrent callers
/// sharing one instance observe a total order of updates and counts.
/// Registers only ever grow: an update writes the maximum of the stored
/// and the observed rank.
#[derive(Debug)]
pub struct HyperLogLog {
    num_registers: u64,
    prefix_bits: u64,
    alpha: f64,
    registers: Mutex<Vec<u8>>,
}

impl HyperLogLog {
    /// Creates a log with `num_registers` registers.
    ///
    /// Returns an error when the count is not a power of two.
    ///
    /// # Panics
    ///
    /// Panics when `num_registers` is zero.
    pub fn new(num_registers: u64) -> Result<Self, Error> {
        check_num_registers(num_registers)?;
        Ok(HyperLogLog {
            num_registers,
            prefix_bits: num_registers.ilog2() as u64,
            alpha: super::alpha(num_registers),
            registers: Mutex::new(vec![0; num_registers as usize]),
        })
    }

    /// Returns the register count (`m`).
    pub fn num_registers(&self) -> u64 {
        self.num_registers
    }

    /// Returns the expected relative error, `1.04 / sqrt(m)`.
    pub fn accuracy(&self) -> f64 {
        1.04 / (self.num_registers as f64).sqrt()
    }

    /// Records one observation of `data`.
    pub fn update(&self, data: &[u8]) {
        let (slot, rank) = slot_and_rank(data, self.prefix_bits);
        let mut registers = self.registers.lock();
        if registers[slot as usize] < rank {
            registers[slot as usize] = rank;
        }
    }

    /// Estimates the number of distinct items observed so far.
    ///
    /// `with_correction` applies the large-range correction when the raw
    /// estimate crosses `2^32 / 30`; `with_rounding` rounds to the nearest
    /// integer before the final truncation.
    pub fn count(&self, with_correction: bool, with_rounding: bool) -> u64 {
        let registers = self.registers.lock();
        let harmonic_mean: f64 = registers.iter().map(|r| 2f64.powi(-(*r as i32))).sum();
        estimate(
            harmonic_mean,
            self.num_registers,
            self.alpha,
            with_correction,
            with_rounding,
        )
    }

    /// Sets every register back to zero.
    pub fn reset(&self) {
        self.registers.lock().fill(0);
    }

    /// Takes the element-wise maximum of both register vectors.
    ///
    /// Returns [`ErrorKind::ShapeMismatch`](crate::error::ErrorKind) when
    /// the register counts differ; neither log is changed in that case.
    pub fn merge(&self, other: &HyperLogLog) -> Result<(), Error> {
        if self.num_registers != other.num_registers {
            return Err(Error::shape_mismatch(format!(
                "register counts {} and {} don't match",
                self.num_registers, other.num_registers
            )));
        }
        let mut mine = self.registers.lock();
        let theirs = other.registers.lock();
        for (m, t) in mine.iter_mut().zip(theirs.iter()) {
            *m = (*m).max(*t);
        }
        Ok(())
    }

    /// Returns whether both logs have identical register vectors.
    pub fn equals(&self, other: &HyperLogLog) -> bool {
        if self.num_registers != other.num_registers {
            return false;
        }
        *self.registers.lock() == *other.registers.lock()
    }

    /// Serializes the log to its JSON envelope.
    pub fn export(&self) -> Result<Vec<u8>, Error> {
        let envelope = HllEnvelope {
            nr: self.num_registers,
            nbp: self.prefix_bits,
            c: self.alpha,
            r: self.registers.lock().clone(),
            k: None,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Reconstructs a log from an envelope produced by either backend.
    pub fn import(data: &[u8]) -> Result<Self, Error> {
        let envelope: HllEnvelope = serde_json::from_slice(data)?;
        envelope.check()?;
        Ok(HyperLogLog {
            num_registers: envelope.nr,
            prefix_bits: envelope.nbp,
            alpha: envelope.c,
            registers: Mutex::new(envelope.r),
        })
    }

    /// Writes the log onto `stream`: register count, prefix bits, alpha as
    /// IEEE-754 bits, then the registers, all big-endian.
    pub fn write_to<W: Write>(&self, stream: &mut W) -> Result<(), Error> {
        stream
            .write_u64::<BigEndian>(self.num_registers)
            .map_err(Error::io)?;
        stream
            .write_u64::<BigEndian>(self.prefix_bits)
            .map_err(Error::io)?;
        stream
            .write_f64::<BigEndian>(self.alpha)
            .map_err(Error::io)?;
        stream
            .write_all(&self.registers.lock())
            .map_err(Error::io)?;
        Ok(())
    }

    /// Reads a log written by [`write_to`](Self::write_to).
    pub fn read_from<R: Read>(stream: &mut R) -> Result<Self, Error> {
        let num_registers = stream
            .read_u64::<BigEndian>()
            .map_err(|_| Error::insufficient_data("hyperloglog register count"))?;
        let prefix_bits = stream
            .read_u64::<BigEndian>()
            .map_err(|_| Error::insufficient_data("hyperloglog prefix bits"))?;
        let alpha = stream
            .read_f64::<BigEndian>()
            .map_err(|_| Error::insufficient_data("hyperloglog alpha"))?;
        check_num_registers(num_registers)?;
        let mut registers = vec![0u8; num_registers as usize];
        stream
            .read_exact(&mut registers)
            .map_err(|_| Error::insufficient_data("hyperloglog registers"))?;
        Ok(HyperLogLog {
            num_registers,
            prefix_bits,
            alpha,
            registers: Mutex::new(registers),
        })
    }
}
