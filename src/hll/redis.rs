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

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use redis::Commands;
use redis::Connection;
use redis::Script;

use crate::backend::metadata_field;
use crate::backend::metadata_u64;
use crate::backend::RedisBackend;
use crate::error::Error;
use crate::hll::check_num_registers;
use crate::hll::estimate;
use crate::hll::slot_and_rank;
use crate::hll::HllEnvelope;
use crate::keys::random_key;

/// KEYS: register list. ARGV: register count.
/// Resets the list to zeroed registers.
static INIT_REGISTERS: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        redis.call('DEL', KEYS[1])
        for i = 1, tonumber(ARGV[1]) do
            redis.call('RPUSH', KEYS[1], 0)
        end
        return 1
    "#,
    )
});

/// KEYS: register list. ARGV: slot, rank.
/// Writes the maximum of the stored and the observed rank.
static UPDATE_REGISTER: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local slot = tonumber(ARGV[1])
        local rank = tonumber(ARGV[2])
        local current = tonumber(redis.call('LINDEX', KEYS[1], slot))
        if rank > current then
            redis.call('LSET', KEYS[1], slot, rank)
        end
        return 1
    "#,
    )
});

/// KEYS: register list. ARGV: register count.
/// Returns the harmonic mean term `sum(2^-register)`.
static HARMONIC_MEAN: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local sum = 0.0
        local values = redis.call('LRANGE', KEYS[1], 0, -1)
        for i = 1, tonumber(ARGV[1]) do
            sum = sum + 2 ^ (-tonumber(values[i]))
        end
        return tostring(sum)
    "#,
    )
});

/// KEYS: destination list, source list. ARGV: register count.
/// Takes the element-wise maximum into the destination.
static MERGE_REGISTERS: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local mine = redis.call('LRANGE', KEYS[1], 0, -1)
        local theirs = redis.call('LRANGE', KEYS[2], 0, -1)
        for i = 1, tonumber(ARGV[1]) do
            if tonumber(theirs[i]) > tonumber(mine[i]) then
                redis.call('LSET', KEYS[1], i - 1, theirs[i])
            end
        end
        return 1
    "#,
    )
});

/// KEYS: first list, second list. ARGV: register count.
/// Compares the two register vectors.
static EQUALS_REGISTERS: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local mine = redis.call('LRANGE', KEYS[1], 0, -1)
        local theirs = redis.call('LRANGE', KEYS[2], 0, -1)
        for i = 1, tonumber(ARGV[1]) do
            if tonumber(mine[i]) ~= tonumber(theirs[i]) then
                return 0
            end
        end
        return 1
    "#,
    )
});

/// KEYS: register list. ARGV: every register in order.
/// Replaces the registers wholesale (import path).
static SET_REGISTERS: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        redis.call('DEL', KEYS[1])
        for i = 1, #ARGV do
            redis.call('RPUSH', KEYS[1], ARGV[i])
        end
        return 1
    "#,
    )
});

/// A HyperLogLog whose registers live in a Redis list of decimal text
/// values.
///
/// Update, merge and comparison each run as one atomic script; the count
/// fetches the harmonic mean term from a script and finishes the estimate
/// client-side.
pub struct RedisHyperLogLog {
    conn: Connection,
    key: String,
    metadata_key: String,
    num_registers: u64,
    prefix_bits: u64,
    alpha: f64,
}

impl RedisHyperLogLog {
    /// Creates a log with `num_registers` registers.
    ///
    /// Returns an error when the count is not a power of two.
    ///
    /// # Panics
    ///
    /// Panics when `num_registers` is zero.
    pub fn new(backend: &RedisBackend, num_registers: u64) -> Result<Self, Error> {
        check_num_registers(num_registers)?;
        let conn = backend.connection()?;
        let mut log = RedisHyperLogLog {
            conn,
            key: random_key(),
            metadata_key: random_key(),
            num_registers,
            prefix_bits: num_registers.ilog2() as u64,
            alpha: super::alpha(num_registers),
        };
        log.write_metadata()?;
        log.init_registers()?;
        Ok(log)
    }

    /// Reattaches to the log described by the metadata hash at
    /// `metadata_key`. No server-side state is touched.
    pub fn from_metadata_key(backend: &RedisBackend, metadata_key: &str) -> Result<Self, Error> {
        let mut conn = backend.connection()?;
        let metadata: HashMap<String, String> = conn.hgetall(metadata_key)?;
        let num_registers = metadata_u64(&metadata, "numRegisters")?;
        check_num_registers(num_registers)?;
        let key = metadata_field(&metadata, "key")?;
        Ok(RedisHyperLogLog {
            conn,
            key,
            metadata_key: metadata_key.to_string(),
            num_registers,
            prefix_bits: num_registers.ilog2() as u64,
            alpha: super::alpha(num_registers),
        })
    }

    /// Reconstructs a log from an envelope produced by either backend.
    ///
    /// With `with_new_key` the registers land under a fresh random key;
    /// otherwise the envelope's own key is reused (an envelope exported
    /// from the in-process backend carries none, which is an error).
    pub fn import(
        backend: &RedisBackend,
        data: &[u8],
        with_new_key: bool,
    ) -> Result<Self, Error> {
        let envelope: HllEnvelope = serde_json::from_slice(data)?;
        envelope.check()?;
        let key = if with_new_key {
            random_key()
        } else {
            envelope.k.clone().ok_or_else(|| {
                Error::deserial("envelope carries no server key; import with a new key")
            })?
        };
        let conn = backend.connection()?;
        let mut log = RedisHyperLogLog {
            conn,
            key,
            metadata_key: random_key(),
            num_registers: envelope.nr,
            prefix_bits: envelope.nbp,
            alpha: envelope.c,
        };
        log.write_metadata()?;
        log.set_registers(&envelope.r)?;
        Ok(log)
    }

    /// Returns the key of the register list.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the key of the metadata hash describing this log.
    pub fn metadata_key(&self) -> &str {
        &self.metadata_key
    }

    /// Returns the register count (`m`).
    pub fn num_registers(&self) -> u64 {
        self.num_registers
    }

    /// Returns the expected relative error, `1.04 / sqrt(m)`.
    pub fn accuracy(&self) -> f64 {
        1.04 / (self.num_registers as f64).sqrt()
    }

    /// Records one observation of `data`, atomically.
    pub fn update(&mut self, data: &[u8]) -> Result<(), Error> {
        let (slot, rank) = slot_and_rank(data, self.prefix_bits);
        UPDATE_REGISTER
            .key(&self.key)
            .arg(slot)
            .arg(rank)
            .invoke::<()>(&mut self.conn)?;
        Ok(())
    }

    /// Estimates the number of distinct items observed so far; see
    /// [`HyperLogLog::count`](crate::hll::HyperLogLog::count).
    pub fn count(&mut self, with_correction: bool, with_rounding: bool) -> Result<u64, Error> {
        let harmonic_mean: f64 = HARMONIC_MEAN
            .key(&self.key)
            .arg(self.num_registers)
            .invoke(&mut self.conn)?;
        Ok(estimate(
            harmonic_mean,
            self.num_registers,
            self.alpha,
            with_correction,
            with_rounding,
        ))
    }

    /// Takes the element-wise maximum of `other`'s registers into this
    /// log, atomically.
    ///
    /// Returns [`ErrorKind::ShapeMismatch`](crate::error::ErrorKind) when
    /// the register counts differ; neither log is changed in that case.
    pub fn merge(&mut self, other: &RedisHyperLogLog) -> Result<(), Error> {
        if self.num_registers != other.num_registers {
            return Err(Error::shape_mismatch(format!(
                "register counts {} and {} don't match",
                self.num_registers, other.num_registers
            )));
        }
        MERGE_REGISTERS
            .key(&self.key)
            .key(&other.key)
            .arg(self.num_registers)
            .invoke::<()>(&mut self.conn)?;
        Ok(())
    }

    /// Returns whether both logs have identical register vectors.
    pub fn equals(&mut self, other: &RedisHyperLogLog) -> Result<bool, Error> {
        if self.num_registers != other.num_registers {
            return Ok(false);
        }
        let equal: i64 = EQUALS_REGISTERS
            .key(&self.key)
            .key(&other.key)
            .arg(self.num_registers)
            .invoke(&mut self.conn)?;
        Ok(equal == 1)
    }

    /// Serializes the log to the backend-neutral JSON envelope.
    pub fn export(&mut self) -> Result<Vec<u8>, Error> {
        let registers: Vec<u64> = self.conn.lrange(&self.key, 0, -1)?;
        let envelope = HllEnvelope {
            nr: self.num_registers,
            nbp: self.prefix_bits,
            c: self.alpha,
            r: registers.into_iter().map(|r| r as u8).collect(),
            k: Some(self.key.clone()),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Stream output is not available for server-backed logs.
    pub fn write_to<W: std::io::Write>(&self, _stream: &mut W) -> Result<(), Error> {
        Err(Error::unsupported(
            "stream write is not supported for a redis-backed hyperloglog",
        ))
    }

    /// Stream input is not available for server-backed logs.
    pub fn read_from<R: std::io::Read>(&mut self, _stream: &mut R) -> Result<(), Error> {
        Err(Error::unsupported(
            "stream read is not supported for a redis-backed hyperloglog",
        ))
    }

    fn write_metadata(&mut self) -> Result<(), Error> {
        self.conn.hset_multiple::<_, _, _, ()>(
            &self.metadata_key,
            &[
                ("numRegisters", self.num_registers.to_string()),
                ("key", self.key.clone()),
            ],
        )?;
        Ok(())
    }

    fn init_registers(&mut self) -> Result<(), Error> {
        INIT_REGISTERS
            .key(&self.key)
            .arg(self.num_registers)
            .invoke::<()>(&mut self.conn)?;
        Ok(())
    }

    fn set_registers(&mut self, registers: &[u8]) -> Result<(), Error> {
        let mut invocation = SET_REGISTERS.prepare_invoke();
        invocation.key(self.key.as_str());
        for register in registers {
            invocation.arg(*register);
        }
        invocation.invoke::<()>(&mut self.conn)?;
        Ok(())
    }
}

impl fmt::Debug for RedisHyperLogLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisHyperLogLog")
            .field("num_registers", &self.num_registers)
            .field("key", &self.key)
            .field("metadata_key", &self.metadata_key)
            .finish()
    }
}
