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
use crate::countmin::cell_positions;
use crate::countmin::check_dimensions;
use crate::countmin::CountMinEnvelope;
use crate::error::Error;
use crate::keys::countmin_row_key;
use crate::keys::random_key;

/// KEYS: the row lists. ARGV: columns.
/// Resets every row to `columns` zero counters.
static INIT_ROWS: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        for i = 1, #KEYS do
            redis.call('DEL', KEYS[i])
            for j = 1, tonumber(ARGV[1]) do
                redis.call('RPUSH', KEYS[i], 0)
            end
        end
        return 1
    "#,
    )
});

/// KEYS: the row lists. ARGV: count, then one column index per row.
/// Adds the count to the addressed cell of every row.
static UPDATE_CELLS: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local count = tonumber(ARGV[1])
        for i = 1, #KEYS do
            local column = tonumber(ARGV[i + 1])
            local value = tonumber(redis.call('LINDEX', KEYS[i], column))
            redis.call('LSET', KEYS[i], column, value + count)
        end
        return 1
    "#,
    )
});

/// KEYS: the row lists. ARGV: one column index per row.
/// Returns the minimum of the addressed cells.
static COUNT_CELLS: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local min
        for i = 1, #KEYS do
            local column = tonumber(ARGV[i])
            local value = tonumber(redis.call('LINDEX', KEYS[i], column))
            if min == nil or value < min then
                min = value
            end
        end
        return min
    "#,
    )
});

/// KEYS: destination rows, then source rows. ARGV: rows, columns.
/// Adds the source matrix into the destination element-wise.
static MERGE_ROWS: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local rows = tonumber(ARGV[1])
        local columns = tonumber(ARGV[2])
        for r = 1, rows do
            local mine = redis.call('LRANGE', KEYS[r], 0, -1)
            local theirs = redis.call('LRANGE', KEYS[rows + r], 0, -1)
            for c = 1, columns do
                redis.call('LSET', KEYS[r], c - 1, tonumber(mine[c]) + tonumber(theirs[c]))
            end
        end
        return 1
    "#,
    )
});

/// KEYS: first sketch rows, then second sketch rows. ARGV: rows, columns.
/// Compares the two matrices cell-wise.
static EQUALS_ROWS: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local rows = tonumber(ARGV[1])
        local columns = tonumber(ARGV[2])
        for r = 1, rows do
            local mine = redis.call('LRANGE', KEYS[r], 0, -1)
            local theirs = redis.call('LRANGE', KEYS[rows + r], 0, -1)
            for c = 1, columns do
                if tonumber(mine[c]) ~= tonumber(theirs[c]) then
                    return 0
                end
            end
        end
        return 1
    "#,
    )
});

/// KEYS: one row list. ARGV: the row's counters in order.
/// Replaces the row wholesale (import path).
static SET_ROW: Lazy<Script> = Lazy::new(|| {
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

/// A Count-Min sketch whose matrix lives in Redis lists, one per row.
///
/// Row `r` is stored at [`countmin_row_key`]`(key, r)`. Every update and
/// count runs as one atomic script over the `d` affected cells. The total
/// weight is cached client-side and advanced only after the server
/// confirms an update; a client attached with
/// [`from_metadata_key`](Self::from_metadata_key) starts counting weight
/// from zero.
pub struct RedisCountMinSketch {
    conn: Connection,
    key: String,
    metadata_key: String,
    rows: u64,
    columns: u64,
    all_sum: u64,
    row_keys: Vec<String>,
}

impl RedisCountMinSketch {
    /// Creates a sketch of `rows` x `columns` zeroed counters.
    pub fn new(backend: &RedisBackend, rows: u64, columns: u64) -> Result<Self, Error> {
        check_dimensions(rows, columns)?;
        let conn = backend.connection()?;
        let key = random_key();
        let metadata_key = random_key();
        let mut sketch = RedisCountMinSketch {
            conn,
            row_keys: row_keys(&key, rows),
            key,
            metadata_key,
            rows,
            columns,
            all_sum: 0,
        };
        sketch.write_metadata()?;
        sketch.init_rows()?;
        Ok(sketch)
    }

    /// Creates a sketch sized from the target relative error and accuracy.
    pub fn from_estimates(
        backend: &RedisBackend,
        error_rate: f64,
        accuracy: f64,
    ) -> Result<Self, Error> {
        let (rows, columns) = super::dimensions(error_rate, accuracy);
        Self::new(backend, rows, columns)
    }

    /// Reattaches to the sketch described by the metadata hash at
    /// `metadata_key`. No server-side state is touched.
    pub fn from_metadata_key(backend: &RedisBackend, metadata_key: &str) -> Result<Self, Error> {
        let mut conn = backend.connection()?;
        let metadata: HashMap<String, String> = conn.hgetall(metadata_key)?;
        let rows = metadata_u64(&metadata, "rows")?;
        let columns = metadata_u64(&metadata, "columns")?;
        let key = metadata_field(&metadata, "key")?;
        Ok(RedisCountMinSketch {
            conn,
            row_keys: row_keys(&key, rows),
            key,
            metadata_key: metadata_key.to_string(),
            rows,
            columns,
            all_sum: 0,
        })
    }

    /// Reconstructs a sketch under fresh keys from an envelope produced by
    /// either backend.
    pub fn import(backend: &RedisBackend, data: &[u8]) -> Result<Self, Error> {
        let envelope: CountMinEnvelope = serde_json::from_slice(data)?;
        Self::from_envelope(backend, envelope)
    }

    pub(crate) fn from_envelope(
        backend: &RedisBackend,
        envelope: CountMinEnvelope,
    ) -> Result<Self, Error> {
        envelope.check()?;
        let mut sketch = Self::new(backend, envelope.r, envelope.c)?;
        sketch.set_matrix(&envelope.m)?;
        sketch.all_sum = envelope.s;
        Ok(sketch)
    }

    /// Returns the handle under which row keys are namespaced.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the key of the metadata hash describing this sketch.
    pub fn metadata_key(&self) -> &str {
        &self.metadata_key
    }

    /// Returns the number of rows (`d`).
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Returns the number of columns (`w`).
    pub fn columns(&self) -> u64 {
        self.columns
    }

    /// Returns the total weight this client has inserted since attaching.
    pub fn all_sum(&self) -> u64 {
        self.all_sum
    }

    /// Adds `count` to the item's counter in every row, atomically.
    pub fn update(&mut self, data: &[u8], count: u64) -> Result<(), Error> {
        let positions = cell_positions(data, self.rows, self.columns);
        let mut invocation = UPDATE_CELLS.prepare_invoke();
        for row_key in &self.row_keys {
            invocation.key(row_key.as_str());
        }
        invocation.arg(count);
        for column in &positions {
            invocation.arg(*column);
        }
        invocation.invoke::<()>(&mut self.conn)?;
        self.all_sum += count;
        Ok(())
    }

    /// Adds one occurrence of the item.
    pub fn update_once(&mut self, data: &[u8]) -> Result<(), Error> {
        self.update(data, 1)
    }

    /// Returns the estimated frequency: the minimum of the item's `d`
    /// counters, read atomically.
    pub fn count(&mut self, data: &[u8]) -> Result<u64, Error> {
        let positions = cell_positions(data, self.rows, self.columns);
        let mut invocation = COUNT_CELLS.prepare_invoke();
        for row_key in &self.row_keys {
            invocation.key(row_key.as_str());
        }
        for column in &positions {
            invocation.arg(*column);
        }
        Ok(invocation.invoke(&mut self.conn)?)
    }

    /// Adds every counter of `other` into this sketch, atomically.
    ///
    /// Returns [`ErrorKind::ShapeMismatch`](crate::error::ErrorKind) when
    /// the dimensions differ; neither sketch is changed in that case.
    pub fn merge(&mut self, other: &RedisCountMinSketch) -> Result<(), Error> {
        if self.rows != other.rows || self.columns != other.columns {
            return Err(Error::shape_mismatch(format!(
                "cannot merge {}x{} sketch with {}x{}",
                self.rows, self.columns, other.rows, other.columns
            )));
        }
        let mut invocation = MERGE_ROWS.prepare_invoke();
        for row_key in self.row_keys.iter().chain(&other.row_keys) {
            invocation.key(row_key.as_str());
        }
        invocation.arg(self.rows).arg(self.columns);
        invocation.invoke::<()>(&mut self.conn)?;
        self.all_sum += other.all_sum;
        Ok(())
    }

    /// Returns whether both sketches have identical dimensions and counters.
    pub fn equals(&mut self, other: &RedisCountMinSketch) -> Result<bool, Error> {
        if self.rows != other.rows || self.columns != other.columns {
            return Ok(false);
        }
        let mut invocation = EQUALS_ROWS.prepare_invoke();
        for row_key in self.row_keys.iter().chain(&other.row_keys) {
            invocation.key(row_key.as_str());
        }
        invocation.arg(self.rows).arg(self.columns);
        let equal: i64 = invocation.invoke(&mut self.conn)?;
        Ok(equal == 1)
    }

    /// Serializes the sketch to the backend-neutral JSON envelope.
    pub fn export(&mut self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(&self.to_envelope()?)?)
    }

    pub(crate) fn to_envelope(&mut self) -> Result<CountMinEnvelope, Error> {
        Ok(CountMinEnvelope {
            r: self.rows,
            c: self.columns,
            s: self.all_sum,
            m: self.matrix()?,
            k: Some(self.key.clone()),
        })
    }

    /// Stream output is not available for server-backed sketches.
    pub fn write_to<W: std::io::Write>(&self, _stream: &mut W) -> Result<(), Error> {
        Err(Error::unsupported(
            "stream write is not supported for a redis-backed count-min sketch",
        ))
    }

    /// Stream input is not available for server-backed sketches.
    pub fn read_from<R: std::io::Read>(&mut self, _stream: &mut R) -> Result<(), Error> {
        Err(Error::unsupported(
            "stream read is not supported for a redis-backed count-min sketch",
        ))
    }

    /// Fetches the whole matrix, one row per round-trip.
    pub(crate) fn matrix(&mut self) -> Result<Vec<Vec<u64>>, Error> {
        let mut matrix = Vec::with_capacity(self.rows as usize);
        for row_key in &self.row_keys {
            let row: Vec<u64> = self.conn.lrange(row_key, 0, -1)?;
            matrix.push(row);
        }
        Ok(matrix)
    }

    /// Replaces the whole matrix, one script per row.
    pub(crate) fn set_matrix(&mut self, matrix: &[Vec<u64>]) -> Result<(), Error> {
        for (row_key, row) in self.row_keys.clone().iter().zip(matrix) {
            let mut invocation = SET_ROW.prepare_invoke();
            invocation.key(row_key.as_str());
            for value in row {
                invocation.arg(*value);
            }
            invocation.invoke::<()>(&mut self.conn)?;
        }
        Ok(())
    }

    pub(crate) fn set_all_sum(&mut self, all_sum: u64) {
        self.all_sum = all_sum;
    }

    fn write_metadata(&mut self) -> Result<(), Error> {
        self.conn.hset_multiple::<_, _, _, ()>(
            &self.metadata_key,
            &[
                ("rows", self.rows.to_string()),
                ("columns", self.columns.to_string()),
                ("key", self.key.clone()),
            ],
        )?;
        Ok(())
    }

    fn init_rows(&mut self) -> Result<(), Error> {
        let mut invocation = INIT_ROWS.prepare_invoke();
        for row_key in &self.row_keys {
            invocation.key(row_key.as_str());
        }
        invocation.arg(self.columns);
        invocation.invoke::<()>(&mut self.conn)?;
        Ok(())
    }
}

fn row_keys(key: &str, rows: u64) -> Vec<String> {
    (0..rows).map(|row| countmin_row_key(key, row)).collect()
}

impl fmt::Debug for RedisCountMinSketch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCountMinSketch")
            .field("rows", &self.rows)
            .field("columns", &self.columns)
            .field("all_sum", &self.all_sum)
            .field("key", &self.key)
            .field("metadata_key", &self.metadata_key)
            .finish()
    }
}
