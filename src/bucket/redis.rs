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

use once_cell::sync::Lazy;
use redis::Commands;
use redis::Connection;
use redis::Script;

use crate::bucket::EMPTY_SLOT;
use crate::error::Error;
use crate::keys::bucket_length_key;

// All multi-step bucket mutations run as server-side scripts so that the
// list and its length counter move together. Keys arrive via KEYS and
// values via ARGV; script text never embeds a key.

/// KEYS: bucket list, length counter. ARGV: capacity.
/// Resets the list to `capacity` empty slots and the counter to zero.
static INIT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        redis.call('DEL', KEYS[1])
        for i = 1, tonumber(ARGV[1]) do
            redis.call('RPUSH', KEYS[1], '')
        end
        redis.call('SET', KEYS[2], 0)
        return 1
    "#,
    )
});

/// KEYS: bucket list, length counter. ARGV: element, capacity.
/// Stores the element in the first empty slot; returns 0 when full.
static ADD: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local len = tonumber(redis.call('GET', KEYS[2]) or '0')
        if len >= tonumber(ARGV[2]) then
            return 0
        end
        local pos = redis.call('LPOS', KEYS[1], '')
        if pos == false then
            redis.call('RPUSH', KEYS[1], ARGV[1])
        else
            redis.call('LSET', KEYS[1], pos, ARGV[1])
        end
        redis.call('INCR', KEYS[2])
        return 1
    "#,
    )
});

/// KEYS: bucket list, length counter. ARGV: element.
/// Clears the first slot holding the element; returns 0 on a miss.
static REMOVE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local pos = redis.call('LPOS', KEYS[1], ARGV[1])
        if pos == false then
            return 0
        end
        redis.call('LSET', KEYS[1], pos, '')
        redis.call('DECR', KEYS[2])
        return 1
    "#,
    )
});

/// KEYS: bucket list. ARGV: element.
/// Returns the slot index of the element, or -1 on a miss. LPOS replies nil
/// on a miss, which callers cannot tell apart from index 0; the script
/// normalizes the miss to -1.
static POSITION: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local pos = redis.call('LPOS', KEYS[1], ARGV[1])
        if pos == false then
            return -1
        end
        return tonumber(pos)
    "#,
    )
});

/// KEYS: bucket list, length counter. ARGV: slot index.
/// Clears the slot; the counter moves only if the slot was occupied.
static UNSET: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local prior = redis.call('LINDEX', KEYS[1], tonumber(ARGV[1]))
        if prior == '' then
            return 0
        end
        redis.call('LSET', KEYS[1], tonumber(ARGV[1]), '')
        redis.call('DECR', KEYS[2])
        return 1
    "#,
    )
});

/// KEYS: bucket list, length counter. ARGV: slot index, element.
/// Overwrites the slot and returns the prior value; the counter moves only
/// when the occupancy changes.
static SWAP: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local index = tonumber(ARGV[1])
        local prior = redis.call('LINDEX', KEYS[1], index)
        redis.call('LSET', KEYS[1], index, ARGV[2])
        if prior == '' and ARGV[2] ~= '' then
            redis.call('INCR', KEYS[2])
        elseif prior ~= '' and ARGV[2] == '' then
            redis.call('DECR', KEYS[2])
        end
        return prior
    "#,
    )
});

/// KEYS: first list, second list. ARGV: capacity.
/// Compares the two lists element-wise.
static EQUALS: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local first = redis.call('LRANGE', KEYS[1], 0, -1)
        local second = redis.call('LRANGE', KEYS[2], 0, -1)
        for i = 1, tonumber(ARGV[1]) do
            if first[i] ~= second[i] then
                return 0
            end
        end
        return 1
    "#,
    )
});

/// KEYS: bucket list, length counter. ARGV: every slot in order.
/// Replaces the whole bucket, preserving slot positions, and recounts.
static FILL: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        redis.call('DEL', KEYS[1])
        local occupied = 0
        for i = 1, #ARGV do
            redis.call('RPUSH', KEYS[1], ARGV[i])
            if ARGV[i] ~= '' then
                occupied = occupied + 1
            end
        end
        redis.call('SET', KEYS[2], occupied)
        return occupied
    "#,
    )
});

/// A fingerprint bucket stored as a Redis list of exactly `capacity`
/// entries, plus a companion length counter.
///
/// Every mutation that touches occupancy runs as one atomic script updating
/// the list and the counter together. The descriptor holds no connection;
/// operations borrow one from the owning filter.
#[derive(Debug, Clone)]
pub struct BucketRedis {
    key: String,
    length_key: String,
    capacity: u64,
}

impl BucketRedis {
    /// Describes the bucket stored at `key` without touching the server.
    ///
    /// Use [`init`](Self::init) to (re)create the server-side state.
    pub fn new(key: impl Into<String>, capacity: u64) -> Self {
        let key = key.into();
        let length_key = bucket_length_key(&key);
        BucketRedis {
            key,
            length_key,
            capacity,
        }
    }

    /// Resets the server-side list to `capacity` empty slots.
    pub fn init(&self, conn: &mut Connection) -> Result<(), Error> {
        INIT.key(&self.key)
            .key(&self.length_key)
            .arg(self.capacity)
            .invoke::<()>(conn)?;
        Ok(())
    }

    /// Returns the server-side key of the bucket list.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the slot count.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns the number of occupied slots (from the counter key).
    pub fn len(&self, conn: &mut Connection) -> Result<u64, Error> {
        let len: Option<u64> = conn.get(&self.length_key)?;
        Ok(len.unwrap_or(0))
    }

    /// Returns whether no slot is occupied.
    pub fn is_empty(&self, conn: &mut Connection) -> Result<bool, Error> {
        Ok(self.len(conn)? == 0)
    }

    /// Returns whether at least one slot is free.
    pub fn is_free(&self, conn: &mut Connection) -> Result<bool, Error> {
        Ok(self.len(conn)? < self.capacity)
    }

    /// Returns all slots in order, empty sentinels included.
    pub fn elements(&self, conn: &mut Connection) -> Result<Vec<String>, Error> {
        Ok(conn.lrange(&self.key, 0, -1)?)
    }

    /// Returns the fingerprint at `index` (empty string for a free slot).
    pub fn at(&self, conn: &mut Connection, index: u64) -> Result<String, Error> {
        let value: Option<String> = conn.lindex(&self.key, index as isize)?;
        Ok(value.unwrap_or_default())
    }

    /// Stores `element` in the first empty slot.
    ///
    /// Refuses the empty string and refuses when the bucket is full; both
    /// return `false` without changing the bucket.
    pub fn add(&self, conn: &mut Connection, element: &str) -> Result<bool, Error> {
        if element.is_empty() {
            return Ok(false);
        }
        let added: i64 = ADD
            .key(&self.key)
            .key(&self.length_key)
            .arg(element)
            .arg(self.capacity)
            .invoke(conn)?;
        Ok(added == 1)
    }

    /// Clears the first slot holding `element`; returns whether one was found.
    pub fn remove(&self, conn: &mut Connection, element: &str) -> Result<bool, Error> {
        if element.is_empty() {
            return Ok(false);
        }
        let removed: i64 = REMOVE
            .key(&self.key)
            .key(&self.length_key)
            .arg(element)
            .invoke(conn)?;
        Ok(removed == 1)
    }

    /// Returns the slot index of `element`, or -1 on a miss.
    pub fn position(&self, conn: &mut Connection, element: &str) -> Result<i64, Error> {
        Ok(POSITION.key(&self.key).arg(element).invoke(conn)?)
    }

    /// Returns whether any slot holds `element`.
    pub fn lookup(&self, conn: &mut Connection, element: &str) -> Result<bool, Error> {
        Ok(self.position(conn, element)? > -1)
    }

    /// Overwrites slot `index` without going through the add/remove slot
    /// search. The length counter is adjusted if occupancy changes.
    pub fn set(&self, conn: &mut Connection, index: u64, element: &str) -> Result<(), Error> {
        self.swap(conn, index, element)?;
        Ok(())
    }

    /// Clears slot `index`; the counter moves only if the slot was occupied.
    pub fn unset(&self, conn: &mut Connection, index: u64) -> Result<(), Error> {
        UNSET
            .key(&self.key)
            .key(&self.length_key)
            .arg(index)
            .invoke::<()>(conn)?;
        Ok(())
    }

    /// Overwrites slot `index` with `element` and returns the prior value.
    pub fn swap(&self, conn: &mut Connection, index: u64, element: &str) -> Result<String, Error> {
        let prior: String = SWAP
            .key(&self.key)
            .key(&self.length_key)
            .arg(index)
            .arg(element)
            .invoke(conn)?;
        Ok(prior)
    }

    /// Compares the stored slots with `other`'s, element-wise.
    pub fn equals(&self, conn: &mut Connection, other: &BucketRedis) -> Result<bool, Error> {
        if self.capacity != other.capacity || self.len(conn)? != other.len(conn)? {
            return Ok(false);
        }
        let equal: i64 = EQUALS
            .key(&self.key)
            .key(&other.key)
            .arg(self.capacity)
            .invoke(conn)?;
        Ok(equal == 1)
    }

    /// Replaces the whole bucket with `slots`, preserving positions.
    ///
    /// Slots beyond the capacity are refused; missing slots are filled with
    /// the empty sentinel.
    pub fn fill(&self, conn: &mut Connection, slots: &[String]) -> Result<(), Error> {
        if slots.len() as u64 > self.capacity {
            return Err(Error::invalid_argument(format!(
                "{} slots exceed bucket capacity {}",
                slots.len(),
                self.capacity
            )));
        }
        let mut invocation = FILL.prepare_invoke();
        invocation.key(&self.key).key(&self.length_key);
        for slot in slots {
            invocation.arg(slot.as_str());
        }
        for _ in slots.len() as u64..self.capacity {
            invocation.arg(EMPTY_SLOT);
        }
        invocation.invoke::<()>(conn)?;
        Ok(())
    }
}
