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

use crate::bucket::EMPTY_SLOT;
use crate::error::Error;

/// An in-process bucket: `capacity` ordered slots of fingerprint strings.
///
/// `length` counts the occupied slots and never exceeds `capacity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketMem {
    slots: Vec<String>,
    length: u64,
}

impl BucketMem {
    /// Creates an empty bucket with the given capacity.
    pub fn new(capacity: u64) -> Self {
        BucketMem {
            slots: vec![String::new(); capacity as usize],
            length: 0,
        }
    }

    /// Rebuilds a bucket from exact slot contents, recounting occupancy.
    /// Import paths use this to preserve slot positions.
    pub(crate) fn from_slots(slots: Vec<String>) -> Self {
        let length = slots.iter().filter(|slot| !slot.is_empty()).count() as u64;
        BucketMem { slots, length }
    }

    /// Returns the slot count.
    pub fn capacity(&self) -> u64 {
        self.slots.len() as u64
    }

    /// Returns the number of occupied slots.
    pub fn len(&self) -> u64 {
        self.length
    }

    /// Returns whether no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns whether at least one slot is free.
    pub fn is_free(&self) -> bool {
        self.length < self.capacity()
    }

    /// Returns the index of the first empty slot, or `None` when full.
    pub fn next_slot(&self) -> Option<usize> {
        self.position(EMPTY_SLOT)
    }

    /// Returns the index of the first slot holding `element`.
    pub fn position(&self, element: &str) -> Option<usize> {
        self.slots.iter().position(|slot| slot == element)
    }

    /// Returns the fingerprint at `index` (empty string for a free slot).
    pub fn at(&self, index: usize) -> &str {
        &self.slots[index]
    }

    /// Returns all slots in order, empty sentinels included.
    pub fn elements(&self) -> &[String] {
        &self.slots
    }

    /// Stores `element` in the first empty slot.
    ///
    /// Refuses the empty string and refuses when the bucket is full; both
    /// return `false` without changing the bucket.
    pub fn add(&mut self, element: &str) -> bool {
        if element.is_empty() || !self.is_free() {
            return false;
        }
        // is_free guarantees an empty slot exists.
        let slot = self.next_slot().expect("free bucket has an empty slot");
        self.slots[slot] = element.to_string();
        self.length += 1;
        true
    }

    /// Clears the first slot holding `element`; returns whether one was found.
    pub fn remove(&mut self, element: &str) -> bool {
        match self.position(element) {
            Some(index) if !element.is_empty() => {
                self.unset(index);
                true
            }
            _ => false,
        }
    }

    /// Returns whether any slot holds `element`.
    pub fn lookup(&self, element: &str) -> bool {
        self.position(element).is_some()
    }

    /// Overwrites slot `index` without touching the length counter.
    ///
    /// Used by the cuckoo eviction loop, which replaces one occupied slot
    /// with another occupant.
    pub fn set(&mut self, index: usize, element: &str) {
        self.slots[index] = element.to_string();
    }

    /// Clears slot `index` and decrements the length counter.
    pub fn unset(&mut self, index: usize) {
        self.slots[index] = String::new();
        self.length -= 1;
    }

    /// Overwrites slot `index` with `element` and returns the prior value.
    pub fn swap(&mut self, index: usize, element: &str) -> String {
        std::mem::replace(&mut self.slots[index], element.to_string())
    }

    /// Writes capacity, length, then each slot as a length-prefixed string.
    pub fn write_to<W: Write>(&self, stream: &mut W) -> Result<(), Error> {
        stream
            .write_u64::<BigEndian>(self.capacity())
            .map_err(Error::io)?;
        stream.write_u64::<BigEndian>(self.length).map_err(Error::io)?;
        for slot in &self.slots {
            stream
                .write_u64::<BigEndian>(slot.len() as u64)
                .map_err(Error::io)?;
            stream.write_all(slot.as_bytes()).map_err(Error::io)?;
        }
        Ok(())
    }

    /// Reads a bucket written by [`write_to`](Self::write_to).
    pub fn read_from<R: Read>(stream: &mut R) -> Result<Self, Error> {
        let capacity = stream
            .read_u64::<BigEndian>()
            .map_err(|_| Error::insufficient_data("bucket capacity"))?;
        let length = stream
            .read_u64::<BigEndian>()
            .map_err(|_| Error::insufficient_data("bucket length"))?;
        if length > capacity {
            return Err(Error::deserial(format!(
                "bucket length {length} exceeds capacity {capacity}"
            )));
        }
        let mut slots = Vec::with_capacity(capacity as usize);
        for _ in 0..capacity {
            let len = stream
                .read_u64::<BigEndian>()
                .map_err(|_| Error::insufficient_data("slot length"))?;
            let mut bytes = vec![0u8; len as usize];
            stream
                .read_exact(&mut bytes)
                .map_err(|_| Error::insufficient_data("slot bytes"))?;
            let slot = String::from_utf8(bytes)
                .map_err(|_| Error::deserial("slot is not valid utf-8"))?;
            slots.push(slot);
        }
        Ok(BucketMem { slots, length })
    }
}
