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

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io::Read;
use std::io::Write;

use byteorder::BigEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;

use crate::countmin::CountMinSketch;
use crate::error::Error;
use crate::topk::sort_values;
use crate::topk::HeapEntryEnvelope;
use crate::topk::TopKElement;
use crate::topk::TopKEnvelope;

/// A heap entry ordered by frequency, ties broken by the element text.
/// Field order matters: the derived ordering compares frequency first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct HeapEntry {
    frequency: u64,
    value: String,
}

/// An in-process Top-K tracker.
///
/// The embedded Count-Min sketch serializes its own updates; the heap has
/// no intrinsic synchronization, which is why inserts take `&mut self`.
/// Callers needing linearizable insert/values across threads serialize
/// externally.
#[derive(Debug)]
pub struct TopK {
    k: u64,
    error_rate: f64,
    accuracy: f64,
    sketch: CountMinSketch,
    heap: BinaryHeap<Reverse<HeapEntry>>,
}

impl TopK {
    /// Creates a tracker for the `k` heaviest elements, with the embedded
    /// sketch sized from `(error_rate, accuracy)`.
    pub fn new(k: u64, error_rate: f64, accuracy: f64) -> Result<Self, Error> {
        if k == 0 {
            return Err(Error::invalid_argument("k must be greater than 0"));
        }
        Ok(TopK {
            k,
            error_rate,
            accuracy,
            sketch: CountMinSketch::from_estimates(error_rate, accuracy)?,
            heap: BinaryHeap::new(),
        })
    }

    /// Returns `k`.
    pub fn k(&self) -> u64 {
        self.k
    }

    /// Records `count` occurrences of the element.
    ///
    /// The element enters the heap when there is room or its estimated
    /// frequency reaches the current minimum; the smallest entry is
    /// evicted when the heap would exceed `k`.
    pub fn insert(&mut self, data: &[u8], count: u64) -> Result<(), Error> {
        if count == 0 {
            return Err(Error::invalid_argument("count must be greater than zero"));
        }
        let element = String::from_utf8_lossy(data).into_owned();
        self.sketch.update(data, count);
        let frequency = self.sketch.count(data);

        let admits = match self.heap.peek() {
            None => true,
            Some(minimum) => (self.heap.len() as u64) < self.k || frequency >= minimum.0.frequency,
        };
        if admits {
            self.heap.retain(|entry| entry.0.value != element);
            self.heap.push(Reverse(HeapEntry {
                frequency,
                value: element,
            }));
            if self.heap.len() as u64 > self.k {
                self.heap.pop();
            }
        }
        Ok(())
    }

    /// Returns the tracked elements ordered by count descending, ties
    /// broken lexicographically ascending.
    pub fn values(&self) -> Vec<TopKElement> {
        let mut values: Vec<TopKElement> = self
            .heap
            .iter()
            .map(|entry| TopKElement {
                element: entry.0.value.clone(),
                count: entry.0.frequency,
            })
            .collect();
        sort_values(&mut values);
        values
    }

    /// Returns whether both trackers have the same parameters, sketch and
    /// heap contents.
    pub fn equals(&self, other: &TopK) -> bool {
        self.k == other.k
            && self.error_rate == other.error_rate
            && self.accuracy == other.accuracy
            && self.sketch.equals(&other.sketch)
            && self.values() == other.values()
    }

    /// Serializes the tracker to its JSON envelope.
    pub fn export(&self) -> Result<Vec<u8>, Error> {
        let sketch = self.sketch.to_envelope();
        let heap = self
            .values()
            .into_iter()
            .map(|value| HeapEntryEnvelope {
                v: value.element,
                f: value.count,
            })
            .collect();
        let envelope = TopKEnvelope {
            k: self.k,
            e: self.error_rate,
            a: self.accuracy,
            s: sketch,
            h: heap,
            hk: None,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Reconstructs a tracker from an envelope produced by either backend.
    pub fn import(data: &[u8]) -> Result<Self, Error> {
        let envelope: TopKEnvelope = serde_json::from_slice(data)?;
        let sketch = CountMinSketch::from_envelope(envelope.s)?;
        let mut heap = BinaryHeap::with_capacity(envelope.h.len());
        for entry in envelope.h {
            heap.push(Reverse(HeapEntry {
                frequency: entry.f,
                value: entry.v,
            }));
        }
        Ok(TopK {
            k: envelope.k,
            error_rate: envelope.e,
            accuracy: envelope.a,
            sketch,
            heap,
        })
    }

    /// Writes the tracker onto `stream`: `k`, the two rates as IEEE-754
    /// bits, the embedded sketch stream, then the heap entries.
    pub fn write_to<W: Write>(&self, stream: &mut W) -> Result<(), Error> {
        stream.write_u64::<BigEndian>(self.k).map_err(Error::io)?;
        stream
            .write_f64::<BigEndian>(self.error_rate)
            .map_err(Error::io)?;
        stream
            .write_f64::<BigEndian>(self.accuracy)
            .map_err(Error::io)?;
        self.sketch.write_to(stream)?;
        let values = self.values();
        stream
            .write_u64::<BigEndian>(values.len() as u64)
            .map_err(Error::io)?;
        for value in values {
            stream
                .write_u64::<BigEndian>(value.element.len() as u64)
                .map_err(Error::io)?;
            stream
                .write_all(value.element.as_bytes())
                .map_err(Error::io)?;
            stream
                .write_u64::<BigEndian>(value.count)
                .map_err(Error::io)?;
        }
        Ok(())
    }

    /// Reads a tracker written by [`write_to`](Self::write_to).
    pub fn read_from<R: Read>(stream: &mut R) -> Result<Self, Error> {
        let k = stream
            .read_u64::<BigEndian>()
            .map_err(|_| Error::insufficient_data("top-k k"))?;
        let error_rate = stream
            .read_f64::<BigEndian>()
            .map_err(|_| Error::insufficient_data("top-k error rate"))?;
        let accuracy = stream
            .read_f64::<BigEndian>()
            .map_err(|_| Error::insufficient_data("top-k accuracy"))?;
        let sketch = CountMinSketch::read_from(stream)?;
        let entries = stream
            .read_u64::<BigEndian>()
            .map_err(|_| Error::insufficient_data("top-k heap size"))?;
        let mut heap = BinaryHeap::with_capacity(entries as usize);
        for _ in 0..entries {
            let len = stream
                .read_u64::<BigEndian>()
                .map_err(|_| Error::insufficient_data("heap element length"))?;
            let mut bytes = vec![0u8; len as usize];
            stream
                .read_exact(&mut bytes)
                .map_err(|_| Error::insufficient_data("heap element bytes"))?;
            let value = String::from_utf8(bytes)
                .map_err(|_| Error::deserial("heap element is not valid utf-8"))?;
            let frequency = stream
                .read_u64::<BigEndian>()
                .map_err(|_| Error::insufficient_data("heap element frequency"))?;
            heap.push(Reverse(HeapEntry { frequency, value }));
        }
        Ok(TopK {
            k,
            error_rate,
            accuracy,
            sketch,
            heap,
        })
    }
}
