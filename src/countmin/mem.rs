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

use crate::countmin::cell_positions;
use crate::countmin::check_dimensions;
use crate::countmin::CountMinEnvelope;
use crate::error::Error;

struct Inner {
    // Row-major d x w matrix.
    counts: Vec<u64>,
    all_sum: u64,
}

/// An in-process Count-Min sketch.
///
/// Every operation takes the sketch's single mutex, so concurrent callers
/// sharing one instance observe a total order of updates and counts.
#[derive(Debug)]
pub struct CountMinSketch {
    rows: u64,
    columns: u64,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("all_sum", &self.all_sum)
            .finish_non_exhaustive()
    }
}

impl CountMinSketch {
    /// Creates a sketch of `rows` x `columns` zeroed counters.
    pub fn new(rows: u64, columns: u64) -> Result<Self, Error> {
        check_dimensions(rows, columns)?;
        Ok(CountMinSketch {
            rows,
            columns,
            inner: Mutex::new(Inner {
                counts: vec![0; (rows * columns) as usize],
                all_sum: 0,
            }),
        })
    }

    /// Creates a sketch sized from the target relative error and accuracy.
    pub fn from_estimates(error_rate: f64, accuracy: f64) -> Result<Self, Error> {
        let (rows, columns) = super::dimensions(error_rate, accuracy);
        Self::new(rows, columns)
    }

    /// Returns the number of rows (`d`).
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Returns the number of columns (`w`).
    pub fn columns(&self) -> u64 {
        self.columns
    }

    /// Returns the total weight inserted so far.
    pub fn all_sum(&self) -> u64 {
        self.inner.lock().all_sum
    }

    /// Adds `count` to the item's counter in every row.
    pub fn update(&self, data: &[u8], count: u64) {
        let positions = cell_positions(data, self.rows, self.columns);
        let mut inner = self.inner.lock();
        for (row, column) in positions.iter().enumerate() {
            let index = row as u64 * self.columns + column;
            inner.counts[index as usize] += count;
        }
        inner.all_sum += count;
    }

    /// Adds one occurrence of the item.
    pub fn update_once(&self, data: &[u8]) {
        self.update(data, 1);
    }

    /// Returns the estimated frequency: the minimum of the item's `d`
    /// counters. Never underestimates the true count.
    pub fn count(&self, data: &[u8]) -> u64 {
        let positions = cell_positions(data, self.rows, self.columns);
        let inner = self.inner.lock();
        positions
            .iter()
            .enumerate()
            .map(|(row, column)| inner.counts[(row as u64 * self.columns + column) as usize])
            .min()
            .unwrap_or(0)
    }

    /// Adds every counter of `other` into this sketch.
    ///
    /// Returns [`ErrorKind::ShapeMismatch`](crate::error::ErrorKind) when
    /// the dimensions differ; neither sketch is changed in that case.
    pub fn merge(&self, other: &CountMinSketch) -> Result<(), Error> {
        if self.rows != other.rows || self.columns != other.columns {
            return Err(Error::shape_mismatch(format!(
                "cannot merge {}x{} sketch with {}x{}",
                self.rows, self.columns, other.rows, other.columns
            )));
        }
        let mut inner = self.inner.lock();
        let other_inner = other.inner.lock();
        for (mine, theirs) in inner.counts.iter_mut().zip(other_inner.counts.iter()) {
            *mine += *theirs;
        }
        inner.all_sum += other_inner.all_sum;
        Ok(())
    }

    /// Returns whether both sketches have identical dimensions and counters.
    pub fn equals(&self, other: &CountMinSketch) -> bool {
        if self.rows != other.rows || self.columns != other.columns {
            return false;
        }
        self.inner.lock().counts == other.inner.lock().counts
    }

    /// Serializes the sketch to its JSON envelope.
    pub fn export(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(&self.to_envelope())?)
    }

    /// Reconstructs a sketch from an envelope produced by either backend.
    pub fn import(data: &[u8]) -> Result<Self, Error> {
        let envelope: CountMinEnvelope = serde_json::from_slice(data)?;
        Self::from_envelope(envelope)
    }

    pub(crate) fn to_envelope(&self) -> CountMinEnvelope {
        let inner = self.inner.lock();
        let matrix = inner
            .counts
            .chunks(self.columns as usize)
            .map(|row| row.to_vec())
            .collect();
        CountMinEnvelope {
            r: self.rows,
            c: self.columns,
            s: inner.all_sum,
            m: matrix,
            k: None,
        }
    }

    pub(crate) fn from_envelope(envelope: CountMinEnvelope) -> Result<Self, Error> {
        envelope.check()?;
        Ok(CountMinSketch {
            rows: envelope.r,
            columns: envelope.c,
            inner: Mutex::new(Inner {
                counts: envelope.m.into_iter().flatten().collect(),
                all_sum: envelope.s,
            }),
        })
    }

    /// Writes the sketch onto `stream`: rows, columns, total weight, then
    /// the matrix row-major, all big-endian.
    pub fn write_to<W: Write>(&self, stream: &mut W) -> Result<(), Error> {
        let inner = self.inner.lock();
        stream.write_u64::<BigEndian>(self.rows).map_err(Error::io)?;
        stream
            .write_u64::<BigEndian>(self.columns)
            .map_err(Error::io)?;
        stream
            .write_u64::<BigEndian>(inner.all_sum)
            .map_err(Error::io)?;
        for count in &inner.counts {
            stream.write_u64::<BigEndian>(*count).map_err(Error::io)?;
        }
        Ok(())
    }

    /// Reads a sketch written by [`write_to`](Self::write_to).
    pub fn read_from<R: Read>(stream: &mut R) -> Result<Self, Error> {
        let rows = stream
            .read_u64::<BigEndian>()
            .map_err(|_| Error::insufficient_data("count-min rows"))?;
        let columns = stream
            .read_u64::<BigEndian>()
            .map_err(|_| Error::insufficient_data("count-min columns"))?;
        let all_sum = stream
            .read_u64::<BigEndian>()
            .map_err(|_| Error::insufficient_data("count-min total weight"))?;
        check_dimensions(rows, columns)?;
        let mut counts = vec![0u64; (rows * columns) as usize];
        for count in counts.iter_mut() {
            *count = stream
                .read_u64::<BigEndian>()
                .map_err(|_| Error::insufficient_data("count-min counters"))?;
        }
        Ok(CountMinSketch {
            rows,
            columns,
            inner: Mutex::new(Inner { counts, all_sum }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_basic_counts() {
        let sketch = CountMinSketch::from_estimates(0.001, 0.999).unwrap();
        sketch.update_once(b"foo");
        sketch.update_once(b"foo");
        sketch.update_once(b"bar");

        assert_eq!(sketch.count(b"foo"), 2);
        assert_eq!(sketch.count(b"bar"), 1);
        assert_eq!(sketch.count(b"baz"), 0);
        assert_eq!(sketch.all_sum(), 3);
    }

    #[test]
    fn test_invalid_dimensions() {
        assert!(CountMinSketch::new(0, 10).is_err());
        assert!(CountMinSketch::new(10, 0).is_err());
    }

    #[test]
    fn test_counts_never_underestimate() {
        let sketch = CountMinSketch::new(3, 32).unwrap();
        for i in 0..200u32 {
            sketch.update(format!("item-{}", i % 20).as_bytes(), 1);
        }
        // Every item was inserted 10 times; a small sketch may
        // overestimate but never undercount.
        for i in 0..20 {
            assert!(sketch.count(format!("item-{i}").as_bytes()) >= 10);
        }
    }

    #[test]
    fn test_counts_monotone() {
        let sketch = CountMinSketch::new(2, 64).unwrap();
        let mut last = 0;
        for _ in 0..10 {
            sketch.update(b"x", 3);
            let count = sketch.count(b"x");
            assert!(count >= last + 3);
            last = count;
        }
    }

    #[test]
    fn test_merge() {
        let a = CountMinSketch::new(2, 64).unwrap();
        let b = CountMinSketch::new(2, 64).unwrap();
        a.update(b"foo", 2);
        b.update(b"foo", 3);
        b.update(b"bar", 1);

        a.merge(&b).unwrap();
        assert_eq!(a.count(b"foo"), 5);
        assert_eq!(a.count(b"bar"), 1);
        assert_eq!(a.all_sum(), 6);
    }

    #[test]
    fn test_merge_distributive() {
        let combined = CountMinSketch::new(3, 128).unwrap();
        let left = CountMinSketch::new(3, 128).unwrap();
        let right = CountMinSketch::new(3, 128).unwrap();

        for i in 0..50 {
            let item = format!("a-{i}");
            combined.update_once(item.as_bytes());
            left.update_once(item.as_bytes());
        }
        for i in 0..50 {
            let item = format!("b-{i}");
            combined.update_once(item.as_bytes());
            right.update_once(item.as_bytes());
        }

        left.merge(&right).unwrap();
        assert!(left.equals(&combined));
        for i in 0..50 {
            let item = format!("a-{i}");
            assert_eq!(left.count(item.as_bytes()), combined.count(item.as_bytes()));
        }
    }

    #[test]
    fn test_merge_shape_mismatch() {
        let a = CountMinSketch::new(2, 64).unwrap();
        let b = CountMinSketch::new(3, 64).unwrap();
        a.update(b"foo", 1);

        let err = a.merge(&b).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
        // No partial mutation happened.
        assert_eq!(a.count(b"foo"), 1);
        assert_eq!(a.all_sum(), 1);
    }

    #[test]
    fn test_export_import_round_trip() {
        let sketch = CountMinSketch::new(3, 32).unwrap();
        sketch.update(b"foo", 7);
        sketch.update(b"bar", 2);

        let restored = CountMinSketch::import(&sketch.export().unwrap()).unwrap();
        assert!(sketch.equals(&restored));
        assert_eq!(restored.all_sum(), 9);
        assert_eq!(restored.count(b"foo"), 7);
    }

    #[test]
    fn test_import_malformed() {
        assert!(CountMinSketch::import(b"{\"r\":2").is_err());
        // Matrix narrower than the declared columns.
        assert!(
            CountMinSketch::import(br#"{"r":1,"c":4,"s":0,"m":[[0,0]]}"#).is_err()
        );
    }

    #[test]
    fn test_stream_round_trip() {
        let sketch = CountMinSketch::new(2, 16).unwrap();
        sketch.update(b"foo", 3);

        let mut buffer = Vec::new();
        sketch.write_to(&mut buffer).unwrap();
        let restored = CountMinSketch::read_from(&mut buffer.as_slice()).unwrap();
        assert!(sketch.equals(&restored));
        assert_eq!(restored.all_sum(), 3);
    }
}
