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
//! In-memory run buffer.
//!
//! Owns the record byte arena plus a slot table of (offset, length) views.
//! Records are only ever copied in and out; slots are what gets sorted.
//! The capacity search mirrors the classic scheme: take the budget, derive a
//! record count, and on allocation failure retry with three quarters of the
//! budget until the hard minimum is reached.

use crate::sort::comparator::RecordComparator;
use crate::sort::error::SortError;
use crate::sort::merger::MERGE_FANIN_FINAL;

/// Floor for the shrinking capacity search, in bytes.
pub(crate) const MIN_SORT_MEMORY: usize = 4096;

#[derive(Debug)]
pub(crate) struct SortBuffer {
    arena: Vec<u8>,
    slots: Vec<(u32, u32)>,
    arena_budget: usize,
    record_capacity: usize,
}

impl SortBuffer {
    /// Size the buffer for records of at most `record_cap` bytes under
    /// `memory_bytes`. `estimated_rows` caps the slot count so a small input
    /// does not reserve the whole budget.
    pub(crate) fn with_budget(
        record_cap: usize,
        estimated_rows: u64,
        memory_bytes: usize,
    ) -> Result<Self, SortError> {
        debug_assert!(record_cap > 0);
        let min_sort_memory = MIN_SORT_MEMORY.max(record_cap * MERGE_FANIN_FINAL);
        let mut memory = memory_bytes;
        loop {
            if memory < min_sort_memory {
                return Err(SortError::OutOfMemory(format!(
                    "cannot fit {record_cap} byte sort records into a {memory_bytes} byte budget"
                )));
            }
            let keys = ((memory / record_cap) as u64).min(estimated_rows.max(1)) as usize;
            let arena_budget = keys * record_cap;
            let mut arena: Vec<u8> = Vec::new();
            let mut slots: Vec<(u32, u32)> = Vec::new();
            if arena.try_reserve_exact(arena_budget).is_ok() && slots.try_reserve_exact(keys).is_ok()
            {
                return Ok(Self {
                    arena,
                    slots,
                    arena_budget,
                    record_capacity: keys,
                });
            }
            let old_memory = memory;
            memory = memory / 4 * 3;
            if memory < min_sort_memory && old_memory > min_sort_memory {
                memory = min_sort_memory;
            }
        }
    }

    pub(crate) fn record_capacity(&self) -> usize {
        self.record_capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.slots.len() >= self.record_capacity || self.arena.len() >= self.arena_budget
    }

    /// Copy one encoded record in. Returns false (buffer unchanged) when the
    /// record does not fit; the caller spills and retries.
    pub(crate) fn append(&mut self, record: &[u8]) -> bool {
        if self.slots.len() >= self.record_capacity {
            return false;
        }
        if self.arena.len() + record.len() > self.arena_budget {
            return false;
        }
        let offset = self.arena.len() as u32;
        self.arena.extend_from_slice(record);
        self.slots.push((offset, record.len() as u32));
        true
    }

    /// Sort the slot table with the record comparator. Record bytes stay put.
    pub(crate) fn sort_in_place(&mut self, cmp: &RecordComparator) {
        let arena = &self.arena;
        self.slots.sort_unstable_by(|&(ao, al), &(bo, bl)| {
            let a = &arena[ao as usize..(ao + al) as usize];
            let b = &arena[bo as usize..(bo + bl) as usize];
            cmp.compare(a, b)
        });
    }

    pub(crate) fn record(&self, idx: usize) -> &[u8] {
        let (offset, len) = self.slots[idx];
        &self.arena[offset as usize..(offset + len) as usize]
    }

    pub(crate) fn iter_records(&self) -> impl Iterator<Item = &[u8]> {
        self.slots.iter().map(|&(offset, len)| {
            &self.arena[offset as usize..(offset + len) as usize]
        })
    }

    /// Hand the arena and slot table to the result materializer.
    pub(crate) fn into_parts(self) -> (Vec<u8>, Vec<(u32, u32)>) {
        (self.arena, self.slots)
    }

    /// Empty the buffer for the next run, keeping the allocation.
    pub(crate) fn reset(&mut self) {
        self.arena.clear();
        self.slots.clear();
    }

    /// Verify the slot table is ordered; used by debug assertions in spill.
    #[cfg(test)]
    pub(crate) fn is_sorted(&self, cmp: &RecordComparator) -> bool {
        self.slots.windows(2).all(|w| {
            let a = {
                let (o, l) = w[0];
                &self.arena[o as usize..(o + l) as usize]
            };
            let b = {
                let (o, l) = w[1];
                &self.arena[o as usize..(o + l) as usize]
            };
            cmp.compare(a, b) != std::cmp::Ordering::Greater
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::layout::{PayloadPolicy, plan_record_layout};
    use crate::sort::record::encode_record;
    use crate::sort::sort_key::{ColumnKind, SortKeyPart};
    use crate::sort::source::{BackRef, Datum, SourceRow};

    fn int_layout() -> crate::sort::layout::RecordLayout {
        plan_record_layout(
            vec![SortKeyPart::ascending(0, ColumnKind::Int)],
            PayloadPolicy::BackRef,
            65_536,
        )
        .unwrap()
    }

    #[test]
    fn budget_divides_into_whole_records() {
        // 64 KB of 16-byte records: 4096 slots.
        let buffer = SortBuffer::with_budget(16, u64::MAX, 64 * 1024).unwrap();
        assert_eq!(buffer.record_capacity(), 4096);
    }

    #[test]
    fn row_estimate_caps_the_capacity() {
        let buffer = SortBuffer::with_budget(16, 100, 64 * 1024).unwrap();
        assert_eq!(buffer.record_capacity(), 100);
    }

    #[test]
    fn tiny_budget_is_out_of_memory() {
        let err = SortBuffer::with_budget(1024, u64::MAX, 2048).unwrap_err();
        assert!(matches!(err, SortError::OutOfMemory(_)));
    }

    #[test]
    fn append_sort_and_read_back() {
        let layout = int_layout();
        let cmp = RecordComparator::new(&layout);
        let mut buffer = SortBuffer::with_budget(16, u64::MAX, MIN_SORT_MEMORY).unwrap();

        for (row_id, v) in [3i64, -7, 11, 0].into_iter().enumerate() {
            let row = SourceRow {
                columns: vec![Datum::Int(v)],
                back_ref: BackRef::from_row_id(row_id as u64),
            };
            let mut rec = Vec::new();
            encode_record(&layout, &row, &mut rec).unwrap();
            assert!(buffer.append(&rec));
        }
        buffer.sort_in_place(&cmp);
        assert!(buffer.is_sorted(&cmp));
        assert_eq!(buffer.len(), 4);

        let decoded: Vec<i64> = (0..buffer.len())
            .map(|i| {
                let rec = buffer.record(i);
                let raw = u64::from_be_bytes(rec[..8].try_into().unwrap());
                (raw ^ (1 << 63)) as i64
            })
            .collect();
        assert_eq!(decoded, vec![-7, 0, 3, 11]);
    }

    #[test]
    fn append_reports_full_and_reset_reuses() {
        let mut buffer = SortBuffer::with_budget(16, 2, MIN_SORT_MEMORY).unwrap();
        // The estimate capped the buffer to two slots.
        assert!(buffer.append(&[0u8; 16]));
        assert!(buffer.append(&[1u8; 16]));
        assert!(buffer.is_full());
        assert!(!buffer.append(&[2u8; 16]));
        buffer.reset();
        assert!(buffer.is_empty());
        assert!(buffer.append(&[3u8; 16]));
    }
}
