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
//! Bounded top-K selector.
//!
//! A capacity-bounded max-heap that replaces the full sort buffer when a row
//! limit is known and the cost model favors it. The worst retained record
//! sits on top and is evicted by anything better; the selector never spills.
//!
//! With the ties flag, records comparing equal to the current boundary are
//! kept in a side list that is discarded wholesale when the boundary key
//! changes.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::sort::layout::RecordLayout;
use crate::sort::merger::{MERGE_FANIN, MERGE_FANIN_FINAL};
use crate::sort::source::BACK_REF_BYTES;

/// Heap insertion measured at about three times a plain comparison.
const PQ_SLOWNESS: f64 = 3.0;
/// Per-record slot bookkeeping charged against the memory budget.
const REC_PTR_BYTES: usize = 8;
/// Scale factor turning comparison counts into cost units.
const COMPARE_COST_DIVISOR: f64 = 500.0;
/// Sequential transfer unit for the I/O cost terms.
const IO_BLOCK_BYTES: f64 = 4096.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TopNMode {
    /// Records keep their configured payload.
    FullPayload,
    /// Only keys and back-references fit the budget: the layout is rebuilt
    /// with back-reference payload and rows are refetched afterwards.
    KeysOnly,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct TopNPlan {
    pub rows_to_keep: u64,
    pub mode: TopNMode,
}

/// Decide whether the bounded selector should replace the full sort.
///
/// The selector wins when the whole input fits in memory and the limit is
/// small against the row estimate, or when only the keys fit and the
/// estimated external merge costs more than heap insertion plus the random
/// refetch of the retained rows. Cost ties favor the full sort.
pub(crate) fn check_topn_applicable(
    limit: Option<u64>,
    offset: u64,
    layout: &RecordLayout,
    estimated_rows: u64,
    memory_bytes: usize,
) -> Option<TopNPlan> {
    let limit = limit?;
    let rows_to_keep = offset.checked_add(limit)?;
    if rows_to_keep.saturating_add(2) >= u32::MAX as u64 {
        return None;
    }

    let record_len = layout.record_cap();
    let available_keys = (memory_bytes / (record_len + REC_PTR_BYTES)) as u64;
    // One extra slot so the heap can hold the incoming candidate.
    let keys_needed = rows_to_keep + 1;

    if estimated_rows < available_keys {
        // Whole input fits; the heap only wins when most rows get discarded.
        if (rows_to_keep as f64) < estimated_rows as f64 / PQ_SLOWNESS {
            return Some(TopNPlan {
                rows_to_keep,
                mode: TopNMode::FullPayload,
            });
        }
        return None;
    }

    if keys_needed < available_keys {
        return Some(TopNPlan {
            rows_to_keep,
            mode: TopNMode::FullPayload,
        });
    }

    if layout.has_addon() {
        // Strip the addon payload: does a keys-plus-back-reference record fit?
        let keys_only_len = layout.fixed_key_len + BACK_REF_BYTES;
        let available = (memory_bytes / (keys_only_len + REC_PTR_BYTES)) as u64;
        if keys_needed < available {
            let rows = estimated_rows as f64;
            let merge_cost =
                external_merge_cost(rows, available as f64, keys_only_len as f64);
            let pq_cpu_cost = (PQ_SLOWNESS * rows + keys_needed as f64)
                * (keys_needed as f64).max(2.0).ln()
                / COMPARE_COST_DIVISOR;
            // Random refetch, priced pessimistically at half a table scan
            // per retained row.
            let scan_cost = rows * record_len as f64 / IO_BLOCK_BYTES;
            let pq_io_cost = rows_to_keep as f64 * scan_cost / 2.0;
            if merge_cost < pq_cpu_cost + pq_io_cost {
                return None;
            }
            return Some(TopNPlan {
                rows_to_keep,
                mode: TopNMode::KeysOnly,
            });
        }
    }
    None
}

/// Estimated cost of run generation plus bounded-fan-in merging, shaped after
/// the merge pass structure the engine actually runs.
fn external_merge_cost(num_rows: f64, keys_per_buffer: f64, record_len: f64) -> f64 {
    if keys_per_buffer < 1.0 {
        return f64::INFINITY;
    }
    let mut runs = (num_rows / keys_per_buffer).ceil();
    // Quicksort of every run.
    let mut cost = num_rows * keys_per_buffer.max(2.0).ln() / COMPARE_COST_DIVISOR;
    let pass_io = 2.0 * num_rows * record_len / IO_BLOCK_BYTES;
    while runs >= MERGE_FANIN_FINAL as f64 {
        cost += num_rows * (MERGE_FANIN as f64).ln() / COMPARE_COST_DIVISOR + pass_io;
        runs = (runs / MERGE_FANIN as f64).ceil();
    }
    cost + num_rows * runs.max(2.0).ln() / COMPARE_COST_DIVISOR + pass_io
}

#[derive(Debug)]
struct TopNEntry {
    /// Comparable prefix: the key region, plus the back-reference when that
    /// is the payload. Order among equal keys with addon payload stays
    /// unspecified and falls back to arrival order.
    cmp_len: u32,
    record: Box<[u8]>,
    seq: u64,
}

impl TopNEntry {
    fn cmp_bytes(&self) -> &[u8] {
        &self.record[..self.cmp_len as usize]
    }
}

impl PartialEq for TopNEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_bytes() == other.cmp_bytes() && self.seq == other.seq
    }
}

impl Eq for TopNEntry {}

impl PartialOrd for TopNEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TopNEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap keeps the largest element on top.
        // "Largest" here means "worst record" for eviction.
        self.cmp_bytes()
            .cmp(other.cmp_bytes())
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// The selector itself. Only fixed mem-comparable layouts flow through here:
/// the selector never spills, so packed encodings would cost comparison time
/// without saving any I/O.
#[derive(Debug)]
pub(crate) struct TopNSelector {
    capacity: usize,
    key_len: usize,
    cmp_len: usize,
    with_ties: bool,
    heap: BinaryHeap<TopNEntry>,
    ties: Vec<Box<[u8]>>,
    next_seq: u64,
}

impl TopNSelector {
    pub(crate) fn new(layout: &RecordLayout, rows_to_keep: u64, with_ties: bool) -> Self {
        debug_assert!(!layout.packed_keys && !layout.packed_addons);
        let key_len = layout.fixed_key_len;
        let cmp_len = if layout.uses_back_ref() {
            key_len + BACK_REF_BYTES
        } else {
            key_len
        };
        Self {
            capacity: rows_to_keep as usize,
            key_len,
            cmp_len,
            with_ties,
            heap: BinaryHeap::with_capacity(rows_to_keep as usize + 1),
            ties: Vec::new(),
            next_seq: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len() + self.ties.len()
    }

    /// Offer one encoded record.
    pub(crate) fn push(&mut self, record: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        let entry = TopNEntry {
            cmp_len: self.cmp_len as u32,
            record: record.into(),
            seq: self.next_seq,
        };
        self.next_seq = self.next_seq.saturating_add(1);

        if self.heap.len() < self.capacity {
            self.heap.push(entry);
            return;
        }

        let key_len = self.key_len;
        let worst_key_ord = {
            let worst = self.heap.peek().expect("heap at capacity");
            entry.record[..key_len].cmp(&worst.record[..key_len])
        };
        match worst_key_ord {
            Ordering::Greater => {}
            Ordering::Equal => {
                if self.with_ties {
                    self.ties.push(entry.record);
                }
            }
            Ordering::Less => {
                let old_boundary: Box<[u8]> = {
                    let worst = self.heap.peek().expect("heap at capacity");
                    worst.record[..key_len].into()
                };
                self.heap.pop();
                self.heap.push(entry);
                if self.with_ties && !self.ties.is_empty() {
                    let new_worst = self.heap.peek().expect("heap refilled");
                    if new_worst.record[..key_len] != old_boundary[..] {
                        // The boundary moved; everything tied to the old one
                        // now ranks strictly past the limit.
                        self.ties.clear();
                    }
                }
            }
        }
    }

    /// Emit the retained records in final order, boundary ties last among
    /// their equals.
    pub(crate) fn finish(self) -> Vec<Box<[u8]>> {
        let mut records: Vec<Box<[u8]>> = self
            .heap
            .into_sorted_vec()
            .into_iter()
            .map(|entry| entry.record)
            .collect();
        records.extend(self.ties);
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::layout::{AddonField, PayloadPolicy, plan_record_layout};
    use crate::sort::record::encode_record;
    use crate::sort::sort_key::{ColumnKind, SortKeyPart};
    use crate::sort::source::{BackRef, Datum, SourceRow};

    fn int_layout() -> RecordLayout {
        plan_record_layout(
            vec![SortKeyPart::ascending(0, ColumnKind::Int)],
            PayloadPolicy::BackRef,
            65_536,
        )
        .unwrap()
    }

    fn record(layout: &RecordLayout, v: i64, row_id: u64) -> Vec<u8> {
        let row = SourceRow {
            columns: vec![Datum::Int(v)],
            back_ref: BackRef::from_row_id(row_id),
        };
        let mut out = Vec::new();
        encode_record(layout, &row, &mut out).unwrap();
        out
    }

    fn decode(records: &[Box<[u8]>]) -> Vec<i64> {
        records
            .iter()
            .map(|r| {
                let raw = u64::from_be_bytes(r[..8].try_into().unwrap());
                (raw ^ (1 << 63)) as i64
            })
            .collect()
    }

    #[test]
    fn keeps_the_smallest_limit_rows_in_order() {
        let layout = int_layout();
        let mut selector = TopNSelector::new(&layout, 3, false);
        for (i, v) in [9i64, 1, 8, 2, 7, 3, -1].into_iter().enumerate() {
            selector.push(&record(&layout, v, i as u64));
        }
        assert_eq!(selector.len(), 3);
        assert_eq!(decode(&selector.finish()), vec![-1, 1, 2]);
    }

    #[test]
    fn fewer_rows_than_limit_keeps_them_all() {
        let layout = int_layout();
        let mut selector = TopNSelector::new(&layout, 10, false);
        for (i, v) in [5i64, 3].into_iter().enumerate() {
            selector.push(&record(&layout, v, i as u64));
        }
        assert_eq!(decode(&selector.finish()), vec![3, 5]);
    }

    #[test]
    fn boundary_ties_are_retained_when_asked() {
        let layout = int_layout();
        // Keys 1,1,2,2,2,3,3 with limit 5: rank 5 lands on key 2, whose
        // occurrences are all inside the limit already.
        let mut selector = TopNSelector::new(&layout, 5, true);
        for (i, v) in [1i64, 1, 2, 2, 2, 3, 3].into_iter().enumerate() {
            selector.push(&record(&layout, v, i as u64));
        }
        assert_eq!(decode(&selector.finish()), vec![1, 1, 2, 2, 2]);

        // Limit 4 cuts inside the 2s: the third 2 ties the boundary.
        let mut selector = TopNSelector::new(&layout, 4, true);
        for (i, v) in [1i64, 1, 2, 2, 2, 3, 3].into_iter().enumerate() {
            selector.push(&record(&layout, v, i as u64));
        }
        assert_eq!(decode(&selector.finish()), vec![1, 1, 2, 2, 2]);

        // Limit 6 cuts inside the 3s: both 3s stay.
        let mut selector = TopNSelector::new(&layout, 6, true);
        for (i, v) in [1i64, 1, 2, 2, 2, 3, 3].into_iter().enumerate() {
            selector.push(&record(&layout, v, i as u64));
        }
        assert_eq!(decode(&selector.finish()), vec![1, 1, 2, 2, 2, 3, 3]);
    }

    #[test]
    fn tie_list_is_dropped_when_the_boundary_improves() {
        let layout = int_layout();
        let mut selector = TopNSelector::new(&layout, 2, true);
        for (i, v) in [5i64, 5, 5, 1, 2].into_iter().enumerate() {
            selector.push(&record(&layout, v, i as u64));
        }
        // The third 5 tied the boundary, then 1 and 2 pushed every 5 out.
        assert_eq!(decode(&selector.finish()), vec![1, 2]);
    }

    #[test]
    fn without_ties_equal_boundary_rows_are_dropped() {
        let layout = int_layout();
        let mut selector = TopNSelector::new(&layout, 2, false);
        for (i, v) in [2i64, 2, 2, 2].into_iter().enumerate() {
            selector.push(&record(&layout, v, i as u64));
        }
        assert_eq!(decode(&selector.finish()), vec![2, 2]);
    }

    #[test]
    fn no_limit_means_no_selector() {
        let layout = int_layout();
        assert!(check_topn_applicable(None, 0, &layout, 1_000_000, 1 << 20).is_none());
    }

    #[test]
    fn small_limit_over_memory_resident_input_uses_the_heap() {
        let layout = int_layout();
        let plan = check_topn_applicable(Some(10), 5, &layout, 10_000, 64 << 20).unwrap();
        assert_eq!(plan.mode, TopNMode::FullPayload);
        assert_eq!(plan.rows_to_keep, 15);
    }

    #[test]
    fn large_limit_over_memory_resident_input_prefers_the_full_sort() {
        let layout = int_layout();
        assert!(check_topn_applicable(Some(9_000), 0, &layout, 10_000, 64 << 20).is_none());
    }

    #[test]
    fn unrepresentable_limit_is_rejected() {
        let layout = int_layout();
        assert!(
            check_topn_applicable(Some(u32::MAX as u64), 0, &layout, 10_000, 64 << 20).is_none()
        );
    }

    #[test]
    fn keys_only_mode_strips_addon_payload() {
        let fields = vec![AddonField {
            column: 1,
            kind: ColumnKind::Bytes { max_len: 500 },
            nullable: false,
        }];
        let layout = plan_record_layout(
            vec![SortKeyPart::ascending(0, ColumnKind::Int)],
            PayloadPolicy::Addon(fields),
            65_536,
        )
        .unwrap();
        // A tiny buffer cannot hold even two full records, but key-plus-
        // back-reference records fit easily, and refetching one row is far
        // cheaper than the many merge passes the wide records would need.
        let plan = check_topn_applicable(Some(1), 0, &layout, 1_000_000_000, 1500).unwrap();
        assert_eq!(plan.mode, TopNMode::KeysOnly);
        assert_eq!(plan.rows_to_keep, 1);
    }
}
