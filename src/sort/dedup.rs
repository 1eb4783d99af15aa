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
//! Deduplication and N-way intersection engine.
//!
//! Responsibilities:
//! - Deduplicate keys on the fly in an ordered in-memory tree, incrementing
//!   an occurrence count per duplicate.
//! - On memory-budget exhaustion, flush the tree as one sorted run and keep
//!   accumulating; at end of input either walk the tree directly (nothing
//!   flushed, no I/O) or collapse-merge all runs.
//! - Apply a minimum-count filter so N-way intersection only passes keys
//!   present in every input set.
//!
//! Keys live in their fixed mem-comparable encoding, so plain byte order is
//! the semantic order and the tree needs no external comparator.

use std::collections::BTreeMap;

use crate::common::config;
use crate::novasort_logging::debug;
use crate::sort::comparator::RecordComparator;
use crate::sort::error::{CancelToken, SortError};
use crate::sort::layout::{COUNT_TAIL_BYTES, RecordLayout, plan_dedup_layout};
use crate::sort::merger::{
    CollapseSpec, MERGE_FANIN_FINAL, MergeContext, MergeOutput, merge_runs, merge_to_fewer_runs,
};
use crate::sort::sort_key::SortKeyPart;
use crate::sort::sorter::{SortBudget, SortProfile};
use crate::sort::source::{RowSource, SourceRow};
use crate::spill::dir_manager::SpillDirManager;
use crate::spill::run_file::{RunDescriptor, write_run};
use crate::spill::store::{ExternalStore, SpillFileStore};

/// Rough per-entry bookkeeping cost of the in-memory tree.
const TREE_NODE_OVERHEAD: usize = 32;

#[derive(Clone, Debug)]
pub struct DedupSpec {
    pub key_parts: Vec<SortKeyPart>,
    /// Report real occurrence totals to the visitor (and carry them on
    /// spilled runs). Without this every distinct key reports 1.
    pub count_occurrences: bool,
    /// Keys with a lower total are discarded. Zero disables the filter;
    /// values above one imply occurrence counting.
    pub min_count: u64,
}

impl DedupSpec {
    pub fn new(key_parts: Vec<SortKeyPart>) -> Self {
        Self {
            key_parts,
            count_occurrences: false,
            min_count: 0,
        }
    }

    /// Configure for intersecting `sets` input sets: only keys occurring in
    /// every set survive.
    pub fn intersection(key_parts: Vec<SortKeyPart>, sets: u64) -> Self {
        Self {
            key_parts,
            count_occurrences: true,
            min_count: sets,
        }
    }
}

struct DedupSpillState {
    dir_manager: SpillDirManager,
    from: SpillFileStore,
    to: SpillFileStore,
    runs: Vec<RunDescriptor>,
}

pub struct Deduplicator {
    spec: DedupSpec,
    budget: SortBudget,
    layout: RecordLayout,
    comparator: RecordComparator,
    tree: BTreeMap<Box<[u8]>, u64>,
    tree_bytes: usize,
    spill: Option<DedupSpillState>,
    profile: SortProfile,
    scratch: Vec<u8>,
}

impl Deduplicator {
    pub fn new(spec: DedupSpec, budget: SortBudget) -> Result<Self, SortError> {
        let with_counts = spec.count_occurrences || spec.min_count > 1;
        let layout = plan_dedup_layout(
            spec.key_parts.clone(),
            with_counts,
            budget.max_record_length,
        )?;
        let comparator = RecordComparator::new(&layout);
        Ok(Self {
            spec,
            budget,
            layout,
            comparator,
            tree: BTreeMap::new(),
            tree_bytes: 0,
            spill: None,
            profile: SortProfile::default(),
            scratch: Vec::new(),
        })
    }

    pub fn profile(&self) -> &SortProfile {
        &self.profile
    }

    /// Offer one row. Equal keys collapse into one tree node with an
    /// incremented count; a full tree is flushed as a sorted run first.
    pub fn insert(&mut self, row: &SourceRow) -> Result<(), SortError> {
        self.profile.examined_rows += 1;
        self.scratch.clear();
        let mut key = std::mem::take(&mut self.scratch);
        for part in &self.layout.key_parts {
            part.encode_fixed(row.column(part.column)?, &mut key)?;
        }

        if let Some(count) = self.tree.get_mut(key.as_slice()) {
            *count += 1;
            self.scratch = key;
            return Ok(());
        }

        let node_bytes = key.len() + COUNT_TAIL_BYTES + TREE_NODE_OVERHEAD;
        if !self.tree.is_empty() && self.tree_bytes + node_bytes > self.budget.memory_bytes {
            self.flush()?;
        }
        self.tree_bytes += node_bytes;
        self.tree.insert(key.as_slice().into(), 1);
        self.scratch = key;
        Ok(())
    }

    /// Drain a whole source, then walk the distinct keys.
    pub fn run(
        &mut self,
        source: &mut dyn RowSource,
        cancel: &CancelToken,
        visitor: &mut dyn FnMut(&[u8], u64) -> Result<(), SortError>,
    ) -> Result<u64, SortError> {
        loop {
            cancel.check()?;
            let Some(row) = source.next_row()? else { break };
            self.insert(&row)?;
        }
        self.walk(cancel, visitor)
    }

    /// Visit each distinct key with its total occurrence count, in key
    /// order, applying the minimum-count filter.
    pub fn walk(
        &mut self,
        cancel: &CancelToken,
        visitor: &mut dyn FnMut(&[u8], u64) -> Result<(), SortError>,
    ) -> Result<u64, SortError> {
        let report_counts = self.layout.count_tail;
        let min_count = self.spec.min_count;

        if self.spill.is_none() {
            // Nothing was flushed: the tree is the answer, no I/O needed.
            let mut emitted = 0u64;
            for (key, count) in &self.tree {
                cancel.check()?;
                if min_count > 0 && *count < min_count {
                    continue;
                }
                visitor(key, if report_counts { *count } else { 1 })?;
                emitted += 1;
            }
            self.tree.clear();
            self.tree_bytes = 0;
            self.profile.returned_rows = emitted;
            return Ok(emitted);
        }

        self.flush()?;
        let mut state = self.spill.take().expect("dedup spill state present");
        let merge_arena_bytes = dedup_merge_arena_bytes(&self.layout, self.budget.memory_bytes);

        let intermediate = MergeContext {
            layout: &self.layout,
            comparator: &self.comparator,
            arena_bytes: merge_arena_bytes,
            collapse: Some(CollapseSpec {
                with_counts: report_counts,
                min_count: 0,
            }),
            limit: None,
            skip: 0,
            with_ties: false,
            cancel,
        };
        let mut runs = std::mem::take(&mut state.runs);
        let mut merge_passes = 0u64;
        while runs.len() >= MERGE_FANIN_FINAL {
            runs = merge_to_fewer_runs(&mut state.from, &mut state.to, &runs, &intermediate)?;
            std::mem::swap(&mut state.from, &mut state.to);
            merge_passes += 1;
        }

        let final_pass = MergeContext {
            collapse: Some(CollapseSpec {
                with_counts: report_counts,
                min_count,
            }),
            ..intermediate
        };
        let emitted = merge_runs(
            &mut state.from,
            &runs,
            MergeOutput::Visitor(visitor),
            &final_pass,
        )?;
        self.profile.merge_passes += merge_passes + 1;
        self.profile.returned_rows = emitted;
        debug!(
            "dedup collapsed {} flushed runs into {} distinct keys",
            self.profile.spilled_runs, emitted
        );
        Ok(emitted)
    }

    /// Decode a visited key back into column values.
    pub fn decode_key(&self, key: &[u8]) -> Result<Vec<crate::sort::source::Datum>, SortError> {
        let mut at = 0usize;
        let mut values = Vec::with_capacity(self.layout.key_parts.len());
        for part in &self.layout.key_parts {
            let (value, used) = part.decode_fixed(&key[at..])?;
            values.push(value);
            at += used;
        }
        Ok(values)
    }

    fn flush(&mut self) -> Result<(), SortError> {
        if self.tree.is_empty() {
            return Ok(());
        }
        if self.spill.is_none() {
            let dir_manager = SpillDirManager::from_app_config()?;
            let from = SpillFileStore::create(&dir_manager)?;
            let to = SpillFileStore::create(&dir_manager)?;
            debug!("dedup tree over budget, flushing sorted runs");
            self.spill = Some(DedupSpillState {
                dir_manager,
                from,
                to,
                runs: Vec::new(),
            });
        }
        let state = self.spill.as_mut().expect("dedup spill state initialized");

        let with_counts = self.layout.count_tail;
        let mut records: Vec<Vec<u8>> = Vec::with_capacity(self.tree.len());
        for (key, count) in &self.tree {
            let mut record = Vec::with_capacity(key.len() + COUNT_TAIL_BYTES);
            record.extend_from_slice(key);
            if with_counts {
                record.extend_from_slice(&count.to_le_bytes());
            }
            records.push(record);
        }
        let before = state.from.len();
        let descriptor = write_run(&mut state.from, records.iter().map(|r| r.as_slice()))?;
        state.runs.push(descriptor);
        self.profile.spilled_runs += 1;
        self.profile.spilled_bytes += state.from.len() - before;
        self.tree.clear();
        self.tree_bytes = 0;
        Ok(())
    }
}

fn dedup_merge_arena_bytes(layout: &RecordLayout, memory_bytes: usize) -> usize {
    let full_size = layout.record_cap().max(1);
    let pieces = (memory_bytes / full_size + 1).max(MERGE_FANIN_FINAL + 1);
    (pieces * full_size).min(config::merge_read_buffer_bytes() as usize).max(full_size * (MERGE_FANIN_FINAL + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::sort_key::{ColumnKind, SortKeyPart};
    use crate::sort::source::{Datum, VecRowSource};

    fn budget(memory: usize) -> SortBudget {
        SortBudget {
            memory_bytes: memory,
            estimated_rows: u64::MAX,
            max_record_length: 65_536,
        }
    }

    fn collect(dedup: &mut Deduplicator, source: &mut VecRowSource) -> Vec<(i64, u64)> {
        let mut seen = Vec::new();
        let mut visitor = |key: &[u8], count: u64| {
            let raw = u64::from_be_bytes(key[..8].try_into().unwrap());
            seen.push(((raw ^ (1 << 63)) as i64, count));
            Ok(())
        };
        dedup
            .run(source, &CancelToken::new(), &mut visitor)
            .unwrap();
        seen
    }

    #[test]
    fn in_memory_dedup_counts_occurrences() {
        let spec = DedupSpec {
            key_parts: vec![SortKeyPart::ascending(0, ColumnKind::Int)],
            count_occurrences: true,
            min_count: 0,
        };
        let mut dedup = Deduplicator::new(spec, budget(1 << 20)).unwrap();
        let mut source = VecRowSource::from_columns(
            [3i64, 1, 3, 2, 1, 3]
                .iter()
                .map(|v| vec![Datum::Int(*v)])
                .collect(),
        );
        let seen = collect(&mut dedup, &mut source);
        assert_eq!(seen, vec![(1, 2), (2, 1), (3, 3)]);
        assert_eq!(dedup.profile().spilled_runs, 0);
    }

    #[test]
    fn intersection_keeps_keys_present_in_both_sets() {
        // Rows (1,"a"), (2,"a"), (1,"b") deduplicated on the first column
        // with threshold 2: only key 1 occurs in both sets.
        let spec = DedupSpec::intersection(
            vec![SortKeyPart::ascending(0, ColumnKind::Int)],
            2,
        );
        let mut dedup = Deduplicator::new(spec, budget(1 << 20)).unwrap();
        let rows = vec![
            vec![Datum::Int(1), Datum::Bytes(b"a".to_vec())],
            vec![Datum::Int(2), Datum::Bytes(b"a".to_vec())],
            vec![Datum::Int(1), Datum::Bytes(b"b".to_vec())],
        ];
        let mut source = VecRowSource::from_columns(rows);
        let seen = collect(&mut dedup, &mut source);
        assert_eq!(seen, vec![(1, 2)]);
    }

    #[test]
    fn flushed_runs_collapse_to_the_same_answer() {
        let spec = DedupSpec {
            key_parts: vec![SortKeyPart::ascending(0, ColumnKind::Int)],
            count_occurrences: true,
            min_count: 0,
        };
        // A budget this small flushes after roughly 85 distinct keys.
        let mut dedup = Deduplicator::new(spec, budget(4096)).unwrap();
        let values: Vec<i64> = (0..400).map(|i| i % 100).collect();
        let mut source = VecRowSource::from_columns(
            values.iter().map(|v| vec![Datum::Int(*v)]).collect(),
        );
        let seen = collect(&mut dedup, &mut source);
        assert!(dedup.profile().spilled_runs > 0);
        assert_eq!(seen.len(), 100);
        assert!(seen.iter().all(|(_, count)| *count == 4));
        let keys: Vec<i64> = seen.iter().map(|(k, _)| *k).collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn without_counting_every_key_reports_one() {
        let spec = DedupSpec::new(vec![SortKeyPart::ascending(0, ColumnKind::Int)]);
        let mut dedup = Deduplicator::new(spec, budget(1 << 20)).unwrap();
        let mut source = VecRowSource::from_columns(
            [7i64, 7, 7].iter().map(|v| vec![Datum::Int(*v)]).collect(),
        );
        let seen = collect(&mut dedup, &mut source);
        assert_eq!(seen, vec![(7, 1)]);
    }

    #[test]
    fn decode_key_round_trips_column_values() {
        let spec = DedupSpec::new(vec![
            SortKeyPart::ascending(0, ColumnKind::Int).nullable(),
            SortKeyPart::ascending(1, ColumnKind::Bytes { max_len: 8 }),
        ]);
        let mut dedup = Deduplicator::new(spec, budget(1 << 20)).unwrap();
        let rows = vec![vec![Datum::Int(-9), Datum::Bytes(b"xy".to_vec())]];
        let mut source = VecRowSource::from_columns(rows);
        let mut decoded = Vec::new();
        {
            let mut keys = Vec::new();
            let mut visitor = |key: &[u8], _count: u64| {
                keys.push(key.to_vec());
                Ok(())
            };
            dedup.run(&mut source, &CancelToken::new(), &mut visitor).unwrap();
            for key in keys {
                decoded.push(dedup.decode_key(&key).unwrap());
            }
        }
        assert_eq!(
            decoded,
            vec![vec![Datum::Int(-9), Datum::Bytes(b"xy".to_vec())]]
        );
    }
}
