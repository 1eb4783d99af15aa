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
//! Sort operation driver.
//!
//! Responsibilities:
//! - Plan the record layout, then route the operation: bounded top-K when the
//!   cost gate approves, otherwise buffer, spill, and merge.
//! - Consume the row source with cancellation checked between rows.
//! - Materialize the result in memory when nothing spilled, or as a retained
//!   output stream after the final merge.
//!
//! One sorter instance serves one operation at a time; it can be reset and
//! reused for a repeated invocation of the same ordering, and the returned
//! result keeps its spilled output alive for re-scans.

use crate::common::config;
use crate::novasort_logging::debug;
use crate::sort::comparator::RecordComparator;
use crate::sort::error::{CancelToken, SortError};
use crate::sort::layout::{PayloadPolicy, RecordLayout, plan_record_layout};
use crate::sort::merger::{
    EmitMode, MERGE_FANIN_FINAL, MergeContext, MergeOutput, merge_runs, merge_to_fewer_runs,
};
use crate::sort::record::encode_record;
use crate::sort::result::{InMemoryResult, SortedResult, StreamResult};
use crate::sort::sort_buffer::SortBuffer;
use crate::sort::sort_key::SortKeyPart;
use crate::sort::source::RowSource;
use crate::sort::topn::{TopNMode, TopNPlan, TopNSelector, check_topn_applicable};
use crate::spill::dir_manager::SpillDirManager;
use crate::spill::run_file::{RunDescriptor, StreamHeader, write_run};
use crate::spill::store::{ExternalStore, SpillFileStore};

/// What to sort by and what to return.
#[derive(Clone, Debug)]
pub struct SortSpec {
    pub key_parts: Vec<SortKeyPart>,
    pub payload: PayloadPolicy,
    pub limit: Option<u64>,
    pub offset: u64,
    pub with_ties: bool,
}

impl SortSpec {
    pub fn new(key_parts: Vec<SortKeyPart>, payload: PayloadPolicy) -> Self {
        Self {
            key_parts,
            payload,
            limit: None,
            offset: 0,
            with_ties: false,
        }
    }
}

/// Planner-supplied cost and resource inputs.
#[derive(Clone, Copy, Debug)]
pub struct SortBudget {
    pub memory_bytes: usize,
    /// Upper-bound row estimate; `u64::MAX` when unknown.
    pub estimated_rows: u64,
    pub max_record_length: usize,
}

impl Default for SortBudget {
    fn default() -> Self {
        Self {
            memory_bytes: config::default_sort_memory_bytes() as usize,
            estimated_rows: u64::MAX,
            max_record_length: config::max_record_length() as usize,
        }
    }
}

/// Observability counters for one sort operation. Never behavior-affecting.
#[derive(Clone, Debug, Default)]
pub struct SortProfile {
    pub examined_rows: u64,
    pub returned_rows: u64,
    pub spilled_runs: u64,
    pub spilled_bytes: u64,
    pub merge_passes: u64,
    pub used_topn: bool,
    pub packed_sort_keys: bool,
    pub packed_addons: bool,
}

pub struct Sorter {
    spec: SortSpec,
    budget: SortBudget,
    profile: SortProfile,
}

struct SpillState {
    dir_manager: SpillDirManager,
    from: SpillFileStore,
    to: SpillFileStore,
    runs: Vec<RunDescriptor>,
}

impl Sorter {
    pub fn new(spec: SortSpec, budget: SortBudget) -> Result<Self, SortError> {
        if spec.key_parts.is_empty() {
            return Err(SortError::Config(
                "sort requires at least one key part".to_string(),
            ));
        }
        if spec.with_ties && spec.offset != 0 {
            return Err(SortError::Config(
                "ties handling requires offset 0".to_string(),
            ));
        }
        if spec.with_ties && spec.limit.is_none() {
            return Err(SortError::Config(
                "ties handling requires a row limit".to_string(),
            ));
        }
        Ok(Self {
            spec,
            budget,
            profile: SortProfile::default(),
        })
    }

    pub fn profile(&self) -> &SortProfile {
        &self.profile
    }

    /// Prepare the sorter for another invocation of the same operation.
    pub fn reset(&mut self) {
        self.profile = SortProfile::default();
    }

    /// Consume the source to completion and materialize the ordering.
    pub fn run(
        &mut self,
        source: &mut dyn RowSource,
        cancel: &CancelToken,
    ) -> Result<SortedResult, SortError> {
        self.profile = SortProfile::default();
        let mut layout = plan_record_layout(
            self.spec.key_parts.clone(),
            self.spec.payload.clone(),
            self.budget.max_record_length,
        )?;

        if let Some(plan) = check_topn_applicable(
            self.spec.limit,
            self.spec.offset,
            &layout,
            self.budget.estimated_rows,
            self.budget.memory_bytes,
        ) {
            let layout = match plan.mode {
                TopNMode::FullPayload => layout,
                TopNMode::KeysOnly => plan_record_layout(
                    self.spec.key_parts.clone(),
                    PayloadPolicy::BackRef,
                    self.budget.max_record_length,
                )?,
            };
            return self.run_topn(source, cancel, layout, plan);
        }

        // Packing only pays on the spill path; the selector never spills.
        layout.try_to_pack_sort_keys();
        layout.try_to_pack_addons();
        self.profile.packed_sort_keys = layout.packed_keys;
        self.profile.packed_addons = layout.packed_addons;
        self.run_full_sort(source, cancel, layout)
    }

    fn run_topn(
        &mut self,
        source: &mut dyn RowSource,
        cancel: &CancelToken,
        layout: RecordLayout,
        plan: TopNPlan,
    ) -> Result<SortedResult, SortError> {
        self.profile.used_topn = true;
        debug!(
            "sort using bounded top-k selector: rows_to_keep={} keys_only={}",
            plan.rows_to_keep,
            plan.mode == TopNMode::KeysOnly
        );
        let mut selector = TopNSelector::new(&layout, plan.rows_to_keep, self.spec.with_ties);
        let mut scratch = Vec::new();
        loop {
            cancel.check()?;
            let Some(row) = source.next_row()? else { break };
            self.profile.examined_rows += 1;
            scratch.clear();
            encode_record(&layout, &row, &mut scratch)?;
            selector.push(&scratch);
        }

        let records = selector.finish();
        let mut arena = Vec::new();
        let mut slots = Vec::new();
        for record in records.iter().skip(self.spec.offset as usize) {
            slots.push((arena.len() as u32, record.len() as u32));
            arena.extend_from_slice(record);
        }
        self.profile.returned_rows = slots.len() as u64;
        Ok(SortedResult::InMemory(InMemoryResult::new(layout, arena, slots)))
    }

    fn run_full_sort(
        &mut self,
        source: &mut dyn RowSource,
        cancel: &CancelToken,
        layout: RecordLayout,
    ) -> Result<SortedResult, SortError> {
        let comparator = RecordComparator::new(&layout);
        let mut buffer = SortBuffer::with_budget(
            layout.record_cap(),
            self.budget.estimated_rows,
            self.budget.memory_bytes,
        )?;
        let mut spill: Option<SpillState> = None;
        let mut scratch = Vec::new();

        loop {
            cancel.check()?;
            let Some(row) = source.next_row()? else { break };
            self.profile.examined_rows += 1;
            scratch.clear();
            encode_record(&layout, &row, &mut scratch)?;
            if !buffer.append(&scratch) {
                self.spill_run(&mut buffer, &mut spill, &comparator)?;
                if !buffer.append(&scratch) {
                    return Err(SortError::OutOfMemory(
                        "sort record does not fit the in-memory buffer".to_string(),
                    ));
                }
            }
        }

        let Some(mut state) = spill.take() else {
            // Hot path: the whole input fit in one buffer.
            buffer.sort_in_place(&comparator);
            let (arena, mut slots) = buffer.into_parts();
            slots = self.apply_result_window(&comparator, &arena, slots);
            self.profile.returned_rows = slots.len() as u64;
            return Ok(SortedResult::InMemory(InMemoryResult::new(layout, arena, slots)));
        };

        self.spill_buffer_into(&mut buffer, &mut state, &comparator)?;

        let merge_arena_bytes = merge_arena_bytes(&layout);
        let intermediate = MergeContext {
            layout: &layout,
            comparator: &comparator,
            arena_bytes: merge_arena_bytes,
            collapse: None,
            limit: None,
            skip: 0,
            with_ties: false,
            cancel,
        };
        let mut runs = std::mem::take(&mut state.runs);
        while runs.len() >= MERGE_FANIN_FINAL {
            runs = merge_to_fewer_runs(&mut state.from, &mut state.to, &runs, &intermediate)?;
            std::mem::swap(&mut state.from, &mut state.to);
            self.profile.merge_passes += 1;
        }

        let mut output = SpillFileStore::create(&state.dir_manager)?;
        let header = StreamHeader {
            packed_keys: layout.packed_keys,
            packed_addons: layout.packed_addons,
        };
        output.append(&header.to_bytes())?;
        let final_pass = MergeContext {
            layout: &layout,
            comparator: &comparator,
            arena_bytes: merge_arena_bytes,
            collapse: None,
            limit: self.spec.limit,
            skip: self.spec.offset,
            with_ties: self.spec.with_ties,
            cancel,
        };
        let rows = merge_runs(
            &mut state.from,
            &runs,
            MergeOutput::Store {
                store: &mut output,
                mode: EmitMode::PayloadOnly,
            },
            &final_pass,
        )?;
        self.profile.merge_passes += 1;
        self.profile.returned_rows = rows;
        debug!(
            "sort merged {} spilled runs over {} passes into {} output rows",
            self.profile.spilled_runs, self.profile.merge_passes, rows
        );
        Ok(SortedResult::Stream(StreamResult::new(
            Box::new(output),
            layout,
            rows,
        )?))
    }

    fn spill_run(
        &mut self,
        buffer: &mut SortBuffer,
        spill: &mut Option<SpillState>,
        comparator: &RecordComparator,
    ) -> Result<(), SortError> {
        if spill.is_none() {
            let dir_manager = SpillDirManager::from_app_config()?;
            let from = SpillFileStore::create(&dir_manager)?;
            let to = SpillFileStore::create(&dir_manager)?;
            debug!("sort buffer full, spilling sorted runs");
            *spill = Some(SpillState {
                dir_manager,
                from,
                to,
                runs: Vec::new(),
            });
        }
        let state = spill.as_mut().expect("spill state initialized");
        self.spill_buffer_into(buffer, state, comparator)
    }

    fn spill_buffer_into(
        &mut self,
        buffer: &mut SortBuffer,
        state: &mut SpillState,
        comparator: &RecordComparator,
    ) -> Result<(), SortError> {
        if buffer.is_empty() {
            return Ok(());
        }
        buffer.sort_in_place(comparator);
        let before = state.from.len();
        let descriptor = write_run(&mut state.from, buffer.iter_records())?;
        state.runs.push(descriptor);
        self.profile.spilled_runs += 1;
        self.profile.spilled_bytes += state.from.len() - before;
        buffer.reset();
        Ok(())
    }

    /// Apply offset, limit, and boundary ties to an in-memory sorted slot
    /// table.
    fn apply_result_window(
        &self,
        comparator: &RecordComparator,
        arena: &[u8],
        slots: Vec<(u32, u32)>,
    ) -> Vec<(u32, u32)> {
        let offset = self.spec.offset as usize;
        if offset >= slots.len() {
            return Vec::new();
        }
        let mut end = slots.len();
        if let Some(limit) = self.spec.limit {
            let nominal = offset.saturating_add(limit as usize);
            if nominal == offset {
                return Vec::new();
            }
            if nominal < end {
                if self.spec.with_ties {
                    let boundary = slot_record(arena, &slots, nominal - 1);
                    let mut tied_end = nominal;
                    while tied_end < slots.len()
                        && comparator.compare_keys(slot_record(arena, &slots, tied_end), boundary)
                            == std::cmp::Ordering::Equal
                    {
                        tied_end += 1;
                    }
                    end = tied_end;
                } else {
                    end = nominal;
                }
            }
        }
        slots[offset..end].to_vec()
    }
}

fn slot_record<'a>(arena: &'a [u8], slots: &[(u32, u32)], idx: usize) -> &'a [u8] {
    let (offset, len) = slots[idx];
    &arena[offset as usize..(offset + len) as usize]
}

fn merge_arena_bytes(layout: &RecordLayout) -> usize {
    let configured = config::merge_read_buffer_bytes() as usize;
    configured.max(layout.record_cap() * (MERGE_FANIN_FINAL + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::sort_key::ColumnKind;
    use crate::sort::source::{Datum, VecRowSource};

    fn int_spec() -> SortSpec {
        SortSpec::new(
            vec![SortKeyPart::ascending(0, ColumnKind::Int)],
            PayloadPolicy::BackRef,
        )
    }

    fn budget(memory: usize) -> SortBudget {
        SortBudget {
            memory_bytes: memory,
            estimated_rows: u64::MAX,
            max_record_length: 65_536,
        }
    }

    fn int_source(values: &[i64]) -> VecRowSource {
        VecRowSource::from_columns(values.iter().map(|v| vec![Datum::Int(*v)]).collect())
    }

    fn sorted_ids(result: &mut SortedResult) -> Vec<u64> {
        result
            .payloads()
            .unwrap()
            .iter()
            .map(|p| u64::from_be_bytes(p[..8].try_into().unwrap()))
            .collect()
    }

    #[test]
    fn ties_with_offset_is_rejected() {
        let mut spec = int_spec();
        spec.with_ties = true;
        spec.limit = Some(3);
        spec.offset = 2;
        assert!(matches!(
            Sorter::new(spec, budget(1 << 20)),
            Err(SortError::Config(_))
        ));
    }

    #[test]
    fn in_memory_sort_returns_row_ids_in_key_order() {
        let mut sorter = Sorter::new(int_spec(), budget(1 << 20)).unwrap();
        let mut source = int_source(&[5, 1, 4, 2, 3]);
        let mut result = sorter.run(&mut source, &CancelToken::new()).unwrap();
        assert!(result.is_in_memory());
        // Row ids follow the sorted key order 1,2,3,4,5.
        assert_eq!(sorted_ids(&mut result), vec![1, 3, 4, 2, 0]);
        assert_eq!(sorter.profile().examined_rows, 5);
        assert_eq!(sorter.profile().returned_rows, 5);
        assert!(!sorter.profile().used_topn);
    }

    #[test]
    fn offset_and_limit_window_the_in_memory_result() {
        let mut spec = int_spec();
        spec.limit = Some(2);
        spec.offset = 1;
        // A generous estimate defeats the top-k gate so the buffer path runs.
        let mut sorter = Sorter::new(
            spec,
            SortBudget {
                memory_bytes: 1 << 20,
                estimated_rows: 5,
                max_record_length: 65_536,
            },
        )
        .unwrap();
        let mut source = int_source(&[50, 10, 40, 20, 30]);
        let mut result = sorter.run(&mut source, &CancelToken::new()).unwrap();
        assert_eq!(sorted_ids(&mut result), vec![3, 4]);
    }

    #[test]
    fn cancellation_between_rows_propagates() {
        let mut sorter = Sorter::new(int_spec(), budget(1 << 20)).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut source = int_source(&[1, 2, 3]);
        let err = sorter.run(&mut source, &cancel).unwrap_err();
        assert!(err.is_cancelled());
    }
}
