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
//! Generalized k-way external merge.
//!
//! Responsibilities:
//! - Merge sorted runs from the external store through a shared read arena,
//!   one bounded window per run, refilled on whole-record boundaries.
//! - Emit per policy: whole records (intermediate passes), payload only
//!   (final output), or a visitor callback (deduplication).
//! - Collapse mode holds the popped minimum back, accumulates occurrence
//!   counts across equal keys, and applies the minimum-count filter.
//! - Reduce an oversized run list with bounded fan-in passes into an
//!   alternate store until one final merge can cover it.
//!
//! The heap is a plain binary heap over cursor handles with the comparator
//! injected per call; all chunk bookkeeping lives in the cursor side table,
//! never in heap nodes.

use std::cmp::Ordering;

use crate::novasort_logging::debug;
use crate::sort::comparator::RecordComparator;
use crate::sort::error::{CancelToken, SortError};
use crate::sort::layout::{COUNT_TAIL_BYTES, RecordLayout};
use crate::sort::record::{payload_of, read_count_tail, record_length_of, write_count_tail};
use crate::spill::run_file::RunDescriptor;
use crate::spill::store::ExternalStore;

/// Runs merged together in one intermediate pass.
pub(crate) const MERGE_FANIN: usize = 7;
/// Run count the final merge can cover; above it, intermediate passes run.
pub(crate) const MERGE_FANIN_FINAL: usize = 15;

const EMIT_CHUNK_BYTES: usize = 256 * 1024;

#[derive(Clone, Copy, Debug)]
pub(crate) enum EmitMode {
    WholeRecord,
    PayloadOnly,
}

pub(crate) enum MergeOutput<'a> {
    Store {
        store: &'a mut dyn ExternalStore,
        mode: EmitMode,
    },
    Visitor(&'a mut dyn FnMut(&[u8], u64) -> Result<(), SortError>),
}

/// Collapse equal keys into one emission with an accumulated count.
#[derive(Clone, Copy, Debug)]
pub(crate) struct CollapseSpec {
    /// Records carry a count tail to read and accumulate; otherwise every
    /// record contributes one occurrence.
    pub with_counts: bool,
    /// Keys whose total stays below this are dropped at emission. Zero
    /// disables the filter (intermediate passes always pass zero).
    pub min_count: u64,
}

pub(crate) struct MergeContext<'a> {
    pub layout: &'a RecordLayout,
    pub comparator: &'a RecordComparator,
    pub arena_bytes: usize,
    pub collapse: Option<CollapseSpec>,
    pub limit: Option<u64>,
    pub skip: u64,
    pub with_ties: bool,
    pub cancel: &'a CancelToken,
}

/// Read state of one run being merged. The window is a private partition of
/// the shared merge arena; `pos` and `data_end` are absolute arena offsets.
#[derive(Debug)]
struct RunCursor {
    next_offset: u64,
    rows_on_disk: u64,
    win_start: usize,
    win_cap_end: usize,
    pos: usize,
    data_end: usize,
    rows_in_window: u64,
}

impl RunCursor {
    fn new(run: &RunDescriptor, win_start: usize, win_cap_end: usize) -> Self {
        Self {
            next_offset: run.offset,
            rows_on_disk: run.rows,
            win_start,
            win_cap_end,
            pos: win_start,
            data_end: win_start,
            rows_in_window: 0,
        }
    }

    fn exhausted(&self) -> bool {
        self.rows_on_disk == 0 && self.rows_in_window == 0
    }

    /// Load the next window, keeping only whole records. Windows do not align
    /// on record boundaries, so the refill counts how many complete records
    /// the read produced and leaves the tail for the next round trip.
    fn refill(
        &mut self,
        store: &mut dyn ExternalStore,
        arena: &mut [u8],
        layout: &RecordLayout,
    ) -> Result<bool, SortError> {
        if self.rows_on_disk == 0 {
            return Ok(false);
        }
        let window = &mut arena[self.win_start..self.win_cap_end];
        let read = store.read_at(self.next_offset, window)?;
        let mut consumed = 0usize;
        let mut rows = 0u64;
        while rows < self.rows_on_disk {
            let Some(len) = record_length_of(layout, &window[consumed..read]) else {
                break;
            };
            if consumed + len > read {
                break;
            }
            consumed += len;
            rows += 1;
        }
        if rows == 0 {
            return Err(SortError::Storage(
                "merge read window too small for one record".to_string(),
            ));
        }
        self.next_offset += consumed as u64;
        self.rows_on_disk -= rows;
        self.pos = self.win_start;
        self.data_end = self.win_start + consumed;
        self.rows_in_window = rows;
        Ok(true)
    }

    fn current<'a>(&self, arena: &'a [u8], layout: &RecordLayout) -> &'a [u8] {
        let remaining = &arena[self.pos..self.data_end];
        let len = record_length_of(layout, remaining)
            .expect("merge window holds only whole records");
        &remaining[..len]
    }

    fn advance(&mut self, record_len: usize) {
        self.pos += record_len;
        self.rows_in_window -= 1;
    }
}

/// Give an exhausted cursor's window to an adjacent still-active cursor so
/// later refills read larger sequential spans.
fn donate_window(cursors: &mut [RunCursor], freed_start: usize, freed_end: usize) {
    for cursor in cursors.iter_mut() {
        if cursor.exhausted() {
            continue;
        }
        if cursor.win_cap_end == freed_start {
            cursor.win_cap_end = freed_end;
            return;
        }
        if cursor.win_start == freed_end {
            cursor.win_start = freed_start;
            return;
        }
    }
}

/// Binary min-heap over cursor handles. The ordering closure is injected at
/// every call because it reads the cursor side table and the merge arena.
struct MergeHeap {
    items: Vec<usize>,
}

impl MergeHeap {
    fn with_capacity(n: usize) -> Self {
        Self {
            items: Vec::with_capacity(n),
        }
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn top(&self) -> usize {
        self.items[0]
    }

    fn push(&mut self, item: usize, less: impl FnMut(usize, usize) -> bool) {
        self.items.push(item);
        self.sift_up(self.items.len() - 1, less);
    }

    fn replace_top(&mut self, less: impl FnMut(usize, usize) -> bool) {
        self.sift_down(0, less);
    }

    fn pop_top(&mut self, less: impl FnMut(usize, usize) -> bool) {
        self.items.swap_remove(0);
        if !self.items.is_empty() {
            self.sift_down(0, less);
        }
    }

    fn sift_up(&mut self, mut at: usize, mut less: impl FnMut(usize, usize) -> bool) {
        while at > 0 {
            let parent = (at - 1) / 2;
            if !less(self.items[at], self.items[parent]) {
                break;
            }
            self.items.swap(at, parent);
            at = parent;
        }
    }

    fn sift_down(&mut self, mut at: usize, mut less: impl FnMut(usize, usize) -> bool) {
        loop {
            let left = at * 2 + 1;
            if left >= self.items.len() {
                break;
            }
            let right = left + 1;
            let smaller = if right < self.items.len() && less(self.items[right], self.items[left])
            {
                right
            } else {
                left
            };
            if !less(self.items[smaller], self.items[at]) {
                break;
            }
            self.items.swap(at, smaller);
            at = smaller;
        }
    }
}

struct EmitState {
    skipped: u64,
    emitted: u64,
    boundary: Option<Vec<u8>>,
    done: bool,
}

struct EmitSink<'a> {
    out: MergeOutput<'a>,
    chunk: Vec<u8>,
}

impl<'a> EmitSink<'a> {
    fn new(out: MergeOutput<'a>) -> Self {
        Self {
            out,
            chunk: Vec::new(),
        }
    }

    fn write(&mut self, layout: &RecordLayout, record: &[u8], count: u64) -> Result<(), SortError> {
        match &mut self.out {
            MergeOutput::Store { store, mode } => {
                let bytes = match mode {
                    EmitMode::WholeRecord => record,
                    EmitMode::PayloadOnly => payload_of(layout, record),
                };
                if self.chunk.len() + bytes.len() > EMIT_CHUNK_BYTES && !self.chunk.is_empty() {
                    store.append(&self.chunk)?;
                    self.chunk.clear();
                }
                self.chunk.extend_from_slice(bytes);
                Ok(())
            }
            MergeOutput::Visitor(visit) => {
                let tail = if layout.count_tail { COUNT_TAIL_BYTES } else { 0 };
                visit(&record[..record.len() - tail], count)
            }
        }
    }

    fn flush(&mut self) -> Result<(), SortError> {
        if let MergeOutput::Store { store, .. } = &mut self.out {
            if !self.chunk.is_empty() {
                store.append(&self.chunk)?;
                self.chunk.clear();
            }
        }
        Ok(())
    }
}

/// Merge `runs` from `source` into `out`. Returns the number of records
/// emitted (after skip, limit, ties, and the minimum-count filter).
///
/// A single run flows through the same path as many: the heap holds one
/// cursor and the loop degenerates to a straight copy.
pub(crate) fn merge_runs(
    source: &mut dyn ExternalStore,
    runs: &[RunDescriptor],
    out: MergeOutput<'_>,
    ctx: &MergeContext<'_>,
) -> Result<u64, SortError> {
    let mut sink = EmitSink::new(out);
    let mut state = EmitState {
        skipped: 0,
        emitted: 0,
        boundary: None,
        done: false,
    };

    let live_runs: Vec<RunDescriptor> = runs.iter().copied().filter(|r| r.rows > 0).collect();
    if live_runs.is_empty() {
        sink.flush()?;
        return Ok(0);
    }

    let k = live_runs.len();
    let record_cap = ctx.layout.record_cap().max(1);
    let piece = (ctx.arena_bytes / k).max(record_cap);
    let mut arena = vec![0u8; piece * k];

    let mut cursors: Vec<RunCursor> = Vec::with_capacity(k);
    for (i, run) in live_runs.iter().enumerate() {
        let mut cursor = RunCursor::new(run, i * piece, (i + 1) * piece);
        cursor.refill(source, &mut arena, ctx.layout)?;
        cursors.push(cursor);
    }

    let mut heap = MergeHeap::with_capacity(k);
    for idx in 0..cursors.len() {
        heap.push(idx, |a, b| cursor_less(ctx, &cursors, &arena, a, b));
    }

    // Collapse mode holds the would-be emission back until the next distinct
    // key shows up, accumulating counts across runs in the meantime.
    let mut held: Option<(Vec<u8>, u64)> = None;

    while heap.len() > 0 {
        ctx.cancel.check()?;
        let ti = heap.top();
        let (record_len, stop) = {
            let record = cursors[ti].current(&arena, ctx.layout);
            let stop = match ctx.collapse {
                None => {
                    emit_plain(&mut sink, &mut state, ctx, record)?;
                    state.done
                }
                Some(spec) => {
                    let count = if spec.with_counts {
                        read_count_tail(record)
                    } else {
                        1
                    };
                    match &mut held {
                        None => held = Some((record.to_vec(), count)),
                        Some((held_rec, held_count)) => {
                            if ctx.comparator.compare_keys(held_rec, record) == Ordering::Equal {
                                *held_count += count;
                            } else {
                                let finished = (std::mem::take(held_rec), *held_count);
                                held = Some((record.to_vec(), count));
                                emit_collapsed(&mut sink, &mut state, ctx, spec, finished)?;
                            }
                        }
                    }
                    false
                }
            };
            (record.len(), stop)
        };
        if stop {
            break;
        }

        cursors[ti].advance(record_len);
        if cursors[ti].rows_in_window > 0 {
            heap.replace_top(|a, b| cursor_less(ctx, &cursors, &arena, a, b));
        } else if cursors[ti].refill(source, &mut arena, ctx.layout)? {
            heap.replace_top(|a, b| cursor_less(ctx, &cursors, &arena, a, b));
        } else {
            heap.pop_top(|a, b| cursor_less(ctx, &cursors, &arena, a, b));
            let (freed_start, freed_end) = (cursors[ti].win_start, cursors[ti].win_cap_end);
            donate_window(&mut cursors, freed_start, freed_end);
        }
    }

    if let Some(spec) = ctx.collapse {
        if let Some(finished) = held.take() {
            emit_collapsed(&mut sink, &mut state, ctx, spec, finished)?;
        }
    }
    sink.flush()?;
    Ok(state.emitted)
}

fn cursor_less(
    ctx: &MergeContext<'_>,
    cursors: &[RunCursor],
    arena: &[u8],
    a: usize,
    b: usize,
) -> bool {
    let ra = cursors[a].current(arena, ctx.layout);
    let rb = cursors[b].current(arena, ctx.layout);
    ctx.comparator.compare(ra, rb) == Ordering::Less
}

fn emit_plain(
    sink: &mut EmitSink<'_>,
    state: &mut EmitState,
    ctx: &MergeContext<'_>,
    record: &[u8],
) -> Result<(), SortError> {
    if state.done {
        return Ok(());
    }
    if state.skipped < ctx.skip {
        state.skipped += 1;
        return Ok(());
    }
    if let Some(limit) = ctx.limit {
        if state.emitted >= limit {
            let tied = ctx.with_ties
                && state
                    .boundary
                    .as_ref()
                    .is_some_and(|b| ctx.comparator.compare_keys(b, record) == Ordering::Equal);
            if !tied {
                state.done = true;
                return Ok(());
            }
        }
    }
    sink.write(ctx.layout, record, 1)?;
    state.emitted += 1;
    if ctx.with_ties && ctx.limit.is_some() {
        state.boundary = Some(record.to_vec());
    }
    Ok(())
}

fn emit_collapsed(
    sink: &mut EmitSink<'_>,
    state: &mut EmitState,
    ctx: &MergeContext<'_>,
    spec: CollapseSpec,
    (mut record, count): (Vec<u8>, u64),
) -> Result<(), SortError> {
    if spec.min_count > 0 && count < spec.min_count {
        return Ok(());
    }
    if spec.with_counts {
        write_count_tail(&mut record, count);
    }
    sink.write(ctx.layout, &record, count)?;
    state.emitted += 1;
    Ok(())
}

/// One bounded-fan-in reduction pass: merge windows of up to [`MERGE_FANIN`]
/// runs from `from` into fresh runs on `to`.
pub(crate) fn merge_to_fewer_runs(
    from: &mut dyn ExternalStore,
    to: &mut dyn ExternalStore,
    runs: &[RunDescriptor],
    ctx: &MergeContext<'_>,
) -> Result<Vec<RunDescriptor>, SortError> {
    to.reset()?;
    let mut reduced = Vec::new();
    let mut at = 0usize;
    while at + MERGE_FANIN * 3 / 2 < runs.len() {
        reduced.push(merge_group(from, to, &runs[at..at + MERGE_FANIN], ctx)?);
        at += MERGE_FANIN;
    }
    reduced.push(merge_group(from, to, &runs[at..], ctx)?);
    debug!(
        "sort merge pass reduced {} runs to {} runs",
        runs.len(),
        reduced.len()
    );
    Ok(reduced)
}

fn merge_group(
    from: &mut dyn ExternalStore,
    to: &mut dyn ExternalStore,
    group: &[RunDescriptor],
    ctx: &MergeContext<'_>,
) -> Result<RunDescriptor, SortError> {
    let offset = to.len();
    let rows = merge_runs(
        from,
        group,
        MergeOutput::Store {
            store: to,
            mode: EmitMode::WholeRecord,
        },
        ctx,
    )?;
    Ok(RunDescriptor { offset, rows })
}
