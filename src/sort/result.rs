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
//! Result materializer.
//!
//! A finished sort is either an indexable in-memory slot sequence (nothing
//! spilled, or the top-K path ran) or a retained sequential stream over the
//! output store. Callers check which shape they got before consuming; a
//! retained stream can be rewound and re-scanned, yielding byte-identical
//! sequences.

use crate::sort::error::SortError;
use crate::sort::layout::RecordLayout;
use crate::sort::record::{decode_addon, decode_back_ref, payload_length_of, payload_of};
use crate::sort::source::{BackRef, Datum};
use crate::spill::run_file::{STREAM_HEADER_LEN, StreamHeader};
use crate::spill::store::ExternalStore;

const STREAM_READ_BUF_BYTES: usize = 64 * 1024;

pub enum SortedResult {
    InMemory(InMemoryResult),
    Stream(StreamResult),
}

impl std::fmt::Debug for SortedResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortedResult::InMemory(r) => f.debug_tuple("InMemory").field(r).finish(),
            SortedResult::Stream(r) => f.debug_tuple("Stream").field(r).finish(),
        }
    }
}

impl SortedResult {
    pub fn is_in_memory(&self) -> bool {
        matches!(self, SortedResult::InMemory(_))
    }

    pub fn row_count(&self) -> u64 {
        match self {
            SortedResult::InMemory(r) => r.len() as u64,
            SortedResult::Stream(r) => r.rows(),
        }
    }

    /// Drain every payload into owned buffers, in order. Streams are rewound
    /// first, so calling this twice returns identical sequences.
    pub fn payloads(&mut self) -> Result<Vec<Vec<u8>>, SortError> {
        match self {
            SortedResult::InMemory(r) => {
                Ok((0..r.len()).map(|i| r.payload(i).to_vec()).collect())
            }
            SortedResult::Stream(r) => {
                r.rewind()?;
                let mut out = Vec::new();
                while let Some(payload) = r.next_payload()? {
                    out.push(payload);
                }
                Ok(out)
            }
        }
    }
}

/// Sorted records held in the arena the sort ran in.
#[derive(Debug)]
pub struct InMemoryResult {
    layout: RecordLayout,
    arena: Vec<u8>,
    slots: Vec<(u32, u32)>,
}

impl InMemoryResult {
    pub(crate) fn new(layout: RecordLayout, arena: Vec<u8>, slots: Vec<(u32, u32)>) -> Self {
        Self {
            layout,
            arena,
            slots,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whole record bytes at `idx` of the final order.
    pub fn record(&self, idx: usize) -> &[u8] {
        let (offset, len) = self.slots[idx];
        &self.arena[offset as usize..(offset + len) as usize]
    }

    /// Payload bytes at `idx`.
    pub fn payload(&self, idx: usize) -> &[u8] {
        payload_of(&self.layout, self.record(idx))
    }

    pub fn back_ref(&self, idx: usize) -> Result<BackRef, SortError> {
        decode_back_ref(self.payload(idx))
    }

    pub fn addon_values(&self, idx: usize) -> Result<Vec<Datum>, SortError> {
        decode_addon(&self.layout, self.payload(idx))
    }
}

impl std::fmt::Debug for StreamResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResult")
            .field("layout", &self.layout)
            .field("rows", &self.rows)
            .field("next_offset", &self.next_offset)
            .field("buf_at", &self.buf_at)
            .field("buf_len", &self.buf_len)
            .finish_non_exhaustive()
    }
}

/// Sorted payloads retained on the output store, read forward-only.
pub struct StreamResult {
    layout: RecordLayout,
    store: Box<dyn ExternalStore>,
    rows: u64,
    next_offset: u64,
    buf: Vec<u8>,
    buf_at: usize,
    buf_len: usize,
}

impl StreamResult {
    pub(crate) fn new(
        mut store: Box<dyn ExternalStore>,
        layout: RecordLayout,
        rows: u64,
    ) -> Result<Self, SortError> {
        validate_stream_header(store.as_mut(), &layout)?;
        Ok(Self {
            layout,
            store,
            rows,
            next_offset: STREAM_HEADER_LEN as u64,
            buf: Vec::new(),
            buf_at: 0,
            buf_len: 0,
        })
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Reposition at the first payload, re-validating the stream header.
    pub fn rewind(&mut self) -> Result<(), SortError> {
        validate_stream_header(self.store.as_mut(), &self.layout)?;
        self.next_offset = STREAM_HEADER_LEN as u64;
        self.buf_at = 0;
        self.buf_len = 0;
        Ok(())
    }

    /// Next payload, or `None` at end of stream.
    pub fn next_payload(&mut self) -> Result<Option<Vec<u8>>, SortError> {
        loop {
            let available = &self.buf[self.buf_at..self.buf_len];
            if let Some(len) = payload_length_of(&self.layout, available) {
                if len <= available.len() {
                    let payload = available[..len].to_vec();
                    self.buf_at += len;
                    return Ok(Some(payload));
                }
            }
            if !self.refill()? {
                if self.buf_at < self.buf_len {
                    return Err(SortError::Storage(
                        "sort stream ends inside a payload record".to_string(),
                    ));
                }
                return Ok(None);
            }
        }
    }

    pub fn decode_back_ref(&self, payload: &[u8]) -> Result<BackRef, SortError> {
        decode_back_ref(payload)
    }

    pub fn decode_addon(&self, payload: &[u8]) -> Result<Vec<Datum>, SortError> {
        decode_addon(&self.layout, payload)
    }

    fn refill(&mut self) -> Result<bool, SortError> {
        // Keep the unconsumed tail, then top the buffer back up.
        self.buf.copy_within(self.buf_at..self.buf_len, 0);
        self.buf_len -= self.buf_at;
        self.buf_at = 0;
        if self.buf.len() < STREAM_READ_BUF_BYTES {
            self.buf.resize(STREAM_READ_BUF_BYTES, 0);
        }
        let read = self
            .store
            .read_at(self.next_offset, &mut self.buf[self.buf_len..])?;
        self.next_offset += read as u64;
        self.buf_len += read;
        Ok(read > 0)
    }
}

fn validate_stream_header(
    store: &mut dyn ExternalStore,
    layout: &RecordLayout,
) -> Result<(), SortError> {
    let mut buf = [0u8; STREAM_HEADER_LEN];
    let read = store.read_at(0, &mut buf)?;
    let header = StreamHeader::from_bytes(&buf[..read])?;
    if header.packed_keys != layout.packed_keys || header.packed_addons != layout.packed_addons {
        return Err(SortError::Storage(
            "sort stream header does not match the record layout".to_string(),
        ));
    }
    Ok(())
}
