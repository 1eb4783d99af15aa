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
//! Run bookkeeping on the external store.
//!
//! A run is one contiguous sorted sequence of records. Runs are written back
//! to back into one store; a [`RunDescriptor`] is all the merger needs to
//! find one again. The final output stream carries a small validated header
//! so an independent re-scan can check what it is reading.

use crate::sort::error::SortError;
use crate::spill::store::ExternalStore;

const WRITE_CHUNK_BYTES: usize = 256 * 1024;

const STREAM_MAGIC: [u8; 4] = *b"NSRT";
const STREAM_VERSION: u16 = 1;
pub(crate) const STREAM_HEADER_LEN: usize = 16;

/// Where one sorted run lives in the external store.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RunDescriptor {
    pub offset: u64,
    pub rows: u64,
}

/// Append every record of one sorted run, batching small records into larger
/// writes. Returns the descriptor of the run just written.
pub(crate) fn write_run<'a>(
    store: &mut dyn ExternalStore,
    records: impl Iterator<Item = &'a [u8]>,
) -> Result<RunDescriptor, SortError> {
    let offset = store.len();
    let mut rows = 0u64;
    let mut chunk: Vec<u8> = Vec::with_capacity(WRITE_CHUNK_BYTES);
    for record in records {
        if chunk.len() + record.len() > WRITE_CHUNK_BYTES && !chunk.is_empty() {
            store.append(&chunk)?;
            chunk.clear();
        }
        chunk.extend_from_slice(record);
        rows += 1;
    }
    if !chunk.is_empty() {
        store.append(&chunk)?;
    }
    Ok(RunDescriptor { offset, rows })
}

/// Header in front of a materialized output stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct StreamHeader {
    pub packed_keys: bool,
    pub packed_addons: bool,
}

impl StreamHeader {
    pub(crate) fn to_bytes(self) -> [u8; STREAM_HEADER_LEN] {
        let mut buf = [0u8; STREAM_HEADER_LEN];
        buf[..4].copy_from_slice(&STREAM_MAGIC);
        buf[4..6].copy_from_slice(&STREAM_VERSION.to_le_bytes());
        buf[6] = u8::from(self.packed_keys);
        buf[7] = u8::from(self.packed_addons);
        buf
    }

    pub(crate) fn from_bytes(buf: &[u8]) -> Result<Self, SortError> {
        if buf.len() < STREAM_HEADER_LEN {
            return Err(SortError::Storage(
                "sort stream header is too small".to_string(),
            ));
        }
        if buf[..4] != STREAM_MAGIC {
            return Err(SortError::Storage(
                "sort stream header magic mismatch".to_string(),
            ));
        }
        let version = u16::from_le_bytes(buf[4..6].try_into().unwrap());
        if version != STREAM_VERSION {
            return Err(SortError::Storage(format!(
                "unsupported sort stream version: {version}"
            )));
        }
        let reserved = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        if reserved != 0 {
            return Err(SortError::Storage(
                "sort stream header reserved field must be 0".to_string(),
            ));
        }
        Ok(Self {
            packed_keys: buf[6] != 0,
            packed_addons: buf[7] != 0,
        })
    }
}
