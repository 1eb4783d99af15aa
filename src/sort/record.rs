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
//! Record encode/decode.
//!
//! A record is `[key region][payload region][count tail?]`. The key region is
//! either the fixed mem-comparable form or a 4-byte length prefix followed by
//! packed parts; the payload is a back-reference or an addon copy of output
//! columns (null bitmap first, then fixed-offset or length-prefixed values).
//! All movement is by copying spans; nothing aliases the arenas.

use crate::sort::error::SortError;
use crate::sort::layout::{
    ADDON_LENGTH_PREFIX_BYTES, COUNT_TAIL_BYTES, KEY_LENGTH_PREFIX_BYTES, PayloadKind,
    RecordLayout,
};
use crate::sort::sort_key::ColumnKind;
use crate::sort::source::{BACK_REF_BYTES, BackRef, Datum, SourceRow};

/// Encode one row into `out` following `layout`. `out` is not cleared; the
/// record is appended.
pub(crate) fn encode_record(
    layout: &RecordLayout,
    row: &SourceRow,
    out: &mut Vec<u8>,
) -> Result<(), SortError> {
    encode_key_region(layout, row, out)?;
    match layout.payload {
        PayloadKind::BackRef => out.extend_from_slice(row.back_ref.as_bytes()),
        PayloadKind::Addon => encode_addon_region(layout, row, out)?,
        PayloadKind::None => {}
    }
    Ok(())
}

pub(crate) fn encode_key_region(
    layout: &RecordLayout,
    row: &SourceRow,
    out: &mut Vec<u8>,
) -> Result<(), SortError> {
    if layout.packed_keys {
        let prefix_at = out.len();
        out.resize(prefix_at + KEY_LENGTH_PREFIX_BYTES, 0);
        for part in &layout.key_parts {
            part.encode_packed(row.column(part.column)?, out)?;
        }
        let key_bytes = (out.len() - prefix_at - KEY_LENGTH_PREFIX_BYTES) as u32;
        out[prefix_at..prefix_at + KEY_LENGTH_PREFIX_BYTES]
            .copy_from_slice(&key_bytes.to_le_bytes());
    } else {
        for part in &layout.key_parts {
            part.encode_fixed(row.column(part.column)?, out)?;
        }
    }
    Ok(())
}

fn encode_addon_region(
    layout: &RecordLayout,
    row: &SourceRow,
    out: &mut Vec<u8>,
) -> Result<(), SortError> {
    let region_at = out.len();
    if layout.packed_addons {
        out.resize(region_at + ADDON_LENGTH_PREFIX_BYTES, 0);
    }
    let bitmap_at = out.len();
    out.resize(bitmap_at + layout.addon_fields.len().div_ceil(8), 0);

    for (idx, field) in layout.addon_fields.iter().enumerate() {
        let value = row.column(field.column)?;
        if matches!(value, Datum::Null) {
            if !field.nullable {
                return Err(SortError::Config(format!(
                    "NULL value for non-nullable addon column {}",
                    field.column
                )));
            }
            out[bitmap_at + idx / 8] |= 1 << (idx % 8);
            if !layout.packed_addons {
                out.resize(out.len() + addon_slot_len(field.kind), 0);
            }
            continue;
        }
        match (field.kind, value) {
            (ColumnKind::Int, Datum::Int(v)) => out.extend_from_slice(&(*v as u64).to_le_bytes()),
            (ColumnKind::Uint, Datum::Uint(v)) => out.extend_from_slice(&v.to_le_bytes()),
            (ColumnKind::Bytes { max_len }, Datum::Bytes(raw)) => {
                if raw.len() > max_len {
                    return Err(SortError::Config(format!(
                        "addon value on column {} is {} bytes, over its declared {} maximum",
                        field.column,
                        raw.len(),
                        max_len
                    )));
                }
                out.extend_from_slice(&(raw.len() as u16).to_le_bytes());
                out.extend_from_slice(raw);
                if !layout.packed_addons {
                    out.resize(out.len() + (max_len - raw.len()), 0);
                }
            }
            _ => {
                return Err(SortError::Config(format!(
                    "addon column {} got a value of the wrong kind",
                    field.column
                )));
            }
        }
    }

    if layout.packed_addons {
        let total = (out.len() - region_at) as u32;
        out[region_at..region_at + ADDON_LENGTH_PREFIX_BYTES]
            .copy_from_slice(&total.to_le_bytes());
    }
    Ok(())
}

fn addon_slot_len(kind: ColumnKind) -> usize {
    match kind {
        ColumnKind::Int | ColumnKind::Uint => 8,
        ColumnKind::Bytes { max_len } => 2 + max_len,
    }
}

/// Length of the key region at the start of `bytes`, prefix included.
/// `None` when the slice is too short to tell.
pub(crate) fn key_region_len(layout: &RecordLayout, bytes: &[u8]) -> Option<usize> {
    if layout.packed_keys {
        if bytes.len() < KEY_LENGTH_PREFIX_BYTES {
            return None;
        }
        let stored = u32::from_le_bytes(bytes[..KEY_LENGTH_PREFIX_BYTES].try_into().unwrap());
        Some(KEY_LENGTH_PREFIX_BYTES + stored as usize)
    } else {
        Some(layout.fixed_key_len)
    }
}

/// Total stored length of the record at the start of `bytes`.
///
/// Packed records vary in length, so the merger calls this while scanning
/// read windows; `None` means the window ends inside the record's prefixes
/// and the caller has to refill.
pub(crate) fn record_length_of(layout: &RecordLayout, bytes: &[u8]) -> Option<usize> {
    let key_len = key_region_len(layout, bytes)?;
    let payload_len = match layout.payload {
        PayloadKind::BackRef => BACK_REF_BYTES,
        PayloadKind::None => 0,
        PayloadKind::Addon => {
            if layout.packed_addons {
                if bytes.len() < key_len + ADDON_LENGTH_PREFIX_BYTES {
                    return None;
                }
                let stored = u32::from_le_bytes(
                    bytes[key_len..key_len + ADDON_LENGTH_PREFIX_BYTES].try_into().unwrap(),
                );
                stored as usize
            } else {
                layout.addon_fixed_len
            }
        }
    };
    let tail = if layout.count_tail { COUNT_TAIL_BYTES } else { 0 };
    Some(key_len + payload_len + tail)
}

/// Payload region slice of a whole record (count tail excluded).
pub(crate) fn payload_of<'a>(layout: &RecordLayout, record: &'a [u8]) -> &'a [u8] {
    let key_len = key_region_len(layout, record).expect("record shorter than its key region");
    let tail = if layout.count_tail { COUNT_TAIL_BYTES } else { 0 };
    &record[key_len..record.len() - tail]
}

/// Length of one payload record at the start of `bytes` (stream results store
/// payload regions back to back).
pub(crate) fn payload_length_of(layout: &RecordLayout, bytes: &[u8]) -> Option<usize> {
    match layout.payload {
        PayloadKind::BackRef => Some(BACK_REF_BYTES),
        PayloadKind::None => Some(0),
        PayloadKind::Addon => {
            if layout.packed_addons {
                if bytes.len() < ADDON_LENGTH_PREFIX_BYTES {
                    return None;
                }
                let stored =
                    u32::from_le_bytes(bytes[..ADDON_LENGTH_PREFIX_BYTES].try_into().unwrap());
                Some(stored as usize)
            } else {
                Some(layout.addon_fixed_len)
            }
        }
    }
}

pub(crate) fn read_count_tail(record: &[u8]) -> u64 {
    let at = record.len() - COUNT_TAIL_BYTES;
    u64::from_le_bytes(record[at..].try_into().unwrap())
}

pub(crate) fn write_count_tail(record: &mut [u8], count: u64) {
    let at = record.len() - COUNT_TAIL_BYTES;
    record[at..].copy_from_slice(&count.to_le_bytes());
}

/// Decode a back-reference payload.
pub(crate) fn decode_back_ref(payload: &[u8]) -> Result<BackRef, SortError> {
    let bytes: [u8; BACK_REF_BYTES] = payload
        .get(..BACK_REF_BYTES)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| SortError::Storage("truncated back-reference payload".to_string()))?;
    Ok(BackRef(bytes))
}

/// Decode an addon payload back into column values, null bits included.
pub(crate) fn decode_addon(
    layout: &RecordLayout,
    payload: &[u8],
) -> Result<Vec<Datum>, SortError> {
    let truncated = || SortError::Storage("truncated addon payload".to_string());
    let mut at = if layout.packed_addons {
        ADDON_LENGTH_PREFIX_BYTES
    } else {
        0
    };
    let bitmap_len = layout.addon_fields.len().div_ceil(8);
    let bitmap = payload.get(at..at + bitmap_len).ok_or_else(truncated)?;
    let bitmap = bitmap.to_vec();
    at += bitmap_len;

    let mut values = Vec::with_capacity(layout.addon_fields.len());
    for (idx, field) in layout.addon_fields.iter().enumerate() {
        let is_null = bitmap[idx / 8] & (1 << (idx % 8)) != 0;
        if is_null {
            values.push(Datum::Null);
            if !layout.packed_addons {
                at += addon_slot_len(field.kind);
            }
            continue;
        }
        match field.kind {
            ColumnKind::Int => {
                let raw = payload.get(at..at + 8).ok_or_else(truncated)?;
                values.push(Datum::Int(u64::from_le_bytes(raw.try_into().unwrap()) as i64));
                at += 8;
            }
            ColumnKind::Uint => {
                let raw = payload.get(at..at + 8).ok_or_else(truncated)?;
                values.push(Datum::Uint(u64::from_le_bytes(raw.try_into().unwrap())));
                at += 8;
            }
            ColumnKind::Bytes { max_len } => {
                let raw = payload.get(at..at + 2).ok_or_else(truncated)?;
                let len = u16::from_le_bytes(raw.try_into().unwrap()) as usize;
                let data = payload.get(at + 2..at + 2 + len).ok_or_else(truncated)?;
                values.push(Datum::Bytes(data.to_vec()));
                at += if layout.packed_addons { 2 + len } else { 2 + max_len };
            }
        }
    }
    Ok(values)
}
