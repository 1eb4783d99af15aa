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
//! Sort key part codec.
//!
//! Responsibilities:
//! - Encode one key column into a mem-comparable fixed form (raw memcmp over
//!   the whole key yields the requested order) or a packed variable form.
//! - Report each part's encoded length and compare packed parts semantically.
//!
//! Encoding conventions:
//! - nullable parts start with a marker byte, 0 for NULL (NULLs first);
//! - signed integers are big-endian with the sign bit flipped;
//! - variable bytes are collation-folded, truncated/padded to `max_len`, and
//!   carry a 2-byte length suffix so truncated long values stay ordered;
//! - descending parts are stored bit-inverted in the fixed form; the packed
//!   form stays direction-neutral and the comparator flips the result.

use std::cmp::Ordering;

use crate::sort::error::SortError;
use crate::sort::source::Datum;

const SIGN_FLIP: u64 = 1 << 63;
const FIXED_INT_BYTES: usize = 8;
const BYTES_LEN_SUFFIX: usize = 2;
const PACKED_LEN_PREFIX: usize = 2;

/// Comparison semantics for `Bytes` parts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Collation {
    Binary,
    /// ASCII case folding. Folded bytes are what gets stored, so decoding a
    /// case-insensitive key returns the folded form.
    CaseInsensitive,
}

impl Collation {
    fn fold(&self, b: u8) -> u8 {
        match self {
            Collation::Binary => b,
            Collation::CaseInsensitive => b.to_ascii_uppercase(),
        }
    }
}

/// Value shape of one sort key or addon column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Int,
    Uint,
    /// Variable-size binary/character data, compared up to `max_len` folded
    /// bytes plus the original length.
    Bytes { max_len: usize },
}

impl ColumnKind {
    pub(crate) fn is_variable(&self) -> bool {
        matches!(self, ColumnKind::Bytes { .. })
    }
}

/// One column's contribution to the sort key. Computed once per operation
/// from the requested ordering, immutable afterwards.
#[derive(Clone, Debug)]
pub struct SortKeyPart {
    pub column: usize,
    pub kind: ColumnKind,
    pub nullable: bool,
    pub descending: bool,
    pub collation: Collation,
}

impl SortKeyPart {
    pub fn ascending(column: usize, kind: ColumnKind) -> Self {
        Self {
            column,
            kind,
            nullable: false,
            descending: false,
            collation: Collation::Binary,
        }
    }

    pub fn descending(column: usize, kind: ColumnKind) -> Self {
        Self {
            descending: true,
            ..Self::ascending(column, kind)
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_collation(mut self, collation: Collation) -> Self {
        self.collation = collation;
        self
    }

    fn marker_len(&self) -> usize {
        usize::from(self.nullable)
    }

    fn fixed_body_len(&self) -> usize {
        match self.kind {
            ColumnKind::Int | ColumnKind::Uint => FIXED_INT_BYTES,
            ColumnKind::Bytes { max_len } => max_len + BYTES_LEN_SUFFIX,
        }
    }

    /// Mem-comparable encoded length of this part.
    pub(crate) fn fixed_encoded_len(&self) -> usize {
        self.marker_len() + self.fixed_body_len()
    }

    /// Worst-case packed encoded length of this part.
    pub(crate) fn packed_max_len(&self) -> usize {
        let body = match self.kind {
            ColumnKind::Int | ColumnKind::Uint => FIXED_INT_BYTES,
            ColumnKind::Bytes { max_len } => PACKED_LEN_PREFIX + max_len + BYTES_LEN_SUFFIX,
        };
        self.marker_len() + body
    }

    fn check_kind(&self, value: &Datum) -> Result<(), SortError> {
        let ok = matches!(
            (self.kind, value),
            (ColumnKind::Int, Datum::Int(_))
                | (ColumnKind::Uint, Datum::Uint(_))
                | (ColumnKind::Bytes { .. }, Datum::Bytes(_))
                | (_, Datum::Null)
        );
        if !ok {
            return Err(SortError::Config(format!(
                "key part for column {} got a value of the wrong kind",
                self.column
            )));
        }
        Ok(())
    }

    /// Append the mem-comparable form of `value` to `out`.
    pub(crate) fn encode_fixed(&self, value: &Datum, out: &mut Vec<u8>) -> Result<(), SortError> {
        self.check_kind(value)?;
        let start = out.len();
        let is_null = matches!(value, Datum::Null);
        if is_null && !self.nullable {
            return Err(SortError::Config(format!(
                "NULL value for non-nullable key part on column {}",
                self.column
            )));
        }
        if self.nullable {
            out.push(u8::from(!is_null));
        }
        if is_null {
            out.resize(start + self.marker_len() + self.fixed_body_len(), 0);
        } else {
            match (self.kind, value) {
                (ColumnKind::Int, Datum::Int(v)) => {
                    out.extend_from_slice(&((*v as u64) ^ SIGN_FLIP).to_be_bytes());
                }
                (ColumnKind::Uint, Datum::Uint(v)) => {
                    out.extend_from_slice(&v.to_be_bytes());
                }
                (ColumnKind::Bytes { max_len }, Datum::Bytes(raw)) => {
                    let stored = raw.len().min(max_len);
                    out.extend(raw[..stored].iter().map(|b| self.collation.fold(*b)));
                    out.resize(start + self.marker_len() + max_len, 0);
                    let full = raw.len().min(u16::MAX as usize) as u16;
                    out.extend_from_slice(&full.to_be_bytes());
                }
                _ => unreachable!("kind checked above"),
            }
        }
        if self.descending {
            for b in &mut out[start..] {
                *b = !*b;
            }
        }
        Ok(())
    }

    /// Append the packed (direction-neutral) form of `value` to `out`.
    pub(crate) fn encode_packed(&self, value: &Datum, out: &mut Vec<u8>) -> Result<(), SortError> {
        self.check_kind(value)?;
        let is_null = matches!(value, Datum::Null);
        if is_null && !self.nullable {
            return Err(SortError::Config(format!(
                "NULL value for non-nullable key part on column {}",
                self.column
            )));
        }
        if self.nullable {
            out.push(u8::from(!is_null));
        }
        if is_null {
            return Ok(());
        }
        match (self.kind, value) {
            (ColumnKind::Int, Datum::Int(v)) => {
                out.extend_from_slice(&((*v as u64) ^ SIGN_FLIP).to_be_bytes());
            }
            (ColumnKind::Uint, Datum::Uint(v)) => {
                out.extend_from_slice(&v.to_be_bytes());
            }
            (ColumnKind::Bytes { max_len }, Datum::Bytes(raw)) => {
                let stored = raw.len().min(max_len);
                out.extend_from_slice(&(stored as u16).to_le_bytes());
                out.extend(raw[..stored].iter().map(|b| self.collation.fold(*b)));
                let full = raw.len().min(u16::MAX as usize) as u16;
                out.extend_from_slice(&full.to_be_bytes());
            }
            _ => unreachable!("kind checked above"),
        }
        Ok(())
    }

    /// Packed length of the part at the start of `bytes`.
    ///
    /// Returns `None` when the slice is too short to hold the part, which the
    /// merger uses to detect records straddling a read window.
    pub(crate) fn packed_part_len(&self, bytes: &[u8]) -> Option<usize> {
        let marker = self.marker_len();
        if self.nullable && *bytes.first()? == 0 {
            return Some(1);
        }
        let body = &bytes[marker..];
        let len = match self.kind {
            ColumnKind::Int | ColumnKind::Uint => FIXED_INT_BYTES,
            ColumnKind::Bytes { .. } => {
                if body.len() < PACKED_LEN_PREFIX {
                    return None;
                }
                let stored = u16::from_le_bytes([body[0], body[1]]) as usize;
                PACKED_LEN_PREFIX + stored + BYTES_LEN_SUFFIX
            }
        };
        if body.len() < len {
            return None;
        }
        Some(marker + len)
    }

    /// Compare two packed part encodings semantically, respecting the part's
    /// declared direction and collation (folding already happened at encode).
    pub(crate) fn compare_packed(&self, a: &[u8], b: &[u8]) -> Ordering {
        let ord = self.compare_packed_ascending(a, b);
        if self.descending { ord.reverse() } else { ord }
    }

    fn compare_packed_ascending(&self, a: &[u8], b: &[u8]) -> Ordering {
        if self.nullable {
            let a_null = a[0] == 0;
            let b_null = b[0] == 0;
            match (a_null, b_null) {
                (true, true) => return Ordering::Equal,
                (true, false) => return Ordering::Less,
                (false, true) => return Ordering::Greater,
                (false, false) => {}
            }
        }
        let marker = self.marker_len();
        let a = &a[marker..];
        let b = &b[marker..];
        match self.kind {
            ColumnKind::Int | ColumnKind::Uint => a[..FIXED_INT_BYTES].cmp(&b[..FIXED_INT_BYTES]),
            ColumnKind::Bytes { .. } => {
                let a_stored = u16::from_le_bytes([a[0], a[1]]) as usize;
                let b_stored = u16::from_le_bytes([b[0], b[1]]) as usize;
                let a_data = &a[PACKED_LEN_PREFIX..PACKED_LEN_PREFIX + a_stored];
                let b_data = &b[PACKED_LEN_PREFIX..PACKED_LEN_PREFIX + b_stored];
                a_data.cmp(b_data).then_with(|| {
                    let a_full = &a[PACKED_LEN_PREFIX + a_stored..][..BYTES_LEN_SUFFIX];
                    let b_full = &b[PACKED_LEN_PREFIX + b_stored..][..BYTES_LEN_SUFFIX];
                    a_full.cmp(b_full)
                })
            }
        }
    }

    /// Decode the mem-comparable form back into a value. Used by the
    /// deduplication engine to hand distinct keys to the visitor.
    ///
    /// Truncated `Bytes` values come back truncated; case-insensitive
    /// collations come back folded.
    pub(crate) fn decode_fixed(&self, bytes: &[u8]) -> Result<(Datum, usize), SortError> {
        let part_len = self.fixed_encoded_len();
        if bytes.len() < part_len {
            return Err(SortError::Storage(
                "truncated key part in stored record".to_string(),
            ));
        }
        let mut part: Vec<u8> = bytes[..part_len].to_vec();
        if self.descending {
            for b in &mut part {
                *b = !*b;
            }
        }
        if self.nullable && part[0] == 0 {
            return Ok((Datum::Null, part_len));
        }
        let body = &part[self.marker_len()..];
        let value = match self.kind {
            ColumnKind::Int => {
                let raw = u64::from_be_bytes(body[..FIXED_INT_BYTES].try_into().unwrap());
                Datum::Int((raw ^ SIGN_FLIP) as i64)
            }
            ColumnKind::Uint => {
                Datum::Uint(u64::from_be_bytes(body[..FIXED_INT_BYTES].try_into().unwrap()))
            }
            ColumnKind::Bytes { max_len } => {
                let full =
                    u16::from_be_bytes(body[max_len..max_len + BYTES_LEN_SUFFIX].try_into().unwrap())
                        as usize;
                Datum::Bytes(body[..full.min(max_len)].to_vec())
            }
        };
        Ok((value, part_len))
    }
}
