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
//! Record layout planner.
//!
//! Responsibilities:
//! - Turn the key part list and the payload policy into a per-record byte
//!   layout: key region, payload region, optional occurrence-count tail.
//! - Decide, by a savings heuristic, whether sort keys and addon payload use
//!   the packed variable-length form or the fixed mem-comparable form.
//!
//! The planner is pure: it only returns a layout, one per sort operation.
//! All records of one operation share the chosen variant.

use crate::sort::error::SortError;
use crate::sort::sort_key::{ColumnKind, SortKeyPart};
use crate::sort::source::BACK_REF_BYTES;

/// Length prefix in front of a packed key region.
pub(crate) const KEY_LENGTH_PREFIX_BYTES: usize = 4;
/// Length field in front of a packed addon region.
pub(crate) const ADDON_LENGTH_PREFIX_BYTES: usize = 4;
/// Occurrence counter appended to deduplication records.
pub(crate) const COUNT_TAIL_BYTES: usize = 8;

/// Minimum estimated savings before addon packing pays for its length field.
const ADDON_PACK_MIN_SAVINGS: usize = 10;
/// Minimum estimated savings before packed keys pay for the prefix and the
/// per-comparison decode cost. Packed comparison is much slower than memcmp,
/// so the I/O savings have to dominate.
const KEY_PACK_MIN_SAVINGS: usize = 128;

/// One output column carried in the addon region so the source row need not
/// be refetched.
#[derive(Clone, Debug)]
pub struct AddonField {
    pub column: usize,
    pub kind: ColumnKind,
    pub nullable: bool,
}

/// What the payload region holds.
#[derive(Clone, Debug)]
pub enum PayloadPolicy {
    /// Fixed-width back-reference; rows are refetched through the source.
    BackRef,
    /// Copies of the requested output columns.
    Addon(Vec<AddonField>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PayloadKind {
    BackRef,
    Addon,
    /// Key-only records (deduplication engine).
    None,
}

/// Finalized per-record layout. See the module doc for the byte shapes.
#[derive(Clone, Debug)]
pub struct RecordLayout {
    pub(crate) key_parts: Vec<SortKeyPart>,
    pub(crate) addon_fields: Vec<AddonField>,
    pub(crate) payload: PayloadKind,
    pub(crate) packed_keys: bool,
    pub(crate) packed_addons: bool,
    pub(crate) fixed_key_len: usize,
    pub(crate) addon_fixed_len: usize,
    pub(crate) count_tail: bool,
    pub(crate) max_record_length: usize,
}

pub(crate) fn plan_record_layout(
    key_parts: Vec<SortKeyPart>,
    payload: PayloadPolicy,
    max_record_length: usize,
) -> Result<RecordLayout, SortError> {
    let (payload_kind, addon_fields) = match payload {
        PayloadPolicy::BackRef => (PayloadKind::BackRef, Vec::new()),
        PayloadPolicy::Addon(fields) => (PayloadKind::Addon, fields),
    };
    plan_layout_internal(key_parts, payload_kind, addon_fields, false, max_record_length)
}

/// Key-only layout for the deduplication engine. The in-memory tree orders
/// entries by raw bytes, so dedup keys always stay in the fixed
/// mem-comparable form.
pub(crate) fn plan_dedup_layout(
    key_parts: Vec<SortKeyPart>,
    count_tail: bool,
    max_record_length: usize,
) -> Result<RecordLayout, SortError> {
    plan_layout_internal(key_parts, PayloadKind::None, Vec::new(), count_tail, max_record_length)
}

fn plan_layout_internal(
    key_parts: Vec<SortKeyPart>,
    payload: PayloadKind,
    addon_fields: Vec<AddonField>,
    count_tail: bool,
    max_record_length: usize,
) -> Result<RecordLayout, SortError> {
    if key_parts.is_empty() {
        return Err(SortError::Config("sort requires at least one key part".to_string()));
    }
    let mut fixed_key_len = 0usize;
    for part in &key_parts {
        let part_len = part.fixed_encoded_len();
        if part_len > max_record_length {
            return Err(SortError::Config(format!(
                "key part on column {} needs {} bytes, over the {} byte record limit",
                part.column, part_len, max_record_length
            )));
        }
        fixed_key_len += part_len;
    }

    let addon_fixed_len = if payload == PayloadKind::Addon {
        addon_bitmap_len(&addon_fields)
            + addon_fields.iter().map(addon_fixed_slot_len).sum::<usize>()
    } else {
        0
    };

    let layout = RecordLayout {
        key_parts,
        addon_fields,
        payload,
        packed_keys: false,
        packed_addons: false,
        fixed_key_len,
        addon_fixed_len,
        count_tail,
        max_record_length,
    };
    if layout.record_cap() > max_record_length {
        return Err(SortError::Config(format!(
            "record length {} exceeds the {} byte limit",
            layout.record_cap(),
            max_record_length
        )));
    }
    Ok(layout)
}

fn addon_bitmap_len(fields: &[AddonField]) -> usize {
    fields.len().div_ceil(8)
}

fn addon_fixed_slot_len(field: &AddonField) -> usize {
    match field.kind {
        ColumnKind::Int | ColumnKind::Uint => 8,
        ColumnKind::Bytes { max_len } => 2 + max_len,
    }
}

impl RecordLayout {
    pub(crate) fn has_addon(&self) -> bool {
        self.payload == PayloadKind::Addon
    }

    pub(crate) fn uses_back_ref(&self) -> bool {
        self.payload == PayloadKind::BackRef
    }

    /// Upper bound on the key region, length prefix included.
    pub(crate) fn key_region_cap(&self) -> usize {
        if self.packed_keys {
            KEY_LENGTH_PREFIX_BYTES
                + self.key_parts.iter().map(|p| p.packed_max_len()).sum::<usize>()
        } else {
            self.fixed_key_len
        }
    }

    /// Upper bound on the payload region.
    pub(crate) fn payload_cap(&self) -> usize {
        match self.payload {
            PayloadKind::BackRef => BACK_REF_BYTES,
            PayloadKind::None => 0,
            PayloadKind::Addon => {
                if self.packed_addons {
                    ADDON_LENGTH_PREFIX_BYTES
                        + addon_bitmap_len(&self.addon_fields)
                        + self.addon_fields.iter().map(addon_fixed_slot_len).sum::<usize>()
                } else {
                    self.addon_fixed_len
                }
            }
        }
    }

    /// Upper bound on a whole record.
    pub(crate) fn record_cap(&self) -> usize {
        self.key_region_cap()
            + self.payload_cap()
            + if self.count_tail { COUNT_TAIL_BYTES } else { 0 }
    }

    /// Exact record length when neither region is packed.
    pub(crate) fn fixed_record_len(&self) -> Option<usize> {
        if self.packed_keys || self.packed_addons {
            return None;
        }
        Some(self.record_cap())
    }

    /// Estimated bytes recoverable by packing the sort key.
    fn key_pack_savings(&self) -> usize {
        self.key_parts
            .iter()
            .filter_map(|p| match p.kind {
                ColumnKind::Bytes { max_len } => Some(max_len),
                _ => None,
            })
            .sum()
    }

    /// Estimated bytes recoverable by packing the addon region: variable
    /// slack plus the full slots of nullable fixed fields.
    fn addon_pack_savings(&self) -> usize {
        self.addon_fields
            .iter()
            .map(|f| match f.kind {
                ColumnKind::Bytes { max_len } => max_len,
                ColumnKind::Int | ColumnKind::Uint => {
                    if f.nullable {
                        8
                    } else {
                        0
                    }
                }
            })
            .sum()
    }

    /// Switch to packed sort keys when the estimated savings clear the
    /// threshold plus the per-record prefix. No-op otherwise; falling back to
    /// the fixed form is a decision, not an error.
    pub(crate) fn try_to_pack_sort_keys(&mut self) {
        if self.packed_keys || !self.key_parts.iter().any(|p| p.kind.is_variable()) {
            return;
        }
        if self.key_pack_savings() < KEY_PACK_MIN_SAVINGS + KEY_LENGTH_PREFIX_BYTES {
            return;
        }
        self.packed_keys = true;
    }

    /// Switch to packed addon payload when the record still fits its length
    /// field and the estimated slack clears the threshold.
    pub(crate) fn try_to_pack_addons(&mut self) {
        if self.packed_addons || self.payload != PayloadKind::Addon {
            return;
        }
        let with_prefix = self.record_cap() + ADDON_LENGTH_PREFIX_BYTES;
        if with_prefix > self.max_record_length {
            return;
        }
        if self.addon_pack_savings() < ADDON_PACK_MIN_SAVINGS {
            return;
        }
        self.packed_addons = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::sort_key::Collation;

    fn int_key() -> Vec<SortKeyPart> {
        vec![SortKeyPart::ascending(0, ColumnKind::Int)]
    }

    #[test]
    fn empty_key_parts_is_a_config_error() {
        let err = plan_record_layout(Vec::new(), PayloadPolicy::BackRef, 1024).unwrap_err();
        assert!(matches!(err, SortError::Config(_)));
    }

    #[test]
    fn oversized_key_part_is_rejected_up_front() {
        let parts = vec![SortKeyPart::ascending(0, ColumnKind::Bytes { max_len: 4096 })];
        let err = plan_record_layout(parts, PayloadPolicy::BackRef, 256).unwrap_err();
        assert!(matches!(err, SortError::Config(_)));
    }

    #[test]
    fn fixed_backref_layout_has_exact_record_len() {
        let layout = plan_record_layout(int_key(), PayloadPolicy::BackRef, 65_536).unwrap();
        // 8-byte key, 8-byte back-reference.
        assert_eq!(layout.fixed_record_len(), Some(16));
        assert!(!layout.packed_keys);
    }

    #[test]
    fn small_keys_stay_unpacked() {
        let parts = vec![
            SortKeyPart::ascending(0, ColumnKind::Bytes { max_len: 16 }),
            SortKeyPart::ascending(1, ColumnKind::Int),
        ];
        let mut layout = plan_record_layout(parts, PayloadPolicy::BackRef, 65_536).unwrap();
        layout.try_to_pack_sort_keys();
        assert!(!layout.packed_keys, "16 bytes of slack is under the threshold");
    }

    #[test]
    fn large_variable_keys_get_packed() {
        let parts = vec![
            SortKeyPart::ascending(0, ColumnKind::Bytes { max_len: 300 })
                .with_collation(Collation::CaseInsensitive),
        ];
        let mut layout = plan_record_layout(parts, PayloadPolicy::BackRef, 65_536).unwrap();
        layout.try_to_pack_sort_keys();
        assert!(layout.packed_keys);
        assert!(layout.key_region_cap() >= KEY_LENGTH_PREFIX_BYTES + 300);
    }

    #[test]
    fn addon_packing_needs_enough_slack() {
        let thin = vec![AddonField {
            column: 1,
            kind: ColumnKind::Int,
            nullable: false,
        }];
        let mut layout =
            plan_record_layout(int_key(), PayloadPolicy::Addon(thin), 65_536).unwrap();
        layout.try_to_pack_addons();
        assert!(!layout.packed_addons);

        let wide = vec![AddonField {
            column: 1,
            kind: ColumnKind::Bytes { max_len: 64 },
            nullable: true,
        }];
        let mut layout =
            plan_record_layout(int_key(), PayloadPolicy::Addon(wide), 65_536).unwrap();
        layout.try_to_pack_addons();
        assert!(layout.packed_addons);
    }

    #[test]
    fn addon_packing_respects_record_length_limit() {
        let fields = vec![AddonField {
            column: 1,
            kind: ColumnKind::Bytes { max_len: 40 },
            nullable: true,
        }];
        // 8 key + 1 bitmap + 42 slot = 51; prefix would push past 52.
        let mut layout = plan_record_layout(int_key(), PayloadPolicy::Addon(fields), 52).unwrap();
        layout.try_to_pack_addons();
        assert!(!layout.packed_addons);
    }
}
