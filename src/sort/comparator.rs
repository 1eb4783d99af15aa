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
//! Record comparator.
//!
//! Fixed keys compare with a single byte comparison over the key region: the
//! encoders already baked null ordering and descending inversion into the
//! bytes. Packed keys walk the parts, decode each part's length, and apply
//! its semantic comparator, short-circuiting on the first difference.
//!
//! A trailing back-reference comparison breaks remaining ties only when no
//! addon payload is present; with addon payload the order among equal keys is
//! unspecified.

use std::cmp::Ordering;

use crate::sort::layout::{KEY_LENGTH_PREFIX_BYTES, RecordLayout};
use crate::sort::sort_key::SortKeyPart;
use crate::sort::source::BACK_REF_BYTES;

#[derive(Clone, Debug)]
pub(crate) struct RecordComparator {
    packed: bool,
    fixed_key_len: usize,
    key_parts: Vec<SortKeyPart>,
    back_ref_tie_break: bool,
}

impl RecordComparator {
    pub(crate) fn new(layout: &RecordLayout) -> Self {
        Self {
            packed: layout.packed_keys,
            fixed_key_len: layout.fixed_key_len,
            key_parts: layout.key_parts.clone(),
            back_ref_tie_break: layout.uses_back_ref(),
        }
    }

    /// Compare two whole records.
    pub(crate) fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.compare_keys(a, b).then_with(|| {
            if self.back_ref_tie_break {
                let a_ref = &a[a.len() - BACK_REF_BYTES..];
                let b_ref = &b[b.len() - BACK_REF_BYTES..];
                a_ref.cmp(b_ref)
            } else {
                Ordering::Equal
            }
        })
    }

    /// Compare only the key regions of two records.
    pub(crate) fn compare_keys(&self, a: &[u8], b: &[u8]) -> Ordering {
        if !self.packed {
            return a[..self.fixed_key_len].cmp(&b[..self.fixed_key_len]);
        }
        let mut a_at = KEY_LENGTH_PREFIX_BYTES;
        let mut b_at = KEY_LENGTH_PREFIX_BYTES;
        for part in &self.key_parts {
            let a_len = part
                .packed_part_len(&a[a_at..])
                .expect("packed record shorter than its key parts");
            let b_len = part
                .packed_part_len(&b[b_at..])
                .expect("packed record shorter than its key parts");
            let ord = part.compare_packed(&a[a_at..a_at + a_len], &b[b_at..b_at + b_len]);
            if ord != Ordering::Equal {
                return ord;
            }
            a_at += a_len;
            b_at += b_len;
        }
        Ordering::Equal
    }
}
