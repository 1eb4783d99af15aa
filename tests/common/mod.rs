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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]

use novasort::sort::{ColumnKind, PayloadPolicy, SortKeyPart};
use novasort::{Datum, SortBudget, SortSpec, VecRowSource};

/// Row source over single-column integer rows; back-references are the row
/// positions.
pub fn int_source(values: &[i64]) -> VecRowSource {
    VecRowSource::from_columns(values.iter().map(|v| vec![Datum::Int(*v)]).collect())
}

/// Ascending single-part integer sort returning back-references.
pub fn int_spec() -> SortSpec {
    SortSpec::new(
        vec![SortKeyPart::ascending(0, ColumnKind::Int)],
        PayloadPolicy::BackRef,
    )
}

pub fn budget(memory_bytes: usize, estimated_rows: u64) -> SortBudget {
    SortBudget {
        memory_bytes,
        estimated_rows,
        max_record_length: 65_536,
    }
}

/// Decode back-reference payloads into the row ids they were built from.
pub fn payload_row_ids(payloads: &[Vec<u8>]) -> Vec<u64> {
    payloads
        .iter()
        .map(|p| u64::from_be_bytes(p[..8].try_into().unwrap()))
        .collect()
}
