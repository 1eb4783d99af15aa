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
//! Row source seam.
//!
//! The engine never scans tables itself; it pulls candidate rows from a
//! [`RowSource`] and, when the result carries back-references instead of
//! payload copies, refetches rows through the same source later.

use crate::sort::error::SortError;

/// Width of an opaque row back-reference.
pub const BACK_REF_BYTES: usize = 8;

/// Opaque fixed-width row identifier handed out by the row source.
///
/// The engine never interprets the bytes; it only stores, compares, and
/// returns them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BackRef(pub [u8; BACK_REF_BYTES]);

impl BackRef {
    pub fn from_row_id(id: u64) -> Self {
        BackRef(id.to_be_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; BACK_REF_BYTES] {
        &self.0
    }
}

/// One column value as seen by the sort engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Datum {
    Null,
    Int(i64),
    Uint(u64),
    Bytes(Vec<u8>),
}

/// A candidate row pulled from the source.
#[derive(Clone, Debug)]
pub struct SourceRow {
    pub columns: Vec<Datum>,
    pub back_ref: BackRef,
}

impl SourceRow {
    pub fn column(&self, idx: usize) -> Result<&Datum, SortError> {
        self.columns
            .get(idx)
            .ok_or_else(|| SortError::Source(format!("row has no column {idx}")))
    }
}

/// Pull-style row producer.
pub trait RowSource {
    /// Next candidate row, or `None` at end of input.
    fn next_row(&mut self) -> Result<Option<SourceRow>, SortError>;

    /// Refetch a row by its back-reference.
    ///
    /// Only required when the sort was configured to carry back-references;
    /// sources that cannot seek keep the default.
    fn fetch(&mut self, back_ref: &BackRef) -> Result<SourceRow, SortError> {
        let _ = back_ref;
        Err(SortError::Source(
            "row source does not support back-reference fetch".to_string(),
        ))
    }
}

/// In-memory row source over pre-built rows. Test and demo adapter.
#[derive(Debug, Default)]
pub struct VecRowSource {
    rows: Vec<SourceRow>,
    next: usize,
}

impl VecRowSource {
    pub fn new(rows: Vec<SourceRow>) -> Self {
        Self { rows, next: 0 }
    }

    /// Build rows from column vectors, assigning sequential back-references.
    pub fn from_columns(rows: Vec<Vec<Datum>>) -> Self {
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(idx, columns)| SourceRow {
                columns,
                back_ref: BackRef::from_row_id(idx as u64),
            })
            .collect();
        Self::new(rows)
    }
}

impl RowSource for VecRowSource {
    fn next_row(&mut self) -> Result<Option<SourceRow>, SortError> {
        if self.next >= self.rows.len() {
            return Ok(None);
        }
        let row = self.rows[self.next].clone();
        self.next += 1;
        Ok(Some(row))
    }

    fn fetch(&mut self, back_ref: &BackRef) -> Result<SourceRow, SortError> {
        self.rows
            .iter()
            .find(|row| row.back_ref == *back_ref)
            .cloned()
            .ok_or_else(|| SortError::Source("unknown back-reference".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_source_yields_rows_then_end() {
        let mut source =
            VecRowSource::from_columns(vec![vec![Datum::Int(1)], vec![Datum::Int(2)]]);
        assert_eq!(
            source.next_row().unwrap().unwrap().columns,
            vec![Datum::Int(1)]
        );
        assert_eq!(
            source.next_row().unwrap().unwrap().columns,
            vec![Datum::Int(2)]
        );
        assert!(source.next_row().unwrap().is_none());
    }

    #[test]
    fn vec_source_fetch_by_back_ref() {
        let mut source = VecRowSource::from_columns(vec![
            vec![Datum::Int(10)],
            vec![Datum::Int(20)],
            vec![Datum::Int(30)],
        ]);
        let row = source.fetch(&BackRef::from_row_id(1)).unwrap();
        assert_eq!(row.columns, vec![Datum::Int(20)]);
        assert!(source.fetch(&BackRef::from_row_id(99)).is_err());
    }
}
