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
//! Sort and deduplication engine.
//!
//! Responsibilities:
//! - Host the engine pipeline: key codec, layout planning, in-memory
//!   buffering or bounded top-K selection, run spilling, k-way merging, and
//!   result materialization.
//! - Keep the deduplication/intersection pipeline on the same run and merge
//!   machinery.

mod comparator;
pub mod dedup;
pub mod error;
pub mod layout;
mod merger;
mod record;
pub mod result;
mod sort_buffer;
pub mod sort_key;
pub mod sorter;
pub mod source;
mod topn;

pub use dedup::{DedupSpec, Deduplicator};
pub use error::{CancelToken, SortError};
pub use layout::{AddonField, PayloadPolicy, RecordLayout};
pub use result::{InMemoryResult, SortedResult, StreamResult};
pub use sort_key::{Collation, ColumnKind, SortKeyPart};
pub use sorter::{SortBudget, SortProfile, SortSpec, Sorter};
pub use source::{BackRef, Datum, RowSource, SourceRow, VecRowSource};
