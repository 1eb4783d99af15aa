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
//! External sort-merge and deduplication engine.
//!
//! novasort turns an arbitrarily large row source into ordered output under a
//! fixed memory budget: rows are encoded into comparable byte records,
//! buffered, spilled as sorted runs, and merged back with a bounded fan-in.
//! A cost-gated bounded top-K selector replaces the full sort when a row
//! limit makes it cheaper, and a tree-based deduplication pipeline shares the
//! same run/merge machinery for DISTINCT and N-way intersection workloads.

pub mod common;
pub mod sort;
pub mod spill;

pub use common::app_config as novasort_config;
pub use common::logging as novasort_logging;

pub use sort::dedup::{DedupSpec, Deduplicator};
pub use sort::error::{CancelToken, SortError};
pub use sort::result::{InMemoryResult, SortedResult, StreamResult};
pub use sort::sorter::{SortBudget, SortProfile, SortSpec, Sorter};
pub use sort::source::{BackRef, Datum, RowSource, SourceRow, VecRowSource};
