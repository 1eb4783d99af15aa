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
//! Error taxonomy and cooperative cancellation.
//!
//! Responsibilities:
//! - Keep the five failure kinds of the engine distinguishable so callers can
//!   react per kind (cancellation is expected, storage failure is not).
//! - Provide the shared cancellation flag checked between consumed rows and
//!   between merge heap pops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SortError {
    /// Invalid key-part list, record length over the protocol limit, or an
    /// unsupported option combination. Raised before any row is consumed.
    #[error("invalid sort configuration: {0}")]
    Config(String),

    /// The in-memory buffer cannot be shrunk to fit the memory budget.
    #[error("out of sort memory: {0}")]
    OutOfMemory(String),

    /// A spill read/write/seek failed. Not retried internally.
    #[error("spill storage failure: {0}")]
    Storage(String),

    /// The caller asked the operation to stop. Expected, not a fault.
    #[error("sort operation cancelled")]
    Cancelled,

    /// Propagated opaquely from the row source.
    #[error("row source failure: {0}")]
    Source(String),
}

impl SortError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SortError::Cancelled)
    }
}

/// Shared cancellation flag.
///
/// Cloning hands out another handle to the same flag. The engine only reads
/// it at its suspension points; setting it is the caller's side of the
/// contract.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn check(&self) -> Result<(), SortError> {
        if self.is_cancelled() {
            return Err(SortError::Cancelled);
        }
        Ok(())
    }
}
