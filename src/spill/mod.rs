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
//! Spill storage for sorted runs.
//!
//! Responsibilities:
//! - Abstract the temporary byte store the engine spills runs into
//!   (append-only writes, windowed reads, no overwrite-in-place).
//! - Place spill files across the configured directories.

pub mod dir_manager;
pub mod run_file;
pub mod store;

use std::path::PathBuf;

use crate::common::config;

#[derive(Debug, Clone)]
pub struct SpillStorageConfig {
    pub local_dirs: Vec<PathBuf>,
    pub dir_max_bytes: u64,
}

impl SpillStorageConfig {
    pub fn from_app_config() -> Self {
        Self {
            local_dirs: config::spill_local_dirs().into_iter().map(PathBuf::from).collect(),
            dir_max_bytes: config::spill_dir_max_bytes(),
        }
    }
}
