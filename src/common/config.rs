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
use crate::novasort_config::config as novasort_app_config;

pub(crate) fn log_filter() -> String {
    let cfg = novasort_app_config().ok();
    if let Some(filter) = cfg.and_then(|c| c.log_filter.clone()) {
        return filter;
    }
    cfg.map(|c| c.log_level.clone())
        .unwrap_or_else(|| "info".to_string())
}

pub(crate) fn spill_local_dirs() -> Vec<String> {
    let configured = novasort_app_config()
        .ok()
        .map(|c| c.spill.local_dirs.clone())
        .unwrap_or_default();
    if configured.is_empty() {
        let mut default_dir = std::env::temp_dir();
        default_dir.push("novasort-spill");
        vec![default_dir.to_string_lossy().into_owned()]
    } else {
        configured
    }
}

pub(crate) fn spill_dir_max_bytes() -> u64 {
    novasort_app_config()
        .ok()
        .map(|c| c.spill.dir_max_bytes)
        .unwrap_or(0)
}

pub(crate) fn default_sort_memory_bytes() -> u64 {
    novasort_app_config()
        .ok()
        .map(|c| c.sort.default_memory_bytes)
        .unwrap_or(64 * 1024 * 1024)
}

pub(crate) fn max_record_length() -> u32 {
    novasort_app_config()
        .ok()
        .map(|c| c.sort.max_record_length)
        .unwrap_or(65_536)
}

pub(crate) fn merge_read_buffer_bytes() -> u64 {
    novasort_app_config()
        .ok()
        .map(|c| c.sort.merge_read_buffer_bytes)
        .unwrap_or(1024 * 1024)
}
