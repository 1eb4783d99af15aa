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
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::sort::error::SortError;
use crate::spill::SpillStorageConfig;

#[derive(Debug)]
pub struct SpillDirManager {
    dirs: Vec<PathBuf>,
    next_dir: AtomicUsize,
    dir_max_bytes: u64,
}

impl SpillDirManager {
    pub fn new(dirs: Vec<PathBuf>, dir_max_bytes: u64) -> Result<Self, SortError> {
        if dirs.is_empty() {
            return Err(SortError::Config("spill.local_dirs is empty".to_string()));
        }
        for dir in &dirs {
            ensure_dir(dir)?;
        }
        Ok(Self {
            dirs,
            next_dir: AtomicUsize::new(0),
            dir_max_bytes,
        })
    }

    pub fn from_app_config() -> Result<Self, SortError> {
        let storage = SpillStorageConfig::from_app_config();
        Self::new(storage.local_dirs, storage.dir_max_bytes)
    }

    pub fn next_dir(&self) -> PathBuf {
        let idx = self.next_dir.fetch_add(1, Ordering::AcqRel);
        let pos = idx % self.dirs.len();
        self.dirs[pos].clone()
    }

    pub fn dir_max_bytes(&self) -> u64 {
        self.dir_max_bytes
    }
}

fn ensure_dir(path: &Path) -> Result<(), SortError> {
    if path.as_os_str().is_empty() {
        return Err(SortError::Config(
            "spill.local_dirs contains empty path".to_string(),
        ));
    }
    std::fs::create_dir_all(path).map_err(|e| {
        SortError::Storage(format!("create spill directory {} failed: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rotates_over_configured_dirs() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let manager = SpillDirManager::new(
            vec![a.path().to_path_buf(), b.path().to_path_buf()],
            0,
        )
        .unwrap();
        let first = manager.next_dir();
        let second = manager.next_dir();
        let third = manager.next_dir();
        assert_ne!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn empty_dir_list_is_rejected() {
        assert!(matches!(
            SpillDirManager::new(Vec::new(), 0),
            Err(SortError::Config(_))
        ));
    }
}
