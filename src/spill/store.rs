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
//! External byte store seam.
//!
//! The engine only needs sequential appends, windowed reads at arbitrary
//! offsets, and a reset for reusing the alternate merge target. Failures are
//! hard: nothing here retries.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::novasort_logging::warn;
use crate::sort::error::SortError;
use crate::spill::dir_manager::SpillDirManager;

pub trait ExternalStore {
    /// Append `data`, returning the offset it starts at.
    fn append(&mut self, data: &[u8]) -> Result<u64, SortError>;

    /// Read up to `buf.len()` bytes starting at `offset`. A short count means
    /// the store ended inside the window.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, SortError>;

    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all content so the store can collect the next merge pass.
    fn reset(&mut self) -> Result<(), SortError>;
}

static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(0);

/// Temp-file-backed store. The file is placed by the dir manager and removed
/// when the store is dropped.
#[derive(Debug)]
pub struct SpillFileStore {
    path: PathBuf,
    file: File,
    len: u64,
}

impl SpillFileStore {
    pub fn create(dir_manager: &SpillDirManager) -> Result<Self, SortError> {
        let mut attempts = 0;
        loop {
            let dir = dir_manager.next_dir();
            let id = NEXT_FILE_ID.fetch_add(1, Ordering::AcqRel);
            let filename = format!("sort_{:x}_{:x}.run", std::process::id(), id);
            let path = dir.join(filename);
            let file = OpenOptions::new()
                .create_new(true)
                .read(true)
                .write(true)
                .open(&path);
            match file {
                Ok(file) => return Ok(Self { path, file, len: 0 }),
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists && attempts < 3 => {
                    attempts += 1;
                    continue;
                }
                Err(err) => {
                    return Err(SortError::Storage(format!(
                        "create spill file {} failed: {err}",
                        path.display()
                    )));
                }
            }
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl ExternalStore for SpillFileStore {
    fn append(&mut self, data: &[u8]) -> Result<u64, SortError> {
        let offset = self.len;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| SortError::Storage(format!("seek spill file failed: {e}")))?;
        self.file
            .write_all(data)
            .map_err(|e| SortError::Storage(format!("write spill run failed: {e}")))?;
        self.len += data.len() as u64;
        Ok(offset)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, SortError> {
        if offset >= self.len {
            return Ok(0);
        }
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| SortError::Storage(format!("seek spill file failed: {e}")))?;
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .file
                .read(&mut buf[filled..])
                .map_err(|e| SortError::Storage(format!("read spill run failed: {e}")))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn reset(&mut self) -> Result<(), SortError> {
        self.file
            .set_len(0)
            .map_err(|e| SortError::Storage(format!("truncate spill file failed: {e}")))?;
        self.len = 0;
        Ok(())
    }
}

impl Drop for SpillFileStore {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(
                "Sort spill remove file failed: path={} error={}",
                self.path.display(),
                err
            );
        }
    }
}

/// In-memory store, used by unit tests and callers that want to keep small
/// results off disk.
#[derive(Debug, Default)]
pub struct MemStore {
    bytes: Vec<u8>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExternalStore for MemStore {
    fn append(&mut self, data: &[u8]) -> Result<u64, SortError> {
        let offset = self.bytes.len() as u64;
        self.bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, SortError> {
        let offset = offset.min(self.bytes.len() as u64) as usize;
        let available = self.bytes.len() - offset;
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&self.bytes[offset..offset + n]);
        Ok(n)
    }

    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn reset(&mut self) -> Result<(), SortError> {
        self.bytes.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_store_append_then_windowed_read() {
        let dir = tempdir().unwrap();
        let manager = SpillDirManager::new(vec![dir.path().to_path_buf()], 0).unwrap();
        let mut store = SpillFileStore::create(&manager).unwrap();

        assert_eq!(store.append(b"hello").unwrap(), 0);
        assert_eq!(store.append(b"world").unwrap(), 5);
        assert_eq!(store.len(), 10);

        let mut buf = [0u8; 4];
        assert_eq!(store.read_at(3, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"lowo");

        // Reading past the end gives a short count, not an error.
        assert_eq!(store.read_at(8, &mut buf).unwrap(), 2);
        assert_eq!(store.read_at(100, &mut buf).unwrap(), 0);
    }

    #[test]
    fn file_store_reset_empties() {
        let dir = tempdir().unwrap();
        let manager = SpillDirManager::new(vec![dir.path().to_path_buf()], 0).unwrap();
        let mut store = SpillFileStore::create(&manager).unwrap();
        store.append(b"stale").unwrap();
        store.reset().unwrap();
        assert!(store.is_empty());
        assert_eq!(store.append(b"fresh").unwrap(), 0);
    }

    #[test]
    fn file_is_removed_on_drop() {
        let dir = tempdir().unwrap();
        let manager = SpillDirManager::new(vec![dir.path().to_path_buf()], 0).unwrap();
        let path = {
            let mut store = SpillFileStore::create(&manager).unwrap();
            store.append(b"x").unwrap();
            store.path().clone()
        };
        assert!(!path.exists());
    }

    #[test]
    fn mem_store_matches_contract() {
        let mut store = MemStore::new();
        store.append(b"abc").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(store.read_at(1, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"bc");
    }
}
