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
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<NovasortConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static NovasortConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = NovasortConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn init_from_env_or_default() -> Result<&'static NovasortConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    let cfg = NovasortConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn config() -> Result<&'static NovasortConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("NOVASORT_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let candidates = [PathBuf::from("novasort.toml")];
    for p in candidates {
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "missing config file: set $NOVASORT_CONFIG or create ./novasort.toml"
    ))
}

#[derive(Clone, Deserialize)]
pub struct NovasortConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "novasort=debug"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub spill: SpillStorageConfig,

    #[serde(default)]
    pub sort: SortConfig,
}

impl NovasortConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let cfg: NovasortConfig =
            toml::from_str(&s).with_context(|| format!("parse toml: {}", path.display()))?;
        Ok(cfg)
    }
}

impl Default for NovasortConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            spill: SpillStorageConfig::default(),
            sort: SortConfig::default(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct SpillStorageConfig {
    /// Directories used round-robin for spilled sort runs.
    /// Empty means the process temp directory.
    #[serde(default)]
    pub local_dirs: Vec<String>,
    #[serde(default = "default_spill_dir_max_bytes")]
    pub dir_max_bytes: u64,
}

fn default_spill_dir_max_bytes() -> u64 {
    0
}

impl Default for SpillStorageConfig {
    fn default() -> Self {
        Self {
            local_dirs: Vec::new(),
            dir_max_bytes: default_spill_dir_max_bytes(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct SortConfig {
    #[serde(default = "default_sort_memory_bytes")]
    pub default_memory_bytes: u64,
    #[serde(default = "default_max_record_length")]
    pub max_record_length: u32,
    #[serde(default = "default_merge_read_buffer_bytes")]
    pub merge_read_buffer_bytes: u64,
}

fn default_sort_memory_bytes() -> u64 {
    64 * 1024 * 1024
}

fn default_max_record_length() -> u32 {
    65_536
}

fn default_merge_read_buffer_bytes() -> u64 {
    1024 * 1024
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            default_memory_bytes: default_sort_memory_bytes(),
            max_record_length: default_max_record_length(),
            merge_read_buffer_bytes: default_merge_read_buffer_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let cfg: NovasortConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.spill.local_dirs.is_empty());
        assert_eq!(cfg.sort.max_record_length, 65_536);
    }

    #[test]
    fn parse_spill_section() {
        let cfg: NovasortConfig = toml::from_str(
            r#"
            log_level = "debug"

            [spill]
            local_dirs = ["/data/spill0", "/data/spill1"]
            dir_max_bytes = 1073741824

            [sort]
            default_memory_bytes = 1048576
            "#,
        )
        .unwrap();
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.spill.local_dirs.len(), 2);
        assert_eq!(cfg.spill.dir_max_bytes, 1_073_741_824);
        assert_eq!(cfg.sort.default_memory_bytes, 1_048_576);
    }
}
