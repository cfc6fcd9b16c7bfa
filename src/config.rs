// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Identifier used as the prefix for all of this queue's files.
    pub name: String,
    /// Directory holding segment and metadata files.
    pub dir: PathBuf,
    /// Soft upper bound on a segment file's size; rotation occurs at the
    /// first write that meets or exceeds it.
    pub max_bytes_per_file: i64,
    /// Inclusive lower bound on payload length.
    pub min_msg_size: i32,
    /// Inclusive upper bound on payload length.
    pub max_msg_size: i32,
    /// Number of read-or-write operations between implicit fsyncs.
    pub sync_every: i64,
    /// Wall-clock period between implicit fsyncs when no count-based sync
    /// fired.
    pub sync_timeout: Duration,
    /// Total-bytes ceiling across all of this queue's files, metadata
    /// included. Zero means unlimited.
    pub max_bytes_disk_space: i64,
}

impl QueueConfig {
    /// Whether the disk-budget variant is active.
    pub(crate) fn disk_limited(&self) -> bool { self.max_bytes_disk_space > 0 }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: String::from("diskqueue"),
            dir: PathBuf::from("."),
            max_bytes_per_file: 100 * 1024 * 1024,
            min_msg_size: 0,
            max_msg_size: 1024 * 1024,
            sync_every: 2500,
            sync_timeout: Duration::from_secs(2),
            max_bytes_disk_space: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.max_bytes_per_file, 100 * 1024 * 1024);
        assert_eq!(config.sync_every, 2500);
        assert_eq!(config.sync_timeout, Duration::from_secs(2));
        assert!(!config.disk_limited());
    }

    #[test]
    fn test_disk_limited_selection() {
        let config = QueueConfig {
            max_bytes_disk_space: 4096,
            ..Default::default()
        };
        assert!(config.disk_limited());
    }
}
