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

use std::{path::PathBuf, time::Duration};

use snafu::ensure;

use crate::{
    DiskQueue, QueueConfig, Result,
    error::BudgetTooSmallSnafu,
    metadata::MIN_METADATA_FOOTPRINT,
};

pub struct QueueBuilder {
    config: QueueConfig,
}

impl QueueBuilder {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            config: QueueConfig {
                name: name.into(),
                dir: dir.into(),
                ..Default::default()
            },
        }
    }

    pub fn max_bytes_per_file(mut self, max_bytes_per_file: i64) -> Self {
        self.config.max_bytes_per_file = max_bytes_per_file;
        self
    }

    pub fn min_msg_size(mut self, min_msg_size: i32) -> Self {
        self.config.min_msg_size = min_msg_size;
        self
    }

    pub fn max_msg_size(mut self, max_msg_size: i32) -> Self {
        self.config.max_msg_size = max_msg_size;
        self
    }

    pub fn sync_every(mut self, sync_every: i64) -> Self {
        self.config.sync_every = sync_every;
        self
    }

    pub fn sync_timeout(mut self, sync_timeout: Duration) -> Self {
        self.config.sync_timeout = sync_timeout;
        self
    }

    /// Cap the queue's total on-disk footprint (segments, quarantined files
    /// and metadata together). Selects the disk-budget variant; zero leaves
    /// the queue unbounded.
    pub fn max_bytes_disk_space(mut self, max_bytes_disk_space: i64) -> Self {
        self.config.max_bytes_disk_space = max_bytes_disk_space;
        self
    }

    pub fn build(self) -> Result<DiskQueue> {
        if self.config.disk_limited() {
            ensure!(
                self.config.max_bytes_disk_space
                    >= self.config.max_bytes_per_file + MIN_METADATA_FOOTPRINT,
                BudgetTooSmallSnafu {
                    limit: self.config.max_bytes_disk_space,
                }
            );
        }
        DiskQueue::open(self.config)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::Error;

    #[test]
    fn test_builder_default_config() {
        let builder = QueueBuilder::new("q", "/tmp/test_queue");
        assert_eq!(builder.config.name, "q");
        assert_eq!(builder.config.dir, PathBuf::from("/tmp/test_queue"));
        assert_eq!(builder.config.max_bytes_per_file, 100 * 1024 * 1024);
        assert_eq!(builder.config.sync_every, 2500);
        assert!(!builder.config.disk_limited());
    }

    #[test]
    fn test_builder_custom_config() {
        let builder = QueueBuilder::new("q", "/tmp/test_queue")
            .max_bytes_per_file(2048)
            .min_msg_size(4)
            .max_msg_size(1 << 10)
            .sync_every(100)
            .sync_timeout(Duration::from_millis(50))
            .max_bytes_disk_space(6040);

        assert_eq!(builder.config.max_bytes_per_file, 2048);
        assert_eq!(builder.config.min_msg_size, 4);
        assert_eq!(builder.config.max_msg_size, 1 << 10);
        assert_eq!(builder.config.sync_every, 100);
        assert_eq!(builder.config.sync_timeout, Duration::from_millis(50));
        assert!(builder.config.disk_limited());
    }

    #[test]
    fn test_budget_too_small_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let err = QueueBuilder::new("q", temp_dir.path())
            .max_bytes_per_file(2048)
            .max_bytes_disk_space(1024)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::BudgetTooSmall { limit: 1024, .. }));
    }

    #[test]
    fn test_budget_exactly_one_file_accepted() {
        let temp_dir = TempDir::new().unwrap();
        let queue = QueueBuilder::new("q", temp_dir.path())
            .max_bytes_per_file(2048)
            .max_bytes_disk_space(2048 + MIN_METADATA_FOOTPRINT)
            .build()
            .unwrap();
        queue.close().unwrap();
    }
}
