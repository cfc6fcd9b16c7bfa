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

//! Cursor metadata persistence.
//!
//! The metadata file is the committed view of the queue's cursors; on reopen
//! the queue resumes from whatever this file last recorded. It is written
//! atomically: the new content goes to a `.tmp` sibling, is fsynced, and is
//! renamed over the final name, so a crash never leaves a torn file behind.
//!
//! Two textual formats exist, one per variant:
//!
//! ```text
//! classic                     disk-budget
//! {depth}                     {depth}
//! {read_file_num},{read_pos}  {read_file_num},{read_msg_count},{read_pos}
//! {write_file_num},{write_pos}{write_bytes},{write_file_num},{write_msg_count},{write_pos}
//! ```

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use crate::{Result, error::MetadataCorruptSnafu};

/// Smallest possible metadata file ("0\n0,0,0\n0,0,0,0\n"); the disk budget
/// must leave at least this much room beyond one full segment.
pub(crate) const MIN_METADATA_FOOTPRINT: i64 = 16;

/// Path of the metadata file: `{dir}/{name}.diskqueue.meta.dat`.
pub(crate) fn metadata_file_name(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.diskqueue.meta.dat"))
}

/// Committed cursor state, as stored in the metadata file.
///
/// The `read_msg_count`, `write_msg_count` and `write_bytes` fields are only
/// persisted by the disk-budget variant and stay zero otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct QueueMetadata {
    pub depth:           i64,
    pub read_file_num:   i64,
    pub read_msg_count:  i64,
    pub read_pos:        i64,
    pub write_bytes:     i64,
    pub write_file_num:  i64,
    pub write_msg_count: i64,
    pub write_pos:       i64,
}

impl QueueMetadata {
    /// Load metadata from `path`.
    ///
    /// A missing file means a fresh queue and yields `None`. A present but
    /// unparsable file is fatal.
    pub fn load(path: &Path, disk_limited: bool) -> Result<Option<Self>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Self::parse(&content, disk_limited).map(Some)
    }

    fn parse(content: &str, disk_limited: bool) -> Result<Self> {
        let mut lines = content.lines();
        let depth = parse_field(lines.next(), "depth line missing")?;
        let read_line = lines.next().unwrap_or_default();
        let write_line = lines.next().unwrap_or_default();

        let read_fields = parse_csv(read_line, if disk_limited { 3 } else { 2 })?;
        let write_fields = parse_csv(write_line, if disk_limited { 4 } else { 2 })?;

        let metadata = if disk_limited {
            Self {
                depth,
                read_file_num: read_fields[0],
                read_msg_count: read_fields[1],
                read_pos: read_fields[2],
                write_bytes: write_fields[0],
                write_file_num: write_fields[1],
                write_msg_count: write_fields[2],
                write_pos: write_fields[3],
            }
        } else {
            Self {
                depth,
                read_file_num: read_fields[0],
                read_pos: read_fields[1],
                write_file_num: write_fields[0],
                write_pos: write_fields[1],
                ..Default::default()
            }
        };

        Ok(metadata)
    }

    /// Atomically persist metadata to `path` via a fsynced `.tmp` sibling.
    pub fn persist(&self, path: &Path, disk_limited: bool) -> Result<()> {
        let content = if disk_limited {
            format!(
                "{}\n{},{},{}\n{},{},{},{}\n",
                self.depth,
                self.read_file_num,
                self.read_msg_count,
                self.read_pos,
                self.write_bytes,
                self.write_file_num,
                self.write_msg_count,
                self.write_pos,
            )
        } else {
            format!(
                "{}\n{},{}\n{},{}\n",
                self.depth, self.read_file_num, self.read_pos, self.write_file_num, self.write_pos,
            )
        };

        let tmp_path = path.with_extension("dat.tmp");
        let mut tmp_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp_file.write_all(content.as_bytes())?;
        tmp_file.sync_all()?;
        drop(tmp_file);

        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

fn parse_field(field: Option<&str>, what: &str) -> Result<i64> {
    let field = field.unwrap_or_default().trim();
    field.parse::<i64>().ok().ok_or_else(|| {
        MetadataCorruptSnafu {
            reason: format!("{what}: {field:?}"),
        }
        .build()
    })
}

fn parse_csv(line: &str, expected: usize) -> Result<Vec<i64>> {
    let fields: Vec<i64> = line
        .split(',')
        .map(|f| parse_field(Some(f), "invalid cursor field"))
        .collect::<Result<_>>()?;

    if fields.len() != expected {
        return MetadataCorruptSnafu {
            reason: format!("expected {expected} cursor fields, found {}", fields.len()),
        }
        .fail();
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use test_case::test_case;

    use super::*;
    use crate::Error;

    #[test]
    fn test_load_missing_file() {
        let loaded = QueueMetadata::load(Path::new("/nope/meta.dat"), false).unwrap();
        assert!(loaded.is_none());
    }

    #[test_case(false ; "classic format")]
    #[test_case(true ; "disk budget format")]
    fn test_persist_and_load_roundtrip(disk_limited: bool) {
        let temp_dir = TempDir::new().unwrap();
        let path = metadata_file_name(temp_dir.path(), "q");

        let metadata = QueueMetadata {
            depth:           7,
            read_file_num:   1,
            read_msg_count:  if disk_limited { 2 } else { 0 },
            read_pos:        1004,
            write_bytes:     if disk_limited { 5068 } else { 0 },
            write_file_num:  3,
            write_msg_count: if disk_limited { 4 } else { 0 },
            write_pos:       2008,
        };

        metadata.persist(&path, disk_limited).unwrap();
        let loaded = QueueMetadata::load(&path, disk_limited).unwrap().unwrap();
        assert_eq!(loaded, metadata);

        // tmp sibling is gone after the rename
        assert!(!path.with_extension("dat.tmp").exists());
    }

    #[test]
    fn test_classic_wire_format() {
        let temp_dir = TempDir::new().unwrap();
        let path = metadata_file_name(temp_dir.path(), "q");

        let metadata = QueueMetadata {
            depth: 1,
            read_pos: 1004,
            write_pos: 2008,
            ..Default::default()
        };
        metadata.persist(&path, false).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "1\n0,1004\n0,2008\n");
    }

    #[test]
    fn test_disk_budget_wire_format() {
        let temp_dir = TempDir::new().unwrap();
        let path = metadata_file_name(temp_dir.path(), "q");

        let metadata = QueueMetadata {
            depth:           3,
            read_file_num:   0,
            read_msg_count:  1,
            read_pos:        1004,
            write_bytes:     2048,
            write_file_num:  1,
            write_msg_count: 0,
            write_pos:       0,
        };
        metadata.persist(&path, true).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "3\n0,1,1004\n2048,1,0,0\n"
        );
    }

    #[test_case("garbage" ; "not numeric")]
    #[test_case("1\n0,0\n" ; "missing write line")]
    #[test_case("1\n0,0,0\n0,0\n" ; "wrong field count")]
    fn test_load_corrupt(content: &str) {
        let temp_dir = TempDir::new().unwrap();
        let path = metadata_file_name(temp_dir.path(), "q");
        fs::write(&path, content).unwrap();

        let err = QueueMetadata::load(&path, false).unwrap_err();
        assert!(matches!(err, Error::MetadataCorrupt { .. }));
    }

    #[test]
    fn test_variant_formats_are_incompatible() {
        let temp_dir = TempDir::new().unwrap();
        let path = metadata_file_name(temp_dir.path(), "q");

        let metadata = QueueMetadata::default();
        metadata.persist(&path, false).unwrap();

        let err = QueueMetadata::load(&path, true).unwrap_err();
        assert!(matches!(err, Error::MetadataCorrupt { .. }));
    }
}
