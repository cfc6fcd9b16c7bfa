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

//! Segment file naming and record codec.
//!
//! ## On-Disk Record Format
//!
//! Records are stored contiguously in numbered segment files:
//!
//! ```text
//! ┌─────────────────┬──────────────────────┐
//! │  Length (4B)    │   Payload (variable) │
//! │  big-endian i32 │   raw bytes          │
//! └─────────────────┴──────────────────────┘
//! ```
//!
//! There is no per-record checksum; corruption is detected by the length
//! bounds check on read. In the disk-budget variant, every completed
//! (rotated) segment additionally carries an 8-byte big-endian trailer
//! holding the number of records in the file, so that eviction can adjust
//! the queue depth without replaying the segment.

use std::{
    fs::{self, File, OpenOptions},
    io::{BufReader, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use bytes::Bytes;
use snafu::ensure;

use crate::{Result, error::CorruptFrameSnafu};

/// Size of the big-endian length prefix in bytes.
pub(crate) const MSG_HEADER_SIZE: i64 = 4;

/// Size of the record-count trailer appended to completed segments in the
/// disk-budget variant.
pub(crate) const SEG_FOOTER_SIZE: i64 = 8;

/// Path of a numbered segment file: `{dir}/{name}.diskqueue.{NNNNNN}.dat`.
pub(crate) fn segment_file_name(dir: &Path, name: &str, file_num: i64) -> PathBuf {
    dir.join(format!("{name}.diskqueue.{file_num:06}.dat"))
}

/// Path a segment is renamed to when quarantined.
pub(crate) fn bad_file_name(dir: &Path, name: &str, file_num: i64) -> PathBuf {
    dir.join(format!("{name}.diskqueue.{file_num:06}.dat.bad"))
}

/// Size of a file on disk, zero when it does not exist.
pub(crate) fn file_size(path: &Path) -> i64 {
    fs::metadata(path).map(|m| m.len() as i64).unwrap_or(0)
}

/// A quarantined segment tracked for disk-budget accounting.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BadFile {
    pub file_num: i64,
    pub size:     i64,
}

/// Scan a queue directory for `.bad` quarantine files belonging to `name`.
///
/// Returns the files sorted by segment number; eviction consumes them
/// smallest-number-first.
pub(crate) fn scan_bad_files(dir: &Path, name: &str) -> Result<Vec<BadFile>> {
    let prefix = format!("{name}.diskqueue.");
    let mut bad_files = Vec::new();

    if !dir.exists() {
        return Ok(bad_files);
    }

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some(middle) = file_name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".dat.bad"))
        else {
            continue;
        };
        if let Ok(file_num) = middle.parse::<i64>() {
            let size = entry.metadata()?.len() as i64;
            bad_files.push(BadFile { file_num, size });
        }
    }

    bad_files.sort_by_key(|b| b.file_num);
    Ok(bad_files)
}

/// Append half of a segment: an open file positioned at the write cursor.
///
/// Each record is assembled in a reusable buffer and hits the file with a
/// single `write_all`, so the length prefix and payload are never split
/// across syscalls.
pub(crate) struct SegmentWriter {
    file: File,
    buf:  Vec<u8>,
}

impl SegmentWriter {
    /// Open (creating if needed) a segment for appending at `write_pos`.
    pub fn open(path: &Path, write_pos: i64) -> Result<Self> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if write_pos > 0 {
            file.seek(SeekFrom::Start(write_pos as u64))?;
        }

        Ok(Self {
            file,
            buf: Vec::with_capacity(4096),
        })
    }

    /// Append one length-prefixed record.
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        self.buf.clear();
        self.buf
            .extend_from_slice(&(data.len() as i32).to_be_bytes());
        self.buf.extend_from_slice(data);
        self.file.write_all(&self.buf)?;
        Ok(())
    }

    /// Seal a completed segment by appending the record-count trailer
    /// (disk-budget variant only).
    pub fn seal(&mut self, msg_count: i64) -> Result<()> {
        self.file.write_all(&msg_count.to_be_bytes())?;
        Ok(())
    }

    /// Fsync the segment to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Read half of a segment: a buffered reader positioned at the read cursor.
pub(crate) struct SegmentReader {
    reader: BufReader<File>,
    len:    i64,
}

impl SegmentReader {
    /// Open a segment for reading at `read_pos`.
    pub fn open(path: &Path, read_pos: i64) -> Result<Self> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len() as i64;

        if read_pos > 0 {
            file.seek(SeekFrom::Start(read_pos as u64))?;
        }

        Ok(Self {
            reader: BufReader::new(file),
            len,
        })
    }

    /// Size of the file at the time it was opened.
    pub fn len(&self) -> i64 { self.len }

    /// Read the next record, validating the length prefix against the
    /// configured payload bounds.
    ///
    /// A length outside `[min_msg_size, max_msg_size]` means the file is
    /// corrupt and there is no reasonable guarantee on where a new record
    /// begins; short reads surface as IO errors.
    pub fn read_record(&mut self, min_msg_size: i32, max_msg_size: i32) -> Result<Bytes> {
        let mut len_buf = [0u8; MSG_HEADER_SIZE as usize];
        self.reader.read_exact(&mut len_buf)?;
        let msg_size = i32::from_be_bytes(len_buf);

        ensure!(
            msg_size >= min_msg_size && msg_size <= max_msg_size,
            CorruptFrameSnafu { size: msg_size }
        );

        let mut payload = vec![0u8; msg_size as usize];
        self.reader.read_exact(&mut payload)?;
        Ok(Bytes::from(payload))
    }
}

/// Read the record-count trailer of a completed segment.
pub(crate) fn read_seg_footer(path: &Path) -> Result<i64> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::End(-SEG_FOOTER_SIZE))?;
    let mut buf = [0u8; SEG_FOOTER_SIZE as usize];
    file.read_exact(&mut buf)?;
    Ok(i64::from_be_bytes(buf))
}
