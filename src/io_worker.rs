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

//! Background I/O worker: the queue's single serialization point.
//!
//! ## Architecture
//!
//! The IOWorker runs on a dedicated thread and owns every piece of mutable
//! queue state: cursors, open file handles, the buffered next message, and
//! the disk-budget accounting. Producers, consumers, and control operations
//! reach it only through channels, so no per-field locking exists anywhere.
//!
//! ```text
//! ┌──────────────┐  write channel   ┌──────────────┐    append    ┌──────────────┐
//! │  DiskQueue   │ ───────────────► │   IOWorker   │ ───────────► │ segment file │
//! │  (handles)   │ ◄─────────────── │  (bg thread) │ ◄─────────── │   (.dat)     │
//! └──────────────┘   read channel   └──────────────┘     read     └──────────────┘
//! ```
//!
//! ## Responsibilities
//!
//! - **Writes**: frame and append records, rotate segments at the size bound
//! - **Reads**: speculatively pre-read one record and offer it on the
//!   rendezvous read channel; a completed send is the consume commit
//! - **Sync cadence**: count-based and timer-based flush + fsync + metadata
//! - **Disk budget**: evict quarantined files and oldest segments to honor
//!   the total-bytes ceiling
//! - **Recovery**: quarantine unreadable segments and keep serving

use std::{
    fs,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
};

use bytes::Bytes;
use crossbeam::channel::{Receiver, Sender, tick};
use tracing::{error, info, warn};

use crate::{
    QueueConfig, Result,
    error::{InternalSnafu, InvalidMsgSizeSnafu, MsgTooLargeSnafu},
    metadata::{self, QueueMetadata},
    segment::{self, BadFile, MSG_HEADER_SIZE, SEG_FOOTER_SIZE, SegmentReader, SegmentWriter},
};

/// A producer request: one payload plus the channel the outcome is sent on.
pub(crate) struct WriteRequest {
    pub data:  Bytes,
    pub reply: Sender<Result<()>>,
}

/// A control request to terminate the loop.
pub(crate) struct ExitRequest {
    /// Whether to run a final sync (flush + fsync + metadata) before exiting.
    pub persist: bool,
    pub reply:   Sender<Result<()>>,
}

/// The outcome of one `select` tick, extracted so the arm bodies stay free
/// of borrows on the channel handles.
enum Op {
    Delivered,
    Undeliverable(Bytes),
    Write(WriteRequest),
    Empty(Sender<Result<()>>),
    SyncTick,
    Exit(ExitRequest),
    Disconnected,
}

pub(crate) struct IOWorker {
    /// Shared queue configuration.
    config:    Arc<QueueConfig>,
    /// Path of the metadata file, cached.
    meta_path: PathBuf,

    read_pos:           i64,
    write_pos:          i64,
    read_file_num:      i64,
    write_file_num:     i64,
    /// Speculative cursor past the buffered, not-yet-consumed record.
    next_read_pos:      i64,
    next_read_file_num: i64,

    /// Messages consumed so far from the current read segment (budget only).
    read_msg_count:  i64,
    /// Messages written so far to the current write segment (budget only).
    write_msg_count: i64,
    /// Total bytes of this queue's live segment files (budget only).
    write_bytes:     i64,
    /// Quarantined files, sorted by segment number (budget only).
    bad_files:       Vec<BadFile>,

    /// Unconsumed message count, shared with the public handle.
    depth: Arc<AtomicI64>,

    write_file: Option<SegmentWriter>,
    read_file:  Option<SegmentReader>,
    /// Logical end of the current read segment; stat size for completed
    /// segments, the configured bound for the segment still being written.
    max_bytes_per_file_read: i64,

    /// The single buffered record awaiting consumer handoff.
    next_msg:  Option<Bytes>,
    need_sync: bool,

    write_rx: Receiver<WriteRequest>,
    read_tx:  Sender<Bytes>,
    empty_rx: Receiver<Sender<Result<()>>>,
    exit_rx:  Receiver<ExitRequest>,
}

impl IOWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<QueueConfig>,
        state: QueueMetadata,
        bad_files: Vec<BadFile>,
        depth: Arc<AtomicI64>,
        write_rx: Receiver<WriteRequest>,
        read_tx: Sender<Bytes>,
        empty_rx: Receiver<Sender<Result<()>>>,
        exit_rx: Receiver<ExitRequest>,
    ) -> Self {
        let meta_path = metadata::metadata_file_name(&config.dir, &config.name);
        let max_bytes_per_file = config.max_bytes_per_file;
        Self {
            config,
            meta_path,
            read_pos: state.read_pos,
            write_pos: state.write_pos,
            read_file_num: state.read_file_num,
            write_file_num: state.write_file_num,
            next_read_pos: state.read_pos,
            next_read_file_num: state.read_file_num,
            read_msg_count: state.read_msg_count,
            write_msg_count: state.write_msg_count,
            write_bytes: state.write_bytes,
            bad_files,
            depth,
            write_file: None,
            read_file: None,
            max_bytes_per_file_read: max_bytes_per_file,
            next_msg: None,
            need_sync: false,
            write_rx,
            read_tx,
            empty_rx,
            exit_rx,
        }
    }

    /// Main run loop.
    ///
    /// Each tick: honor the sync cadence, speculatively pre-read one record
    /// when unread data exists and nothing is buffered, then block on the
    /// channel set. The read-offer arm only exists while a record is
    /// buffered; its completed send is the consume commit.
    pub fn run(&mut self) {
        info!(name = %self.config.name, "io loop starting");

        let ticker = tick(self.config.sync_timeout);
        let write_rx = self.write_rx.clone();
        let read_tx = self.read_tx.clone();
        let empty_rx = self.empty_rx.clone();
        let exit_rx = self.exit_rx.clone();

        let mut count: i64 = 0;

        loop {
            if count == self.config.sync_every {
                self.need_sync = true;
            }

            if self.need_sync {
                if let Err(e) = self.sync() {
                    error!(name = %self.config.name, error = %e, "failed to sync");
                }
                count = 0;
            }

            if self.read_file_num < self.write_file_num || self.read_pos < self.write_pos {
                if self.next_msg.is_none() {
                    match self.read_one() {
                        Ok(data) => self.next_msg = Some(data),
                        Err(e) => {
                            error!(
                                name = %self.config.name,
                                read_pos = self.read_pos,
                                file_num = self.read_file_num,
                                error = %e,
                                "reading message failed"
                            );
                            self.handle_read_error();
                            continue;
                        }
                    }
                }
            } else {
                self.next_msg = None;
            }

            let op = if let Some(msg) = self.next_msg.clone() {
                crossbeam::select! {
                    send(read_tx, msg) -> res => match res {
                        Ok(()) => Op::Delivered,
                        Err(e) => Op::Undeliverable(e.into_inner()),
                    },
                    recv(write_rx) -> req => req.map_or(Op::Disconnected, Op::Write),
                    recv(empty_rx) -> req => req.map_or(Op::Disconnected, Op::Empty),
                    recv(ticker) -> _ => Op::SyncTick,
                    recv(exit_rx) -> req => req.map_or(Op::Disconnected, Op::Exit),
                }
            } else {
                crossbeam::select! {
                    recv(write_rx) -> req => req.map_or(Op::Disconnected, Op::Write),
                    recv(empty_rx) -> req => req.map_or(Op::Disconnected, Op::Empty),
                    recv(ticker) -> _ => Op::SyncTick,
                    recv(exit_rx) -> req => req.map_or(Op::Disconnected, Op::Exit),
                }
            };

            match op {
                Op::Delivered => {
                    count += 1;
                    self.next_msg = None;
                    self.move_forward();
                }
                Op::Write(req) => {
                    count += 1;
                    let res = self.write_one(&req.data);
                    let _ = req.reply.send(res);
                }
                Op::Empty(reply) => {
                    let _ = reply.send(self.delete_all_files());
                    count = 0;
                }
                Op::SyncTick => {
                    if count > 0 {
                        self.need_sync = true;
                    }
                }
                Op::Exit(req) => {
                    info!(name = %self.config.name, "io loop exiting");
                    let res = if req.persist { self.sync() } else { Ok(()) };
                    self.read_file = None;
                    self.write_file = None;
                    let _ = req.reply.send(res);
                    return;
                }
                Op::Undeliverable(msg) => {
                    // every receiver is gone, which means the handle itself
                    // was dropped; the record stays uncommitted
                    self.next_msg = Some(msg);
                    self.exit_on_disconnect();
                    return;
                }
                Op::Disconnected => {
                    self.exit_on_disconnect();
                    return;
                }
            }
        }
    }

    fn exit_on_disconnect(&mut self) {
        info!(name = %self.config.name, "channel disconnected, io loop exiting");
        if let Err(e) = self.sync() {
            error!(name = %self.config.name, error = %e, "failed final sync");
        }
        self.read_file = None;
        self.write_file = None;
    }

    fn file_name(&self, file_num: i64) -> PathBuf {
        segment::segment_file_name(&self.config.dir, &self.config.name, file_num)
    }

    fn disk_limited(&self) -> bool { self.config.disk_limited() }

    fn depth_load(&self) -> i64 { self.depth.load(Ordering::Relaxed) }

    /// Flush and fsync the write segment, then persist metadata atomically.
    fn sync(&mut self) -> Result<()> {
        if let Some(write_file) = self.write_file.as_mut()
            && let Err(e) = write_file.sync()
        {
            self.write_file = None;
            return Err(e);
        }

        self.persist_metadata()?;
        self.need_sync = false;
        Ok(())
    }

    fn persist_metadata(&self) -> Result<()> {
        let metadata = QueueMetadata {
            depth:           self.depth_load(),
            read_file_num:   self.read_file_num,
            read_msg_count:  self.read_msg_count,
            read_pos:        self.read_pos,
            write_bytes:     self.write_bytes,
            write_file_num:  self.write_file_num,
            write_msg_count: self.write_msg_count,
            write_pos:       self.write_pos,
        };
        metadata.persist(&self.meta_path, self.disk_limited())
    }

    /// Append one record to the current write segment, enforcing payload
    /// bounds and, in the budget variant, the disk-space ceiling.
    fn write_one(&mut self, data: &[u8]) -> Result<()> {
        let data_len = data.len() as i64;
        let total_bytes = MSG_HEADER_SIZE + data_len;

        if data_len < self.config.min_msg_size as i64 || data_len > self.config.max_msg_size as i64
        {
            return InvalidMsgSizeSnafu {
                size: data_len,
                min:  self.config.min_msg_size,
                max:  self.config.max_msg_size,
            }
            .fail();
        }

        if self.disk_limited() {
            if total_bytes > self.config.max_bytes_disk_space {
                return MsgTooLargeSnafu {
                    size:  total_bytes,
                    limit: self.config.max_bytes_disk_space,
                }
                .fail();
            }

            let mut expected = total_bytes;
            if self.write_pos + total_bytes + SEG_FOOTER_SIZE >= self.config.max_bytes_per_file {
                // this write will seal the segment, so its trailer lands too
                expected += SEG_FOOTER_SIZE;
            }

            let meta_size = segment::file_size(&self.meta_path);
            let bad_bytes: i64 = self.bad_files.iter().map(|b| b.size).sum();
            if self.write_bytes + bad_bytes + expected + meta_size
                > self.config.max_bytes_disk_space
            {
                self.free_disk_space(expected, meta_size);
            }
        }

        if self.write_file.is_none() {
            let path = self.file_name(self.write_file_num);
            self.write_file = Some(SegmentWriter::open(&path, self.write_pos)?);
            info!(name = %self.config.name, path = ?path, "opened segment for writing");
        }
        let write_file = self.write_file.as_mut().ok_or_else(|| {
            InternalSnafu {
                message: "no segment open for writing".to_string(),
            }
            .build()
        })?;

        if let Err(e) = write_file.append(data) {
            self.write_file = None;
            return Err(e);
        }

        self.write_pos += total_bytes;
        self.depth.fetch_add(1, Ordering::Relaxed);
        if self.disk_limited() {
            self.write_bytes += total_bytes;
            self.write_msg_count += 1;
        }

        let rotate = if self.disk_limited() {
            self.write_pos + SEG_FOOTER_SIZE >= self.config.max_bytes_per_file
        } else {
            self.write_pos >= self.config.max_bytes_per_file
        };
        if rotate {
            self.rotate_write_file();
        }

        Ok(())
    }

    /// Close out the current write segment and move to the next number.
    ///
    /// In the budget variant the segment is sealed first: its record count
    /// goes into the 8-byte trailer for later eviction accounting.
    fn rotate_write_file(&mut self) {
        if self.disk_limited() {
            if self.write_file.is_none() && self.write_pos > 0 {
                let path = self.file_name(self.write_file_num);
                match SegmentWriter::open(&path, self.write_pos) {
                    Ok(f) => self.write_file = Some(f),
                    Err(e) => {
                        error!(
                            name = %self.config.name,
                            path = ?path,
                            error = %e,
                            "failed to reopen segment for sealing"
                        );
                    }
                }
            }
            if let Some(write_file) = self.write_file.as_mut()
                && let Err(e) = write_file.seal(self.write_msg_count)
            {
                error!(name = %self.config.name, error = %e, "failed to seal segment");
            }
            self.write_bytes += SEG_FOOTER_SIZE;
        }

        self.write_file_num += 1;
        self.write_pos = 0;
        self.write_msg_count = 0;

        // sync every time we start writing to a new file
        if let Err(e) = self.sync() {
            error!(name = %self.config.name, error = %e, "failed to sync");
        }

        self.write_file = None;
    }

    /// Read the next record at the read cursor, advancing only the
    /// speculative `next_read_*` cursor; the real cursor moves when the
    /// record is handed to a consumer.
    fn read_one(&mut self) -> Result<Bytes> {
        if self.read_file.is_none() {
            let path = self.file_name(self.read_file_num);
            let f = SegmentReader::open(&path, self.read_pos)?;
            info!(name = %self.config.name, path = ?path, "opened segment for reading");

            // for completed segments the logical end is the actual file size
            // (they may have been rotated under a different size bound); only
            // the segment still being written uses the configured bound
            self.max_bytes_per_file_read = if self.read_file_num < self.write_file_num {
                f.len()
            } else {
                self.config.max_bytes_per_file
            };

            self.read_file = Some(f);
        }
        let read_file = self.read_file.as_mut().ok_or_else(|| {
            InternalSnafu {
                message: "no segment open for reading".to_string(),
            }
            .build()
        })?;

        let data = match read_file.read_record(self.config.min_msg_size, self.config.max_msg_size)
        {
            Ok(data) => data,
            Err(e) => {
                self.read_file = None;
                return Err(e);
            }
        };

        let total_bytes = MSG_HEADER_SIZE + data.len() as i64;
        self.next_read_pos = self.read_pos + total_bytes;
        self.next_read_file_num = self.read_file_num;

        // completed segments in the budget variant end with the record-count
        // trailer, which is not a record
        let mut read_end = self.max_bytes_per_file_read;
        if self.disk_limited() {
            read_end -= SEG_FOOTER_SIZE;
        }

        if self.read_file_num < self.write_file_num && self.next_read_pos >= read_end {
            self.read_file = None;
            self.next_read_file_num += 1;
            self.next_read_pos = 0;
        }

        Ok(data)
    }

    /// Commit one consumed record: the read cursor catches up with the
    /// speculative cursor, and a fully consumed segment is deleted.
    fn move_forward(&mut self) {
        let old_read_file_num = self.read_file_num;
        self.read_file_num = self.next_read_file_num;
        self.read_pos = self.next_read_pos;
        let depth = self.depth.fetch_sub(1, Ordering::Relaxed) - 1;
        if self.disk_limited() {
            self.read_msg_count += 1;
        }

        if old_read_file_num != self.next_read_file_num {
            // sync every time we start reading from a new file
            self.need_sync = true;

            let path = self.file_name(old_read_file_num);
            if self.disk_limited() {
                self.write_bytes -= segment::file_size(&path);
                self.read_msg_count = 0;
            }
            if let Err(e) = fs::remove_file(&path) {
                error!(
                    name = %self.config.name,
                    path = ?path,
                    error = %e,
                    "failed to remove consumed segment"
                );
            }
        }

        self.check_tail_corruption(depth);
    }

    /// When the read cursor has caught the write cursor, depth must be zero
    /// and the cursors must coincide; anything else is metadata drift or
    /// data loss, repaired by force.
    fn check_tail_corruption(&mut self, depth: i64) {
        if self.read_file_num < self.write_file_num || self.read_pos < self.write_pos {
            return;
        }

        if depth != 0 {
            if depth < 0 {
                error!(
                    name = %self.config.name,
                    depth,
                    "negative depth at tail, metadata corruption, resetting 0"
                );
            } else {
                error!(
                    name = %self.config.name,
                    depth,
                    "positive depth at tail, data loss, resetting 0"
                );
            }
            self.depth.store(0, Ordering::Relaxed);
            self.need_sync = true;
        }

        if self.read_file_num != self.write_file_num || self.read_pos != self.write_pos {
            if self.read_file_num > self.write_file_num {
                error!(
                    name = %self.config.name,
                    read_file_num = self.read_file_num,
                    write_file_num = self.write_file_num,
                    "read cursor ahead of write cursor, corruption, skipping to next file"
                );
            }
            if self.read_pos > self.write_pos {
                error!(
                    name = %self.config.name,
                    read_pos = self.read_pos,
                    write_pos = self.write_pos,
                    "read position ahead of write position, corruption, skipping to next file"
                );
            }
            if let Err(e) = self.skip_to_next_rw_file() {
                error!(name = %self.config.name, error = %e, "failed to skip to next file");
            }
            self.need_sync = true;
        }
    }

    /// Drop every live segment and restart both cursors on a fresh segment
    /// number.
    fn skip_to_next_rw_file(&mut self) -> Result<()> {
        let mut result = Ok(());

        self.read_file = None;
        self.write_file = None;

        for i in self.read_file_num..=self.write_file_num {
            let path = self.file_name(i);
            if let Err(e) = fs::remove_file(&path)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                error!(
                    name = %self.config.name,
                    path = ?path,
                    error = %e,
                    "failed to remove data file"
                );
                result = Err(e.into());
            }
        }

        self.write_file_num += 1;
        self.write_pos = 0;
        self.read_file_num = self.write_file_num;
        self.read_pos = 0;
        self.next_read_file_num = self.write_file_num;
        self.next_read_pos = 0;
        self.next_msg = None;
        self.depth.store(0, Ordering::Relaxed);

        if self.disk_limited() {
            self.write_bytes = 0;
            self.read_msg_count = 0;
            self.write_msg_count = 0;
        }

        result
    }

    /// Empty: remove every live segment plus the metadata file.
    fn delete_all_files(&mut self) -> Result<()> {
        let result = self.skip_to_next_rw_file();

        if let Err(e) = fs::remove_file(&self.meta_path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            error!(name = %self.config.name, error = %e, "failed to remove metadata file");
            return Err(e.into());
        }

        result
    }

    /// Quarantine the segment the read cursor points at and jump past it.
    ///
    /// No attempt is made to guess how many unread records the bad segment
    /// held; `check_tail_corruption` re-aligns depth once the read cursor
    /// catches the write cursor.
    fn handle_read_error(&mut self) {
        if self.read_file_num == self.write_file_num {
            // the unreadable segment is also the one being written; nothing
            // sensible can be appended to it either
            self.write_file = None;
            self.write_file_num += 1;
            self.write_pos = 0;
            self.write_msg_count = 0;
        }

        let bad_file_num = self.read_file_num;
        let path = self.file_name(bad_file_num);
        let bad_path = segment::bad_file_name(&self.config.dir, &self.config.name, bad_file_num);

        warn!(
            name = %self.config.name,
            path = ?path,
            bad_path = ?bad_path,
            "jumping to next file and saving bad file"
        );

        self.read_file = None;
        let size = segment::file_size(&path);
        match fs::rename(&path, &bad_path) {
            Ok(()) => {
                if self.disk_limited() {
                    self.write_bytes -= size;
                    self.bad_files.push(BadFile {
                        file_num: bad_file_num,
                        size,
                    });
                    self.bad_files.sort_by_key(|b| b.file_num);
                }
            }
            Err(e) => {
                error!(
                    name = %self.config.name,
                    path = ?path,
                    error = %e,
                    "failed to rename bad file"
                );
            }
        }

        self.read_file_num += 1;
        self.read_pos = 0;
        self.next_read_file_num = self.read_file_num;
        self.next_read_pos = 0;
        self.read_msg_count = 0;
        self.next_msg = None;
        self.need_sync = true;

        self.check_tail_corruption(self.depth_load());
    }

    /// Evict files until `expected` more bytes fit under the disk budget.
    ///
    /// Quarantined files go first (smallest segment number), then live
    /// segments behind the write cursor oldest-first; as a last resort the
    /// current write segment is sealed and rotated so it becomes evictable.
    fn free_disk_space(&mut self, expected: i64, meta_size: i64) {
        loop {
            let bad_bytes: i64 = self.bad_files.iter().map(|b| b.size).sum();
            if self.write_bytes + bad_bytes + expected + meta_size
                <= self.config.max_bytes_disk_space
            {
                return;
            }

            if !self.bad_files.is_empty() {
                let bad = self.bad_files.remove(0);
                let path =
                    segment::bad_file_name(&self.config.dir, &self.config.name, bad.file_num);
                info!(
                    name = %self.config.name,
                    path = ?path,
                    size = bad.size,
                    "evicting quarantined file to free disk space"
                );
                if let Err(e) = fs::remove_file(&path) {
                    error!(
                        name = %self.config.name,
                        path = ?path,
                        error = %e,
                        "failed to remove quarantined file"
                    );
                }
            } else if self.read_file_num < self.write_file_num {
                self.remove_read_file();
            } else if self.write_pos > 0 {
                // rotate the current segment closed so the next pass can
                // evict it
                self.rotate_write_file();
            } else {
                warn!(
                    name = %self.config.name,
                    expected,
                    "nothing left to evict, disk budget cannot be satisfied"
                );
                return;
            }
        }
    }

    /// Evict the segment at the read cursor, charging its sealed record
    /// count against the queue depth.
    fn remove_read_file(&mut self) {
        let path = self.file_name(self.read_file_num);
        self.read_file = None;

        match segment::read_seg_footer(&path) {
            Ok(msg_count) => {
                let remaining = (msg_count - self.read_msg_count).max(0);
                let depth = (self.depth_load() - remaining).max(0);
                self.depth.store(depth, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(
                    name = %self.config.name,
                    path = ?path,
                    error = %e,
                    "failed to read segment trailer"
                );
            }
        }

        self.write_bytes -= segment::file_size(&path);
        info!(
            name = %self.config.name,
            path = ?path,
            "evicting oldest segment to free disk space"
        );
        if let Err(e) = fs::remove_file(&path) {
            error!(name = %self.config.name, path = ?path, error = %e, "failed to remove segment");
        }

        self.read_file_num += 1;
        self.read_pos = 0;
        self.read_msg_count = 0;
        self.next_read_file_num = self.read_file_num;
        self.next_read_pos = 0;
        self.next_msg = None;
        self.need_sync = true;
    }
}
