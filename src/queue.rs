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

//! Public queue handle and lifecycle management.
//!
//! [`DiskQueue`] is the entry point of the crate. Opening a queue recovers
//! the committed cursors from the metadata file and spawns the background
//! [`IOWorker`] thread that owns all mutation. The handle itself only talks
//! to that thread over channels:
//!
//! - [`put`](DiskQueue::put) blocks until the worker has appended the record
//!   (durability still follows the sync cadence),
//! - [`read_chan`](DiskQueue::read_chan) hands out a rendezvous receiver;
//!   every successful `recv` consumes exactly one message,
//! - [`depth`](DiskQueue::depth) reads the shared atomic counter,
//! - [`empty`](DiskQueue::empty), [`close`](DiskQueue::close) and
//!   [`delete`](DiskQueue::delete) are serialized control operations.
//!
//! ## Usage
//!
//! ```ignore
//! let queue = QueueBuilder::new("events", "/var/lib/myapp")
//!     .max_bytes_per_file(100 * 1024 * 1024)
//!     .build()?;
//!
//! queue.put(&b"hello"[..])?;
//!
//! let rx = queue.read_chan();
//! let msg = rx.recv()?; // receiving commits the message
//!
//! queue.close()?;
//! ```

use std::{
    fs,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
    thread::{self, JoinHandle},
};

use bytes::Bytes;
use crossbeam::channel::{Receiver, Sender, bounded};
use snafu::ensure;
use tracing::{info, warn};

use crate::{
    QueueConfig, Result,
    error::{ClosedSnafu, InternalSnafu},
    io_worker::{ExitRequest, IOWorker, WriteRequest},
    metadata::{self, QueueMetadata},
    segment,
};

/// A durable, segmented, single-consumer disk-backed queue.
///
/// All state mutation happens on a background worker thread; the handle is
/// `Send + Sync` and can be shared (e.g. in an `Arc`) between producers, a
/// consumer, and whatever drives shutdown.
pub struct DiskQueue {
    config:        Arc<QueueConfig>,
    depth:         Arc<AtomicI64>,
    write_tx:      Sender<WriteRequest>,
    read_rx:       Receiver<Bytes>,
    empty_tx:      Sender<Sender<Result<()>>>,
    exit_tx:       Sender<ExitRequest>,
    exit_flag:     AtomicBool,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DiskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskQueue")
            .field("config", &self.config)
            .field("depth", &self.depth)
            .field("exit_flag", &self.exit_flag)
            .finish_non_exhaustive()
    }
}

impl DiskQueue {
    /// Open (or create) a queue, recovering committed cursors from the
    /// metadata file and spawning the worker thread.
    pub(crate) fn open(config: QueueConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;
        let config = Arc::new(config);

        let meta_path = metadata::metadata_file_name(&config.dir, &config.name);
        let loaded = QueueMetadata::load(&meta_path, config.disk_limited())?;
        let mut state = loaded.unwrap_or_default();

        // if the last shutdown never committed its tail writes, the current
        // segment on disk is larger than the recorded position; resuming
        // mid-file would mix committed and uncommitted records, so skip to a
        // fresh segment instead
        if loaded.is_some() {
            let write_path =
                segment::segment_file_name(&config.dir, &config.name, state.write_file_num);
            let write_file_size = segment::file_size(&write_path);
            if write_file_size > state.write_pos {
                warn!(
                    name = %config.name,
                    write_pos = state.write_pos,
                    file_size = write_file_size,
                    "uncommitted bytes past the write cursor, skipping to new file"
                );
                state.write_file_num += 1;
                state.write_pos = 0;
                state.write_msg_count = 0;
            }
        }

        let bad_files = if config.disk_limited() {
            segment::scan_bad_files(&config.dir, &config.name)?
        } else {
            Vec::new()
        };

        let depth = Arc::new(AtomicI64::new(state.depth));

        let (write_tx, write_rx) = bounded(0);
        let (read_tx, read_rx) = bounded(0);
        let (empty_tx, empty_rx) = bounded(0);
        let (exit_tx, exit_rx) = bounded(0);

        let mut worker = IOWorker::new(
            config.clone(),
            state,
            bad_files,
            depth.clone(),
            write_rx,
            read_tx,
            empty_rx,
            exit_rx,
        );

        let worker_handle = thread::Builder::new()
            .name(format!("diskqueue-{}", config.name))
            .spawn(move || worker.run())?;

        info!(
            name = %config.name,
            dir = ?config.dir,
            depth = state.depth,
            read_file_num = state.read_file_num,
            write_file_num = state.write_file_num,
            "disk queue initialized"
        );

        Ok(Self {
            config,
            depth,
            write_tx,
            read_rx,
            empty_tx,
            exit_tx,
            exit_flag: AtomicBool::new(false),
            worker_handle: Mutex::new(Some(worker_handle)),
        })
    }

    /// Append a message to the queue.
    ///
    /// Returns once the worker has framed and appended the record, which
    /// also makes it count toward [`depth`](Self::depth). Durability follows
    /// the sync cadence (or [`close`](Self::close)), not this call.
    pub fn put(&self, data: impl Into<Bytes>) -> Result<()> {
        ensure!(!self.exit_flag.load(Ordering::SeqCst), ClosedSnafu);

        let (reply_tx, reply_rx) = bounded(1);
        let request = WriteRequest {
            data:  data.into(),
            reply: reply_tx,
        };
        if self.write_tx.send(request).is_err() {
            return ClosedSnafu.fail();
        }
        reply_rx.recv().unwrap_or_else(|_| ClosedSnafu.fail())
    }

    /// The channel messages are consumed from.
    ///
    /// The channel has no capacity: a message is only handed over at the
    /// moment a receiver asks for it, and that handoff is the consume
    /// commit. Receivers may be cloned across threads; each message goes to
    /// exactly one of them. After [`close`](Self::close) the channel yields
    /// no further messages.
    pub fn read_chan(&self) -> Receiver<Bytes> { self.read_rx.clone() }

    /// Number of enqueued but not-yet-consumed messages.
    pub fn depth(&self) -> i64 { self.depth.load(Ordering::Relaxed) }

    /// Discard every message: all segment files and the metadata file are
    /// deleted, and the cursors restart on a fresh segment number.
    pub fn empty(&self) -> Result<()> {
        ensure!(!self.exit_flag.load(Ordering::SeqCst), ClosedSnafu);
        info!(name = %self.config.name, "emptying");

        let (reply_tx, reply_rx) = bounded(1);
        if self.empty_tx.send(reply_tx).is_err() {
            return ClosedSnafu.fail();
        }
        reply_rx.recv().unwrap_or_else(|_| ClosedSnafu.fail())
    }

    /// Cleanly shut the queue down: flush, fsync, persist metadata, stop the
    /// worker. Idempotent; subsequent [`put`](Self::put)s fail with
    /// [`Closed`](crate::Error::Closed).
    pub fn close(&self) -> Result<()> { self.exit(true) }

    /// Shut down without the final metadata sync, for hosts that are about
    /// to discard the queue's files anyway.
    pub fn delete(&self) -> Result<()> { self.exit(false) }

    fn exit(&self, persist: bool) -> Result<()> {
        if self.exit_flag.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if persist {
            info!(name = %self.config.name, "closing");
        } else {
            info!(name = %self.config.name, "deleting");
        }

        let (reply_tx, reply_rx) = bounded(1);
        let result = match self.exit_tx.send(ExitRequest {
            persist,
            reply: reply_tx,
        }) {
            Ok(()) => reply_rx.recv().unwrap_or(Ok(())),
            // the worker already terminated on its own
            Err(_) => Ok(()),
        };

        if let Ok(mut guard) = self.worker_handle.lock()
            && let Some(handle) = guard.take()
            && handle.join().is_err()
        {
            return InternalSnafu {
                message: "io worker thread panicked".to_string(),
            }
            .fail();
        }

        result
    }
}

impl Drop for DiskQueue {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{Error, QueueBuilder};

    #[test]
    fn test_put_after_close_fails() {
        let temp_dir = TempDir::new().unwrap();
        let queue = QueueBuilder::new("q", temp_dir.path()).build().unwrap();

        queue.put(&b"before"[..]).unwrap();
        queue.close().unwrap();

        let err = queue.put(&b"after"[..]).unwrap_err();
        assert!(matches!(err, Error::Closed { .. }));
    }

    #[test]
    fn test_close_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let queue = QueueBuilder::new("q", temp_dir.path()).build().unwrap();

        queue.close().unwrap();
        queue.close().unwrap();
    }

    #[test]
    fn test_metadata_corrupt_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let meta_path = metadata::metadata_file_name(temp_dir.path(), "q");
        fs::write(&meta_path, "not a metadata file").unwrap();

        let err = QueueBuilder::new("q", temp_dir.path()).build().unwrap_err();
        assert!(matches!(err, Error::MetadataCorrupt { .. }));
    }

    #[test]
    fn test_uncommitted_tail_skips_to_new_file() {
        let temp_dir = TempDir::new().unwrap();

        // committed cursors say 8 bytes, but the segment holds 16
        let metadata = QueueMetadata {
            depth: 1,
            write_pos: 8,
            ..Default::default()
        };
        metadata
            .persist(&metadata::metadata_file_name(temp_dir.path(), "q"), false)
            .unwrap();
        fs::write(
            segment::segment_file_name(temp_dir.path(), "q", 0),
            [0u8; 16],
        )
        .unwrap();

        let queue = QueueBuilder::new("q", temp_dir.path())
            .min_msg_size(0)
            .build()
            .unwrap();
        queue.put(&b"fresh"[..]).unwrap();
        queue.close().unwrap();

        // the new record landed in segment 1, not after the stale tail
        assert!(segment::segment_file_name(temp_dir.path(), "q", 1).exists());
    }
}
