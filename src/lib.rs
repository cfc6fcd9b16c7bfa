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

//! Durable, segmented, single-consumer disk-backed message queue.
//!
//! Features:
//! - Strict FIFO delivery with exactly-once handoff (receiving a message is
//!   the consume commit)
//! - Data survives restarts; the queue resumes from the last committed
//!   read/write cursors
//! - Numbered segment files with size-based rotation
//! - Optional total disk-space budget with oldest-first eviction
//! - Corrupt segments are quarantined (`.bad` files) instead of poisoning
//!   the stream
//! - All state is owned by a single background thread; producers and the
//!   consumer talk to it over channels, so there is no per-field locking
//!
//! ## Usage
//!
//! ```ignore
//! // Create or open a queue
//! let queue = QueueBuilder::new("events", "/var/lib/myapp")
//!     .max_bytes_per_file(100 * 1024 * 1024)
//!     .sync_timeout(Duration::from_secs(2))
//!     .build()?;
//!
//! // Write messages (blocking until appended)
//! queue.put(&b"hello"[..])?;
//!
//! // Read messages; each receive consumes one
//! let rx = queue.read_chan();
//! while let Ok(msg) = rx.recv() {
//!     process(&msg);
//! }
//!
//! // Clean shutdown
//! queue.close()?;
//! ```

mod io_worker;
mod metadata;
mod queue;
mod segment;

pub mod builder;
pub mod config;
pub mod error;

pub use builder::QueueBuilder;
pub use config::QueueConfig;
pub use error::{Error, Result};
pub use queue::DiskQueue;
