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

use snafu::Snafu;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("IO error"), context(false))]
    Io {
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("invalid message read size ({size})"))]
    CorruptFrame {
        size: i32,
        #[snafu(implicit)]
        loc:  snafu::Location,
    },

    #[snafu(display("invalid message write size ({size}) min_msg_size={min} max_msg_size={max}"))]
    InvalidMsgSize {
        size: i64,
        min:  i32,
        max:  i32,
        #[snafu(implicit)]
        loc:  snafu::Location,
    },

    #[snafu(display("message size ({size}) surpasses disk space limit ({limit})"))]
    MsgTooLarge {
        size:  i64,
        limit: i64,
        #[snafu(implicit)]
        loc:   snafu::Location,
    },

    #[snafu(display(
        "disk space limit ({limit}) must fit at least one full data file plus metadata"
    ))]
    BudgetTooSmall {
        limit: i64,
        #[snafu(implicit)]
        loc:   snafu::Location,
    },

    #[snafu(display("metadata file corrupted: {reason}"))]
    MetadataCorrupt {
        reason: String,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("queue is closed"))]
    Closed {
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("{message}"))]
    Internal {
        message: String,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },
}
