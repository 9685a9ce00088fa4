// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, Utc};
use lbr_catalog::Oid;
use lbr_toc::Section;

use crate::RunError;
use crate::cli::ConnectionArgs;

/// The format of backup timestamps, which name backup directories.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// The current time as a backup timestamp.
pub fn new_timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Checks that `timestamp` names a point in time in [`TIMESTAMP_FORMAT`].
pub fn validate_timestamp(timestamp: &str) -> Result<(), RunError> {
    let well_formed = timestamp.len() == 14
        && timestamp.bytes().all(|b| b.is_ascii_digit())
        && NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).is_ok();
    if well_formed {
        Ok(())
    } else {
        Err(RunError::Timestamp {
            timestamp: timestamp.to_string(),
        })
    }
}

/// Everything a run needs to know about where it reads and writes.
#[derive(Clone, Debug)]
pub struct RunContext {
    pub backup_dir: PathBuf,
    /// The timestamp of the backup being taken or restored.
    pub timestamp: String,
    /// The number of parallel data connections.
    pub jobs: usize,
    pub connection: ConnectionArgs,
    /// The log file of this run, if one could be opened.
    pub log_file: Option<PathBuf>,
}

impl RunContext {
    /// The directory holding one backup.
    pub fn backup_path(&self) -> PathBuf {
        self.backup_dir.join(&self.timestamp)
    }

    pub fn section_path(&self, section: Section) -> PathBuf {
        self.backup_path().join(section.file_name())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.backup_path().join("data")
    }

    pub fn data_path(&self, oid: Oid, compressed: bool) -> PathBuf {
        data_file_name(&self.data_dir(), oid, compressed)
    }

    pub fn report_path(&self) -> PathBuf {
        self.backup_path().join(lbr_config::Report::FILE_NAME)
    }

    /// How to refer to the log file in messages.
    pub fn log_file_display(&self) -> String {
        self.log_file.as_ref().map_or_else(
            || "the log".to_string(),
            |path| path.display().to_string(),
        )
    }
}

fn data_file_name(dir: &Path, oid: Oid, compressed: bool) -> PathBuf {
    if compressed {
        dir.join(format!("{oid}.gz"))
    } else {
        dir.join(oid.to_string())
    }
}
