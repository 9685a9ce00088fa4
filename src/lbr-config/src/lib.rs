// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The configuration persisted alongside a backup.
//!
//! A [`BackupConfig`] is written once, after every other file of the backup,
//! and read once at the start of a restore. It records what kind of backup
//! was taken and by which tool and engine versions, which is all restore
//! needs to decide whether it can proceed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod report;
pub mod version;

pub use report::Report;
pub use version::{CompatibilityError, EngineVersion};

/// The version of this tool, recorded in every backup.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("{}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("{} has no backup configuration; the backup is incomplete", dir.display())]
    Missing { dir: PathBuf },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupConfig {
    pub backup_version: String,
    /// Quoted, as it appears in DDL.
    pub database_name: String,
    /// The engine's full `version()` string.
    pub database_version: String,
    pub compressed: bool,
    pub data_only: bool,
    pub schema_filtered: bool,
    pub metadata_only: bool,
    pub with_statistics: bool,
}

impl BackupConfig {
    pub const FILE_NAME: &'static str = "config.yaml";

    /// Persists the configuration into `dir`. The file appears under its
    /// final name only once it is complete.
    pub fn write_to_dir(&self, dir: &Path) -> Result<(), ConfigError> {
        let path = dir.join(Self::FILE_NAME);
        let tmp = dir.join(format!("{}.tmp", Self::FILE_NAME));
        let contents = serde_yaml::to_string(self).map_err(|source| ConfigError::Yaml {
            path: path.clone(),
            source,
        })?;
        fs::write(&tmp, contents).map_err(|source| ConfigError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "wrote backup configuration");
        Ok(())
    }

    pub fn read_from_dir(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(Self::FILE_NAME);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ConfigError::Missing {
                    dir: dir.to_path_buf(),
                });
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Yaml { path, source })
    }
}
