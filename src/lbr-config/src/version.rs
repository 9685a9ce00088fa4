// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Checks that a backup can be restored by this tool into this engine.
//!
//! Both checks are pure and run before any statement is replayed.

use std::sync::LazyLock;

use regex::Regex;
use semver::Version;
use thiserror::Error;

static VERSION_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\.\d+(\.\d+)?").expect("valid"));

#[derive(Debug, Error)]
pub enum CompatibilityError {
    #[error(
        "lbr restore {restore} cannot restore a backup taken with lbr backup {backup}; \
         please use lbr restore {backup} or later."
    )]
    ToolTooOld { backup: String, restore: String },
    #[error("Cannot restore from database version {backup} to {restore} due to catalog incompatibilities.")]
    EngineTooOld { backup: String, restore: String },
    #[error("invalid version {version:?}: {source}")]
    InvalidVersion {
        version: String,
        source: semver::Error,
    },
    #[error("no version number found in {version:?}")]
    NoVersion { version: String },
}

/// Fails if the backup was taken by a newer version of this tool than the
/// one restoring it.
pub fn check_tool_compatibility(backup: &str, restore: &str) -> Result<(), CompatibilityError> {
    let parse = |version: &str| {
        Version::parse(version).map_err(|source| CompatibilityError::InvalidVersion {
            version: version.to_string(),
            source,
        })
    };
    if parse(backup)? > parse(restore)? {
        return Err(CompatibilityError::ToolTooOld {
            backup: backup.to_string(),
            restore: restore.to_string(),
        });
    }
    Ok(())
}

/// The version of the engine a restore runs against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineVersion {
    /// As reported by `SELECT version()`.
    pub version_string: String,
    pub semver: Version,
}

impl EngineVersion {
    /// Extracts the first version number of a `version()` string. Two-part
    /// numbers, as modern engines report them, get a zero patch level.
    pub fn parse(version_string: &str) -> Result<EngineVersion, CompatibilityError> {
        let Some(captures) = VERSION_NUMBER.captures(version_string) else {
            return Err(CompatibilityError::NoVersion {
                version: version_string.to_string(),
            });
        };
        let mut number = captures[0].to_string();
        if captures.get(1).is_none() {
            number.push_str(".0");
        }
        let semver = Version::parse(&number).map_err(|source| CompatibilityError::InvalidVersion {
            version: version_string.to_string(),
            source,
        })?;
        Ok(EngineVersion {
            version_string: version_string.to_string(),
            semver,
        })
    }
}

/// Fails if the engine the backup was taken from has a newer major version
/// than `restore`.
pub fn check_engine_compatibility(
    backup: &str,
    restore: &EngineVersion,
) -> Result<(), CompatibilityError> {
    let backup_version = EngineVersion::parse(backup)?;
    if backup_version.semver.major > restore.semver.major {
        return Err(CompatibilityError::EngineTooOld {
            backup: backup.to_string(),
            restore: restore.version_string.clone(),
        });
    }
    Ok(())
}
