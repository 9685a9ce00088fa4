// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The human readable report written at the end of every backup.

use std::collections::BTreeMap;
use std::io::{self, Write};

use crate::BackupConfig;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Report {
    pub backup_type: String,
    pub database_size: String,
    pub config: BackupConfig,
}

impl Report {
    pub const FILE_NAME: &'static str = "report";

    /// Records the kind of backup in the config and derives its description,
    /// e.g. `Schema-Filtered Compressed Full Metadata-Only Backup With Statistics`.
    pub fn set_backup_type_from_flags(
        &mut self,
        data_only: bool,
        metadata_only: bool,
        no_compression: bool,
        schema_filtered: bool,
        with_statistics: bool,
    ) {
        let config = &mut self.config;
        config.schema_filtered = schema_filtered;
        config.compressed = !no_compression;
        config.data_only = data_only;
        config.metadata_only = metadata_only;
        config.with_statistics = with_statistics;

        let filter = if schema_filtered {
            "Schema-Filtered"
        } else {
            "Unfiltered"
        };
        let compression = if no_compression {
            "Uncompressed"
        } else {
            "Compressed"
        };
        let section = match (data_only, metadata_only) {
            (_, true) => " Metadata-Only",
            (true, false) => " Data-Only",
            (false, false) => "",
        };
        let statistics = if with_statistics {
            " With Statistics"
        } else {
            ""
        };
        self.backup_type = format!("{filter} {compression} Full{section} Backup{statistics}");
    }

    /// Writes the report. `error` is the message of the error that ended the
    /// backup, if any; object counts are listed in name order.
    pub fn write_report<W: Write>(
        &self,
        mut w: W,
        timestamp: &str,
        command_line: &str,
        object_counts: &BTreeMap<String, usize>,
        error: Option<&str>,
    ) -> io::Result<()> {
        let config = &self.config;
        let status = if error.is_some() { "Failure" } else { "Success" };
        let error = error
            .map(|e| format!("Backup Error: {e}\n"))
            .unwrap_or_default();
        write!(
            w,
            "Database Backup Report\n\n\
             Timestamp Key: {timestamp}\n\
             Database Version: {}\n\
             lbr Version: {}\n\n\
             Database Name: {}\n\
             Command Line: {command_line}\n\
             Backup Type: {}\n\
             Backup Status: {status}\n\
             {error}\n\
             Database Size: {}",
            config.database_version,
            config.backup_version,
            config.database_name,
            self.backup_type,
            self.database_size,
        )?;
        writeln!(w, "\nCount of Database Objects in Backup:")?;
        for (name, count) in object_counts {
            writeln!(w, "{name:<29}{count}")?;
        }
        w.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backup_type(flags: (bool, bool, bool, bool, bool)) -> (String, BackupConfig) {
        let mut report = Report::default();
        let (data_only, metadata_only, no_compression, schema_filtered, with_statistics) = flags;
        report.set_backup_type_from_flags(
            data_only,
            metadata_only,
            no_compression,
            schema_filtered,
            with_statistics,
        );
        (report.backup_type, report.config)
    }

    #[test]
    fn backup_type_strings() {
        for (flags, expected) in [
            ((false, false, false, false, false), "Unfiltered Compressed Full Backup"),
            ((true, false, true, false, false), "Unfiltered Uncompressed Full Data-Only Backup"),
            (
                (false, true, false, true, true),
                "Schema-Filtered Compressed Full Metadata-Only Backup With Statistics",
            ),
        ] {
            assert_eq!(backup_type(flags).0, expected);
        }
    }

    #[test]
    fn flags_land_in_config() {
        let (_, config) = backup_type((true, false, true, true, false));
        assert!(config.data_only);
        assert!(!config.metadata_only);
        assert!(!config.compressed);
        assert!(config.schema_filtered);
        assert!(!config.with_statistics);
    }

    #[test]
    fn report_lists_counts_in_order() {
        let report = Report {
            backup_type: "Unfiltered Compressed Full Backup".into(),
            database_size: "42 MB".into(),
            config: BackupConfig {
                backup_version: "0.1.0".into(),
                database_name: "sales".into(),
                database_version: "PostgreSQL 16.2".into(),
                ..Default::default()
            },
        };
        let counts = BTreeMap::from([("Tables".to_string(), 12), ("Functions".to_string(), 3)]);

        let mut out = Vec::new();
        report
            .write_report(&mut out, "20261019120000", "lbr backup --dbname sales", &counts, None)
            .unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("Backup Status: Success\n\nDatabase Size: 42 MB"), "{out}");
        assert!(out.ends_with(
            "Count of Database Objects in Backup:\n\
             Functions                    3\n\
             Tables                       12\n"
        ));

        let mut out = Vec::new();
        report
            .write_report(&mut out, "20261019120000", "lbr backup", &counts, Some("boom"))
            .unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("Backup Status: Failure\nBackup Error: boom\n\n"), "{out}");
    }
}
