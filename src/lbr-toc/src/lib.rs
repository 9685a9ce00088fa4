// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The table of contents of a backup.
//!
//! A backup writes its DDL into three statement streams: global objects,
//! predata (everything that must exist before table data is loaded) and
//! postdata (indexes, rules and triggers). As each statement is written, the
//! table of contents records its object type, identity and byte range. A
//! restore then reads back any subset of statements in their original order
//! without parsing SQL.
//!
//! ```text
//! predata.sql                        toc.yaml
//! +--------------------------+       predata_entries:
//! | CREATE SCHEMA s;         | <---    - {SCHEMA, s, 0..16}
//! |                          |
//! | CREATE TABLE s.t (...);  | <---    - {TABLE, s.t, 18..41}
//! +--------------------------+
//! ```
//!
//! Table data is not a statement stream. Each table is copied into its own
//! file, and the table of contents lists the tables in the order they were
//! backed up.
//!
//! The table of contents is persisted last, after every stream is complete.
//! A backup directory without one is incomplete.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use lbr_catalog::{ObjectType, Oid};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

mod writer;

pub use writer::ByteCountWriter;

/// Bytes written between two statements. They belong to no entry.
pub const STATEMENT_SEPARATOR: &str = "\n\n";

#[derive(Debug, Error)]
pub enum TocError {
    #[error("writing {section} statement for {name}: {source}")]
    Write {
        section: Section,
        name: String,
        source: io::Error,
    },
    #[error("reading statement {name} at bytes {start}..{end}: {source}")]
    Read {
        name: String,
        start: u64,
        end: u64,
        source: io::Error,
    },
    #[error("statement {name} at bytes {start}..{end} is out of range of its stream")]
    Range { name: String, start: u64, end: u64 },
    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("{}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("{} has no table of contents; the backup is incomplete", dir.display())]
    Incomplete { dir: PathBuf },
}

/// The statement streams of a backup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Global,
    Predata,
    Postdata,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::Global, Section::Predata, Section::Postdata];

    /// The name of the file holding this stream inside a backup directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            Section::Global => "global.sql",
            Section::Predata => "predata.sql",
            Section::Postdata => "postdata.sql",
        }
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Section::Global => "global",
            Section::Predata => "predata",
            Section::Postdata => "postdata",
        })
    }
}

/// The location and identity of one statement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    /// Empty for objects that do not live in a schema.
    pub schema: String,
    /// The object name, or for objects without one (such as a role grant) a
    /// name that refers to what the statement is about.
    pub name: String,
    pub object_type: ObjectType,
    /// For objects that hang off a table, such as constraints, indexes and
    /// triggers, the quoted `schema.table` they belong to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_object: Option<String>,
    pub start_byte: u64,
    pub end_byte: u64,
}

/// One table whose data was backed up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataEntry {
    pub schema: String,
    pub name: String,
    pub oid: Oid,
    /// The parenthesized column list the data was copied with.
    pub attribute_string: String,
}

impl DataEntry {
    pub fn fqn(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// A statement read back from a stream, with the identity it was recorded
/// under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatementWithType {
    pub schema: String,
    pub name: String,
    pub object_type: ObjectType,
    pub reference_object: Option<String>,
    pub statement: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toc {
    pub global_entries: Vec<TocEntry>,
    pub predata_entries: Vec<TocEntry>,
    pub postdata_entries: Vec<TocEntry>,
    pub data_entries: Vec<DataEntry>,
}

impl Toc {
    pub const FILE_NAME: &'static str = "toc.yaml";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self, section: Section) -> &[TocEntry] {
        match section {
            Section::Global => &self.global_entries,
            Section::Predata => &self.predata_entries,
            Section::Postdata => &self.postdata_entries,
        }
    }

    fn entries_mut(&mut self, section: Section) -> &mut Vec<TocEntry> {
        match section {
            Section::Global => &mut self.global_entries,
            Section::Predata => &mut self.predata_entries,
            Section::Postdata => &mut self.postdata_entries,
        }
    }

    /// Writes `statement` to the stream of `section` and records an entry
    /// spanning exactly its bytes, followed by a separator that belongs to
    /// no entry.
    ///
    /// `writer` must be the only writer of that stream, so that its byte
    /// count is the stream offset.
    pub fn append<W: Write>(
        &mut self,
        section: Section,
        writer: &mut ByteCountWriter<W>,
        object_type: ObjectType,
        schema: &str,
        name: &str,
        statement: &str,
    ) -> Result<(), TocError> {
        self.append_entry(section, writer, object_type, schema, name, None, statement)
    }

    /// Like [`Toc::append`], for an object attached to the quoted `table`.
    pub fn append_for_table<W: Write>(
        &mut self,
        section: Section,
        writer: &mut ByteCountWriter<W>,
        object_type: ObjectType,
        schema: &str,
        name: &str,
        table: &str,
        statement: &str,
    ) -> Result<(), TocError> {
        let table = Some(table.to_string());
        self.append_entry(section, writer, object_type, schema, name, table, statement)
    }

    fn append_entry<W: Write>(
        &mut self,
        section: Section,
        writer: &mut ByteCountWriter<W>,
        object_type: ObjectType,
        schema: &str,
        name: &str,
        reference_object: Option<String>,
        statement: &str,
    ) -> Result<(), TocError> {
        let start_byte = writer.bytes_written();
        let write = |writer: &mut ByteCountWriter<W>, bytes: &str| {
            writer
                .write_all(bytes.as_bytes())
                .map_err(|source| TocError::Write {
                    section,
                    name: name.to_string(),
                    source,
                })
        };
        write(writer, statement)?;
        let end_byte = writer.bytes_written();
        write(writer, STATEMENT_SEPARATOR)?;
        self.entries_mut(section).push(TocEntry {
            schema: schema.to_string(),
            name: name.to_string(),
            object_type,
            reference_object,
            start_byte,
            end_byte,
        });
        Ok(())
    }

    pub fn add_data_entry(&mut self, entry: DataEntry) {
        self.data_entries.push(entry);
    }

    /// Persists the table of contents as `toc.yaml` in `dir`.
    ///
    /// The file is written under a temporary name and renamed into place, so
    /// a crash never leaves a truncated table of contents behind.
    pub fn write_to_dir(&self, dir: &Path) -> Result<(), TocError> {
        let path = dir.join(Self::FILE_NAME);
        let tmp = dir.join(format!("{}.tmp", Self::FILE_NAME));
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| TocError::Io { path, source }
        };

        let file = File::create(&tmp).map_err(io_err(&tmp))?;
        let mut out = BufWriter::new(file);
        serde_yaml::to_writer(&mut out, self).map_err(|source| TocError::Yaml {
            path: tmp.clone(),
            source,
        })?;
        let file = out
            .into_inner()
            .map_err(|e| TocError::Io {
                path: tmp.clone(),
                source: e.into_error(),
            })?;
        file.sync_all().map_err(io_err(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_err(&path))?;
        debug!(path = %path.display(), "wrote table of contents");
        Ok(())
    }

    /// Reads the table of contents of the backup in `dir`.
    pub fn read_from_dir(dir: &Path) -> Result<Self, TocError> {
        let path = dir.join(Self::FILE_NAME);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TocError::Incomplete {
                    dir: dir.to_path_buf(),
                });
            }
            Err(source) => return Err(TocError::Io { path, source }),
        };
        serde_yaml::from_reader(BufReader::new(file)).map_err(|source| TocError::Yaml { path, source })
    }
}

/// Reads back, in table of contents order, every statement of `entries`
/// that satisfies `predicate`.
pub fn select<R, P>(
    entries: &[TocEntry],
    reader: &mut R,
    mut predicate: P,
) -> Result<Vec<StatementWithType>, TocError>
where
    R: Read + Seek,
    P: FnMut(&TocEntry) -> bool,
{
    let mut statements = Vec::new();
    for entry in entries {
        if !predicate(entry) {
            continue;
        }
        statements.push(StatementWithType {
            schema: entry.schema.clone(),
            name: entry.name.clone(),
            object_type: entry.object_type,
            reference_object: entry.reference_object.clone(),
            statement: read_statement(entry, reader)?,
        });
    }
    Ok(statements)
}

/// Reads back the statements whose object type is one of `types`.
pub fn select_by_types<R: Read + Seek>(
    entries: &[TocEntry],
    reader: &mut R,
    types: &[ObjectType],
) -> Result<Vec<StatementWithType>, TocError> {
    select(entries, reader, |entry| types.contains(&entry.object_type))
}

/// Reads back every statement.
pub fn select_all<R: Read + Seek>(
    entries: &[TocEntry],
    reader: &mut R,
) -> Result<Vec<StatementWithType>, TocError> {
    select(entries, reader, |_| true)
}

fn read_statement<R: Read + Seek>(entry: &TocEntry, reader: &mut R) -> Result<String, TocError> {
    let range_err = || TocError::Range {
        name: entry.name.clone(),
        start: entry.start_byte,
        end: entry.end_byte,
    };
    let read_err = |source| TocError::Read {
        name: entry.name.clone(),
        start: entry.start_byte,
        end: entry.end_byte,
        source,
    };
    let len = entry
        .end_byte
        .checked_sub(entry.start_byte)
        .ok_or_else(range_err)?;
    reader
        .seek(SeekFrom::Start(entry.start_byte))
        .map_err(read_err)?;
    let mut statement = String::new();
    let n = reader
        .by_ref()
        .take(len)
        .read_to_string(&mut statement)
        .map_err(read_err)?;
    if u64::try_from(n).ok() != Some(len) {
        return Err(range_err());
    }
    Ok(statement)
}
