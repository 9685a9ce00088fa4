// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Schema and table filters.
//!
//! Filters are validated in full before any connection is made: include and
//! exclude lists that contradict each other, a list given both inline and as
//! a file, and table names that are not `schema.table` are all rejected up
//! front. Partition-aware expansion of the include list happens later,
//! against the catalog, in [`partition`].

use std::fs;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use lbr_catalog::client::{CatalogError, CatalogFilter};
use thiserror::Error;

pub mod fqn;
pub mod partition;

pub use fqn::{Fqn, unquote_identifier};
pub use partition::{PartitionCatalog, expand_includes_for_partitions};

#[derive(Debug, Error)]
pub enum FilterError {
    #[error(
        "Table {name} is not correctly fully-qualified.  Please ensure that it is in the format \
         schema.table, it is quoted appropriately, and it has no preceding or trailing whitespace."
    )]
    NotFullyQualified { name: String },
    #[error(
        "Fully Qualified Names require a minimum of one dot, specifying the schema and table. \
         Cannot process: {name}"
    )]
    MissingDot { name: String },
    #[error("cannot process a Fully Qualified Name with embedded dots: {name}")]
    EmbeddedDots { name: String },
    #[error("Fully Qualified Names must specify the schema and table. Cannot process: {name}")]
    EmptyPart { name: String },
    #[error("unterminated quoted identifier in {name}")]
    UnterminatedQuote { name: String },
    #[error("the following flags may not be specified together: {}", flags.join(", "))]
    MutuallyExclusive { flags: Vec<&'static str> },
    #[error("Table(s) {} do not exist or are not user tables", names.join(", "))]
    MissingTables { names: Vec<String> },
    #[error("reading filter file {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Filters as given on the command line, before validation.
#[derive(Clone, Debug, Default)]
pub struct FilterSources {
    pub include_schemas: Vec<String>,
    pub include_schema_file: Option<PathBuf>,
    pub exclude_schemas: Vec<String>,
    pub exclude_schema_file: Option<PathBuf>,
    pub include_tables: Vec<String>,
    pub include_table_file: Option<PathBuf>,
    pub exclude_tables: Vec<String>,
    pub exclude_table_file: Option<PathBuf>,
    pub leaf_partition_data: bool,
}

/// Groups of filter flags of which at most one may be given.
const EXCLUSIVE_FLAGS: [&[&str]; 3] = [
    &[
        "include-schema",
        "include-schema-file",
        "include-table",
        "include-table-file",
    ],
    &[
        "exclude-schema",
        "exclude-schema-file",
        "include-schema",
        "include-schema-file",
    ],
    &[
        "exclude-schema",
        "exclude-schema-file",
        "include-table",
        "include-table-file",
        "exclude-table",
        "exclude-table-file",
    ],
];

impl FilterSources {
    fn flags_set(&self) -> Vec<&'static str> {
        [
            ("include-schema", !self.include_schemas.is_empty()),
            ("include-schema-file", self.include_schema_file.is_some()),
            ("exclude-schema", !self.exclude_schemas.is_empty()),
            ("exclude-schema-file", self.exclude_schema_file.is_some()),
            ("include-table", !self.include_tables.is_empty()),
            ("include-table-file", self.include_table_file.is_some()),
            ("exclude-table", !self.exclude_tables.is_empty()),
            ("exclude-table-file", self.exclude_table_file.is_some()),
        ]
        .into_iter()
        .filter_map(|(flag, set)| set.then_some(flag))
        .collect()
    }

    /// Checks that no two mutually exclusive filters are set.
    pub fn check_exclusive(&self) -> Result<(), FilterError> {
        let set = self.flags_set();
        for group in EXCLUSIVE_FLAGS {
            let conflicting: Vec<_> = group
                .iter()
                .copied()
                .filter(|flag| set.contains(flag))
                .collect();
            if conflicting.len() > 1 {
                return Err(FilterError::MutuallyExclusive { flags: conflicting });
            }
        }
        Ok(())
    }

    /// Validates the filters and reads any filter files.
    pub fn resolve(self) -> Result<Filters, FilterError> {
        self.check_exclusive()?;
        let pick = |inline: Vec<String>, file: Option<PathBuf>| match file {
            Some(path) => read_filter_file(&path),
            None => Ok(inline),
        };
        let filters = Filters {
            include_schemas: pick(self.include_schemas, self.include_schema_file)?,
            exclude_schemas: pick(self.exclude_schemas, self.exclude_schema_file)?,
            include_tables: pick(self.include_tables, self.include_table_file)?,
            exclude_tables: pick(self.exclude_tables, self.exclude_table_file)?,
            leaf_partition_data: self.leaf_partition_data,
        };
        fqn::validate_fully_qualified(&filters.include_tables)?;
        fqn::validate_fully_qualified(&filters.exclude_tables)?;
        for name in filters.include_tables.iter().chain(&filters.exclude_tables) {
            Fqn::parse(name)?;
        }
        Ok(filters)
    }
}

/// Reads one name per line, ignoring blank lines.
pub fn read_filter_file(path: &Path) -> Result<Vec<String>, FilterError> {
    let contents = fs::read_to_string(path).map_err(|source| FilterError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(contents
        .lines()
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect())
}

/// Validated filters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Filters {
    /// Unquoted schema names.
    pub include_schemas: Vec<String>,
    pub exclude_schemas: Vec<String>,
    /// `schema.table` names as the user wrote them until they are quoted.
    pub include_tables: Vec<String>,
    pub exclude_tables: Vec<String>,
    /// Whether included partitioned tables bring all of their leaf
    /// partitions along, rather than only their external ones.
    pub leaf_partition_data: bool,
}

impl Filters {
    pub fn is_schema_filtered(&self) -> bool {
        !self.include_schemas.is_empty()
    }

    pub fn is_table_filtered(&self) -> bool {
        !self.include_tables.is_empty()
    }

    /// Whether any schema or table list is given.
    pub fn is_filtered(&self) -> bool {
        !(self.include_schemas.is_empty()
            && self.exclude_schemas.is_empty()
            && self.include_tables.is_empty()
            && self.exclude_tables.is_empty())
    }

    /// Catalog filter restricted to the schema lists, as used while the
    /// table lists are still being resolved.
    pub fn schema_catalog_filter(&self) -> CatalogFilter {
        CatalogFilter::new(&self.include_schemas, &self.exclude_schemas, &[], &[])
    }

    /// Catalog filter for the given quoted table lists.
    pub fn catalog_filter(&self, include_tables: &[String], exclude_tables: &[String]) -> CatalogFilter {
        CatalogFilter::new(
            &self.include_schemas,
            &self.exclude_schemas,
            include_tables,
            exclude_tables,
        )
    }

    /// Parses every table name of `names`.
    pub fn parse_tables(names: &[String]) -> Result<Vec<Fqn>, FilterError> {
        names.iter().map(|n| Fqn::parse(n)).collect()
    }
}

/// Quotes `names` through `catalog`, dropping repeats after their first
/// occurrence.
pub async fn quote_table_names<C>(catalog: &C, names: &[String]) -> Result<Vec<String>, FilterError>
where
    C: PartitionCatalog + ?Sized,
{
    let fqns = Filters::parse_tables(names)?;
    let quoted = catalog.quote_fqns(&fqns).await?;
    Ok(quoted.into_iter().unique().collect())
}
