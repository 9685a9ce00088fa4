// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::path::Path;

use anyhow::Context;
use futures::TryStreamExt;
use itertools::Itertools;
use lbr_catalog::object::Table;
use lbr_toc::DataEntry;
use tokio_postgres::Client as PgClient;
use tracing::debug;

use crate::data_file::DataFileSink;

/// The data entry of `table`, copying every column it stores, inherited
/// ones included. Generated columns are computed again on restore.
pub fn data_entry(table: &Table) -> DataEntry {
    DataEntry {
        schema: table.schema.clone(),
        name: table.name.clone(),
        oid: table.oid,
        attribute_string: format!(
            "({})",
            table
                .definition
                .columns
                .iter()
                .filter(|c| c.generated.is_none())
                .map(|c| &c.name)
                .join(", ")
        ),
    }
}

/// Copies the rows of one table into its data file.
pub async fn copy_table_out(
    client: &PgClient,
    entry: &DataEntry,
    path: &Path,
    compressed: bool,
) -> anyhow::Result<()> {
    let statement = format!("COPY {} {} TO STDOUT", entry.fqn(), entry.attribute_string);
    debug!(%statement, path = %path.display(), "copying table out");
    let stream = client
        .copy_out(statement.as_str())
        .await
        .with_context(|| format!("starting {statement}"))?;
    futures::pin_mut!(stream);

    let sink = DataFileSink::create(path.to_owned(), compressed);
    let mut chunks = 0usize;
    while let Some(chunk) = stream.try_next().await.context("reading copy data")? {
        if !sink.write(chunk).await {
            break;
        }
        chunks += 1;
    }
    sink.finish()
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    debug!(table = %entry.fqn(), chunks, "copied table out");
    Ok(())
}

#[cfg(test)]
mod tests {
    use lbr_catalog::object::{Column, TableDefinition};

    use super::*;

    #[test]
    fn data_entries_list_stored_columns() {
        let column = |name: &str, inherited| Column {
            name: name.into(),
            type_name: "integer".into(),
            inherited,
            ..Default::default()
        };
        let table = Table {
            oid: 16401,
            schema: "public".into(),
            name: "\"Orders\"".into(),
            definition: TableDefinition {
                columns: vec![
                    column("id", true),
                    column("\"Total\"", false),
                    Column {
                        generated: Some("\"Total\" * 2".into()),
                        ..column("doubled", false)
                    },
                ],
                ..Default::default()
            },
        };
        let entry = data_entry(&table);
        assert_eq!(entry.fqn(), "public.\"Orders\"");
        assert_eq!(entry.attribute_string, "(id, \"Total\")");
        assert_eq!(entry.oid, 16401);
    }
}
