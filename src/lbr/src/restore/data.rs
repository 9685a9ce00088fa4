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
use bytes::Bytes;
use futures::SinkExt;
use lbr_toc::DataEntry;
use tokio_postgres::Client as PgClient;
use tracing::debug;

use crate::data_file::DataFileSource;

/// Loads one data file into its table, with the columns it was copied out
/// with.
pub async fn copy_table_in(
    client: &PgClient,
    entry: &DataEntry,
    path: &Path,
    compressed: bool,
) -> anyhow::Result<u64> {
    let statement = format!("COPY {} {} FROM STDIN", entry.fqn(), entry.attribute_string);
    debug!(%statement, path = %path.display(), "copying table in");
    let sink = client
        .copy_in::<_, Bytes>(statement.as_str())
        .await
        .with_context(|| format!("starting {statement}"))?;
    futures::pin_mut!(sink);

    let mut source = DataFileSource::open(path.to_owned(), compressed);
    while let Some(chunk) = source.next().await {
        sink.send(chunk).await.context("sending copy data")?;
    }
    // A read error ends the file early; dropping the unfinished sink aborts
    // the COPY.
    source
        .finish()
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let rows = sink
        .as_mut()
        .finish()
        .await
        .with_context(|| format!("finishing {statement}"))?;
    debug!(table = %entry.fqn(), rows, "copied table in");
    Ok(rows)
}
