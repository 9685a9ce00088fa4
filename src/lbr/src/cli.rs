// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Command line arguments shared by `lbr backup` and `lbr restore`.

use std::path::PathBuf;

use lbr_filter::FilterSources;
use tokio_postgres::{Client as PgClient, NoTls};
use tracing::{debug, error};

use crate::RunError;

/// Where the database server is.
#[derive(Clone, Debug, clap::Args)]
pub struct ConnectionArgs {
    /// The database server host.
    #[clap(long, env = "PGHOST", default_value = "localhost")]
    pub host: String,
    /// The database server port.
    #[clap(long, env = "PGPORT", default_value_t = 5432)]
    pub port: u16,
    /// The role to connect as. Defaults to the operating system user.
    #[clap(long, env = "PGUSER")]
    pub user: Option<String>,
    #[clap(long, env = "PGPASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

impl ConnectionArgs {
    /// Opens a new connection to `database`, driving it on a background task.
    pub async fn connect(&self, database: &str) -> Result<PgClient, RunError> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(database)
            .application_name("lbr");
        if let Some(user) = self.user.clone().or_else(|| std::env::var("USER").ok()) {
            config.user(&user);
        }
        if let Some(password) = &self.password {
            config.password(password);
        }

        let (client, connection) =
            config
                .connect(NoTls)
                .await
                .map_err(|source| RunError::Connect {
                    database: database.to_string(),
                    source,
                })?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("connection error: {}", e);
            }
        });
        debug!(host = %self.host, port = self.port, %database, "connected");
        Ok(client)
    }
}

/// Schema and table filters, inline or as files of one name per line.
#[derive(Clone, Debug, Default, clap::Args)]
pub struct FilterArgs {
    /// Only include this schema. May be repeated.
    #[clap(long = "include-schema", value_name = "SCHEMA")]
    pub include_schemas: Vec<String>,
    #[clap(long, value_name = "FILE")]
    pub include_schema_file: Option<PathBuf>,
    /// Leave out this schema. May be repeated.
    #[clap(long = "exclude-schema", value_name = "SCHEMA")]
    pub exclude_schemas: Vec<String>,
    #[clap(long, value_name = "FILE")]
    pub exclude_schema_file: Option<PathBuf>,
    /// Only include this `schema.table`. May be repeated.
    #[clap(long = "include-table", value_name = "SCHEMA.TABLE")]
    pub include_tables: Vec<String>,
    #[clap(long, value_name = "FILE")]
    pub include_table_file: Option<PathBuf>,
    /// Leave out this `schema.table`. May be repeated.
    #[clap(long = "exclude-table", value_name = "SCHEMA.TABLE")]
    pub exclude_tables: Vec<String>,
    #[clap(long, value_name = "FILE")]
    pub exclude_table_file: Option<PathBuf>,
}

impl FilterArgs {
    /// Whether any schema or table is included, by flag or by file.
    pub fn has_includes(&self) -> bool {
        !self.include_schemas.is_empty()
            || self.include_schema_file.is_some()
            || !self.include_tables.is_empty()
            || self.include_table_file.is_some()
    }

    pub fn into_sources(self, leaf_partition_data: bool) -> FilterSources {
        FilterSources {
            include_schemas: self.include_schemas,
            include_schema_file: self.include_schema_file,
            exclude_schemas: self.exclude_schemas,
            exclude_schema_file: self.exclude_schema_file,
            include_tables: self.include_tables,
            include_table_file: self.include_table_file,
            exclude_tables: self.exclude_tables,
            exclude_table_file: self.exclude_table_file,
            leaf_partition_data,
        }
    }
}
