// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! `lbr restore`.
//!
//! Statements are replayed in the order they were backed up: the database
//! and global objects, then everything tables depend on, then table data
//! through a pool of connections, then indexes, rules and triggers.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, anyhow};
use lbr_catalog::ObjectType;
use lbr_catalog::client::{CatalogError, CatalogFilter, PgCatalog};
use lbr_config::version::{check_engine_compatibility, check_tool_compatibility};
use lbr_config::{BackupConfig, EngineVersion, TOOL_VERSION};
use lbr_filter::unquote_identifier;
use lbr_toc::{DataEntry, Section, StatementWithType, Toc, TocEntry};
use tokio_postgres::Client as PgClient;
use tracing::{debug, info, trace, warn};

use crate::cli::{ConnectionArgs, FilterArgs};
use crate::context::validate_timestamp;
use crate::pool::run_pool;
use crate::{Failure, Outcome, RunContext, RunError};

pub mod data;
pub mod filter;
pub mod redirect;

use filter::RestoreFilter;

/// The database `--create-db` connects to.
const MAINTENANCE_DATABASE: &str = "postgres";

#[derive(Debug, clap::Args)]
pub struct RestoreArgs {
    /// The timestamp of the backup to restore.
    #[clap(long, value_name = "YYYYMMDDHHMMSS")]
    pub timestamp: String,
    /// The directory the backup was written to.
    #[clap(long, value_name = "DIR")]
    pub backup_dir: PathBuf,
    /// Restore into this database instead of the one backed up.
    #[clap(long, value_name = "DATABASE")]
    pub redirect_db: Option<String>,
    /// Restore every included object into this existing schema instead of
    /// the one it was backed up from.
    #[clap(long, value_name = "SCHEMA")]
    pub redirect_schema: Option<String>,
    /// Create the database before restoring into it.
    #[clap(long)]
    pub create_db: bool,
    /// Also restore roles, role memberships and database settings.
    #[clap(long)]
    pub with_globals: bool,
    /// Log failed statements and tables and carry on.
    #[clap(long)]
    pub on_error_continue: bool,
    /// The number of connections loading table data.
    #[clap(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    pub jobs: u16,
    /// Only restore table data.
    #[clap(long, conflicts_with = "metadata_only")]
    pub data_only: bool,
    /// Only restore DDL.
    #[clap(long)]
    pub metadata_only: bool,
    #[clap(flatten)]
    pub filters: FilterArgs,
    #[clap(flatten)]
    pub connection: ConnectionArgs,
}

/// What a restore replays, once the flags have been checked against the
/// backup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Plan {
    metadata: bool,
    data: bool,
}

impl Plan {
    fn new(args: &RestoreArgs, config: &BackupConfig) -> Result<Plan, RunError> {
        let invalid = |reason| Err(RunError::InvalidOptions { reason });
        if args.data_only && config.metadata_only {
            return invalid("cannot restore data from a metadata-only backup");
        }
        if args.metadata_only && config.data_only {
            return invalid("cannot restore metadata from a data-only backup");
        }
        if args.redirect_schema.is_some() && !args.filters.has_includes() {
            return invalid("--redirect-schema requires --include-schema or --include-table");
        }
        if (args.create_db || args.with_globals) && config.data_only {
            return invalid(
                "a data-only backup holds no global metadata for --create-db or --with-globals",
            );
        }
        Ok(Plan {
            metadata: !args.data_only && !config.data_only,
            data: !args.metadata_only && !config.metadata_only,
        })
    }
}

/// Renames the database in the statements that name it.
#[derive(Clone, Debug)]
struct Redirect {
    /// Quoted, as recorded in the backup.
    original: String,
    /// Quoted by the target server.
    target: String,
}

impl Redirect {
    /// Redirects `statements`. Database statements that still name the
    /// original database afterwards are not applied; each is recorded in
    /// `failures`.
    fn apply(
        &self,
        statements: Vec<StatementWithType>,
        failures: &mut Vec<Failure>,
    ) -> Vec<StatementWithType> {
        if self.original == self.target {
            return statements;
        }
        let (stale, redirected): (Vec<_>, Vec<_>) =
            redirect::substitute_redirect_database(statements, &self.original, &self.target)
                .into_iter()
                .partition(|s| {
                    ObjectType::DATABASE_SCOPED.contains(&s.object_type)
                        && redirect::mentions_database(&s.statement, &self.original)
                });
        for statement in stale {
            let failure = Failure {
                object: describe(&statement),
                error: anyhow!(
                    "refers to database {} and cannot be redirected to {}",
                    self.original,
                    self.target
                ),
            };
            warn!("Skipping {failure}");
            debug!(statement = %statement.statement, "skipped statement");
            failures.push(failure);
        }
        redirected
    }
}

/// Restores the backup `ctx.timestamp` from `ctx.backup_dir`.
pub async fn run(ctx: &RunContext, args: &RestoreArgs) -> Result<Outcome, RunError> {
    validate_timestamp(&ctx.timestamp)?;
    let filters = args.filters.clone().into_sources(false).resolve()?;
    let backup_path = ctx.backup_path();
    let config = BackupConfig::read_from_dir(&backup_path)?;
    check_tool_compatibility(&config.backup_version, TOOL_VERSION)?;
    let toc = Toc::read_from_dir(&backup_path)?;
    let plan = Plan::new(args, &config)?;

    let target = match &args.redirect_db {
        Some(name) => name.clone(),
        None => unquote_identifier(&config.database_name)?,
    };
    info!(
        timestamp = %ctx.timestamp,
        database = %target,
        backup_version = %config.backup_version,
        "starting restore"
    );

    let mut failures = Vec::new();
    if args.create_db {
        let maintenance = ctx.connection.connect(MAINTENANCE_DATABASE).await?;
        check_engine(&maintenance, &config).await?;
        let redirect = Redirect {
            original: config.database_name.clone(),
            target: quote_ident(&maintenance, &target).await?,
        };
        let statements = read_section(ctx, &toc, Section::Global, |e| {
            e.object_type == ObjectType::Database
        })?;
        for statement in redirect.apply(statements, &mut failures) {
            info!("creating database {}", redirect.target);
            maintenance
                .batch_execute(&statement.statement)
                .await
                .map_err(CatalogError::from)?;
        }
    }

    let client = ctx.connection.connect(&target).await?;
    check_engine(&client, &config).await?;
    let redirect = Redirect {
        original: config.database_name.clone(),
        target: quote_ident(&client, &target).await?,
    };
    let session_gucs = redirect.apply(
        read_section(ctx, &toc, Section::Global, |e| {
            e.object_type == ObjectType::SessionGucs
        })?,
        &mut failures,
    );
    apply_session_gucs(&client, &session_gucs).await?;

    if args.with_globals {
        let globals = redirect.apply(
            read_section(ctx, &toc, Section::Global, |e| {
                !matches!(
                    e.object_type,
                    ObjectType::Database | ObjectType::SessionGucs
                )
            })?,
            &mut failures,
        );
        info!(statements = globals.len(), "restoring global metadata");
        execute_statements(&client, &globals, args.on_error_continue, &mut failures).await?;
    }

    let catalog = PgCatalog::new(&client, CatalogFilter::default());
    let restore_filter = RestoreFilter::quote(&catalog, &filters).await?;
    let schema_redirect = match &args.redirect_schema {
        Some(schema) => Some(quote_ident(&client, schema).await?),
        None => None,
    };
    let redirect_schema = |statements: Vec<StatementWithType>| match &schema_redirect {
        Some(schema) => redirect::substitute_redirect_schema(statements, schema),
        None => statements,
    };

    if plan.metadata {
        let predata = redirect_schema(read_section(ctx, &toc, Section::Predata, |e| {
            restore_filter.matches_entry(e)
        })?);
        info!(statements = predata.len(), "restoring pre-data metadata");
        execute_statements(&client, &predata, args.on_error_continue, &mut failures).await?;
    }

    if plan.data {
        let entries: Vec<DataEntry> = toc
            .data_entries
            .iter()
            .filter(|e| restore_filter.matches_data(e))
            .cloned()
            .map(|mut entry| {
                if let Some(schema) = &schema_redirect {
                    entry.schema = schema.clone();
                }
                entry
            })
            .collect();
        let restored = restore_data(
            ctx,
            &client,
            &target,
            &session_gucs,
            entries,
            config.compressed,
            args.on_error_continue,
            &mut failures,
        )
        .await?;
        if config.with_statistics {
            analyze_tables(&client, &restored, args.on_error_continue, &mut failures).await?;
        }
    }

    if plan.metadata {
        let postdata = redirect_schema(read_section(ctx, &toc, Section::Postdata, |e| {
            restore_filter.matches_entry(e)
        })?);
        info!(statements = postdata.len(), "restoring post-data metadata");
        execute_statements(&client, &postdata, args.on_error_continue, &mut failures).await?;
    }

    Ok(Outcome::from_failures(failures))
}

/// Reads back the statements of `section` that satisfy `predicate`.
///
/// A section without entries is not opened at all, as data-only backups
/// have no statement streams.
fn read_section<P>(
    ctx: &RunContext,
    toc: &Toc,
    section: Section,
    predicate: P,
) -> Result<Vec<StatementWithType>, RunError>
where
    P: FnMut(&TocEntry) -> bool,
{
    let entries = toc.entries(section);
    if entries.is_empty() {
        return Ok(Vec::new());
    }
    let path = ctx.section_path(section);
    let file = File::open(&path).map_err(RunError::io(&path))?;
    let statements = lbr_toc::select(entries, &mut BufReader::new(file), predicate)?;
    debug!(%section, selected = statements.len(), of = entries.len(), "selected statements");
    Ok(statements)
}

async fn check_engine(client: &PgClient, config: &BackupConfig) -> Result<(), RunError> {
    let catalog = PgCatalog::new(client, CatalogFilter::default());
    let engine = EngineVersion::parse(&catalog.server_version().await?)?;
    check_engine_compatibility(&config.database_version, &engine)?;
    debug!(backup = %config.database_version, restore = %engine.version_string, "engine versions are compatible");
    Ok(())
}

async fn quote_ident(client: &PgClient, name: &str) -> Result<String, RunError> {
    let row = client
        .query_one("SELECT quote_ident($1)", &[&name])
        .await
        .map_err(CatalogError::from)?;
    Ok(row.try_get(0).map_err(CatalogError::from)?)
}

async fn apply_session_gucs(
    client: &PgClient,
    session_gucs: &[StatementWithType],
) -> Result<(), RunError> {
    for statement in session_gucs {
        client
            .batch_execute(&statement.statement)
            .await
            .map_err(CatalogError::from)?;
    }
    Ok(())
}

/// How a statement's object is named in failure reports.
fn describe(statement: &StatementWithType) -> String {
    let name = if statement.schema.is_empty() || statement.object_type == ObjectType::Schema {
        statement.name.clone()
    } else {
        format!("{}.{}", statement.schema, statement.name)
    };
    match (&statement.reference_object, statement.object_type) {
        (Some(table), ObjectType::Constraint | ObjectType::Rule | ObjectType::Trigger) => {
            format!("{} {} ON {table}", statement.object_type, statement.name)
        }
        _ => format!("{} {name}", statement.object_type),
    }
}

/// Runs `statements` in order. A failing statement ends the run unless
/// `on_error_continue` is set, in which case it is recorded in `failures`.
async fn execute_statements(
    client: &PgClient,
    statements: &[StatementWithType],
    on_error_continue: bool,
    failures: &mut Vec<Failure>,
) -> Result<(), RunError> {
    for statement in statements {
        trace!(statement = %statement.statement, "executing");
        if let Err(e) = client.batch_execute(&statement.statement).await {
            let failure = Failure {
                object: describe(statement),
                error: anyhow::Error::msg(CatalogError::from(e).to_string()),
            };
            if !on_error_continue {
                return Err(RunError::Failed(failure));
            }
            warn!("{failure}");
            failures.push(failure);
        }
    }
    Ok(())
}

/// Loads the data of `entries`, returning those that were restored.
async fn restore_data(
    ctx: &RunContext,
    client: &PgClient,
    database: &str,
    session_gucs: &[StatementWithType],
    entries: Vec<DataEntry>,
    compressed: bool,
    on_error_continue: bool,
    failures: &mut Vec<Failure>,
) -> Result<Vec<DataEntry>, RunError> {
    if entries.is_empty() {
        return Ok(entries);
    }
    let extra_workers = ctx.jobs.min(entries.len()).saturating_sub(1);
    let mut extra = Vec::with_capacity(extra_workers);
    for _ in 0..extra_workers {
        let worker = ctx.connection.connect(database).await?;
        apply_session_gucs(&worker, session_gucs).await?;
        extra.push(worker);
    }
    let workers: Vec<&PgClient> = std::iter::once(client).chain(&extra).collect();
    info!(
        tables = entries.len(),
        workers = workers.len(),
        "restoring table data"
    );

    let outcome = run_pool(
        workers,
        entries,
        on_error_continue,
        async |client: &mut &PgClient, entry: &DataEntry| {
            let path = ctx.data_path(entry.oid, compressed);
            data::copy_table_in(*client, entry, &path, compressed)
                .await
                .map(|_| ())
                .with_context(|| format!("restoring data of {}", entry.fqn()))
        },
    )
    .await;

    let mut table_failures = outcome
        .failures
        .into_iter()
        .map(|(entry, error)| Failure {
            object: format!("TABLE {}", entry.fqn()),
            error,
        });
    if !on_error_continue
        && let Some(failure) = table_failures.next()
    {
        return Err(RunError::Failed(failure));
    }
    failures.extend(table_failures);
    if !outcome.skipped.is_empty() {
        debug!(skipped = outcome.skipped.len(), "tables left unrestored");
    }
    Ok(outcome.completed)
}

/// Recomputes planner statistics for the restored tables.
async fn analyze_tables(
    client: &PgClient,
    tables: &[DataEntry],
    on_error_continue: bool,
    failures: &mut Vec<Failure>,
) -> Result<(), RunError> {
    info!(tables = tables.len(), "analyzing restored tables");
    let statements: Vec<StatementWithType> = tables
        .iter()
        .map(|entry| StatementWithType {
            schema: entry.schema.clone(),
            name: entry.name.clone(),
            object_type: ObjectType::Table,
            reference_object: None,
            statement: format!("ANALYZE {};", entry.fqn()),
        })
        .collect();
    execute_statements(client, &statements, on_error_continue, failures).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(data_only: bool, metadata_only: bool, with_globals: bool) -> RestoreArgs {
        RestoreArgs {
            timestamp: "20240102030405".into(),
            backup_dir: PathBuf::from("/backups"),
            redirect_db: None,
            redirect_schema: None,
            create_db: false,
            with_globals,
            on_error_continue: false,
            jobs: 1,
            data_only,
            metadata_only,
            filters: FilterArgs::default(),
            connection: ConnectionArgs {
                host: "localhost".into(),
                port: 5432,
                user: None,
                password: None,
            },
        }
    }

    fn statement(object_type: ObjectType, sql: &str) -> StatementWithType {
        StatementWithType {
            schema: String::new(),
            name: "foo".into(),
            object_type,
            reference_object: None,
            statement: sql.into(),
        }
    }

    #[test]
    fn plans_follow_the_backup_type() {
        let full = BackupConfig::default();
        assert_eq!(
            Plan::new(&args(false, false, false), &full).unwrap(),
            Plan {
                metadata: true,
                data: true
            }
        );
        assert_eq!(
            Plan::new(&args(true, false, false), &full).unwrap(),
            Plan {
                metadata: false,
                data: true
            }
        );

        let data_only = BackupConfig {
            data_only: true,
            ..Default::default()
        };
        assert_eq!(
            Plan::new(&args(false, false, false), &data_only).unwrap(),
            Plan {
                metadata: false,
                data: true
            }
        );
        assert!(Plan::new(&args(false, true, false), &data_only).is_err());
        assert!(Plan::new(&args(false, false, true), &data_only).is_err());

        let metadata_only = BackupConfig {
            metadata_only: true,
            ..Default::default()
        };
        assert!(Plan::new(&args(true, false, false), &metadata_only).is_err());
    }

    #[test]
    fn schema_redirect_requires_an_include() {
        let full = BackupConfig::default();
        let mut redirected = args(false, false, false);
        redirected.redirect_schema = Some("staging".into());
        let err = Plan::new(&redirected, &full).unwrap_err();
        assert!(err.to_string().contains("--redirect-schema"), "{err}");

        redirected.filters.exclude_schemas = vec!["audit".into()];
        assert!(Plan::new(&redirected, &full).is_err());

        redirected.filters.include_tables = vec!["app.orders".into()];
        assert!(Plan::new(&redirected, &full).is_ok());
    }

    #[test]
    fn redirect_keeps_owner_and_privileges() {
        let redirect = Redirect {
            original: "foo".into(),
            target: "bar2".into(),
        };
        let mut failures = Vec::new();
        let redirected = redirect.apply(
            vec![
                statement(ObjectType::Database, "CREATE DATABASE foo;"),
                statement(ObjectType::DatabaseMetadata, "ALTER DATABASE foo OWNER TO alice;"),
                statement(
                    ObjectType::DatabaseMetadata,
                    "REVOKE ALL ON DATABASE foo FROM PUBLIC;",
                ),
                statement(ObjectType::Role, "CREATE ROLE foo;"),
            ],
            &mut failures,
        );
        let statements: Vec<_> = redirected.iter().map(|s| s.statement.as_str()).collect();
        assert_eq!(
            statements,
            vec![
                "CREATE DATABASE bar2;",
                "ALTER DATABASE bar2 OWNER TO alice;",
                "REVOKE ALL ON DATABASE bar2 FROM PUBLIC;",
                "CREATE ROLE foo;",
            ]
        );
        assert!(failures.is_empty());
    }

    #[test]
    fn unredirectable_statements_are_failures() {
        let redirect = Redirect {
            original: "foo".into(),
            target: "bar2".into(),
        };
        let mut failures = Vec::new();
        let redirected = redirect.apply(
            vec![statement(
                ObjectType::DatabaseMetadata,
                "ALTER DATABASE foo OWNER TO alice;\nREVOKE ALL ON DATABASE foo FROM PUBLIC;",
            )],
            &mut failures,
        );
        assert!(redirected.is_empty());
        assert_eq!(failures.len(), 1);
        assert!(failures[0].to_string().contains("cannot be redirected to bar2"));
        assert_eq!(Outcome::from_failures(failures).exit_code(), 2);

        let same = Redirect {
            original: "foo".into(),
            target: "foo".into(),
        };
        let mut failures = Vec::new();
        let kept = same.apply(
            vec![statement(
                ObjectType::DatabaseMetadata,
                "REVOKE ALL ON DATABASE foo FROM PUBLIC;",
            )],
            &mut failures,
        );
        assert_eq!(kept.len(), 1);
        assert!(failures.is_empty());
    }

    #[test]
    fn failures_name_their_object() {
        let mut index = statement(ObjectType::Index, "CREATE INDEX ...");
        index.schema = "app".into();
        index.name = "orders_pkey".into();
        index.reference_object = Some("app.orders".into());
        assert_eq!(describe(&index), "INDEX app.orders_pkey");

        let mut trigger = index.clone();
        trigger.object_type = ObjectType::Trigger;
        trigger.name = "audit".into();
        assert_eq!(describe(&trigger), "TRIGGER audit ON app.orders");

        let mut schema = statement(ObjectType::Schema, "CREATE SCHEMA app;");
        schema.schema = "app".into();
        schema.name = "app".into();
        assert_eq!(describe(&schema), "SCHEMA app");

        assert_eq!(
            describe(&statement(ObjectType::Role, "CREATE ROLE foo;")),
            "ROLE foo"
        );
    }
}
