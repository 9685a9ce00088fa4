// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! `lbr backup`.
//!
//! All catalog reads happen in one `REPEATABLE READ` transaction that also
//! locks the tables being backed up. Table data is copied by a pool of
//! connections that import the snapshot of that transaction, so data and
//! DDL describe the same point in time.
//!
//! The configuration and the table of contents are written only once every
//! statement stream and data file is complete; the report is written
//! whatever happens.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::Context;
use lbr_catalog::client::{CatalogError, PgCatalog};
use lbr_catalog::dependency::{build_dependency_graph, build_view_graph};
use lbr_catalog::object::{Database, Table, Type, TypeKind};
use lbr_catalog::{MetadataMap, ObjectType, Oid, SortableObject, topological_sort};
use lbr_config::{Report, TOOL_VERSION};
use lbr_filter::{Filters, expand_includes_for_partitions, quote_table_names};
use lbr_toc::{ByteCountWriter, DataEntry, Section, Toc};
use tokio_postgres::Client as PgClient;
use tracing::{debug, info, warn};

use crate::cli::{ConnectionArgs, FilterArgs};
use crate::pool::run_pool;
use crate::{Failure, Outcome, RunContext, RunError};

pub mod data;
pub mod print;

use print::AttachmentKind;

#[derive(Debug, clap::Args)]
pub struct BackupArgs {
    /// The database to back up.
    #[clap(long, env = "PGDATABASE")]
    pub dbname: String,
    /// The directory backups are written to, one subdirectory per backup.
    #[clap(long, value_name = "DIR")]
    pub backup_dir: PathBuf,
    #[clap(flatten)]
    pub connection: ConnectionArgs,
    #[clap(flatten)]
    pub filters: FilterArgs,
    /// Include every leaf partition of an included partitioned table, not
    /// only its external ones.
    #[clap(long)]
    pub leaf_partition_data: bool,
    /// Only back up table data.
    #[clap(long, conflicts_with = "metadata_only")]
    pub data_only: bool,
    /// Only back up DDL.
    #[clap(long)]
    pub metadata_only: bool,
    /// Write data files uncompressed.
    #[clap(long)]
    pub no_compression: bool,
    /// Record that table statistics should be recomputed on restore.
    #[clap(long)]
    pub with_stats: bool,
    /// The number of connections copying table data.
    #[clap(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    pub jobs: u16,
}

type SectionWriter = ByteCountWriter<BufWriter<File>>;

/// Takes a backup into `ctx.backup_path()`.
pub async fn run(
    ctx: &RunContext,
    args: &BackupArgs,
    command_line: &str,
) -> Result<Outcome, RunError> {
    let filters = args
        .filters
        .clone()
        .into_sources(args.leaf_partition_data)
        .resolve()?;
    let backup_path = ctx.backup_path();
    fs::create_dir_all(&backup_path).map_err(RunError::io(&backup_path))?;

    let mut report = Report::default();
    report.set_backup_type_from_flags(
        args.data_only,
        args.metadata_only,
        args.no_compression,
        filters.is_schema_filtered(),
        args.with_stats,
    );
    let mut counts = BTreeMap::new();
    let result = backup_database(ctx, args, &filters, &mut report, &mut counts).await;

    let report_path = ctx.report_path();
    let error = result.as_ref().err().map(|e| e.to_string());
    let written = File::create(&report_path).and_then(|file| {
        let mut w = BufWriter::new(file);
        report.write_report(
            &mut w,
            &ctx.timestamp,
            command_line,
            &counts,
            error.as_deref(),
        )?;
        w.flush()
    });
    match (result, written) {
        (Ok(outcome), Ok(())) => {
            info!(path = %backup_path.display(), "backup complete");
            Ok(outcome)
        }
        (Ok(_), Err(e)) => Err(RunError::io(&report_path)(e)),
        (Err(e), written) => {
            if let Err(report_error) = written {
                warn!(path = %report_path.display(), "could not write report: {report_error}");
            }
            Err(e)
        }
    }
}

async fn backup_database(
    ctx: &RunContext,
    args: &BackupArgs,
    filters: &Filters,
    report: &mut Report,
    counts: &mut BTreeMap<String, usize>,
) -> Result<Outcome, RunError> {
    let client = ctx.connection.connect(&args.dbname).await?;
    client
        .batch_execute("BEGIN ISOLATION LEVEL REPEATABLE READ; SET search_path TO pg_catalog")
        .await
        .map_err(CatalogError::from)?;

    let catalog = PgCatalog::new(&client, filters.schema_catalog_filter());
    let database = catalog.database().await?;
    report.config.backup_version = TOOL_VERSION.to_string();
    report.config.database_version = catalog.server_version().await?;
    report.config.database_name = database.name.clone();
    report.database_size = catalog.database_size().await?;
    info!(
        timestamp = %ctx.timestamp,
        database = %database.name,
        backup_type = %report.backup_type,
        "starting backup"
    );

    let include = expand_includes_for_partitions(&catalog, filters).await?;
    let exclude = quote_table_names(&catalog, &filters.exclude_tables).await?;
    let catalog = PgCatalog::new(&client, filters.catalog_filter(&include, &exclude));
    let tables = catalog.tables().await?;
    counts.insert("Tables".into(), tables.len());
    catalog.lock_tables(&tables).await?;

    let mut toc = Toc::new();
    if !args.data_only {
        let mut global = create_section(ctx, Section::Global)?;
        let mut predata = create_section(ctx, Section::Predata)?;
        let mut postdata = create_section(ctx, Section::Postdata)?;

        info!("writing global metadata");
        backup_global(&catalog, &database, &mut toc, &mut global, counts).await?;
        info!("writing pre-data metadata");
        let views =
            backup_predata(&catalog, filters, &tables, &mut toc, &mut predata, counts).await?;
        info!("writing post-data metadata");
        backup_postdata(&catalog, &views, &mut toc, &mut postdata, counts).await?;

        for (section, writer) in [
            (Section::Global, global),
            (Section::Predata, predata),
            (Section::Postdata, postdata),
        ] {
            finish_section(ctx, section, writer)?;
        }
    }

    if !args.metadata_only {
        let data_dir = ctx.data_dir();
        fs::create_dir_all(&data_dir).map_err(RunError::io(&data_dir))?;
        let entries = data_entries(&tables, counts);
        if counts.get(EXTERNAL_TABLES_SKIPPED).is_some_and(|n| *n > 0) {
            warn!(
                "See {} for a complete list of skipped tables.",
                ctx.log_file_display()
            );
        }
        let entries =
            backup_data(ctx, &catalog, &args.dbname, entries, !args.no_compression).await?;
        for entry in entries {
            toc.add_data_entry(entry);
        }
    }

    let backup_path = ctx.backup_path();
    report.config.write_to_dir(&backup_path)?;
    toc.write_to_dir(&backup_path)?;
    client.batch_execute("COMMIT").await.map_err(CatalogError::from)?;
    Ok(Outcome::Complete)
}

fn create_section(ctx: &RunContext, section: Section) -> Result<SectionWriter, RunError> {
    let path = ctx.section_path(section);
    let file = File::create(&path).map_err(RunError::io(&path))?;
    Ok(ByteCountWriter::new(BufWriter::new(file)))
}

fn finish_section(ctx: &RunContext, section: Section, writer: SectionWriter) -> Result<(), RunError> {
    let path = ctx.section_path(section);
    let bytes = writer.bytes_written();
    let file = writer
        .into_inner()
        .and_then(|buffered| buffered.into_inner().map_err(|e| e.into_error()))
        .map_err(RunError::io(&path))?;
    file.sync_all().map_err(RunError::io(&path))?;
    debug!(%section, bytes, "finished statement stream");
    Ok(())
}

async fn backup_global(
    catalog: &PgCatalog<'_>,
    database: &Database,
    toc: &mut Toc,
    w: &mut SectionWriter,
    counts: &mut BTreeMap<String, usize>,
) -> Result<(), RunError> {
    print::print_session_gucs(toc, w, &catalog.session_gucs().await?)?;

    let database_metadata = catalog.metadata_for_object_type(ObjectType::Database).await?;
    print::print_create_database_statement(toc, w, database, &database_metadata)?;

    let gucs = catalog.database_gucs().await?;
    counts.insert("Database GUCs".into(), gucs.len());
    print::print_database_gucs(toc, w, &gucs, &database.name)?;

    let roles = catalog.roles().await?;
    counts.insert("Roles".into(), roles.len());
    let role_comments = catalog.comments_for_object_type(ObjectType::Role).await?;
    print::print_create_role_statements(toc, w, &roles, &role_comments)?;

    let members = catalog.role_members().await?;
    print::print_role_membership_statements(toc, w, &members)?;
    Ok(())
}

/// Prints everything that has to exist before table data is loaded, and
/// returns the views in the order they were printed.
async fn backup_predata(
    catalog: &PgCatalog<'_>,
    filters: &Filters,
    tables: &[Table],
    toc: &mut Toc,
    w: &mut SectionWriter,
    counts: &mut BTreeMap<String, usize>,
) -> Result<Vec<SortableObject>, RunError> {
    // A table-filtered backup holds the included tables and what hangs off
    // them, but no free-standing objects.
    let table_filtered = filters.is_table_filtered();
    let included: BTreeSet<String> = tables.iter().map(Table::fqn).collect();
    let table_schemas: BTreeSet<&str> = tables.iter().map(|t| t.schema.as_str()).collect();

    let mut schemas = catalog.schemas().await?;
    if table_filtered {
        schemas.retain(|s| table_schemas.contains(s.name.as_str()));
    }
    counts.insert("Schemas".into(), schemas.len());
    let schema_metadata = catalog.metadata_for_object_type(ObjectType::Schema).await?;
    print::print_create_schema_statements(toc, w, &schemas, &schema_metadata)?;

    let (types, mut functions) = if table_filtered {
        (Vec::new(), Vec::new())
    } else {
        (catalog.types().await?, catalog.functions().await?)
    };
    counts.insert("Types".into(), types.len());
    counts.insert("Functions".into(), functions.len());
    let function_metadata = catalog.metadata_for_object_type(ObjectType::Function).await?;

    // Languages are database-wide, so any filter leaves them out.
    let languages = if filters.is_filtered() {
        Vec::new()
    } else {
        catalog.procedural_languages().await?
    };
    counts.insert("Procedural Languages".into(), languages.len());
    let handler_oids: BTreeSet<Oid> = languages
        .iter()
        .flat_map(|l| l.functions.iter().copied())
        .collect();
    let (handlers, rest): (Vec<_>, Vec<_>) = functions
        .into_iter()
        .partition(|f| handler_oids.contains(&f.oid));
    functions = rest;
    let language_metadata = catalog
        .metadata_for_object_type(ObjectType::ProceduralLanguage)
        .await?;
    print::print_create_language_statements(
        toc,
        w,
        &languages,
        &handlers,
        &language_metadata,
        &function_metadata,
    )?;

    let type_metadata = catalog.metadata_for_object_type(ObjectType::Type).await?;
    print::print_create_shell_type_statements(toc, w, &types)?;
    print::print_create_enum_type_statements(toc, w, &types, &type_metadata)?;

    let mut sequences = catalog.sequences().await?;
    if table_filtered {
        sequences.retain(|s| s.owning_table().is_some_and(|table| included.contains(table)));
    }
    counts.insert("Sequences".into(), sequences.len());
    let sequence_metadata = catalog.metadata_for_object_type(ObjectType::Sequence).await?;
    print::print_create_sequence_statements(toc, w, &sequences, &sequence_metadata)?;

    let other_types: Vec<Type> = types
        .into_iter()
        .filter(|t| !matches!(t.kind, TypeKind::Enum { .. }))
        .collect();
    let edges = catalog.dependencies().await?;
    let objects = build_dependency_graph(functions, other_types, tables.to_vec(), &edges);
    let sorted = topological_sort(objects)?;
    debug!(objects = sorted.len(), "sorted functions, types and tables");
    let metadata = MetadataMap::merge([
        function_metadata,
        type_metadata,
        catalog.metadata_for_object_type(ObjectType::Table).await?,
    ]);
    print::print_dependent_object_statements(toc, w, &sorted, &metadata)?;
    print::print_alter_sequence_statements(toc, w, &sequences)?;

    if !table_filtered {
        backup_free_standing_objects(catalog, filters, toc, w, counts).await?;
    }

    let views = if table_filtered {
        Vec::new()
    } else {
        let views = catalog.views().await?;
        let edges = catalog.view_dependencies().await?;
        topological_sort(build_view_graph(views, &edges))?
    };
    counts.insert("Views".into(), views.len());
    let view_metadata = catalog.metadata_for_object_type(ObjectType::View).await?;
    print::print_create_view_statements(toc, w, &views, &view_metadata)?;

    let constraints = catalog.constraints().await?;
    counts.insert("Constraints".into(), constraints.len());
    let constraint_comments = catalog
        .comments_for_object_type(ObjectType::Constraint)
        .await?;
    print::print_constraint_statements(toc, w, &constraints, &constraint_comments)?;
    Ok(views)
}

/// Text search objects, conversions, operators, aggregates and casts. They
/// refer to the functions and types printed before them and may be used by
/// views printed after them.
async fn backup_free_standing_objects(
    catalog: &PgCatalog<'_>,
    filters: &Filters,
    toc: &mut Toc,
    w: &mut SectionWriter,
    counts: &mut BTreeMap<String, usize>,
) -> Result<(), RunError> {
    let parsers = catalog.text_search_parsers().await?;
    let templates = catalog.text_search_templates().await?;
    let dictionaries = catalog.text_search_dictionaries().await?;
    let configurations = catalog.text_search_configurations().await?;
    counts.insert("Text Search Parsers".into(), parsers.len());
    counts.insert("Text Search Templates".into(), templates.len());
    counts.insert("Text Search Dictionaries".into(), dictionaries.len());
    counts.insert("Text Search Configurations".into(), configurations.len());
    let metadata = catalog
        .metadata_for_object_type(ObjectType::TextSearchParser)
        .await?;
    print::print_create_text_search_parser_statements(toc, w, &parsers, &metadata)?;
    let metadata = catalog
        .metadata_for_object_type(ObjectType::TextSearchTemplate)
        .await?;
    print::print_create_text_search_template_statements(toc, w, &templates, &metadata)?;
    let metadata = catalog
        .metadata_for_object_type(ObjectType::TextSearchDictionary)
        .await?;
    print::print_create_text_search_dictionary_statements(toc, w, &dictionaries, &metadata)?;
    let metadata = catalog
        .metadata_for_object_type(ObjectType::TextSearchConfiguration)
        .await?;
    print::print_create_text_search_configuration_statements(toc, w, &configurations, &metadata)?;

    let conversions = catalog.conversions().await?;
    counts.insert("Conversions".into(), conversions.len());
    let metadata = catalog.metadata_for_object_type(ObjectType::Conversion).await?;
    print::print_create_conversion_statements(toc, w, &conversions, &metadata)?;

    let operators = catalog.operators().await?;
    counts.insert("Operators".into(), operators.len());
    let metadata = catalog.metadata_for_object_type(ObjectType::Operator).await?;
    print::print_create_operator_statements(toc, w, &operators, &metadata)?;

    let families = catalog.operator_families().await?;
    counts.insert("Operator Families".into(), families.len());
    let metadata = catalog
        .metadata_for_object_type(ObjectType::OperatorFamily)
        .await?;
    print::print_create_operator_family_statements(toc, w, &families, &metadata)?;

    let classes = catalog.operator_classes().await?;
    counts.insert("Operator Classes".into(), classes.len());
    let metadata = catalog
        .metadata_for_object_type(ObjectType::OperatorClass)
        .await?;
    print::print_create_operator_class_statements(toc, w, &classes, &metadata)?;

    let aggregates = catalog.aggregates().await?;
    counts.insert("Aggregates".into(), aggregates.len());
    let metadata = catalog.metadata_for_object_type(ObjectType::Aggregate).await?;
    print::print_create_aggregate_statements(toc, w, &aggregates, &metadata)?;

    // Casts are database-wide, like languages.
    let casts = if filters.is_filtered() {
        Vec::new()
    } else {
        catalog.casts().await?
    };
    counts.insert("Casts".into(), casts.len());
    let metadata = catalog.metadata_for_object_type(ObjectType::Cast).await?;
    print::print_create_cast_statements(toc, w, &casts, &metadata)?;
    Ok(())
}

async fn backup_postdata(
    catalog: &PgCatalog<'_>,
    views: &[SortableObject],
    toc: &mut Toc,
    w: &mut SectionWriter,
    counts: &mut BTreeMap<String, usize>,
) -> Result<(), RunError> {
    for (kind, label) in [
        (AttachmentKind::Index, "Indexes"),
        (AttachmentKind::Rule, "Rules"),
        (AttachmentKind::Trigger, "Triggers"),
    ] {
        let attachments = match kind {
            AttachmentKind::Index => catalog.indexes().await?,
            AttachmentKind::Rule => catalog.rules().await?,
            AttachmentKind::Trigger => catalog.triggers().await?,
        };
        counts.insert(label.into(), attachments.len());
        let comments = catalog.comments_for_object_type(kind.object_type()).await?;
        print::print_table_attachment_statements(toc, w, kind, &attachments, &comments)?;
    }
    print::print_refresh_materialized_view_statements(toc, w, views)?;
    Ok(())
}

/// The report line counting external tables left out of the data.
const EXTERNAL_TABLES_SKIPPED: &str = "External Tables Skipped";

/// The data entries of every table that stores rows of its own, in table
/// order.
///
/// Partitioned parents hold no rows; their partitions are copied one by
/// one. External tables are skipped and counted in `counts`.
fn data_entries(tables: &[Table], counts: &mut BTreeMap<String, usize>) -> Vec<DataEntry> {
    let mut external = 0usize;
    let mut entries = Vec::new();
    for table in tables {
        if table.is_external() {
            info!(table = %table.fqn(), "skipping data backup of external table");
            external += 1;
        } else if table.definition.partition_key.is_none() {
            entries.push(data::data_entry(table));
        }
    }
    if external > 0 {
        let s = if external > 1 { "s" } else { "" };
        warn!("Skipped data backup of {external} external table{s}.");
    }
    counts.insert(EXTERNAL_TABLES_SKIPPED.into(), external);
    entries
}

/// Copies the data of `entries` and returns them once every file is
/// written.
async fn backup_data(
    ctx: &RunContext,
    catalog: &PgCatalog<'_>,
    dbname: &str,
    entries: Vec<DataEntry>,
    compressed: bool,
) -> Result<Vec<DataEntry>, RunError> {
    if entries.is_empty() {
        return Ok(entries);
    }

    // The metadata connection is the first worker; any others import its
    // snapshot.
    let extra_workers = ctx.jobs.min(entries.len()).saturating_sub(1);
    let mut extra = Vec::with_capacity(extra_workers);
    if extra_workers > 0 {
        let snapshot = catalog.export_snapshot().await?;
        for _ in 0..extra_workers {
            let client = ctx.connection.connect(dbname).await?;
            client
                .batch_execute(&format!(
                    "BEGIN ISOLATION LEVEL REPEATABLE READ; \
                     SET TRANSACTION SNAPSHOT '{snapshot}'; \
                     SET search_path TO pg_catalog"
                ))
                .await
                .map_err(CatalogError::from)?;
            extra.push(client);
        }
    }
    let workers: Vec<&PgClient> = std::iter::once(catalog.client()).chain(&extra).collect();
    info!(
        tables = entries.len(),
        workers = workers.len(),
        "writing table data"
    );

    let outcome = run_pool(workers, entries, false, async |client: &mut &PgClient, entry: &DataEntry| {
        let path = ctx.data_path(entry.oid, compressed);
        data::copy_table_out(*client, entry, &path, compressed)
            .await
            .with_context(|| format!("backing up data of {}", entry.fqn()))
    })
    .await;
    if let Some((entry, error)) = outcome.failures.into_iter().next() {
        return Err(RunError::Failed(Failure {
            object: format!("TABLE {}", entry.fqn()),
            error,
        }));
    }
    Ok(outcome.completed)
}

#[cfg(test)]
mod tests {
    use lbr_catalog::object::{Column, ExternalTable, TableDefinition};

    use super::*;

    fn table(oid: u32, name: &str, definition: TableDefinition) -> Table {
        Table {
            oid,
            schema: "public".into(),
            name: name.into(),
            definition: TableDefinition {
                columns: vec![Column {
                    name: "id".into(),
                    type_name: "integer".into(),
                    ..Default::default()
                }],
                ..definition
            },
        }
    }

    #[test]
    fn external_tables_are_counted_for_the_report() {
        let tables = [
            table(16401, "orders", TableDefinition::default()),
            table(
                16402,
                "events",
                TableDefinition {
                    partition_key: Some("RANGE (id)".into()),
                    ..Default::default()
                },
            ),
            table(
                16403,
                "remote_orders",
                TableDefinition {
                    external: Some(ExternalTable {
                        server: "archive".into(),
                        options: None,
                    }),
                    ..Default::default()
                },
            ),
        ];
        let mut counts = BTreeMap::new();
        let entries = data_entries(&tables, &mut counts);
        let oids: Vec<_> = entries.iter().map(|e| e.oid).collect();
        assert_eq!(oids, vec![16401]);
        assert_eq!(counts.get(EXTERNAL_TABLES_SKIPPED), Some(&1));

        let mut out = Vec::new();
        Report::default()
            .write_report(&mut out, "20261019120000", "lbr backup", &counts, None)
            .unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("External Tables Skipped      1\n"), "{out}");
    }
}
