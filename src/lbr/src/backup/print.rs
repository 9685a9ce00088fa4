// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! DDL printers.
//!
//! Every printer writes one statement group per object to a statement
//! stream and records it in the table of contents. An object's owner,
//! privileges, comment and security label are part of its group, so a
//! restore that selects the object also restores its metadata.
//!
//! All names handed to the printers are already quoted.

use std::io::Write;

use itertools::Itertools;
use lbr_catalog::object::{
    Constraint, Database, DatabaseGuc, Function, Role, RoleMember, Schema, Sequence, SessionGucs,
    Table, TableAttachment, Type, TypeKind, View,
};
use lbr_catalog::{CatalogObject, MetadataMap, ObjectMetadata, ObjectType, SortableObject};
use lbr_toc::{ByteCountWriter, Section, Toc, TocError};

mod operator;
mod routine;
mod text_search;

pub use operator::{
    print_create_operator_class_statements, print_create_operator_family_statements,
    print_create_operator_statements,
};
pub use routine::{
    print_create_aggregate_statements, print_create_cast_statements,
    print_create_conversion_statements, print_create_language_statements,
};
pub use text_search::{
    print_create_text_search_configuration_statements,
    print_create_text_search_dictionary_statements, print_create_text_search_parser_statements,
    print_create_text_search_template_statements,
};

/// Settings whose value is a list, which `ALTER DATABASE ... SET` takes
/// unquoted.
const LIST_GUCS: [&str; 5] = [
    "search_path",
    "datestyle",
    "temp_tablespaces",
    "session_preload_libraries",
    "local_preload_libraries",
];

/// Quotes `s` as a string literal, the way `quote_literal` does.
pub fn quote_literal(s: &str) -> String {
    let escaped = s.replace('\'', "''");
    if escaped.contains('\\') {
        format!("E'{}'", escaped.replace('\\', "\\\\"))
    } else {
        format!("'{escaped}'")
    }
}

/// Ensures a server-printed definition ends in exactly one semicolon.
fn terminate(definition: &str) -> String {
    format!("{};", definition.trim_end().trim_end_matches(';').trim_end())
}

/// How an object is named in the statements that carry its metadata.
struct MetadataTarget<'a> {
    /// E.g. `TABLE s.t`, as used by `ALTER ... OWNER TO` and `COMMENT ON`.
    object: String,
    /// E.g. `TABLE s.t`, as used by `GRANT` and `REVOKE`.
    grant_object: String,
    metadata: &'a ObjectMetadata,
}

impl<'a> MetadataTarget<'a> {
    fn new(keyword: &str, name: &str, metadata: &'a ObjectMetadata) -> Self {
        Self::with_grant(keyword, keyword, name, metadata)
    }

    fn with_grant(keyword: &str, grant_keyword: &str, name: &str, metadata: &'a ObjectMetadata) -> Self {
        MetadataTarget {
            object: format!("{keyword} {name}"),
            grant_object: format!("{grant_keyword} {name}"),
            metadata,
        }
    }

    fn statements(&self) -> Vec<String> {
        let MetadataTarget {
            object,
            grant_object,
            metadata,
        } = self;
        let mut statements = Vec::new();
        if let Some(owner) = &metadata.owner {
            statements.push(format!("ALTER {object} OWNER TO {owner};"));
        }
        if !metadata.privileges.is_empty() {
            statements.push(format!("REVOKE ALL ON {grant_object} FROM PUBLIC;"));
            if let Some(owner) = &metadata.owner {
                statements.push(format!("REVOKE ALL ON {grant_object} FROM {owner};"));
            }
            for item in &metadata.privileges {
                let grantee = item.grantee_sql();
                let (plain, with_grant) = item.privilege_names();
                if !plain.is_empty() {
                    statements.push(format!(
                        "GRANT {} ON {grant_object} TO {grantee};",
                        plain.join(",")
                    ));
                }
                if !with_grant.is_empty() {
                    statements.push(format!(
                        "GRANT {} ON {grant_object} TO {grantee} WITH GRANT OPTION;",
                        with_grant.join(",")
                    ));
                }
            }
        }
        if let Some(comment) = &metadata.comment {
            statements.push(format!("COMMENT ON {object} IS {};", quote_literal(comment)));
        }
        if let Some(label) = &metadata.security_label {
            statements.push(format!(
                "SECURITY LABEL FOR {} ON {object} IS {};",
                label.provider,
                quote_literal(&label.label)
            ));
        }
        statements
    }
}

/// Joins a creation statement with the metadata statements that follow it.
fn with_metadata(create: String, target: &MetadataTarget<'_>) -> String {
    std::iter::once(create).chain(target.statements()).join("\n")
}

pub fn print_session_gucs<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    gucs: &SessionGucs,
) -> Result<(), TocError> {
    let statement = format!(
        "SET client_encoding = {};\nSET standard_conforming_strings = {};",
        quote_literal(&gucs.client_encoding),
        gucs.standard_conforming_strings,
    );
    toc.append(Section::Global, w, ObjectType::SessionGucs, "", "", &statement)
}

/// Prints `CREATE DATABASE` and, separately, the database's metadata, one
/// entry per statement.
///
/// The database is created with the server's default encoding and locale,
/// so that the statement can be redirected to any other name verbatim.
pub fn print_create_database_statement<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    database: &Database,
    metadata: &MetadataMap,
) -> Result<(), TocError> {
    let name = &database.name;
    toc.append(
        Section::Global,
        w,
        ObjectType::Database,
        "",
        name,
        &format!("CREATE DATABASE {name};"),
    )?;
    let target = MetadataTarget::new("DATABASE", name, metadata.get(database.oid));
    for statement in target.statements() {
        toc.append(
            Section::Global,
            w,
            ObjectType::DatabaseMetadata,
            "",
            name,
            &statement,
        )?;
    }
    Ok(())
}

pub fn print_database_gucs<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    gucs: &[DatabaseGuc],
    database: &str,
) -> Result<(), TocError> {
    for guc in gucs {
        let value = if LIST_GUCS.contains(&guc.name.to_lowercase().as_str()) {
            guc.value.clone()
        } else {
            quote_literal(&guc.value)
        };
        let statement = format!("ALTER DATABASE {database} SET {} TO {value};", guc.name);
        toc.append(Section::Global, w, ObjectType::DatabaseGuc, "", &guc.name, &statement)?;
    }
    Ok(())
}

pub fn print_create_role_statements<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    roles: &[Role],
    metadata: &MetadataMap,
) -> Result<(), TocError> {
    for role in roles {
        let flag = |set: bool, on: &'static str, off: &'static str| if set { on } else { off };
        let mut attributes = vec![
            flag(role.superuser, "SUPERUSER", "NOSUPERUSER"),
            flag(role.inherit, "INHERIT", "NOINHERIT"),
            flag(role.create_role, "CREATEROLE", "NOCREATEROLE"),
            flag(role.create_db, "CREATEDB", "NOCREATEDB"),
            flag(role.can_login, "LOGIN", "NOLOGIN"),
            flag(role.replication, "REPLICATION", "NOREPLICATION"),
        ]
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
        if role.connection_limit != -1 {
            attributes.push(format!("CONNECTION LIMIT {}", role.connection_limit));
        }
        if let Some(valid_until) = &role.valid_until {
            attributes.push(format!("VALID UNTIL {}", quote_literal(valid_until)));
        }
        let create = format!(
            "CREATE ROLE {name};\nALTER ROLE {name} WITH {};",
            attributes.join(" "),
            name = role.name,
        );
        let target = MetadataTarget::new("ROLE", &role.name, metadata.get(role.oid));
        toc.append(
            Section::Global,
            w,
            ObjectType::Role,
            "",
            &role.name,
            &with_metadata(create, &target),
        )?;
    }
    Ok(())
}

pub fn print_role_membership_statements<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    members: &[RoleMember],
) -> Result<(), TocError> {
    for member in members {
        let mut statement = format!("GRANT {} TO {}", member.role, member.member);
        if member.admin_option {
            statement.push_str(" WITH ADMIN OPTION");
        }
        if let Some(grantor) = &member.grantor {
            statement.push_str(&format!(" GRANTED BY {grantor}"));
        }
        statement.push(';');
        toc.append(Section::Global, w, ObjectType::RoleGrant, "", &member.member, &statement)?;
    }
    Ok(())
}

/// Prints `CREATE SCHEMA` for every schema but `public`, which exists in
/// every database; it only gets its metadata.
pub fn print_create_schema_statements<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    schemas: &[Schema],
    metadata: &MetadataMap,
) -> Result<(), TocError> {
    for schema in schemas {
        let target = MetadataTarget::new("SCHEMA", &schema.name, metadata.get(schema.oid));
        let statement = if schema.name == "public" {
            let statements = target.statements();
            if statements.is_empty() {
                continue;
            }
            statements.join("\n")
        } else {
            with_metadata(format!("CREATE SCHEMA {};", schema.name), &target)
        };
        toc.append(
            Section::Predata,
            w,
            ObjectType::Schema,
            &schema.name,
            &schema.name,
            &statement,
        )?;
    }
    Ok(())
}

/// Announces base types, so that their I/O functions can refer to them
/// before they are fully defined.
pub fn print_create_shell_type_statements<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    types: &[Type],
) -> Result<(), TocError> {
    for t in types.iter().filter(|t| t.needs_shell()) {
        let statement = format!("CREATE TYPE {}.{};", t.schema, t.name);
        toc.append(Section::Predata, w, ObjectType::Type, &t.schema, &t.name, &statement)?;
    }
    Ok(())
}

pub fn print_create_enum_type_statements<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    types: &[Type],
    metadata: &MetadataMap,
) -> Result<(), TocError> {
    for t in types {
        if let TypeKind::Enum { .. } = t.kind {
            let statement = type_statement(t, metadata.get(t.oid));
            toc.append(Section::Predata, w, ObjectType::Type, &t.schema, &t.name, &statement)?;
        }
    }
    Ok(())
}

pub fn print_create_sequence_statements<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    sequences: &[Sequence],
    metadata: &MetadataMap,
) -> Result<(), TocError> {
    for s in sequences {
        let fqn = format!("{}.{}", s.schema, s.name);
        let mut create = format!(
            "CREATE SEQUENCE {fqn}\n\tSTART WITH {}\n\tINCREMENT BY {}\n\tMAXVALUE {}\n\tMINVALUE {}\n\tCACHE {}",
            s.start, s.increment, s.max_value, s.min_value, s.cache,
        );
        if s.cycle {
            create.push_str("\n\tCYCLE");
        }
        create.push(';');
        let (value, is_called) = match s.last_value {
            Some(last) => (last, true),
            None => (s.start, false),
        };
        create.push_str(&format!(
            "\n\nSELECT pg_catalog.setval({}, {value}, {is_called});",
            quote_literal(&fqn)
        ));
        let target = MetadataTarget::new("SEQUENCE", &fqn, metadata.get(s.oid));
        append_sequence(toc, w, ObjectType::Sequence, s, &with_metadata(create, &target))?;
    }
    Ok(())
}

/// Records an owned sequence against its table, so that it follows the
/// table through table filters on restore.
fn append_sequence<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    object_type: ObjectType,
    s: &Sequence,
    statement: &str,
) -> Result<(), TocError> {
    match s.owning_table() {
        Some(table) => toc.append_for_table(
            Section::Predata,
            w,
            object_type,
            &s.schema,
            &s.name,
            table,
            statement,
        ),
        None => toc.append(Section::Predata, w, object_type, &s.schema, &s.name, statement),
    }
}

/// Prints functions, types and tables in the given (dependency) order.
pub fn print_dependent_object_statements<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    objects: &[SortableObject],
    metadata: &MetadataMap,
) -> Result<(), TocError> {
    for SortableObject { object, .. } in objects {
        let object_metadata = metadata.get(object.oid());
        let statement = match object {
            CatalogObject::Function(f) => function_statement(f, object_metadata),
            CatalogObject::Type(t) => type_statement(t, object_metadata),
            CatalogObject::Table(t) => table_statement(t, object_metadata),
            CatalogObject::View(v) => view_statement(v, object_metadata),
        };
        toc.append(
            Section::Predata,
            w,
            object.object_type(),
            object.schema(),
            &object.toc_name(),
            &statement,
        )?;
    }
    Ok(())
}

fn function_statement(f: &Function, metadata: &ObjectMetadata) -> String {
    let signature = format!("{}.{}({})", f.schema, f.name, f.arguments);
    let target = MetadataTarget::new("ROUTINE", &signature, metadata);
    with_metadata(terminate(&f.definition), &target)
}

fn type_statement(t: &Type, metadata: &ObjectMetadata) -> String {
    let fqn = format!("{}.{}", t.schema, t.name);
    let (create, keyword) = match &t.kind {
        TypeKind::Base(base) => {
            let mut options = vec![
                format!("INPUT = {}", base.input),
                format!("OUTPUT = {}", base.output),
            ];
            if let Some(receive) = &base.receive {
                options.push(format!("RECEIVE = {receive}"));
            }
            if let Some(send) = &base.send {
                options.push(format!("SEND = {send}"));
            }
            if base.internal_length < 0 {
                options.push("INTERNALLENGTH = VARIABLE".into());
            } else {
                options.push(format!("INTERNALLENGTH = {}", base.internal_length));
            }
            if base.passed_by_value {
                options.push("PASSEDBYVALUE".into());
            }
            let alignment = match base.alignment.as_str() {
                "c" => "char",
                "s" => "int2",
                "d" => "double",
                _ => "int4",
            };
            options.push(format!("ALIGNMENT = {alignment}"));
            let storage = match base.storage.as_str() {
                "e" => "external",
                "m" => "main",
                "x" => "extended",
                _ => "plain",
            };
            options.push(format!("STORAGE = {storage}"));
            if let Some(default) = &base.default {
                options.push(format!("DEFAULT = {}", quote_literal(default)));
            }
            if let Some(element) = &base.element {
                options.push(format!("ELEMENT = {element}"));
            }
            if base.delimiter != "," {
                options.push(format!("DELIMITER = {}", quote_literal(&base.delimiter)));
            }
            if base.category != "U" {
                options.push(format!("CATEGORY = {}", quote_literal(&base.category)));
            }
            (
                format!("CREATE TYPE {fqn} (\n\t{}\n);", options.join(",\n\t")),
                "TYPE",
            )
        }
        TypeKind::Composite { attributes } => {
            let attributes = attributes
                .iter()
                .map(|a| format!("{} {}", a.name, a.type_name))
                .join(",\n\t");
            (format!("CREATE TYPE {fqn} AS (\n\t{attributes}\n);"), "TYPE")
        }
        TypeKind::Domain(domain) => {
            let mut create = format!("CREATE DOMAIN {fqn} AS {}", domain.base_type);
            if let Some(default) = &domain.default {
                create.push_str(&format!(" DEFAULT {default}"));
            }
            if domain.not_null {
                create.push_str(" NOT NULL");
            }
            for constraint in &domain.constraints {
                create.push_str(&format!("\n\t{constraint}"));
            }
            create.push(';');
            (create, "DOMAIN")
        }
        TypeKind::Enum { labels } => (
            format!("CREATE TYPE {fqn} AS ENUM (\n\t{}\n);", labels.join(",\n\t")),
            "TYPE",
        ),
    };
    with_metadata(create, &MetadataTarget::new(keyword, &fqn, metadata))
}

fn table_statement(t: &Table, metadata: &ObjectMetadata) -> String {
    let fqn = t.fqn();
    let def = &t.definition;
    let columns = def
        .columns
        .iter()
        .filter(|c| !c.inherited)
        .map(|c| {
            let mut column = format!("{} {}", c.name, c.type_name);
            if let Some(collation) = &c.collation {
                column.push_str(&format!(" COLLATE {collation}"));
            }
            if let Some(default) = &c.default {
                column.push_str(&format!(" DEFAULT {default}"));
            }
            if let Some(expression) = &c.generated {
                column.push_str(&format!(" GENERATED ALWAYS AS ({expression}) STORED"));
            }
            if let Some(identity) = &c.identity {
                let when = if identity.always { "ALWAYS" } else { "BY DEFAULT" };
                column.push_str(&format!(" GENERATED {when} AS IDENTITY"));
            }
            if c.not_null {
                column.push_str(" NOT NULL");
            }
            column
        })
        .join(",\n\t");

    let mut create = match (&def.external, &def.partition_of) {
        (Some(external), _) => {
            let mut create = format!(
                "CREATE FOREIGN TABLE {fqn} (\n\t{columns}\n) SERVER {}",
                external.server
            );
            if let Some(options) = &external.options {
                create.push_str(&format!(" OPTIONS ({options})"));
            }
            create
        }
        (None, Some((parent, bound))) => format!("CREATE TABLE {fqn} PARTITION OF {parent}\n{bound}"),
        (None, None) => {
            let mut create = format!("CREATE TABLE {fqn} (\n\t{columns}\n)");
            if !def.inherits.is_empty() {
                create.push_str(&format!(" INHERITS ({})", def.inherits.join(", ")));
            }
            create
        }
    };
    if let Some(key) = &def.partition_key {
        create.push_str(&format!(" PARTITION BY {key}"));
    }
    if let Some(options) = &def.storage_options {
        create.push_str(&format!(" WITH ({options})"));
    }
    if let Some(tablespace) = &def.tablespace {
        create.push_str(&format!(" TABLESPACE {tablespace}"));
    }
    create.push(';');

    for c in &def.columns {
        if let Some(identity) = c.identity.as_ref().filter(|_| !c.inherited)
            && let Some(last_value) = identity.last_value
        {
            create.push_str(&format!(
                "\nSELECT pg_catalog.setval({}, {last_value}, true);",
                quote_literal(&identity.sequence)
            ));
        }
        if let Some(comment) = &c.comment {
            create.push_str(&format!(
                "\nCOMMENT ON COLUMN {fqn}.{} IS {};",
                c.name,
                quote_literal(comment)
            ));
        }
    }

    let keyword = if t.is_external() { "FOREIGN TABLE" } else { "TABLE" };
    with_metadata(
        create,
        &MetadataTarget::with_grant(keyword, "TABLE", &fqn, metadata),
    )
}

fn view_statement(v: &View, metadata: &ObjectMetadata) -> String {
    let fqn = format!("{}.{}", v.schema, v.name);
    let body = v.definition.trim().trim_end_matches(';');
    let (mut create, keyword) = if v.is_materialized {
        (
            format!("CREATE MATERIALIZED VIEW {fqn} AS {body}\nWITH NO DATA;"),
            "MATERIALIZED VIEW",
        )
    } else {
        (format!("CREATE VIEW {fqn} AS {body};"), "VIEW")
    };
    for (column, comment) in &v.column_comments {
        create.push_str(&format!(
            "\nCOMMENT ON COLUMN {fqn}.{column} IS {};",
            quote_literal(comment)
        ));
    }
    with_metadata(
        create,
        &MetadataTarget::with_grant(keyword, "TABLE", &fqn, metadata),
    )
}

/// Ties sequences to the columns that own them, once those tables exist.
pub fn print_alter_sequence_statements<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    sequences: &[Sequence],
) -> Result<(), TocError> {
    for s in sequences {
        if let Some(owner) = &s.owned_by {
            let statement = format!("ALTER SEQUENCE {}.{} OWNED BY {owner};", s.schema, s.name);
            append_sequence(toc, w, ObjectType::SequenceOwner, s, &statement)?;
        }
    }
    Ok(())
}

pub fn print_create_view_statements<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    views: &[SortableObject],
    metadata: &MetadataMap,
) -> Result<(), TocError> {
    print_dependent_object_statements(toc, w, views, metadata)
}

/// Materialized views are created empty; they are populated once the data
/// they read is restored.
pub fn print_refresh_materialized_view_statements<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    views: &[SortableObject],
) -> Result<(), TocError> {
    for SortableObject { object, .. } in views {
        if let CatalogObject::View(v) = object {
            if v.is_materialized {
                let statement = format!("REFRESH MATERIALIZED VIEW {}.{};", v.schema, v.name);
                toc.append(Section::Postdata, w, ObjectType::View, &v.schema, &v.name, &statement)?;
            }
        }
    }
    Ok(())
}

pub fn print_constraint_statements<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    constraints: &[Constraint],
    metadata: &MetadataMap,
) -> Result<(), TocError> {
    for c in constraints {
        let create = format!(
            "ALTER TABLE {} ADD CONSTRAINT {} {};",
            c.table, c.name, c.definition
        );
        let on = format!("{} ON {}", c.name, c.table);
        let target = MetadataTarget::new("CONSTRAINT", &on, metadata.get(c.oid));
        toc.append_for_table(
            Section::Predata,
            w,
            ObjectType::Constraint,
            &c.schema,
            &c.name,
            &c.table,
            &with_metadata(create, &target),
        )?;
    }
    Ok(())
}

/// The objects printed by [`print_table_attachment_statements`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachmentKind {
    Index,
    Rule,
    Trigger,
}

impl AttachmentKind {
    pub fn object_type(&self) -> ObjectType {
        match self {
            AttachmentKind::Index => ObjectType::Index,
            AttachmentKind::Rule => ObjectType::Rule,
            AttachmentKind::Trigger => ObjectType::Trigger,
        }
    }

    /// How `COMMENT ON` refers to the attachment.
    fn comment_target(&self, a: &TableAttachment) -> String {
        match self {
            AttachmentKind::Index => format!("INDEX {}.{}", a.schema, a.name),
            AttachmentKind::Rule => format!("RULE {} ON {}", a.name, a.table),
            AttachmentKind::Trigger => format!("TRIGGER {} ON {}", a.name, a.table),
        }
    }
}

/// Prints indexes, rules or triggers, whose definitions the server prints
/// in full.
pub fn print_table_attachment_statements<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    kind: AttachmentKind,
    attachments: &[TableAttachment],
    metadata: &MetadataMap,
) -> Result<(), TocError> {
    for a in attachments {
        let object = kind.comment_target(a);
        let target = MetadataTarget {
            grant_object: object.clone(),
            object,
            metadata: metadata.get(a.oid),
        };
        let statement = with_metadata(terminate(&a.definition), &target);
        toc.append_for_table(
            Section::Postdata,
            w,
            kind.object_type(),
            &a.schema,
            &a.name,
            &a.table,
            &statement,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::io::Cursor;

    use lbr_catalog::AclItem;
    use lbr_catalog::object::{Column, ConstraintKind, Identity, TableDefinition};

    use super::*;

    pub(super) fn statements(toc: &Toc, section: Section, w: ByteCountWriter<Vec<u8>>) -> Vec<String> {
        let bytes = w.into_inner().unwrap();
        lbr_toc::select_all(toc.entries(section), &mut Cursor::new(bytes))
            .unwrap()
            .into_iter()
            .map(|s| s.statement)
            .collect()
    }

    pub(super) fn owned_by(owner: &str) -> ObjectMetadata {
        ObjectMetadata {
            owner: Some(owner.into()),
            ..Default::default()
        }
    }

    #[test]
    fn literals() {
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal(r"C:\dir"), r"E'C:\\dir'");
    }

    #[test]
    fn metadata_follows_the_object() {
        let metadata = ObjectMetadata {
            owner: Some("alice".into()),
            privileges: vec![
                "bob=r*w/alice".parse::<AclItem>().unwrap(),
                "=r/alice".parse::<AclItem>().unwrap(),
            ],
            comment: Some("orders".into()),
            security_label: None,
        };
        let target = MetadataTarget::new("TABLE", "public.orders", &metadata);
        assert_eq!(
            target.statements(),
            vec![
                "ALTER TABLE public.orders OWNER TO alice;",
                "REVOKE ALL ON TABLE public.orders FROM PUBLIC;",
                "REVOKE ALL ON TABLE public.orders FROM alice;",
                "GRANT UPDATE ON TABLE public.orders TO bob;",
                "GRANT SELECT ON TABLE public.orders TO bob WITH GRANT OPTION;",
                "GRANT SELECT ON TABLE public.orders TO PUBLIC;",
                "COMMENT ON TABLE public.orders IS 'orders';",
            ]
        );
    }

    #[test]
    fn database_and_its_metadata_are_separate_entries() {
        let mut toc = Toc::new();
        let mut w = ByteCountWriter::new(Vec::new());
        let database = Database {
            oid: 16384,
            name: "shop".into(),
            encoding: "UTF8".into(),
            collate: "C".into(),
            ctype: "C".into(),
        };
        let metadata: MetadataMap = [(16384, owned_by("alice"))].into_iter().collect();
        print_create_database_statement(&mut toc, &mut w, &database, &metadata).unwrap();
        print_database_gucs(
            &mut toc,
            &mut w,
            &[
                DatabaseGuc {
                    name: "search_path".into(),
                    value: "app, public".into(),
                },
                DatabaseGuc {
                    name: "work_mem".into(),
                    value: "64MB".into(),
                },
            ],
            &database.name,
        )
        .unwrap();

        let types: Vec<_> = toc.global_entries.iter().map(|e| e.object_type).collect();
        assert_eq!(
            types,
            vec![
                ObjectType::Database,
                ObjectType::DatabaseMetadata,
                ObjectType::DatabaseGuc,
                ObjectType::DatabaseGuc
            ]
        );
        assert_eq!(
            statements(&toc, Section::Global, w),
            vec![
                "CREATE DATABASE shop;",
                "ALTER DATABASE shop OWNER TO alice;",
                "ALTER DATABASE shop SET search_path TO app, public;",
                "ALTER DATABASE shop SET work_mem TO '64MB';",
            ]
        );
    }

    #[test]
    fn database_metadata_is_one_entry_per_statement() {
        let mut toc = Toc::new();
        let mut w = ByteCountWriter::new(Vec::new());
        let database = Database {
            oid: 16384,
            name: "shop".into(),
            encoding: "UTF8".into(),
            collate: "C".into(),
            ctype: "C".into(),
        };
        let metadata: MetadataMap = [(
            16384,
            ObjectMetadata {
                owner: Some("alice".into()),
                privileges: vec!["=Tc/alice".parse::<AclItem>().unwrap()],
                comment: Some("the shop".into()),
                security_label: None,
            },
        )]
        .into_iter()
        .collect();
        print_create_database_statement(&mut toc, &mut w, &database, &metadata).unwrap();

        let entries = toc
            .global_entries
            .iter()
            .filter(|e| e.object_type == ObjectType::DatabaseMetadata)
            .count();
        let statements = statements(&toc, Section::Global, w);
        assert_eq!(entries, statements.len() - 1);
        assert_eq!(statements[1], "ALTER DATABASE shop OWNER TO alice;");
        assert_eq!(statements[2], "REVOKE ALL ON DATABASE shop FROM PUBLIC;");
        assert_eq!(statements[3], "REVOKE ALL ON DATABASE shop FROM alice;");
        assert_eq!(
            statements.last().map(String::as_str),
            Some("COMMENT ON DATABASE shop IS 'the shop';")
        );
    }

    #[test]
    fn public_schema_only_gets_metadata() {
        let mut toc = Toc::new();
        let mut w = ByteCountWriter::new(Vec::new());
        let schemas = [
            Schema {
                oid: 2200,
                name: "public".into(),
            },
            Schema {
                oid: 16400,
                name: "\"Sales\"".into(),
            },
            Schema {
                oid: 16401,
                name: "audit".into(),
            },
        ];
        let metadata: MetadataMap = [(16400, owned_by("alice"))].into_iter().collect();
        print_create_schema_statements(&mut toc, &mut w, &schemas, &metadata).unwrap();
        assert_eq!(toc.predata_entries[0].schema, "\"Sales\"");
        assert_eq!(
            statements(&toc, Section::Predata, w),
            vec![
                "CREATE SCHEMA \"Sales\";\nALTER SCHEMA \"Sales\" OWNER TO alice;",
                "CREATE SCHEMA audit;",
            ]
        );
    }

    #[test]
    fn sequences_and_their_owners() {
        let mut toc = Toc::new();
        let mut w = ByteCountWriter::new(Vec::new());
        let sequence = Sequence {
            oid: 16410,
            schema: "public".into(),
            name: "orders_id_seq".into(),
            start: 1,
            increment: 1,
            min_value: 1,
            max_value: i64::MAX,
            cache: 1,
            cycle: false,
            last_value: Some(42),
            owned_by: Some("public.orders.id".into()),
        };
        print_create_sequence_statements(&mut toc, &mut w, &[sequence.clone()], &MetadataMap::new())
            .unwrap();
        print_alter_sequence_statements(&mut toc, &mut w, &[sequence]).unwrap();
        let printed = statements(&toc, Section::Predata, w);
        assert!(printed[0].starts_with("CREATE SEQUENCE public.orders_id_seq\n\tSTART WITH 1"));
        assert!(printed[0].ends_with("SELECT pg_catalog.setval('public.orders_id_seq', 42, true);"));
        assert_eq!(
            printed[1],
            "ALTER SEQUENCE public.orders_id_seq OWNED BY public.orders.id;"
        );
        assert_eq!(toc.predata_entries[1].object_type, ObjectType::SequenceOwner);
        for entry in &toc.predata_entries {
            assert_eq!(entry.reference_object.as_deref(), Some("public.orders"));
        }
    }

    fn column(name: &str, type_name: &str) -> Column {
        Column {
            name: name.into(),
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    #[test]
    fn generated_and_identity_columns() {
        let mut toc = Toc::new();
        let mut w = ByteCountWriter::new(Vec::new());
        let table = Table {
            oid: 16425,
            schema: "public".into(),
            name: "items".into(),
            definition: TableDefinition {
                columns: vec![
                    Column {
                        not_null: true,
                        identity: Some(Identity {
                            always: true,
                            sequence: "public.items_id_seq".into(),
                            last_value: Some(7),
                        }),
                        ..column("id", "bigint")
                    },
                    Column {
                        identity: Some(Identity {
                            always: false,
                            sequence: "public.items_code_seq".into(),
                            last_value: None,
                        }),
                        ..column("code", "integer")
                    },
                    column("price", "numeric"),
                    Column {
                        generated: Some("price * 1.2".into()),
                        comment: Some("price with tax".into()),
                        ..column("gross", "numeric")
                    },
                ],
                ..Default::default()
            },
        };
        let objects = vec![SortableObject {
            object: table.into(),
            dependencies: BTreeSet::new(),
        }];
        print_dependent_object_statements(&mut toc, &mut w, &objects, &MetadataMap::new())
            .unwrap();
        assert_eq!(
            statements(&toc, Section::Predata, w),
            vec![
                "CREATE TABLE public.items (\n\
                 \tid bigint GENERATED ALWAYS AS IDENTITY NOT NULL,\n\
                 \tcode integer GENERATED BY DEFAULT AS IDENTITY,\n\
                 \tprice numeric,\n\
                 \tgross numeric GENERATED ALWAYS AS (price * 1.2) STORED\n\
                 );\n\
                 SELECT pg_catalog.setval('public.items_id_seq', 7, true);\n\
                 COMMENT ON COLUMN public.items.gross IS 'price with tax';",
            ]
        );
    }

    #[test]
    fn tables_in_dependency_order() {
        let mut toc = Toc::new();
        let mut w = ByteCountWriter::new(Vec::new());
        let parent = Table {
            oid: 16420,
            schema: "public".into(),
            name: "events".into(),
            definition: TableDefinition {
                columns: vec![
                    Column {
                        not_null: true,
                        ..column("id", "bigint")
                    },
                    column("at", "date"),
                ],
                partition_key: Some("RANGE (at)".into()),
                ..Default::default()
            },
        };
        let partition = Table {
            oid: 16421,
            schema: "public".into(),
            name: "events_2026".into(),
            definition: TableDefinition {
                columns: vec![
                    Column {
                        inherited: true,
                        ..column("id", "bigint")
                    },
                    Column {
                        inherited: true,
                        ..column("at", "date")
                    },
                ],
                partition_of: Some((
                    "public.events".into(),
                    "FOR VALUES FROM ('2026-01-01') TO ('2027-01-01')".into(),
                )),
                ..Default::default()
            },
        };
        let objects = vec![
            SortableObject {
                object: parent.into(),
                dependencies: BTreeSet::new(),
            },
            SortableObject {
                object: partition.into(),
                dependencies: [16420].into(),
            },
        ];
        let metadata: MetadataMap = [(16421, owned_by("etl"))].into_iter().collect();
        print_dependent_object_statements(&mut toc, &mut w, &objects, &metadata).unwrap();
        assert_eq!(
            statements(&toc, Section::Predata, w),
            vec![
                "CREATE TABLE public.events (\n\tid bigint NOT NULL,\n\tat date\n) PARTITION BY RANGE (at);",
                "CREATE TABLE public.events_2026 PARTITION OF public.events\n\
                 FOR VALUES FROM ('2026-01-01') TO ('2027-01-01');\n\
                 ALTER TABLE public.events_2026 OWNER TO etl;",
            ]
        );
    }

    #[test]
    fn functions_are_recorded_with_their_arguments() {
        let mut toc = Toc::new();
        let mut w = ByteCountWriter::new(Vec::new());
        let function = Function {
            oid: 16430,
            schema: "public".into(),
            name: "add".into(),
            arguments: "a integer, b integer".into(),
            definition: "CREATE OR REPLACE FUNCTION public.add(a integer, b integer)\n RETURNS integer\n LANGUAGE sql\nAS $function$ SELECT a + b $function$\n".into(),
            language: "sql".into(),
        };
        let objects = vec![SortableObject {
            object: function.into(),
            dependencies: BTreeSet::new(),
        }];
        let metadata: MetadataMap = [(16430, owned_by("alice"))].into_iter().collect();
        print_dependent_object_statements(&mut toc, &mut w, &objects, &metadata).unwrap();
        assert_eq!(toc.predata_entries[0].name, "add(a integer, b integer)");
        let printed = statements(&toc, Section::Predata, w);
        assert!(printed[0].ends_with(
            "$function$;\nALTER ROUTINE public.add(a integer, b integer) OWNER TO alice;"
        ));
    }

    #[test]
    fn attachments_record_their_table() {
        let mut toc = Toc::new();
        let mut w = ByteCountWriter::new(Vec::new());
        let constraint = Constraint {
            oid: 16440,
            schema: "public".into(),
            name: "orders_pkey".into(),
            kind: ConstraintKind::PrimaryKey,
            table: "public.orders".into(),
            definition: "PRIMARY KEY (id)".into(),
        };
        let metadata: MetadataMap = [(
            16440,
            ObjectMetadata {
                comment: Some("key".into()),
                ..Default::default()
            },
        )]
        .into_iter()
        .collect();
        print_constraint_statements(&mut toc, &mut w, &[constraint], &metadata).unwrap();
        assert_eq!(
            toc.predata_entries[0].reference_object.as_deref(),
            Some("public.orders")
        );
        assert_eq!(
            statements(&toc, Section::Predata, w),
            vec![
                "ALTER TABLE public.orders ADD CONSTRAINT orders_pkey PRIMARY KEY (id);\n\
                 COMMENT ON CONSTRAINT orders_pkey ON public.orders IS 'key';"
            ]
        );

        let mut toc = Toc::new();
        let mut w = ByteCountWriter::new(Vec::new());
        let trigger = TableAttachment {
            oid: 16450,
            schema: "public".into(),
            name: "audit".into(),
            table: "public.orders".into(),
            definition: "CREATE TRIGGER audit AFTER INSERT ON public.orders FOR EACH ROW EXECUTE FUNCTION public.log()".into(),
        };
        print_table_attachment_statements(
            &mut toc,
            &mut w,
            AttachmentKind::Trigger,
            &[trigger],
            &MetadataMap::new(),
        )
        .unwrap();
        assert_eq!(toc.postdata_entries[0].object_type, ObjectType::Trigger);
        assert!(statements(&toc, Section::Postdata, w)[0].ends_with("public.log();"));
    }

    #[test]
    fn materialized_views_are_refreshed_after_data() {
        let mut toc = Toc::new();
        let mut w = ByteCountWriter::new(Vec::new());
        let view = View {
            oid: 16460,
            schema: "public".into(),
            name: "totals".into(),
            definition: " SELECT sum(amount) AS sum\n   FROM orders;".into(),
            is_materialized: true,
            column_comments: vec![("sum".into(), "all orders".into())],
        };
        let views = vec![SortableObject {
            object: view.into(),
            dependencies: BTreeSet::new(),
        }];
        print_create_view_statements(&mut toc, &mut w, &views, &MetadataMap::new()).unwrap();
        print_refresh_materialized_view_statements(&mut toc, &mut w, &views).unwrap();
        assert_eq!(toc.predata_entries[0].object_type, ObjectType::View);
        assert_eq!(toc.postdata_entries[0].object_type, ObjectType::View);
        let bytes = w.into_inner().unwrap();
        let predata =
            lbr_toc::select_all(&toc.predata_entries, &mut Cursor::new(&bytes)).unwrap();
        assert_eq!(
            predata[0].statement,
            "CREATE MATERIALIZED VIEW public.totals AS SELECT sum(amount) AS sum\n   FROM orders\nWITH NO DATA;\n\
             COMMENT ON COLUMN public.totals.sum IS 'all orders';"
        );
    }
}
