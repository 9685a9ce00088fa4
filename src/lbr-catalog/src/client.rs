// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Catalog queries against a live PostgreSQL-protocol connection.
//!
//! Every method is a read-only query. Callers are expected to issue them all
//! inside one `REPEATABLE READ` transaction so that entity lists, metadata
//! maps and dependency edges describe the same snapshot.
//!
//! Object and schema names are quoted server-side with `quote_ident`, so the
//! returned entities can be printed as DDL without further escaping.

use std::collections::BTreeMap;

use itertools::Itertools;
use thiserror::Error;
use tokio_postgres::Client as PgClient;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;
use tracing::{debug, trace};

use crate::dependency::DependencyMap;
use crate::metadata::{AclItem, AclParseError, MetadataMap, ObjectMetadata, SecurityLabel};
use crate::object::{
    BaseType, Column, Constraint, ConstraintKind, Database, DatabaseGuc, DomainType,
    ExternalTable, Function, Identity, Index, Role, RoleMember, Rule, Schema, Sequence, SessionGucs,
    Table, TableAttachment, TableDefinition, Trigger, Type, TypeAttribute, TypeKind, View,
};
use crate::{ObjectType, Oid};

mod operator;
mod routine;
mod text_search;

/// OIDs below this value belong to objects created by `initdb`.
const FIRST_NORMAL_OID: Oid = 16384;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{}", format_query_error(.0))]
    Query(#[from] tokio_postgres::Error),
    #[error("invalid privileges on {object_type} with oid {oid}: {source}")]
    Privileges {
        object_type: ObjectType,
        oid: Oid,
        source: AclParseError,
    },
    #[error("unexpected {what} {value:?} for oid {oid}")]
    Unexpected {
        what: &'static str,
        value: String,
        oid: Oid,
    },
    #[error("{object_type} has no catalog metadata")]
    NoMetadata { object_type: ObjectType },
}

fn format_query_error(error: &tokio_postgres::Error) -> String {
    if let Some(db_error) = error.as_db_error() {
        let mut parts = vec![format!("database error: {}", db_error.message())];
        if let Some(detail) = db_error.detail() {
            parts.push(format!("  Detail: {}", detail));
        }
        if let Some(hint) = db_error.hint() {
            parts.push(format!("  Hint: {}", hint));
        }
        parts.push(format!("  Code: {:?}", db_error.code()));
        parts.join("\n")
    } else {
        format!("query error: {}", error)
    }
}

/// Restricts which schemas and relations catalog queries return.
///
/// `None` means "no restriction". Relation names must already be quoted
/// `schema.table` names.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CatalogFilter {
    pub include_schemas: Option<Vec<String>>,
    pub exclude_schemas: Option<Vec<String>>,
    pub include_relations: Option<Vec<String>>,
    pub exclude_relations: Option<Vec<String>>,
}

impl CatalogFilter {
    fn non_empty(list: &[String]) -> Option<Vec<String>> {
        if list.is_empty() {
            None
        } else {
            Some(list.to_vec())
        }
    }

    pub fn new(
        include_schemas: &[String],
        exclude_schemas: &[String],
        include_relations: &[String],
        exclude_relations: &[String],
    ) -> Self {
        CatalogFilter {
            include_schemas: Self::non_empty(include_schemas),
            exclude_schemas: Self::non_empty(exclude_schemas),
            include_relations: Self::non_empty(include_relations),
            exclude_relations: Self::non_empty(exclude_relations),
        }
    }

    /// Parameters `$1` and `$2` of every query using [`schema_clause`].
    pub fn schema_params(&self) -> [&(dyn ToSql + Sync); 2] {
        [&self.include_schemas, &self.exclude_schemas]
    }

    /// Parameters `$1` to `$4` of every query using both [`schema_clause`]
    /// and [`relation_clause`].
    pub fn all_params(&self) -> [&(dyn ToSql + Sync); 4] {
        [
            &self.include_schemas,
            &self.exclude_schemas,
            &self.include_relations,
            &self.exclude_relations,
        ]
    }
}

/// Excludes system schemas and applies the schema lists bound to `$1` and
/// `$2`. `ns` is the alias of a `pg_namespace` row.
pub fn schema_clause(ns: &str) -> String {
    format!(
        "{ns}.nspname NOT LIKE 'pg\\_temp\\_%' \
         AND {ns}.nspname NOT LIKE 'pg\\_toast%' \
         AND {ns}.nspname NOT IN ('information_schema', 'pg_catalog') \
         AND ($1::text[] IS NULL OR {ns}.nspname::text = ANY($1)) \
         AND ($2::text[] IS NULL OR NOT {ns}.nspname::text = ANY($2))"
    )
}

/// Applies the relation lists bound to `$3` and `$4`. `ns` and `rel` are
/// the aliases of a `pg_namespace` and a `pg_class` row.
pub fn relation_clause(ns: &str, rel: &str) -> String {
    let fqn = format!("quote_ident({ns}.nspname) || '.' || quote_ident({rel}.relname)");
    format!(
        "($3::text[] IS NULL OR {fqn} = ANY($3)) \
         AND ($4::text[] IS NULL OR NOT {fqn} = ANY($4))"
    )
}

/// Excludes objects that belong to an extension; those are recreated by
/// `CREATE EXTENSION` rather than restored one by one.
pub fn extension_clause(oid: &str) -> String {
    format!("{oid} NOT IN (SELECT objid FROM pg_depend WHERE deptype = 'e')")
}

/// The schema-qualified name of the function with OID `oid`, or NULL when
/// `oid` is zero.
fn proc_name(oid: &str) -> String {
    format!(
        "(SELECT quote_ident(pn.nspname) || '.' || quote_ident(pp.proname) \
          FROM pg_proc pp JOIN pg_namespace pn ON pp.pronamespace = pn.oid \
          WHERE pp.oid = {oid})"
    )
}

/// The operator with OID `oid` as `OPERATOR(schema.op)`, or NULL when `oid`
/// is zero.
fn operator_name(oid: &str) -> String {
    format!(
        "(SELECT 'OPERATOR(' || quote_ident(opn.nspname) || '.' || op.oprname || ')' \
          FROM pg_operator op JOIN pg_namespace opn ON op.oprnamespace = opn.oid \
          WHERE op.oid = {oid})"
    )
}

/// Catalog queries scoped by a [`CatalogFilter`].
pub struct PgCatalog<'a> {
    client: &'a PgClient,
    filter: CatalogFilter,
}

impl<'a> PgCatalog<'a> {
    pub fn new(client: &'a PgClient, filter: CatalogFilter) -> Self {
        Self { client, filter }
    }

    pub fn client(&self) -> &'a PgClient {
        self.client
    }

    pub fn filter(&self) -> &CatalogFilter {
        &self.filter
    }

    pub async fn server_version(&self) -> Result<String, CatalogError> {
        let row = self.client.query_one("SELECT version()", &[]).await?;
        Ok(row.try_get(0)?)
    }

    pub async fn database_size(&self) -> Result<String, CatalogError> {
        let row = self
            .client
            .query_one(
                "SELECT pg_size_pretty(pg_database_size(current_database()))",
                &[],
            )
            .await?;
        Ok(row.try_get(0)?)
    }

    /// Quotes each name with the server's `quote_ident`, preserving order.
    pub async fn quote_idents(&self, names: &[String]) -> Result<Vec<String>, CatalogError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .client
            .query(
                "SELECT quote_ident(u.name) \
                 FROM unnest($1::text[]) WITH ORDINALITY AS u(name, ord) \
                 ORDER BY u.ord",
                &[&names],
            )
            .await?;
        rows.iter()
            .map(|row| row.try_get(0).map_err(CatalogError::from))
            .collect()
    }

    /// Takes `ACCESS SHARE` locks on `tables` for the rest of the current
    /// transaction, so they cannot be dropped or altered while their
    /// definitions and data are read.
    pub async fn lock_tables(&self, tables: &[Table]) -> Result<(), CatalogError> {
        // Keep individual statements to a reasonable size on large catalogs.
        for chunk in &tables.iter().chunks(100) {
            let names = chunk.map(|t| t.fqn()).join(", ");
            let statement = format!("LOCK TABLE {names} IN ACCESS SHARE MODE");
            trace!(%statement, "locking tables");
            self.client.batch_execute(&statement).await?;
        }
        debug!(tables = tables.len(), "locked tables");
        Ok(())
    }

    /// Exports the snapshot of the current transaction, so that other
    /// connections can read exactly the same data.
    pub async fn export_snapshot(&self) -> Result<String, CatalogError> {
        let row = self
            .client
            .query_one("SELECT pg_export_snapshot()", &[])
            .await?;
        Ok(row.try_get(0)?)
    }

    pub async fn session_gucs(&self) -> Result<SessionGucs, CatalogError> {
        let row = self
            .client
            .query_one(
                "SELECT current_setting('client_encoding'), \
                        current_setting('standard_conforming_strings')",
                &[],
            )
            .await?;
        Ok(SessionGucs {
            client_encoding: row.try_get(0)?,
            standard_conforming_strings: row.try_get(1)?,
        })
    }

    pub async fn database(&self) -> Result<Database, CatalogError> {
        let row = self
            .client
            .query_one(
                "SELECT d.oid, quote_ident(d.datname) AS name, \
                        pg_encoding_to_char(d.encoding)::text AS encoding, \
                        d.datcollate::text AS collate, d.datctype::text AS ctype \
                 FROM pg_database d \
                 WHERE d.datname = current_database()",
                &[],
            )
            .await?;
        Ok(Database {
            oid: row.try_get("oid")?,
            name: row.try_get("name")?,
            encoding: row.try_get("encoding")?,
            collate: row.try_get("collate")?,
            ctype: row.try_get("ctype")?,
        })
    }

    pub async fn database_gucs(&self) -> Result<Vec<DatabaseGuc>, CatalogError> {
        let rows = self
            .client
            .query(
                "SELECT unnest(s.setconfig) \
                 FROM pg_db_role_setting s \
                 JOIN pg_database d ON s.setdatabase = d.oid \
                 WHERE d.datname = current_database() AND s.setrole = 0",
                &[],
            )
            .await?;
        let mut gucs = Vec::with_capacity(rows.len());
        for row in rows {
            let setting: String = row.try_get(0)?;
            match DatabaseGuc::parse(&setting) {
                Some(guc) => gucs.push(guc),
                None => debug!(%setting, "ignoring malformed database setting"),
            }
        }
        Ok(gucs)
    }

    pub async fn roles(&self) -> Result<Vec<Role>, CatalogError> {
        let rows = self
            .client
            .query(
                "SELECT r.oid, quote_ident(r.rolname) AS name, r.rolsuper, r.rolinherit, \
                        r.rolcreaterole, r.rolcreatedb, r.rolcanlogin, r.rolreplication, \
                        r.rolconnlimit, r.rolvaliduntil::text AS valid_until \
                 FROM pg_roles r \
                 WHERE r.rolname !~ '^pg_' \
                 ORDER BY r.oid",
                &[],
            )
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Role {
                    oid: row.try_get("oid")?,
                    name: row.try_get("name")?,
                    superuser: row.try_get("rolsuper")?,
                    inherit: row.try_get("rolinherit")?,
                    create_role: row.try_get("rolcreaterole")?,
                    create_db: row.try_get("rolcreatedb")?,
                    can_login: row.try_get("rolcanlogin")?,
                    replication: row.try_get("rolreplication")?,
                    connection_limit: row.try_get("rolconnlimit")?,
                    valid_until: row.try_get("valid_until")?,
                })
            })
            .collect()
    }

    pub async fn role_members(&self) -> Result<Vec<RoleMember>, CatalogError> {
        let rows = self
            .client
            .query(
                "SELECT quote_ident(r.rolname) AS role, quote_ident(m.rolname) AS member, \
                        quote_ident(g.rolname) AS grantor, a.admin_option \
                 FROM pg_auth_members a \
                 JOIN pg_roles r ON a.roleid = r.oid \
                 JOIN pg_roles m ON a.member = m.oid \
                 LEFT JOIN pg_roles g ON a.grantor = g.oid \
                 WHERE r.rolname !~ '^pg_' \
                 ORDER BY r.rolname, m.rolname",
                &[],
            )
            .await?;
        rows.iter()
            .map(|row| {
                Ok(RoleMember {
                    role: row.try_get("role")?,
                    member: row.try_get("member")?,
                    grantor: row.try_get("grantor")?,
                    admin_option: row.try_get("admin_option")?,
                })
            })
            .collect()
    }

    pub async fn schemas(&self) -> Result<Vec<Schema>, CatalogError> {
        let query = format!(
            "SELECT n.oid, quote_ident(n.nspname) AS name \
             FROM pg_namespace n \
             WHERE {} AND {} \
             ORDER BY n.nspname",
            schema_clause("n"),
            extension_clause("n.oid"),
        );
        let rows = self
            .client
            .query(&query, &self.filter.schema_params())
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Schema {
                    oid: row.try_get("oid")?,
                    name: row.try_get("name")?,
                })
            })
            .collect()
    }

    /// User-defined base, composite, domain and enum types. Array types and
    /// the row types of tables are implied by their element or relation and
    /// are not returned.
    pub async fn types(&self) -> Result<Vec<Type>, CatalogError> {
        let query = format!(
            "SELECT t.oid, quote_ident(n.nspname) AS schema, quote_ident(t.typname) AS name, \
                    t.typtype::text AS kind, \
                    t.typinput::text AS input, t.typoutput::text AS output, \
                    CASE WHEN t.typreceive = 0 THEN NULL ELSE t.typreceive::text END AS receive, \
                    CASE WHEN t.typsend = 0 THEN NULL ELSE t.typsend::text END AS send, \
                    t.typlen AS internal_length, t.typbyval AS passed_by_value, \
                    t.typalign::text AS alignment, t.typstorage::text AS storage, \
                    t.typdefault AS default_value, \
                    CASE WHEN t.typelem = 0 THEN NULL ELSE format_type(t.typelem, NULL) END AS element, \
                    t.typdelim::text AS delimiter, t.typcategory::text AS category, \
                    CASE WHEN t.typtype = 'd' THEN format_type(t.typbasetype, t.typtypmod) END AS base_type, \
                    t.typnotnull AS not_null \
             FROM pg_type t \
             JOIN pg_namespace n ON t.typnamespace = n.oid \
             LEFT JOIN pg_class c ON t.typrelid = c.oid \
             WHERE {} \
               AND t.typtype IN ('b', 'c', 'd', 'e') \
               AND (t.typtype <> 'c' OR c.relkind = 'c') \
               AND NOT EXISTS (SELECT 1 FROM pg_type a WHERE a.typarray = t.oid) \
               AND {} \
             ORDER BY t.oid",
            schema_clause("n"),
            extension_clause("t.oid"),
        );
        let rows = self
            .client
            .query(&query, &self.filter.schema_params())
            .await?;

        let mut labels = self.enum_labels().await?;
        let mut attributes = self.composite_attributes().await?;
        let mut constraints = self.domain_constraints().await?;

        let mut types = Vec::with_capacity(rows.len());
        for row in rows {
            let oid: Oid = row.try_get("oid")?;
            let kind: String = row.try_get("kind")?;
            let kind = match kind.as_str() {
                "b" => TypeKind::Base(BaseType {
                    input: row.try_get("input")?,
                    output: row.try_get("output")?,
                    receive: row.try_get("receive")?,
                    send: row.try_get("send")?,
                    internal_length: row.try_get("internal_length")?,
                    passed_by_value: row.try_get("passed_by_value")?,
                    alignment: row.try_get("alignment")?,
                    storage: row.try_get("storage")?,
                    default: row.try_get("default_value")?,
                    element: row.try_get("element")?,
                    delimiter: row.try_get("delimiter")?,
                    category: row.try_get("category")?,
                }),
                "c" => TypeKind::Composite {
                    attributes: attributes.remove(&oid).unwrap_or_default(),
                },
                "d" => TypeKind::Domain(DomainType {
                    base_type: row.try_get("base_type")?,
                    default: row.try_get("default_value")?,
                    not_null: row.try_get("not_null")?,
                    constraints: constraints.remove(&oid).unwrap_or_default(),
                }),
                "e" => TypeKind::Enum {
                    labels: labels.remove(&oid).unwrap_or_default(),
                },
                _ => {
                    return Err(CatalogError::Unexpected {
                        what: "type kind",
                        value: kind,
                        oid,
                    });
                }
            };
            types.push(Type {
                oid,
                schema: row.try_get("schema")?,
                name: row.try_get("name")?,
                kind,
            });
        }
        Ok(types)
    }

    /// Enum labels, already quoted as string literals, in sort order.
    async fn enum_labels(&self) -> Result<BTreeMap<Oid, Vec<String>>, CatalogError> {
        let rows = self
            .client
            .query(
                "SELECT e.enumtypid, quote_literal(e.enumlabel) \
                 FROM pg_enum e \
                 ORDER BY e.enumtypid, e.enumsortorder",
                &[],
            )
            .await?;
        group_rows(&rows, |row| Ok((row.try_get(0)?, row.try_get(1)?)))
    }

    async fn composite_attributes(
        &self,
    ) -> Result<BTreeMap<Oid, Vec<TypeAttribute>>, CatalogError> {
        let rows = self
            .client
            .query(
                "SELECT t.oid, quote_ident(a.attname), format_type(a.atttypid, a.atttypmod) \
                 FROM pg_type t \
                 JOIN pg_attribute a ON a.attrelid = t.typrelid \
                 WHERE t.typtype = 'c' AND a.attnum > 0 AND NOT a.attisdropped \
                 ORDER BY t.oid, a.attnum",
                &[],
            )
            .await?;
        group_rows(&rows, |row| {
            Ok((
                row.try_get(0)?,
                TypeAttribute {
                    name: row.try_get(1)?,
                    type_name: row.try_get(2)?,
                },
            ))
        })
    }

    async fn domain_constraints(&self) -> Result<BTreeMap<Oid, Vec<String>>, CatalogError> {
        let rows = self
            .client
            .query(
                "SELECT con.contypid, \
                        'CONSTRAINT ' || quote_ident(con.conname) || ' ' || pg_get_constraintdef(con.oid) \
                 FROM pg_constraint con \
                 WHERE con.contypid <> 0 \
                 ORDER BY con.contypid, con.conname",
                &[],
            )
            .await?;
        group_rows(&rows, |row| Ok((row.try_get(0)?, row.try_get(1)?)))
    }

    pub async fn functions(&self) -> Result<Vec<Function>, CatalogError> {
        let query = format!(
            "SELECT p.oid, quote_ident(n.nspname) AS schema, quote_ident(p.proname) AS name, \
                    pg_get_function_identity_arguments(p.oid) AS arguments, \
                    pg_get_functiondef(p.oid) AS definition, \
                    l.lanname::text AS language \
             FROM pg_proc p \
             JOIN pg_namespace n ON p.pronamespace = n.oid \
             JOIN pg_language l ON p.prolang = l.oid \
             WHERE {} AND p.prokind IN ('f', 'p') AND {} \
             ORDER BY p.oid",
            schema_clause("n"),
            extension_clause("p.oid"),
        );
        let rows = self
            .client
            .query(&query, &self.filter.schema_params())
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Function {
                    oid: row.try_get("oid")?,
                    schema: row.try_get("schema")?,
                    name: row.try_get("name")?,
                    arguments: row.try_get("arguments")?,
                    definition: row.try_get("definition")?,
                    language: row.try_get("language")?,
                })
            })
            .collect()
    }

    /// Ordinary, partitioned and foreign tables, with their definitions.
    pub async fn tables(&self) -> Result<Vec<Table>, CatalogError> {
        let parent = "SELECT quote_ident(pn.nspname) || '.' || quote_ident(pc.relname) \
                      FROM pg_inherits i \
                      JOIN pg_class pc ON i.inhparent = pc.oid \
                      JOIN pg_namespace pn ON pc.relnamespace = pn.oid \
                      WHERE i.inhrelid = c.oid";
        let query = format!(
            "SELECT c.oid, quote_ident(n.nspname) AS schema, quote_ident(c.relname) AS name, \
                    array_to_string(c.reloptions, ', ') AS storage_options, \
                    CASE WHEN c.relkind = 'p' THEN pg_get_partkeydef(c.oid) END AS partition_key, \
                    CASE WHEN c.relispartition THEN pg_get_expr(c.relpartbound, c.oid) END AS partition_bound, \
                    CASE WHEN c.relispartition THEN ({parent}) END AS partition_parent, \
                    ARRAY({parent} AND NOT c.relispartition ORDER BY i.inhseqno) AS inherits, \
                    quote_ident(ts.spcname) AS tablespace, \
                    quote_ident(fs.srvname) AS foreign_server, \
                    (SELECT string_agg(quote_ident(split_part(o, '=', 1)) || ' ' \
                                       || quote_literal(substr(o, strpos(o, '=') + 1)), ', ') \
                     FROM unnest(ft.ftoptions) AS o) AS foreign_options \
             FROM pg_class c \
             JOIN pg_namespace n ON c.relnamespace = n.oid \
             LEFT JOIN pg_tablespace ts ON c.reltablespace = ts.oid \
             LEFT JOIN pg_foreign_table ft ON ft.ftrelid = c.oid \
             LEFT JOIN pg_foreign_server fs ON ft.ftserver = fs.oid \
             WHERE {} AND {} AND c.relkind IN ('r', 'p', 'f') AND {} \
             ORDER BY c.oid",
            schema_clause("n"),
            relation_clause("n", "c"),
            extension_clause("c.oid"),
        );
        let rows = self.client.query(&query, &self.filter.all_params()).await?;
        let oids: Vec<Oid> = rows
            .iter()
            .map(|row| row.try_get("oid"))
            .collect::<Result<_, _>>()?;
        let mut columns = self.columns(&oids).await?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            let oid: Oid = row.try_get("oid")?;
            let partition_parent: Option<String> = row.try_get("partition_parent")?;
            let partition_bound: Option<String> = row.try_get("partition_bound")?;
            let external = row
                .try_get::<_, Option<String>>("foreign_server")?
                .map(|server| {
                    Ok::<_, CatalogError>(ExternalTable {
                        server,
                        options: row.try_get("foreign_options")?,
                    })
                })
                .transpose()?;
            tables.push(Table {
                oid,
                schema: row.try_get("schema")?,
                name: row.try_get("name")?,
                definition: TableDefinition {
                    columns: columns.remove(&oid).unwrap_or_default(),
                    storage_options: row
                        .try_get::<_, Option<String>>("storage_options")?
                        .filter(|o| !o.is_empty()),
                    partition_key: row.try_get("partition_key")?,
                    partition_of: partition_parent.zip(partition_bound),
                    inherits: row.try_get("inherits")?,
                    tablespace: row.try_get("tablespace")?,
                    external,
                },
            });
        }
        Ok(tables)
    }

    async fn columns(&self, tables: &[Oid]) -> Result<BTreeMap<Oid, Vec<Column>>, CatalogError> {
        let rows = self
            .client
            .query(
                "SELECT a.attrelid, quote_ident(a.attname) AS name, \
                        format_type(a.atttypid, a.atttypmod) AS type_name, \
                        a.attnotnull AS not_null, \
                        CASE WHEN a.attgenerated = '' THEN pg_get_expr(d.adbin, d.adrelid) \
                        END AS default_value, \
                        CASE WHEN a.attgenerated = 's' THEN pg_get_expr(d.adbin, d.adrelid) \
                        END AS generated, \
                        NULLIF(a.attidentity::text, '') AS identity, \
                        s.seq AS identity_sequence, \
                        CASE WHEN s.seq IS NOT NULL \
                             THEN pg_sequence_last_value(s.seq::regclass) \
                        END AS identity_last_value, \
                        CASE WHEN a.attcollation <> t.typcollation \
                             THEN quote_ident(cn.nspname) || '.' || quote_ident(co.collname) \
                        END AS collation, \
                        col_description(a.attrelid, a.attnum) AS comment, \
                        NOT a.attislocal AS inherited \
                 FROM pg_attribute a \
                 JOIN pg_type t ON a.atttypid = t.oid \
                 LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum \
                 LEFT JOIN pg_collation co ON a.attcollation = co.oid \
                 LEFT JOIN pg_namespace cn ON co.collnamespace = cn.oid \
                 LEFT JOIN LATERAL ( \
                   SELECT pg_get_serial_sequence(a.attrelid::regclass::text, a.attname) AS seq \
                   WHERE a.attidentity <> '' \
                 ) s ON true \
                 WHERE a.attrelid = ANY($1) AND a.attnum > 0 AND NOT a.attisdropped \
                 ORDER BY a.attrelid, a.attnum",
                &[&tables],
            )
            .await?;
        group_rows(&rows, |row| {
            let oid: Oid = row.try_get("attrelid")?;
            let identity = match row.try_get::<_, Option<String>>("identity")? {
                None => None,
                Some(kind) => {
                    let always = match kind.as_str() {
                        "a" => true,
                        "d" => false,
                        _ => {
                            return Err(CatalogError::Unexpected {
                                what: "identity kind",
                                value: kind,
                                oid,
                            });
                        }
                    };
                    let sequence = row.try_get::<_, Option<String>>("identity_sequence")?;
                    let sequence = sequence.ok_or(CatalogError::Unexpected {
                        what: "identity sequence",
                        value: "NULL".into(),
                        oid,
                    })?;
                    Some(Identity {
                        always,
                        sequence,
                        last_value: row.try_get("identity_last_value")?,
                    })
                }
            };
            Ok((
                oid,
                Column {
                    name: row.try_get("name")?,
                    type_name: row.try_get("type_name")?,
                    not_null: row.try_get("not_null")?,
                    default: row.try_get("default_value")?,
                    generated: row.try_get("generated")?,
                    identity,
                    collation: row.try_get("collation")?,
                    comment: row.try_get("comment")?,
                    inherited: row.try_get("inherited")?,
                },
            ))
        })
    }

    pub async fn views(&self) -> Result<Vec<View>, CatalogError> {
        let query = format!(
            "SELECT c.oid, quote_ident(n.nspname) AS schema, quote_ident(c.relname) AS name, \
                    pg_get_viewdef(c.oid) AS definition, c.relkind = 'm' AS is_materialized, \
                    ARRAY(SELECT quote_ident(a.attname) FROM pg_attribute a \
                          WHERE a.attrelid = c.oid AND col_description(c.oid, a.attnum) IS NOT NULL \
                          ORDER BY a.attnum) AS commented_columns, \
                    ARRAY(SELECT col_description(c.oid, a.attnum) FROM pg_attribute a \
                          WHERE a.attrelid = c.oid AND col_description(c.oid, a.attnum) IS NOT NULL \
                          ORDER BY a.attnum) AS column_comments \
             FROM pg_class c \
             JOIN pg_namespace n ON c.relnamespace = n.oid \
             WHERE {} AND c.relkind IN ('v', 'm') AND {} \
             ORDER BY c.oid",
            schema_clause("n"),
            extension_clause("c.oid"),
        );
        let rows = self
            .client
            .query(&query, &self.filter.schema_params())
            .await?;
        rows.iter()
            .map(|row| {
                let columns: Vec<String> = row.try_get("commented_columns")?;
                let comments: Vec<String> = row.try_get("column_comments")?;
                Ok(View {
                    oid: row.try_get("oid")?,
                    schema: row.try_get("schema")?,
                    name: row.try_get("name")?,
                    definition: row.try_get("definition")?,
                    is_materialized: row.try_get("is_materialized")?,
                    column_comments: columns.into_iter().zip(comments).collect(),
                })
            })
            .collect()
    }

    pub async fn sequences(&self) -> Result<Vec<Sequence>, CatalogError> {
        let query = format!(
            "SELECT c.oid, quote_ident(n.nspname) AS schema, quote_ident(c.relname) AS name, \
                    s.seqstart, s.seqincrement, s.seqmin, s.seqmax, s.seqcache, s.seqcycle, \
                    pg_sequence_last_value(c.oid) AS last_value, \
                    (SELECT quote_ident(tn.nspname) || '.' || quote_ident(t.relname) \
                            || '.' || quote_ident(a.attname) \
                     FROM pg_depend d \
                     JOIN pg_class t ON d.refobjid = t.oid \
                     JOIN pg_namespace tn ON t.relnamespace = tn.oid \
                     JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = d.refobjsubid \
                     WHERE d.classid = 'pg_class'::regclass \
                       AND d.refclassid = 'pg_class'::regclass \
                       AND d.objid = c.oid AND d.deptype = 'a') AS owned_by \
             FROM pg_class c \
             JOIN pg_sequence s ON s.seqrelid = c.oid \
             JOIN pg_namespace n ON c.relnamespace = n.oid \
             WHERE {} AND c.relkind = 'S' AND {} \
               AND NOT EXISTS (SELECT 1 FROM pg_depend d WHERE d.objid = c.oid AND d.deptype = 'i') \
             ORDER BY c.oid",
            schema_clause("n"),
            extension_clause("c.oid"),
        );
        let rows = self
            .client
            .query(&query, &self.filter.schema_params())
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Sequence {
                    oid: row.try_get("oid")?,
                    schema: row.try_get("schema")?,
                    name: row.try_get("name")?,
                    start: row.try_get("seqstart")?,
                    increment: row.try_get("seqincrement")?,
                    min_value: row.try_get("seqmin")?,
                    max_value: row.try_get("seqmax")?,
                    cache: row.try_get("seqcache")?,
                    cycle: row.try_get("seqcycle")?,
                    last_value: row.try_get("last_value")?,
                    owned_by: row.try_get("owned_by")?,
                })
            })
            .collect()
    }

    /// Table constraints declared on the table itself. Foreign keys come
    /// last so that the keys they reference exist when they are restored.
    pub async fn constraints(&self) -> Result<Vec<Constraint>, CatalogError> {
        let query = format!(
            "SELECT con.oid, quote_ident(n.nspname) AS schema, quote_ident(con.conname) AS name, \
                    con.contype::text AS kind, \
                    quote_ident(n.nspname) || '.' || quote_ident(c.relname) AS table_name, \
                    pg_get_constraintdef(con.oid, true) AS definition \
             FROM pg_constraint con \
             JOIN pg_class c ON con.conrelid = c.oid \
             JOIN pg_namespace n ON c.relnamespace = n.oid \
             WHERE {} AND {} AND {} \
               AND con.conislocal AND con.contype IN ('c', 'f', 'p', 'u', 'x') \
             ORDER BY con.contype = 'f', con.oid",
            schema_clause("n"),
            relation_clause("n", "c"),
            extension_clause("c.oid"),
        );
        let rows = self.client.query(&query, &self.filter.all_params()).await?;
        rows.iter()
            .map(|row| {
                let oid = row.try_get("oid")?;
                let kind: String = row.try_get("kind")?;
                let kind = ConstraintKind::from_catalog(&kind).ok_or(CatalogError::Unexpected {
                    what: "constraint kind",
                    value: kind,
                    oid,
                })?;
                Ok(Constraint {
                    oid,
                    schema: row.try_get("schema")?,
                    name: row.try_get("name")?,
                    kind,
                    table: row.try_get("table_name")?,
                    definition: row.try_get("definition")?,
                })
            })
            .collect()
    }

    /// Indexes that are not implied by a constraint or by a partitioned
    /// parent's index.
    pub async fn indexes(&self) -> Result<Vec<Index>, CatalogError> {
        let query = format!(
            "SELECT i.indexrelid AS oid, quote_ident(n.nspname) AS schema, \
                    quote_ident(ic.relname) AS name, \
                    quote_ident(n.nspname) || '.' || quote_ident(c.relname) AS table_name, \
                    pg_get_indexdef(i.indexrelid) AS definition \
             FROM pg_index i \
             JOIN pg_class ic ON i.indexrelid = ic.oid \
             JOIN pg_class c ON i.indrelid = c.oid \
             JOIN pg_namespace n ON c.relnamespace = n.oid \
             WHERE {} AND {} AND {} \
               AND c.relkind IN ('r', 'p', 'm') \
               AND NOT EXISTS (SELECT 1 FROM pg_constraint con \
                               WHERE con.conindid = i.indexrelid AND con.contype IN ('p', 'u', 'x')) \
               AND NOT EXISTS (SELECT 1 FROM pg_inherits inh WHERE inh.inhrelid = i.indexrelid) \
             ORDER BY i.indexrelid",
            schema_clause("n"),
            relation_clause("n", "c"),
            extension_clause("i.indexrelid"),
        );
        self.attachments(&query).await
    }

    pub async fn rules(&self) -> Result<Vec<Rule>, CatalogError> {
        let query = format!(
            "SELECT r.oid, quote_ident(n.nspname) AS schema, quote_ident(r.rulename) AS name, \
                    quote_ident(n.nspname) || '.' || quote_ident(c.relname) AS table_name, \
                    pg_get_ruledef(r.oid) AS definition \
             FROM pg_rewrite r \
             JOIN pg_class c ON r.ev_class = c.oid \
             JOIN pg_namespace n ON c.relnamespace = n.oid \
             WHERE {} AND {} AND {} AND r.rulename <> '_RETURN' \
             ORDER BY r.oid",
            schema_clause("n"),
            relation_clause("n", "c"),
            extension_clause("c.oid"),
        );
        self.attachments(&query).await
    }

    pub async fn triggers(&self) -> Result<Vec<Trigger>, CatalogError> {
        let query = format!(
            "SELECT tg.oid, quote_ident(n.nspname) AS schema, quote_ident(tg.tgname) AS name, \
                    quote_ident(n.nspname) || '.' || quote_ident(c.relname) AS table_name, \
                    pg_get_triggerdef(tg.oid) AS definition \
             FROM pg_trigger tg \
             JOIN pg_class c ON tg.tgrelid = c.oid \
             JOIN pg_namespace n ON c.relnamespace = n.oid \
             WHERE {} AND {} AND {} AND NOT tg.tgisinternal AND tg.tgparentid = 0 \
             ORDER BY tg.oid",
            schema_clause("n"),
            relation_clause("n", "c"),
            extension_clause("c.oid"),
        );
        self.attachments(&query).await
    }

    async fn attachments(&self, query: &str) -> Result<Vec<TableAttachment>, CatalogError> {
        let rows = self.client.query(query, &self.filter.all_params()).await?;
        rows.iter()
            .map(|row| {
                Ok(TableAttachment {
                    oid: row.try_get("oid")?,
                    schema: row.try_get("schema")?,
                    name: row.try_get("name")?,
                    table: row.try_get("table_name")?,
                    definition: row.try_get("definition")?,
                })
            })
            .collect()
    }

    /// Dependencies among functions, types and tables.
    ///
    /// Catalog dependency records are normalized to the objects that are
    /// actually printed: a composite type's relation is replaced by the type,
    /// an array type by its element type, and column defaults and check
    /// constraints by the table or domain they belong to.
    pub async fn dependencies(&self) -> Result<DependencyMap, CatalogError> {
        let rows = self
            .client
            .query(
                "WITH deps AS ( \
                   SELECT \
                     CASE \
                       WHEN d.classid = 'pg_class'::regclass THEN \
                         COALESCE((SELECT t.oid FROM pg_type t JOIN pg_class c ON t.typrelid = c.oid \
                                   WHERE c.oid = d.objid AND c.relkind = 'c'), d.objid) \
                       WHEN d.classid = 'pg_attrdef'::regclass THEN \
                         (SELECT ad.adrelid FROM pg_attrdef ad WHERE ad.oid = d.objid) \
                       WHEN d.classid = 'pg_constraint'::regclass THEN \
                         (SELECT CASE WHEN con.conrelid <> 0 THEN con.conrelid ELSE con.contypid END \
                          FROM pg_constraint con WHERE con.oid = d.objid AND con.contype = 'c') \
                       ELSE d.objid \
                     END AS objid, \
                     CASE \
                       WHEN d.refclassid = 'pg_type'::regclass THEN \
                         COALESCE((SELECT e.oid FROM pg_type e WHERE e.typarray = d.refobjid), d.refobjid) \
                       WHEN d.refclassid = 'pg_class'::regclass THEN \
                         COALESCE((SELECT t.oid FROM pg_type t JOIN pg_class c ON t.typrelid = c.oid \
                                   WHERE c.oid = d.refobjid AND c.relkind = 'c'), d.refobjid) \
                       ELSE d.refobjid \
                     END AS refobjid \
                   FROM pg_depend d \
                   WHERE d.deptype IN ('n', 'a') \
                     AND d.classid IN ('pg_proc'::regclass, 'pg_type'::regclass, 'pg_class'::regclass, \
                                       'pg_attrdef'::regclass, 'pg_constraint'::regclass) \
                     AND d.refclassid IN ('pg_proc'::regclass, 'pg_type'::regclass, 'pg_class'::regclass) \
                     AND d.objid >= $1 AND d.refobjid >= $1 \
                 ) \
                 SELECT objid, array_agg(DISTINCT refobjid) \
                 FROM deps \
                 WHERE objid IS NOT NULL AND objid <> refobjid \
                 GROUP BY objid",
                &[&FIRST_NORMAL_OID],
            )
            .await?;
        edge_rows(&rows)
    }

    /// Dependencies of views on other relations, read from the rewrite rules
    /// that implement them.
    pub async fn view_dependencies(&self) -> Result<DependencyMap, CatalogError> {
        let rows = self
            .client
            .query(
                "SELECT r.ev_class, array_agg(DISTINCT d.refobjid) \
                 FROM pg_depend d \
                 JOIN pg_rewrite r ON d.objid = r.oid \
                 WHERE d.classid = 'pg_rewrite'::regclass \
                   AND d.refclassid = 'pg_class'::regclass \
                   AND d.deptype = 'n' \
                   AND r.ev_class <> d.refobjid \
                   AND r.ev_class >= $1 \
                 GROUP BY r.ev_class",
                &[&FIRST_NORMAL_OID],
            )
            .await?;
        edge_rows(&rows)
    }

    /// Owners, privileges, comments and security labels of every user
    /// object of `object_type`.
    pub async fn metadata_for_object_type(
        &self,
        object_type: ObjectType,
    ) -> Result<MetadataMap, CatalogError> {
        let source = MetadataSource::for_object_type(object_type)
            .ok_or(CatalogError::NoMetadata { object_type })?;
        self.query_metadata(object_type, &source).await
    }

    /// Comments and security labels of every user object of `object_type`,
    /// for objects that have no owner or privileges of their own.
    pub async fn comments_for_object_type(
        &self,
        object_type: ObjectType,
    ) -> Result<MetadataMap, CatalogError> {
        let mut source = MetadataSource::for_object_type(object_type)
            .ok_or(CatalogError::NoMetadata { object_type })?;
        source.owner = None;
        source.acl = None;
        self.query_metadata(object_type, &source).await
    }

    async fn query_metadata(
        &self,
        object_type: ObjectType,
        source: &MetadataSource,
    ) -> Result<MetadataMap, CatalogError> {
        let owner = source.owner.map_or_else(
            || "NULL::text".to_string(),
            |col| format!("quote_ident(pg_get_userbyid(o.{col}))"),
        );
        let acl = source.acl.map_or_else(
            || "NULL::text[]".to_string(),
            |col| format!("o.{col}::text[]"),
        );
        let class = source.class;
        let (description, seclabel) = if object_type.is_shared() {
            (
                format!(
                    "LEFT JOIN pg_shdescription d ON d.objoid = o.oid \
                       AND d.classoid = '{class}'::regclass"
                ),
                format!(
                    "LEFT JOIN pg_shseclabel sl ON sl.objoid = o.oid \
                       AND sl.classoid = '{class}'::regclass"
                ),
            )
        } else {
            (
                format!(
                    "LEFT JOIN pg_description d ON d.objoid = o.oid \
                       AND d.classoid = '{class}'::regclass AND d.objsubid = 0"
                ),
                format!(
                    "LEFT JOIN pg_seclabel sl ON sl.objoid = o.oid \
                       AND sl.classoid = '{class}'::regclass AND sl.objsubid = 0"
                ),
            )
        };
        let query = format!(
            "SELECT o.oid, {owner} AS owner, {acl} AS privileges, d.description AS comment, \
                    sl.provider, sl.label \
             FROM {table} o \
             {description} \
             {seclabel} \
             WHERE {condition}",
            table = source.table,
            condition = source.condition,
        );
        let rows = self.client.query(&query, &[]).await?;

        let mut map = MetadataMap::new();
        for row in rows {
            let oid: Oid = row.try_get("oid")?;
            let privileges = row
                .try_get::<_, Option<Vec<String>>>("privileges")?
                .unwrap_or_default()
                .iter()
                .map(|item| item.parse::<AclItem>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|source| CatalogError::Privileges {
                    object_type,
                    oid,
                    source,
                })?;
            let provider: Option<String> = row.try_get("provider")?;
            let label: Option<String> = row.try_get("label")?;
            let metadata = ObjectMetadata {
                owner: row.try_get("owner")?,
                privileges,
                comment: row.try_get("comment")?,
                security_label: provider
                    .zip(label)
                    .map(|(provider, label)| SecurityLabel { provider, label }),
            };
            if !metadata.is_empty() {
                map.insert(oid, metadata);
            }
        }
        debug!(%object_type, objects = map.len(), "read metadata");
        Ok(map)
    }
}

/// Where the metadata of one object type lives.
struct MetadataSource {
    /// The relation rows are read from.
    table: &'static str,
    /// The catalog comments and labels are keyed by.
    class: &'static str,
    owner: Option<&'static str>,
    acl: Option<&'static str>,
    condition: String,
}

impl MetadataSource {
    fn for_object_type(object_type: ObjectType) -> Option<Self> {
        let class = object_type.catalog_table()?;
        let user_objects = format!("o.oid >= {FIRST_NORMAL_OID}");
        let relkind = |kinds: &str| format!("{user_objects} AND o.relkind IN ({kinds})");
        let (table, owner, acl, condition) = match object_type {
            ObjectType::Database | ObjectType::DatabaseMetadata => (
                "pg_database",
                Some("datdba"),
                Some("datacl"),
                "o.datname = current_database()".to_string(),
            ),
            // pg_authid is not readable by ordinary users.
            ObjectType::Role => ("pg_roles", None, None, "o.rolname !~ '^pg_'".to_string()),
            ObjectType::Schema => ("pg_namespace", Some("nspowner"), Some("nspacl"), user_objects),
            ObjectType::Type => ("pg_type", Some("typowner"), Some("typacl"), user_objects),
            ObjectType::Function => ("pg_proc", Some("proowner"), Some("proacl"), user_objects),
            ObjectType::Sequence => ("pg_class", Some("relowner"), Some("relacl"), relkind("'S'")),
            ObjectType::Table => (
                "pg_class",
                Some("relowner"),
                Some("relacl"),
                relkind("'r', 'p', 'f'"),
            ),
            ObjectType::View => ("pg_class", Some("relowner"), Some("relacl"), relkind("'v', 'm'")),
            ObjectType::Index => ("pg_class", None, None, relkind("'i', 'I'")),
            ObjectType::Aggregate => (
                "pg_proc",
                Some("proowner"),
                Some("proacl"),
                format!("{user_objects} AND o.prokind = 'a'"),
            ),
            ObjectType::ProceduralLanguage => {
                ("pg_language", Some("lanowner"), Some("lanacl"), user_objects)
            }
            ObjectType::Cast => ("pg_cast", None, None, user_objects),
            ObjectType::Conversion => ("pg_conversion", Some("conowner"), None, user_objects),
            ObjectType::Operator => ("pg_operator", Some("oprowner"), None, user_objects),
            ObjectType::OperatorFamily => ("pg_opfamily", Some("opfowner"), None, user_objects),
            ObjectType::OperatorClass => ("pg_opclass", Some("opcowner"), None, user_objects),
            ObjectType::TextSearchParser => ("pg_ts_parser", None, None, user_objects),
            ObjectType::TextSearchTemplate => ("pg_ts_template", None, None, user_objects),
            ObjectType::TextSearchDictionary => {
                ("pg_ts_dict", Some("dictowner"), None, user_objects)
            }
            ObjectType::TextSearchConfiguration => {
                ("pg_ts_config", Some("cfgowner"), None, user_objects)
            }
            ObjectType::Constraint => ("pg_constraint", None, None, user_objects),
            ObjectType::Rule => ("pg_rewrite", None, None, user_objects),
            ObjectType::Trigger => ("pg_trigger", None, None, user_objects),
            ObjectType::SessionGucs
            | ObjectType::DatabaseGuc
            | ObjectType::RoleGrant
            | ObjectType::SequenceOwner => return None,
        };
        Some(MetadataSource {
            table,
            class,
            owner,
            acl,
            condition,
        })
    }
}

/// Groups `(key, value)` rows that arrive sorted by key.
fn group_rows<V>(
    rows: &[Row],
    f: impl Fn(&Row) -> Result<(Oid, V), CatalogError>,
) -> Result<BTreeMap<Oid, Vec<V>>, CatalogError> {
    let mut grouped: BTreeMap<Oid, Vec<V>> = BTreeMap::new();
    for row in rows {
        let (key, value) = f(row)?;
        grouped.entry(key).or_default().push(value);
    }
    Ok(grouped)
}

fn edge_rows(rows: &[Row]) -> Result<DependencyMap, CatalogError> {
    let mut edges = DependencyMap::new();
    for row in rows {
        let oid: Oid = row.try_get(0)?;
        let deps: Vec<Oid> = row.try_get(1)?;
        edges.entry(oid).or_default().extend(deps);
    }
    Ok(edges)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_treats_empty_lists_as_unrestricted() {
        let filter = CatalogFilter::new(&[], &["audit".into()], &[], &[]);
        assert_eq!(filter.include_schemas, None);
        assert_eq!(filter.exclude_schemas, Some(vec!["audit".to_string()]));
        assert_eq!(filter.include_relations, None);
    }

    #[test]
    fn clauses_reference_their_parameters() {
        let schema = schema_clause("n");
        assert!(schema.contains("$1") && schema.contains("$2"));
        assert!(!schema.contains("$3"));
        let relation = relation_clause("n", "c");
        assert!(relation.contains("quote_ident(n.nspname) || '.' || quote_ident(c.relname)"));
        assert!(relation.contains("$3") && relation.contains("$4"));
    }

    #[test]
    fn every_catalog_backed_type_has_a_metadata_source() {
        for object_type in [
            ObjectType::Database,
            ObjectType::Role,
            ObjectType::Schema,
            ObjectType::Type,
            ObjectType::Function,
            ObjectType::Sequence,
            ObjectType::Table,
            ObjectType::View,
            ObjectType::Index,
            ObjectType::Constraint,
            ObjectType::Rule,
            ObjectType::Trigger,
        ] {
            let source = MetadataSource::for_object_type(object_type)
                .unwrap_or_else(|| panic!("{object_type} has no metadata source"));
            assert_eq!(Some(source.class), object_type.catalog_table());
        }
        assert!(MetadataSource::for_object_type(ObjectType::RoleGrant).is_none());
    }
}
