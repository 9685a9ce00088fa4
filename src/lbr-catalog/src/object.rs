// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Typed snapshots of catalog objects.
//!
//! All schema and object names held by these types are already quoted with
//! the server's `quote_ident`, so they can be spliced into DDL verbatim and
//! compared against quoted filter names.

use crate::{ObjectType, Oid};

/// A function or procedure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Function {
    pub oid: Oid,
    pub schema: String,
    pub name: String,
    /// The identity argument list, e.g. `a integer, b text`.
    pub arguments: String,
    /// The complete `CREATE OR REPLACE FUNCTION` text reported by the server.
    pub definition: String,
    pub language: String,
}

/// The kind-specific part of a user-defined type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeKind {
    Base(BaseType),
    Composite { attributes: Vec<TypeAttribute> },
    Domain(DomainType),
    Enum { labels: Vec<String> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BaseType {
    pub input: String,
    pub output: String,
    pub receive: Option<String>,
    pub send: Option<String>,
    pub internal_length: i16,
    pub passed_by_value: bool,
    pub alignment: String,
    pub storage: String,
    pub default: Option<String>,
    pub element: Option<String>,
    pub delimiter: String,
    pub category: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeAttribute {
    pub name: String,
    pub type_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomainType {
    pub base_type: String,
    pub default: Option<String>,
    pub not_null: bool,
    /// `CONSTRAINT name CHECK (...)` clauses.
    pub constraints: Vec<String>,
}

/// A user-defined type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Type {
    pub oid: Oid,
    pub schema: String,
    pub name: String,
    pub kind: TypeKind,
}

impl Type {
    /// Base types must be announced as shell types before their I/O
    /// functions can be created.
    pub fn needs_shell(&self) -> bool {
        matches!(self.kind, TypeKind::Base(_))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub type_name: String,
    pub not_null: bool,
    pub default: Option<String>,
    /// The expression of a stored generated column. Generated columns hold
    /// no data of their own.
    pub generated: Option<String>,
    pub identity: Option<Identity>,
    pub collation: Option<String>,
    pub comment: Option<String>,
    /// Inherited columns are part of the table's data but are declared by
    /// its parent.
    pub inherited: bool,
}

/// An identity column and the state of the sequence behind it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// `GENERATED ALWAYS` rather than `GENERATED BY DEFAULT`.
    pub always: bool,
    /// Quoted, schema-qualified.
    pub sequence: String,
    /// `None` until the sequence is first used.
    pub last_value: Option<i64>,
}

/// Everything needed to recreate a table besides its constraints and
/// indexes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableDefinition {
    pub columns: Vec<Column>,
    /// Comma-separated `reloptions`.
    pub storage_options: Option<String>,
    /// `PARTITION BY` clause, for partitioned parents.
    pub partition_key: Option<String>,
    /// The parent partition and the `FOR VALUES` bound, for partitions.
    pub partition_of: Option<(String, String)>,
    /// Inheritance parents, for tables that are not partitions.
    pub inherits: Vec<String>,
    pub tablespace: Option<String>,
    /// Foreign tables hold no data of their own.
    pub external: Option<ExternalTable>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalTable {
    pub server: String,
    pub options: Option<String>,
}

/// A table, partitioned table, partition, or foreign table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Table {
    pub oid: Oid,
    pub schema: String,
    pub name: String,
    pub definition: TableDefinition,
}

impl Table {
    pub fn is_external(&self) -> bool {
        self.definition.external.is_some()
    }

    pub fn fqn(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct View {
    pub oid: Oid,
    pub schema: String,
    pub name: String,
    /// The `SELECT` body reported by `pg_get_viewdef`.
    pub definition: String,
    pub is_materialized: bool,
    /// Quoted column names and their comments.
    pub column_comments: Vec<(String, String)>,
}

/// The objects that take part in dependency sorting.
///
/// Each variant carries its own fields; code that needs to treat objects
/// differently matches exhaustively, so a new kind is a compile-time change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CatalogObject {
    Function(Function),
    Type(Type),
    Table(Table),
    View(View),
}

impl CatalogObject {
    pub fn oid(&self) -> Oid {
        match self {
            CatalogObject::Function(f) => f.oid,
            CatalogObject::Type(t) => t.oid,
            CatalogObject::Table(t) => t.oid,
            CatalogObject::View(v) => v.oid,
        }
    }

    pub fn schema(&self) -> &str {
        match self {
            CatalogObject::Function(f) => &f.schema,
            CatalogObject::Type(t) => &t.schema,
            CatalogObject::Table(t) => &t.schema,
            CatalogObject::View(v) => &v.schema,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            CatalogObject::Function(f) => &f.name,
            CatalogObject::Type(t) => &t.name,
            CatalogObject::Table(t) => &t.name,
            CatalogObject::View(v) => &v.name,
        }
    }

    /// The name recorded in the table of contents. Functions are overloaded,
    /// so their argument list is part of their identity.
    pub fn toc_name(&self) -> String {
        match self {
            CatalogObject::Function(f) => format!("{}({})", f.name, f.arguments),
            _ => self.name().to_string(),
        }
    }

    pub fn object_type(&self) -> ObjectType {
        match self {
            CatalogObject::Function(_) => ObjectType::Function,
            CatalogObject::Type(_) => ObjectType::Type,
            CatalogObject::Table(_) => ObjectType::Table,
            CatalogObject::View(_) => ObjectType::View,
        }
    }

    pub fn fqn(&self) -> String {
        format!("{}.{}", self.schema(), self.toc_name())
    }
}

impl From<Function> for CatalogObject {
    fn from(f: Function) -> Self {
        CatalogObject::Function(f)
    }
}

impl From<Type> for CatalogObject {
    fn from(t: Type) -> Self {
        CatalogObject::Type(t)
    }
}

impl From<Table> for CatalogObject {
    fn from(t: Table) -> Self {
        CatalogObject::Table(t)
    }
}

impl From<View> for CatalogObject {
    fn from(v: View) -> Self {
        CatalogObject::View(v)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    pub oid: Oid,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sequence {
    pub oid: Oid,
    pub schema: String,
    pub name: String,
    pub start: i64,
    pub increment: i64,
    pub min_value: i64,
    pub max_value: i64,
    pub cache: i64,
    pub cycle: bool,
    /// `None` if the sequence has never been advanced.
    pub last_value: Option<i64>,
    /// `schema.table.column`, if the sequence is owned by a column.
    pub owned_by: Option<String>,
}

impl Sequence {
    /// The quoted `schema.table` of the column that owns this sequence.
    pub fn owning_table(&self) -> Option<&str> {
        let owned_by = self.owned_by.as_deref()?;
        let mut quoted = false;
        let mut last_dot = None;
        for (i, c) in owned_by.char_indices() {
            match c {
                '"' => quoted = !quoted,
                '.' if !quoted => last_dot = Some(i),
                _ => {}
            }
        }
        owned_by.get(..last_dot?)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
    Check,
    ForeignKey,
    PrimaryKey,
    Unique,
    Exclusion,
}

impl ConstraintKind {
    pub fn from_catalog(contype: &str) -> Option<Self> {
        match contype {
            "c" => Some(ConstraintKind::Check),
            "f" => Some(ConstraintKind::ForeignKey),
            "p" => Some(ConstraintKind::PrimaryKey),
            "u" => Some(ConstraintKind::Unique),
            "x" => Some(ConstraintKind::Exclusion),
            _ => None,
        }
    }
}

/// A table constraint. Domain constraints belong to their [`DomainType`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Constraint {
    pub oid: Oid,
    pub schema: String,
    pub name: String,
    pub kind: ConstraintKind,
    /// The quoted `schema.table` the constraint is attached to.
    pub table: String,
    pub definition: String,
}

/// An index, rule or trigger: an object whose complete DDL the server can
/// print and that hangs off a single table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableAttachment {
    pub oid: Oid,
    pub schema: String,
    pub name: String,
    pub table: String,
    pub definition: String,
}

pub type Index = TableAttachment;
pub type Rule = TableAttachment;
pub type Trigger = TableAttachment;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Role {
    pub oid: Oid,
    pub name: String,
    pub superuser: bool,
    pub inherit: bool,
    pub create_role: bool,
    pub create_db: bool,
    pub can_login: bool,
    pub replication: bool,
    pub connection_limit: i32,
    pub valid_until: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleMember {
    pub role: String,
    pub member: String,
    pub grantor: Option<String>,
    pub admin_option: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Database {
    pub oid: Oid,
    pub name: String,
    pub encoding: String,
    pub collate: String,
    pub ctype: String,
}

/// The session settings the DDL was generated under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionGucs {
    pub client_encoding: String,
    pub standard_conforming_strings: String,
}

/// A database-level `ALTER DATABASE ... SET` setting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseGuc {
    pub name: String,
    pub value: String,
}

impl DatabaseGuc {
    /// Parses a `pg_db_role_setting` entry of the form `name=value`.
    pub fn parse(setting: &str) -> Option<Self> {
        let (name, value) = setting.split_once('=')?;
        if name.is_empty() {
            return None;
        }
        Some(DatabaseGuc {
            name: name.to_string(),
            value: value.to_string(),
        })
    }
}

/// A procedural language that does not come from an extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProceduralLanguage {
    pub oid: Oid,
    pub name: String,
    pub trusted: bool,
    /// Schema-qualified call handler.
    pub handler: String,
    pub inline_handler: Option<String>,
    pub validator: Option<String>,
    /// The handler functions, which must be created ahead of the language.
    pub functions: Vec<Oid>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CastMethod {
    /// The function's signature, e.g. `public.to_money(integer)`.
    Function(String),
    Binary,
    InOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CastContext {
    Explicit,
    Assignment,
    Implicit,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cast {
    pub oid: Oid,
    /// The schema of the source type, which the cast is filed under.
    pub schema: String,
    pub source: String,
    pub target: String,
    pub method: CastMethod,
    pub context: CastContext,
}

impl Cast {
    /// `(source AS target)`, as casts are named in DDL.
    pub fn signature(&self) -> String {
        format!("({} AS {})", self.source, self.target)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conversion {
    pub oid: Oid,
    pub schema: String,
    pub name: String,
    pub source_encoding: String,
    pub target_encoding: String,
    pub function: String,
    pub is_default: bool,
}

/// The moving-aggregate implementation of an aggregate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MovingAggregate {
    pub transition: String,
    pub inverse_transition: String,
    pub state_type: String,
    pub state_space: i32,
    pub final_function: Option<String>,
    pub final_extra: bool,
    pub final_modify: String,
    pub initial_value: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Aggregate {
    pub oid: Oid,
    pub schema: String,
    pub name: String,
    /// The identity arguments, e.g. `double precision ORDER BY anyelement`.
    pub arguments: String,
    /// The arguments as declared, with names and defaults.
    pub declared_arguments: String,
    pub transition: String,
    pub state_type: String,
    pub state_space: i32,
    pub final_function: Option<String>,
    pub final_extra: bool,
    /// `READ_ONLY`, `SHAREABLE` or `READ_WRITE`.
    pub final_modify: String,
    pub combine: Option<String>,
    pub serial: Option<String>,
    pub deserial: Option<String>,
    pub initial_value: Option<String>,
    pub moving: Option<MovingAggregate>,
    pub sort_operator: Option<String>,
    pub hypothetical: bool,
    /// `SAFE` or `RESTRICTED`; unsafe is the default.
    pub parallel: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operator {
    pub oid: Oid,
    pub schema: String,
    /// The operator symbol, which is never quoted.
    pub name: String,
    /// `None` for prefix operators.
    pub left: Option<String>,
    pub right: Option<String>,
    pub function: String,
    /// In `OPERATOR(schema.op)` form.
    pub commutator: Option<String>,
    pub negator: Option<String>,
    pub restrict: Option<String>,
    pub join: Option<String>,
    pub hashes: bool,
    pub merges: bool,
}

impl Operator {
    /// `op (left, right)`, as operators are named in their TOC entries.
    pub fn toc_name(&self) -> String {
        format!(
            "{} ({}, {})",
            self.name,
            self.left.as_deref().unwrap_or("NONE"),
            self.right.as_deref().unwrap_or("NONE")
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorFamily {
    pub oid: Oid,
    pub schema: String,
    pub name: String,
    pub method: String,
    /// `OPERATOR ...` and `FUNCTION ...` items that belong to the family but
    /// to none of its classes.
    pub members: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorClass {
    pub oid: Oid,
    pub schema: String,
    pub name: String,
    pub method: String,
    pub type_name: String,
    pub is_default: bool,
    /// Schema-qualified.
    pub family: String,
    pub storage: Option<String>,
    /// `OPERATOR ...` and `FUNCTION ...` items.
    pub members: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextSearchParser {
    pub oid: Oid,
    pub schema: String,
    pub name: String,
    pub start: String,
    pub get_token: String,
    pub end: String,
    pub lex_types: String,
    pub headline: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextSearchTemplate {
    pub oid: Oid,
    pub schema: String,
    pub name: String,
    pub init: Option<String>,
    pub lexize: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextSearchDictionary {
    pub oid: Oid,
    pub schema: String,
    pub name: String,
    /// Schema-qualified.
    pub template: String,
    /// `option = value, ...`, as stored.
    pub options: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextSearchMapping {
    pub token_type: String,
    /// Schema-qualified dictionaries, in lookup order.
    pub dictionaries: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextSearchConfiguration {
    pub oid: Oid,
    pub schema: String,
    pub name: String,
    /// Schema-qualified.
    pub parser: String,
    pub mappings: Vec<TextSearchMapping>,
}
