// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Selecting what to restore from a backup.
//!
//! Entries are matched by the identity they were recorded under, so every
//! name here is quoted the way the backup quoted it.

use std::collections::BTreeSet;

use lbr_catalog::ObjectType;
use lbr_catalog::client::PgCatalog;
use lbr_filter::{FilterError, Filters, quote_table_names};
use lbr_toc::{DataEntry, TocEntry};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestoreFilter {
    include_schemas: BTreeSet<String>,
    exclude_schemas: BTreeSet<String>,
    /// Quoted `schema.table` names.
    include_tables: BTreeSet<String>,
    exclude_tables: BTreeSet<String>,
}

impl RestoreFilter {
    pub fn new<I: IntoIterator<Item = String>>(
        include_schemas: I,
        exclude_schemas: I,
        include_tables: I,
        exclude_tables: I,
    ) -> RestoreFilter {
        RestoreFilter {
            include_schemas: include_schemas.into_iter().collect(),
            exclude_schemas: exclude_schemas.into_iter().collect(),
            include_tables: include_tables.into_iter().collect(),
            exclude_tables: exclude_tables.into_iter().collect(),
        }
    }

    /// Quotes the names of `filters` through the target database.
    pub async fn quote(catalog: &PgCatalog<'_>, filters: &Filters) -> Result<RestoreFilter, FilterError> {
        Ok(RestoreFilter::new(
            catalog.quote_idents(&filters.include_schemas).await?,
            catalog.quote_idents(&filters.exclude_schemas).await?,
            quote_table_names(catalog, &filters.include_tables).await?,
            quote_table_names(catalog, &filters.exclude_tables).await?,
        ))
    }

    pub fn is_empty(&self) -> bool {
        self.include_schemas.is_empty()
            && self.exclude_schemas.is_empty()
            && self.include_tables.is_empty()
            && self.exclude_tables.is_empty()
    }

    /// Whether a statement of the pre- or post-data stream is restored.
    ///
    /// With tables included, only schemas holding one of them, the tables
    /// themselves and what is recorded against them (constraints, indexes,
    /// owned sequences and the like) are restored.
    pub fn matches_entry(&self, entry: &TocEntry) -> bool {
        if !self.schema_matches(&entry.schema) {
            return false;
        }
        let fqn = format!("{}.{}", entry.schema, entry.name);
        let relation = entry.reference_object.as_deref();
        if self.exclude_tables.contains(&fqn)
            || relation.is_some_and(|table| self.exclude_tables.contains(table))
        {
            return false;
        }
        if self.include_tables.is_empty() {
            return true;
        }
        match entry.object_type {
            ObjectType::Schema => self
                .include_tables
                .iter()
                .any(|table| table.starts_with(&format!("{}.", entry.schema))),
            _ => {
                self.include_tables.contains(&fqn)
                    || relation.is_some_and(|table| self.include_tables.contains(table))
            }
        }
    }

    /// Whether the data of a table is restored.
    pub fn matches_data(&self, entry: &DataEntry) -> bool {
        if !self.schema_matches(&entry.schema) {
            return false;
        }
        let fqn = entry.fqn();
        !self.exclude_tables.contains(&fqn)
            && (self.include_tables.is_empty() || self.include_tables.contains(&fqn))
    }

    fn schema_matches(&self, schema: &str) -> bool {
        !self.exclude_schemas.contains(schema)
            && (self.include_schemas.is_empty() || self.include_schemas.contains(schema))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn entry(object_type: ObjectType, schema: &str, name: &str, table: Option<&str>) -> TocEntry {
        TocEntry {
            schema: schema.into(),
            name: name.into(),
            object_type,
            reference_object: table.map(String::from),
            start_byte: 0,
            end_byte: 0,
        }
    }

    fn data(schema: &str, name: &str) -> DataEntry {
        DataEntry {
            schema: schema.into(),
            name: name.into(),
            oid: 16401,
            attribute_string: "(id)".into(),
        }
    }

    #[test]
    fn no_filter_restores_everything() {
        let filter = RestoreFilter::default();
        assert!(filter.is_empty());
        assert!(filter.matches_entry(&entry(ObjectType::Function, "app", "f()", None)));
        assert!(filter.matches_data(&data("app", "orders")));
    }

    #[test]
    fn schema_filters() {
        let filter = RestoreFilter::new(names(&["app"]), vec![], vec![], vec![]);
        assert!(filter.matches_entry(&entry(ObjectType::Schema, "app", "app", None)));
        assert!(filter.matches_entry(&entry(ObjectType::Function, "app", "f()", None)));
        assert!(!filter.matches_entry(&entry(ObjectType::Table, "public", "t", None)));
        assert!(!filter.matches_data(&data("public", "t")));

        let filter = RestoreFilter::new(vec![], names(&["\"Audit\""]), vec![], vec![]);
        assert!(!filter.matches_entry(&entry(ObjectType::Table, "\"Audit\"", "log", None)));
        assert!(filter.matches_entry(&entry(ObjectType::Table, "audit", "log", None)));
    }

    #[test]
    fn included_tables_bring_what_hangs_off_them() {
        let filter = RestoreFilter::new(vec![], vec![], names(&["app.orders"]), vec![]);
        assert!(filter.matches_entry(&entry(ObjectType::Schema, "app", "app", None)));
        assert!(!filter.matches_entry(&entry(ObjectType::Schema, "public", "public", None)));
        assert!(filter.matches_entry(&entry(ObjectType::Table, "app", "orders", None)));
        assert!(filter.matches_entry(&entry(
            ObjectType::Index,
            "app",
            "orders_pkey",
            Some("app.orders")
        )));
        assert!(filter.matches_entry(&entry(
            ObjectType::Sequence,
            "app",
            "orders_id_seq",
            Some("app.orders")
        )));
        assert!(!filter.matches_entry(&entry(ObjectType::Table, "app", "customers", None)));
        assert!(!filter.matches_entry(&entry(ObjectType::Function, "app", "f()", None)));
        assert!(filter.matches_data(&data("app", "orders")));
        assert!(!filter.matches_data(&data("app", "customers")));
    }

    #[test]
    fn excluded_tables_lose_what_hangs_off_them() {
        let filter = RestoreFilter::new(vec![], vec![], vec![], names(&["app.orders"]));
        assert!(!filter.matches_entry(&entry(ObjectType::Table, "app", "orders", None)));
        assert!(!filter.matches_entry(&entry(
            ObjectType::Trigger,
            "app",
            "audit",
            Some("app.orders")
        )));
        assert!(filter.matches_entry(&entry(ObjectType::Table, "app", "customers", None)));
        assert!(filter.matches_entry(&entry(ObjectType::Function, "app", "f()", None)));
        assert!(!filter.matches_data(&data("app", "orders")));
    }
}
