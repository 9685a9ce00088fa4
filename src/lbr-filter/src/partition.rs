// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Partition-aware expansion of the table include list.
//!
//! A partitioned table cannot be restored without its parent, and the data
//! of an external partition lives outside of the database, so a user's
//! table list is widened to:
//!
//! - the parent of every included partition;
//! - every partition of an included parent when leaf partition data is
//!   requested, and otherwise only its external partitions;
//! - every external sibling of an included partition.
//!
//! Each rule is a set query against the catalog. The rules are applied
//! until nothing new is found, so expanding an expanded list is a no-op.

use std::collections::BTreeSet;

use async_trait::async_trait;
use itertools::Itertools;
use lbr_catalog::Oid;
use lbr_catalog::client::{CatalogError, PgCatalog, extension_clause, schema_clause};
use tokio_postgres::types::ToSql;
use tracing::{debug, info};

use crate::{Filters, FilterError, Fqn, quote_table_names};

/// The catalog queries partition expansion is built from.
#[async_trait]
pub trait PartitionCatalog: Sync {
    /// Quotes each name as `quote_ident(schema) || '.' || quote_ident(table)`,
    /// preserving order.
    async fn quote_fqns(&self, fqns: &[Fqn]) -> Result<Vec<String>, CatalogError>;

    /// The OIDs of the relations with the given quoted names. Names that do
    /// not exist are ignored.
    async fn relation_oids(&self, quoted: &[String]) -> Result<Vec<Oid>, CatalogError>;

    /// The parents of those of `oids` that are partitions.
    async fn partition_parents(&self, oids: &[Oid]) -> Result<Vec<Oid>, CatalogError>;

    /// The partitions of those of `oids` that are partitioned, optionally
    /// only the external ones.
    async fn partition_children(
        &self,
        oids: &[Oid],
        external_only: bool,
    ) -> Result<Vec<Oid>, CatalogError>;

    /// The external partitions sharing a parent with any of `oids`.
    async fn external_siblings(&self, oids: &[Oid]) -> Result<Vec<Oid>, CatalogError>;

    /// Quoted names of those of `oids` that are user tables passing the
    /// schema filter, ordered by OID.
    async fn user_table_names(&self, oids: &[Oid]) -> Result<Vec<(Oid, String)>, CatalogError>;
}

/// Expands `filters.include_tables` across partition hierarchies.
///
/// Returns the quoted include list without repeats, followed by the tables
/// the expansion added in OID order. An empty include list stays empty.
/// Every included name must be a user table passing the schema filter.
pub async fn expand_includes_for_partitions<C>(
    catalog: &C,
    filters: &Filters,
) -> Result<Vec<String>, FilterError>
where
    C: PartitionCatalog + ?Sized,
{
    if filters.include_tables.is_empty() {
        return Ok(Vec::new());
    }
    let quoted = quote_table_names(catalog, &filters.include_tables).await?;

    let included = catalog.relation_oids(&quoted).await?;
    let found: BTreeSet<String> = catalog
        .user_table_names(&included)
        .await?
        .into_iter()
        .map(|(_, name)| name)
        .collect();
    let missing: Vec<String> = quoted
        .iter()
        .filter(|name| !found.contains(*name))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(FilterError::MissingTables { names: missing });
    }

    let mut closure: BTreeSet<Oid> = included.into_iter().collect();
    let external_only = !filters.leaf_partition_data;
    let mut rounds = 0;
    loop {
        rounds += 1;
        let current: Vec<Oid> = closure.iter().copied().collect();
        let mut next = closure.clone();
        next.extend(catalog.partition_parents(&current).await?);
        next.extend(catalog.partition_children(&current, external_only).await?);
        next.extend(catalog.external_siblings(&current).await?);
        if next == closure {
            break;
        }
        closure = next;
    }
    debug!(rounds, relations = closure.len(), "partition closure complete");

    let oids: Vec<Oid> = closure.into_iter().collect();
    let known: BTreeSet<&String> = quoted.iter().collect();
    let added: Vec<String> = catalog
        .user_table_names(&oids)
        .await?
        .into_iter()
        .map(|(_, name)| name)
        .filter(|name| !known.contains(name))
        .collect();
    if !added.is_empty() {
        info!(
            tables = %added.iter().join(", "),
            "including partition tables related to the include list"
        );
    }
    Ok(quoted.into_iter().chain(added).collect())
}

#[async_trait]
impl PartitionCatalog for PgCatalog<'_> {
    async fn quote_fqns(&self, fqns: &[Fqn]) -> Result<Vec<String>, CatalogError> {
        if fqns.is_empty() {
            return Ok(Vec::new());
        }
        let schemas: Vec<&str> = fqns.iter().map(|f| f.schema.as_str()).collect();
        let tables: Vec<&str> = fqns.iter().map(|f| f.table.as_str()).collect();
        let rows = self
            .client()
            .query(
                "SELECT quote_ident(u.s) || '.' || quote_ident(u.t) \
                 FROM unnest($1::text[], $2::text[]) WITH ORDINALITY AS u(s, t, ord) \
                 ORDER BY u.ord",
                &[&schemas, &tables],
            )
            .await?;
        rows.iter()
            .map(|row| row.try_get(0).map_err(CatalogError::from))
            .collect()
    }

    async fn relation_oids(&self, quoted: &[String]) -> Result<Vec<Oid>, CatalogError> {
        oid_query(
            self,
            "SELECT c.oid \
             FROM pg_class c \
             JOIN pg_namespace n ON c.relnamespace = n.oid \
             WHERE quote_ident(n.nspname) || '.' || quote_ident(c.relname) = ANY($1)",
            &[&quoted],
        )
        .await
    }

    async fn partition_parents(&self, oids: &[Oid]) -> Result<Vec<Oid>, CatalogError> {
        oid_query(
            self,
            "SELECT i.inhparent \
             FROM pg_inherits i \
             JOIN pg_class c ON c.oid = i.inhrelid \
             WHERE c.relispartition AND i.inhrelid = ANY($1)",
            &[&oids],
        )
        .await
    }

    async fn partition_children(
        &self,
        oids: &[Oid],
        external_only: bool,
    ) -> Result<Vec<Oid>, CatalogError> {
        oid_query(
            self,
            "SELECT i.inhrelid \
             FROM pg_inherits i \
             JOIN pg_class c ON c.oid = i.inhrelid \
             WHERE c.relispartition AND i.inhparent = ANY($1) \
               AND (NOT $2 OR c.relkind = 'f')",
            &[&oids, &external_only],
        )
        .await
    }

    async fn external_siblings(&self, oids: &[Oid]) -> Result<Vec<Oid>, CatalogError> {
        oid_query(
            self,
            "SELECT c.oid \
             FROM pg_inherits i \
             JOIN pg_class c ON c.oid = i.inhrelid \
             WHERE c.relispartition AND c.relkind = 'f' \
               AND i.inhparent IN ( \
                 SELECT s.inhparent \
                 FROM pg_inherits s \
                 JOIN pg_class sc ON sc.oid = s.inhrelid \
                 WHERE sc.relispartition AND s.inhrelid = ANY($1))",
            &[&oids],
        )
        .await
    }

    async fn user_table_names(&self, oids: &[Oid]) -> Result<Vec<(Oid, String)>, CatalogError> {
        let query = format!(
            "SELECT c.oid, quote_ident(n.nspname) || '.' || quote_ident(c.relname) \
             FROM pg_class c \
             JOIN pg_namespace n ON c.relnamespace = n.oid \
             WHERE {} AND c.oid = ANY($3) AND c.relkind IN ('r', 'p', 'f') AND {} \
             ORDER BY c.oid",
            schema_clause("n"),
            extension_clause("c.oid"),
        );
        let [include, exclude] = self.filter().schema_params();
        let params: [&(dyn ToSql + Sync); 3] = [include, exclude, &oids];
        let rows = self.client().query(&query, &params).await?;
        rows.iter()
            .map(|row| Ok((row.try_get(0)?, row.try_get(1)?)))
            .collect()
    }
}

/// Runs a query returning a single OID column.
async fn oid_query(
    catalog: &PgCatalog<'_>,
    query: &str,
    params: &[&(dyn ToSql + Sync)],
) -> Result<Vec<Oid>, CatalogError> {
    let rows = catalog.client().query(query, params).await?;
    rows.iter()
        .map(|row| row.try_get(0).map_err(CatalogError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use futures::executor::block_on;
    use proptest::prelude::*;
    use proptest::sample::Index;

    use super::*;

    #[derive(Clone, Debug)]
    struct Relation {
        schema: String,
        table: String,
        parent: Option<Oid>,
        external: bool,
        /// Filtered out by the schema filter.
        hidden: bool,
    }

    /// An in-memory catalog of partition hierarchies.
    #[derive(Clone, Debug, Default)]
    struct FakeCatalog {
        relations: BTreeMap<Oid, Relation>,
    }

    fn quote_ident(ident: &str) -> String {
        let plain = ident
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
            && ident
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if plain {
            ident.to_string()
        } else {
            format!("\"{}\"", ident.replace('"', "\"\""))
        }
    }

    impl FakeCatalog {
        fn add(&mut self, oid: Oid, name: &str, parent: Option<Oid>, external: bool) {
            let fqn = Fqn::parse(name).unwrap();
            self.relations.insert(
                oid,
                Relation {
                    schema: fqn.schema,
                    table: fqn.table,
                    parent,
                    external,
                    hidden: false,
                },
            );
        }

        fn quoted(&self, oid: Oid) -> String {
            let r = &self.relations[&oid];
            format!("{}.{}", quote_ident(&r.schema), quote_ident(&r.table))
        }
    }

    #[async_trait]
    impl PartitionCatalog for FakeCatalog {
        async fn quote_fqns(&self, fqns: &[Fqn]) -> Result<Vec<String>, CatalogError> {
            Ok(fqns
                .iter()
                .map(|f| format!("{}.{}", quote_ident(&f.schema), quote_ident(&f.table)))
                .collect())
        }

        async fn relation_oids(&self, quoted: &[String]) -> Result<Vec<Oid>, CatalogError> {
            Ok(self
                .relations
                .keys()
                .copied()
                .filter(|oid| quoted.contains(&self.quoted(*oid)))
                .collect())
        }

        async fn partition_parents(&self, oids: &[Oid]) -> Result<Vec<Oid>, CatalogError> {
            Ok(oids
                .iter()
                .filter_map(|oid| self.relations.get(oid).and_then(|r| r.parent))
                .collect())
        }

        async fn partition_children(
            &self,
            oids: &[Oid],
            external_only: bool,
        ) -> Result<Vec<Oid>, CatalogError> {
            Ok(self
                .relations
                .iter()
                .filter(|(_, r)| r.parent.is_some_and(|p| oids.contains(&p)))
                .filter(|(_, r)| !external_only || r.external)
                .map(|(oid, _)| *oid)
                .collect())
        }

        async fn external_siblings(&self, oids: &[Oid]) -> Result<Vec<Oid>, CatalogError> {
            let parents = self.partition_parents(oids).await?;
            Ok(self
                .relations
                .iter()
                .filter(|(_, r)| r.external && r.parent.is_some_and(|p| parents.contains(&p)))
                .map(|(oid, _)| *oid)
                .collect())
        }

        async fn user_table_names(
            &self,
            oids: &[Oid],
        ) -> Result<Vec<(Oid, String)>, CatalogError> {
            Ok(oids
                .iter()
                .copied()
                .sorted()
                .filter(|oid| self.relations.get(oid).is_some_and(|r| !r.hidden))
                .map(|oid| (oid, self.quoted(oid)))
                .collect())
        }
    }

    /// sales
    ///  |- sales_2023 (external)
    ///  |- sales_2024
    ///  |   |- sales_2024_q1
    ///  |   `- sales_2024_q2 (external)
    ///  `- sales_2025
    /// plus an unrelated table.
    fn sales() -> FakeCatalog {
        let mut c = FakeCatalog::default();
        c.add(100, "public.sales", None, false);
        c.add(101, "public.sales_2023", Some(100), true);
        c.add(102, "public.sales_2024", Some(100), false);
        c.add(103, "public.sales_2024_q1", Some(102), false);
        c.add(104, "public.sales_2024_q2", Some(102), true);
        c.add(105, "public.sales_2025", Some(100), false);
        c.add(200, "public.Other", None, false);
        c
    }

    fn filters(tables: &[&str], leaf_partition_data: bool) -> Filters {
        Filters {
            include_tables: tables.iter().map(|t| t.to_string()).collect(),
            leaf_partition_data,
            ..Default::default()
        }
    }

    fn expand(catalog: &FakeCatalog, filters: &Filters) -> Vec<String> {
        block_on(expand_includes_for_partitions(catalog, filters)).unwrap()
    }

    #[test]
    fn empty_include_list_stays_empty() {
        assert!(expand(&sales(), &filters(&[], true)).is_empty());
    }

    #[test]
    fn partition_brings_parents_and_external_relatives() {
        let got = expand(&sales(), &filters(&["public.sales_2024_q1"], false));
        assert_eq!(
            got,
            vec![
                "public.sales_2024_q1",
                "public.sales",
                "public.sales_2023",
                "public.sales_2024",
                "public.sales_2024_q2",
            ]
        );
    }

    #[test]
    fn leaf_partition_data_brings_every_partition() {
        let got = expand(&sales(), &filters(&["public.sales"], true));
        assert_eq!(
            got,
            vec![
                "public.sales",
                "public.sales_2023",
                "public.sales_2024",
                "public.sales_2024_q1",
                "public.sales_2024_q2",
                "public.sales_2025",
            ]
        );
    }

    #[test]
    fn input_is_quoted_and_deduplicated() {
        let got = expand(
            &sales(),
            &filters(&["public.Other", "\"public\".\"Other\""], false),
        );
        assert_eq!(got, vec!["public.\"Other\""]);
    }

    #[test]
    fn unknown_tables_are_rejected() {
        let mut catalog = sales();
        catalog.relations.get_mut(&105).unwrap().hidden = true;
        let err = block_on(expand_includes_for_partitions(
            &catalog,
            &filters(
                &["public.Other", "public.missing", "public.sales_2025"],
                false,
            ),
        ))
        .unwrap_err();
        match err {
            FilterError::MissingTables { names } => {
                assert_eq!(names, vec!["public.missing", "public.sales_2025"]);
            }
            err => panic!("unexpected error: {err}"),
        }
    }

    #[test]
    fn hidden_relations_are_not_added() {
        let mut catalog = sales();
        catalog.relations.get_mut(&101).unwrap().hidden = true;
        let got = expand(&catalog, &filters(&["public.sales_2025"], false));
        assert_eq!(got, vec!["public.sales_2025", "public.sales"]);
    }

    #[test]
    fn malformed_names_fail_before_catalog_work() {
        let err = block_on(expand_includes_for_partitions(
            &sales(),
            &filters(&["sales"], false),
        ))
        .unwrap_err();
        assert!(matches!(err, FilterError::MissingDot { .. }), "{err}");
    }

    /// A random forest: each relation may be a partition of an earlier one.
    fn forest() -> impl Strategy<Value = FakeCatalog> {
        proptest::collection::vec(
            (proptest::option::of(any::<Index>()), any::<bool>(), any::<bool>()),
            1..24,
        )
        .prop_map(|specs| {
            let mut catalog = FakeCatalog::default();
            for (i, (parent, external, hidden)) in specs.into_iter().enumerate() {
                let oid = Oid::try_from(i).unwrap() + 1;
                let parent = parent
                    .filter(|_| i > 0)
                    .map(|p| Oid::try_from(p.index(i)).unwrap() + 1);
                catalog.add(oid, &format!("s{}.T{i}", i % 3), parent, external);
                catalog.relations.get_mut(&oid).unwrap().hidden = hidden;
            }
            catalog
        })
    }

    proptest! {
        #[test]
        fn expansion_is_idempotent(
            catalog in forest(),
            picks in proptest::collection::vec(any::<Index>(), 0..6),
            leaf_partition_data in any::<bool>(),
        ) {
            let names: Vec<String> = picks
                .iter()
                .filter_map(|p| {
                    let oid = Oid::try_from(p.index(catalog.relations.len())).unwrap() + 1;
                    let r = &catalog.relations[&oid];
                    (!r.hidden).then(|| format!("{}.{}", r.schema, r.table))
                })
                .collect();
            let once = expand(&catalog, &Filters { include_tables: names, leaf_partition_data, ..Default::default() });
            let twice = expand(&catalog, &Filters { include_tables: once.clone(), leaf_partition_data, ..Default::default() });
            prop_assert_eq!(once, twice);
        }
    }
}
