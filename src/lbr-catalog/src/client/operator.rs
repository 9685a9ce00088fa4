// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Operators, operator families and operator classes.

use std::collections::BTreeMap;

use tracing::debug;

use super::{
    CatalogError, FIRST_NORMAL_OID, PgCatalog, extension_clause, group_rows, operator_name,
    proc_name, schema_clause,
};
use crate::Oid;
use crate::object::{Operator, OperatorClass, OperatorFamily};

impl PgCatalog<'_> {
    /// Operators with an implementation; shell operators only exist as
    /// forward references of other operators and are recreated by them.
    pub async fn operators(&self) -> Result<Vec<Operator>, CatalogError> {
        let query = format!(
            "SELECT o.oid, quote_ident(n.nspname) AS schema, o.oprname::text AS name, \
                    CASE WHEN o.oprleft <> 0 THEN format_type(o.oprleft, NULL) END AS left_type, \
                    CASE WHEN o.oprright <> 0 THEN format_type(o.oprright, NULL) END AS right_type, \
                    {} AS function, {} AS commutator, {} AS negator, \
                    {} AS restrict_function, {} AS join_function, \
                    o.oprcanhash AS hashes, o.oprcanmerge AS merges \
             FROM pg_operator o \
             JOIN pg_namespace n ON o.oprnamespace = n.oid \
             WHERE o.oprcode <> 0 AND {} AND {} \
             ORDER BY o.oid",
            proc_name("o.oprcode"),
            operator_name("o.oprcom"),
            operator_name("o.oprnegate"),
            proc_name("o.oprrest"),
            proc_name("o.oprjoin"),
            schema_clause("n"),
            extension_clause("o.oid"),
        );
        let rows = self
            .client
            .query(&query, &self.filter.schema_params())
            .await?;
        let operators = rows
            .iter()
            .map(|row| {
                Ok(Operator {
                    oid: row.try_get("oid")?,
                    schema: row.try_get("schema")?,
                    name: row.try_get("name")?,
                    left: row.try_get("left_type")?,
                    right: row.try_get("right_type")?,
                    function: row.try_get("function")?,
                    commutator: row.try_get("commutator")?,
                    negator: row.try_get("negator")?,
                    restrict: row.try_get("restrict_function")?,
                    join: row.try_get("join_function")?,
                    hashes: row.try_get("hashes")?,
                    merges: row.try_get("merges")?,
                })
            })
            .collect::<Result<Vec<_>, CatalogError>>()?;
        debug!(operators = operators.len(), "read operators");
        Ok(operators)
    }

    pub async fn operator_families(&self) -> Result<Vec<OperatorFamily>, CatalogError> {
        let query = format!(
            "SELECT f.oid, quote_ident(n.nspname) AS schema, quote_ident(f.opfname) AS name, \
                    quote_ident(am.amname) AS method \
             FROM pg_opfamily f \
             JOIN pg_namespace n ON f.opfnamespace = n.oid \
             JOIN pg_am am ON f.opfmethod = am.oid \
             WHERE {} AND {} \
             ORDER BY f.oid",
            schema_clause("n"),
            extension_clause("f.oid"),
        );
        let rows = self
            .client
            .query(&query, &self.filter.schema_params())
            .await?;
        let mut members = self.operator_members("pg_opfamily").await?;
        rows.iter()
            .map(|row| {
                let oid = row.try_get("oid")?;
                Ok(OperatorFamily {
                    oid,
                    schema: row.try_get("schema")?,
                    name: row.try_get("name")?,
                    method: row.try_get("method")?,
                    members: members.remove(&oid).unwrap_or_default(),
                })
            })
            .collect()
    }

    pub async fn operator_classes(&self) -> Result<Vec<OperatorClass>, CatalogError> {
        let query = format!(
            "SELECT c.oid, quote_ident(n.nspname) AS schema, quote_ident(c.opcname) AS name, \
                    quote_ident(am.amname) AS method, \
                    format_type(c.opcintype, NULL) AS type_name, c.opcdefault AS is_default, \
                    quote_ident(fn.nspname) || '.' || quote_ident(f.opfname) AS family, \
                    CASE WHEN c.opckeytype <> 0 \
                         THEN format_type(c.opckeytype, NULL) END AS storage \
             FROM pg_opclass c \
             JOIN pg_namespace n ON c.opcnamespace = n.oid \
             JOIN pg_am am ON c.opcmethod = am.oid \
             JOIN pg_opfamily f ON c.opcfamily = f.oid \
             JOIN pg_namespace fn ON f.opfnamespace = fn.oid \
             WHERE {} AND {} \
             ORDER BY c.oid",
            schema_clause("n"),
            extension_clause("c.oid"),
        );
        let rows = self
            .client
            .query(&query, &self.filter.schema_params())
            .await?;
        let mut members = self.operator_members("pg_opclass").await?;
        rows.iter()
            .map(|row| {
                let oid = row.try_get("oid")?;
                Ok(OperatorClass {
                    oid,
                    schema: row.try_get("schema")?,
                    name: row.try_get("name")?,
                    method: row.try_get("method")?,
                    type_name: row.try_get("type_name")?,
                    is_default: row.try_get("is_default")?,
                    family: row.try_get("family")?,
                    storage: row.try_get("storage")?,
                    members: members.remove(&oid).unwrap_or_default(),
                })
            })
            .collect()
    }

    /// The `OPERATOR` and `FUNCTION` items of access method families or
    /// classes, keyed by the family or class they depend on. `owner` is
    /// `pg_opfamily` for loose family members or `pg_opclass` for the
    /// members of classes.
    async fn operator_members(
        &self,
        owner: &'static str,
    ) -> Result<BTreeMap<Oid, Vec<String>>, CatalogError> {
        let query = format!(
            "SELECT d.refobjid AS owner, \
                    'OPERATOR ' || o.amopstrategy || ' ' || o.amopopr::regoperator::text \
                    || CASE WHEN o.amoppurpose = 'o' \
                            THEN ' FOR ORDER BY ' || ( \
                                SELECT quote_ident(sn.nspname) || '.' || quote_ident(sf.opfname) \
                                FROM pg_opfamily sf \
                                JOIN pg_namespace sn ON sf.opfnamespace = sn.oid \
                                WHERE sf.oid = o.amopsortfamily) \
                            ELSE '' END AS item, \
                    1 AS kind, o.amopstrategy::int4 AS number \
             FROM pg_amop o \
             JOIN pg_depend d ON d.classid = 'pg_amop'::regclass AND d.objid = o.oid \
             WHERE d.refclassid = '{owner}'::regclass AND d.refobjid >= {first} \
             UNION ALL \
             SELECT d.refobjid, \
                    'FUNCTION ' || p.amprocnum || ' (' || format_type(p.amproclefttype, NULL) \
                    || ', ' || format_type(p.amprocrighttype, NULL) || ') ' \
                    || p.amproc::regprocedure::text, \
                    2, p.amprocnum::int4 \
             FROM pg_amproc p \
             JOIN pg_depend d ON d.classid = 'pg_amproc'::regclass AND d.objid = p.oid \
             WHERE d.refclassid = '{owner}'::regclass AND d.refobjid >= {first} \
             ORDER BY 1, 3, 4",
            first = FIRST_NORMAL_OID,
        );
        let rows = self.client.query(&query, &[]).await?;
        group_rows(&rows, |row| Ok((row.try_get(0)?, row.try_get(1)?)))
    }
}
