// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Procedural languages, aggregates, casts and conversions.

use tokio_postgres::Row;
use tracing::debug;

use super::{
    CatalogError, FIRST_NORMAL_OID, PgCatalog, extension_clause, operator_name, proc_name,
    schema_clause,
};
use crate::Oid;
use crate::object::{
    Aggregate, Cast, CastContext, CastMethod, Conversion, MovingAggregate, ProceduralLanguage,
};

/// Maps `aggfinalmodify` and `aggmfinalmodify` to their DDL spelling.
fn final_modify(row: &Row, column: &str, oid: Oid) -> Result<String, CatalogError> {
    let value: String = row.try_get(column)?;
    let modify = match value.as_str() {
        "r" => "READ_ONLY",
        "s" => "SHAREABLE",
        "w" => "READ_WRITE",
        _ => {
            return Err(CatalogError::Unexpected {
                what: "final function modify",
                value,
                oid,
            });
        }
    };
    Ok(modify.to_string())
}

impl PgCatalog<'_> {
    /// Procedural languages created by users rather than by `initdb` or an
    /// extension.
    pub async fn procedural_languages(&self) -> Result<Vec<ProceduralLanguage>, CatalogError> {
        let query = format!(
            "SELECT l.oid, quote_ident(l.lanname) AS name, l.lanpltrusted AS trusted, \
                    {} AS handler, {} AS inline_handler, {} AS validator, \
                    ARRAY[l.lanplcallfoid, l.laninline, l.lanvalidator] AS functions \
             FROM pg_language l \
             WHERE l.lanispl AND l.oid >= $1 AND {} \
             ORDER BY l.oid",
            proc_name("l.lanplcallfoid"),
            proc_name("l.laninline"),
            proc_name("l.lanvalidator"),
            extension_clause("l.oid"),
        );
        let rows = self.client.query(&query, &[&FIRST_NORMAL_OID]).await?;
        let languages = rows
            .iter()
            .map(|row| {
                let functions: Vec<Oid> = row.try_get("functions")?;
                Ok(ProceduralLanguage {
                    oid: row.try_get("oid")?,
                    name: row.try_get("name")?,
                    trusted: row.try_get("trusted")?,
                    handler: row.try_get("handler")?,
                    inline_handler: row.try_get("inline_handler")?,
                    validator: row.try_get("validator")?,
                    functions: functions.into_iter().filter(|oid| *oid != 0).collect(),
                })
            })
            .collect::<Result<Vec<_>, CatalogError>>()?;
        debug!(languages = languages.len(), "read procedural languages");
        Ok(languages)
    }

    pub async fn aggregates(&self) -> Result<Vec<Aggregate>, CatalogError> {
        let query = format!(
            "SELECT p.oid, quote_ident(n.nspname) AS schema, quote_ident(p.proname) AS name, \
                    pg_get_function_identity_arguments(p.oid) AS arguments, \
                    pg_get_function_arguments(p.oid) AS declared_arguments, \
                    {} AS transition, format_type(a.aggtranstype, NULL) AS state_type, \
                    a.aggtransspace AS state_space, {} AS final_function, \
                    a.aggfinalextra AS final_extra, a.aggfinalmodify::text AS final_modify, \
                    {} AS combine, {} AS serial, {} AS deserial, \
                    a.agginitval AS initial_value, \
                    {} AS moving_transition, {} AS moving_inverse, \
                    CASE WHEN a.aggmtranstype <> 0 \
                         THEN format_type(a.aggmtranstype, NULL) END AS moving_state_type, \
                    a.aggmtransspace AS moving_state_space, {} AS moving_final_function, \
                    a.aggmfinalextra AS moving_final_extra, \
                    a.aggmfinalmodify::text AS moving_final_modify, \
                    a.aggminitval AS moving_initial_value, \
                    {} AS sort_operator, a.aggkind = 'h' AS hypothetical, \
                    p.proparallel::text AS parallel \
             FROM pg_aggregate a \
             JOIN pg_proc p ON a.aggfnoid = p.oid \
             JOIN pg_namespace n ON p.pronamespace = n.oid \
             WHERE {} AND {} \
             ORDER BY p.oid",
            proc_name("a.aggtransfn"),
            proc_name("a.aggfinalfn"),
            proc_name("a.aggcombinefn"),
            proc_name("a.aggserialfn"),
            proc_name("a.aggdeserialfn"),
            proc_name("a.aggmtransfn"),
            proc_name("a.aggminvtransfn"),
            proc_name("a.aggmfinalfn"),
            operator_name("a.aggsortop"),
            schema_clause("n"),
            extension_clause("p.oid"),
        );
        let rows = self
            .client
            .query(&query, &self.filter.schema_params())
            .await?;
        let aggregates = rows
            .iter()
            .map(|row| {
                let oid: Oid = row.try_get("oid")?;
                let moving_transition: Option<String> = row.try_get("moving_transition")?;
                let moving_inverse: Option<String> = row.try_get("moving_inverse")?;
                let moving_state_type: Option<String> = row.try_get("moving_state_type")?;
                let moving = match (moving_transition, moving_inverse, moving_state_type) {
                    (Some(transition), Some(inverse_transition), Some(state_type)) => {
                        Some(MovingAggregate {
                            transition,
                            inverse_transition,
                            state_type,
                            state_space: row.try_get("moving_state_space")?,
                            final_function: row.try_get("moving_final_function")?,
                            final_extra: row.try_get("moving_final_extra")?,
                            final_modify: final_modify(row, "moving_final_modify", oid)?,
                            initial_value: row.try_get("moving_initial_value")?,
                        })
                    }
                    _ => None,
                };
                let parallel: String = row.try_get("parallel")?;
                let parallel = match parallel.as_str() {
                    "s" => Some("SAFE".to_string()),
                    "r" => Some("RESTRICTED".to_string()),
                    "u" => None,
                    _ => {
                        return Err(CatalogError::Unexpected {
                            what: "parallel safety",
                            value: parallel,
                            oid,
                        });
                    }
                };
                Ok(Aggregate {
                    oid,
                    schema: row.try_get("schema")?,
                    name: row.try_get("name")?,
                    arguments: row.try_get("arguments")?,
                    declared_arguments: row.try_get("declared_arguments")?,
                    transition: row.try_get("transition")?,
                    state_type: row.try_get("state_type")?,
                    state_space: row.try_get("state_space")?,
                    final_function: row.try_get("final_function")?,
                    final_extra: row.try_get("final_extra")?,
                    final_modify: final_modify(row, "final_modify", oid)?,
                    combine: row.try_get("combine")?,
                    serial: row.try_get("serial")?,
                    deserial: row.try_get("deserial")?,
                    initial_value: row.try_get("initial_value")?,
                    moving,
                    sort_operator: row.try_get("sort_operator")?,
                    hypothetical: row.try_get("hypothetical")?,
                    parallel,
                })
            })
            .collect::<Result<Vec<_>, CatalogError>>()?;
        debug!(aggregates = aggregates.len(), "read aggregates");
        Ok(aggregates)
    }

    /// User-defined casts. They are filed under the schema of their source
    /// type but are not subject to the schema filter.
    pub async fn casts(&self) -> Result<Vec<Cast>, CatalogError> {
        let query = format!(
            "SELECT c.oid, quote_ident(n.nspname) AS schema, \
                    format_type(c.castsource, NULL) AS source, \
                    format_type(c.casttarget, NULL) AS target, \
                    c.castmethod::text AS method, \
                    CASE WHEN c.castfunc <> 0 THEN c.castfunc::regprocedure::text END AS function, \
                    c.castcontext::text AS context \
             FROM pg_cast c \
             JOIN pg_type t ON c.castsource = t.oid \
             JOIN pg_namespace n ON t.typnamespace = n.oid \
             WHERE c.oid >= $1 AND {} \
             ORDER BY c.oid",
            extension_clause("c.oid"),
        );
        let rows = self.client.query(&query, &[&FIRST_NORMAL_OID]).await?;
        rows.iter()
            .map(|row| {
                let oid: Oid = row.try_get("oid")?;
                let method: String = row.try_get("method")?;
                let function: Option<String> = row.try_get("function")?;
                let method = match (method.as_str(), function) {
                    ("f", Some(function)) => CastMethod::Function(function),
                    ("b", _) => CastMethod::Binary,
                    ("i", _) => CastMethod::InOut,
                    _ => {
                        return Err(CatalogError::Unexpected {
                            what: "cast method",
                            value: method,
                            oid,
                        });
                    }
                };
                let context: String = row.try_get("context")?;
                let context = match context.as_str() {
                    "e" => CastContext::Explicit,
                    "a" => CastContext::Assignment,
                    "i" => CastContext::Implicit,
                    _ => {
                        return Err(CatalogError::Unexpected {
                            what: "cast context",
                            value: context,
                            oid,
                        });
                    }
                };
                Ok(Cast {
                    oid,
                    schema: row.try_get("schema")?,
                    source: row.try_get("source")?,
                    target: row.try_get("target")?,
                    method,
                    context,
                })
            })
            .collect()
    }

    pub async fn conversions(&self) -> Result<Vec<Conversion>, CatalogError> {
        let query = format!(
            "SELECT c.oid, quote_ident(n.nspname) AS schema, quote_ident(c.conname) AS name, \
                    pg_encoding_to_char(c.conforencoding)::text AS source_encoding, \
                    pg_encoding_to_char(c.contoencoding)::text AS target_encoding, \
                    {} AS function, c.condefault AS is_default \
             FROM pg_conversion c \
             JOIN pg_namespace n ON c.connamespace = n.oid \
             WHERE {} AND {} \
             ORDER BY c.oid",
            proc_name("c.conproc"),
            schema_clause("n"),
            extension_clause("c.oid"),
        );
        let rows = self
            .client
            .query(&query, &self.filter.schema_params())
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Conversion {
                    oid: row.try_get("oid")?,
                    schema: row.try_get("schema")?,
                    name: row.try_get("name")?,
                    source_encoding: row.try_get("source_encoding")?,
                    target_encoding: row.try_get("target_encoding")?,
                    function: row.try_get("function")?,
                    is_default: row.try_get("is_default")?,
                })
            })
            .collect()
    }
}
