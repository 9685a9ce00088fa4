// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Text search parsers, templates, dictionaries and configurations.

use tracing::debug;

use super::{
    CatalogError, FIRST_NORMAL_OID, PgCatalog, extension_clause, group_rows, proc_name,
    schema_clause,
};
use crate::object::{
    TextSearchConfiguration, TextSearchDictionary, TextSearchMapping, TextSearchParser,
    TextSearchTemplate,
};

impl PgCatalog<'_> {
    pub async fn text_search_parsers(&self) -> Result<Vec<TextSearchParser>, CatalogError> {
        let query = format!(
            "SELECT p.oid, quote_ident(n.nspname) AS schema, quote_ident(p.prsname) AS name, \
                    {} AS start_function, {} AS token_function, {} AS end_function, \
                    {} AS lextypes_function, {} AS headline_function \
             FROM pg_ts_parser p \
             JOIN pg_namespace n ON p.prsnamespace = n.oid \
             WHERE {} AND {} \
             ORDER BY p.oid",
            proc_name("p.prsstart"),
            proc_name("p.prstoken"),
            proc_name("p.prsend"),
            proc_name("p.prslextype"),
            proc_name("p.prsheadline"),
            schema_clause("n"),
            extension_clause("p.oid"),
        );
        let rows = self
            .client
            .query(&query, &self.filter.schema_params())
            .await?;
        rows.iter()
            .map(|row| {
                Ok(TextSearchParser {
                    oid: row.try_get("oid")?,
                    schema: row.try_get("schema")?,
                    name: row.try_get("name")?,
                    start: row.try_get("start_function")?,
                    get_token: row.try_get("token_function")?,
                    end: row.try_get("end_function")?,
                    lex_types: row.try_get("lextypes_function")?,
                    headline: row.try_get("headline_function")?,
                })
            })
            .collect()
    }

    pub async fn text_search_templates(&self) -> Result<Vec<TextSearchTemplate>, CatalogError> {
        let query = format!(
            "SELECT t.oid, quote_ident(n.nspname) AS schema, quote_ident(t.tmplname) AS name, \
                    {} AS init_function, {} AS lexize_function \
             FROM pg_ts_template t \
             JOIN pg_namespace n ON t.tmplnamespace = n.oid \
             WHERE {} AND {} \
             ORDER BY t.oid",
            proc_name("t.tmplinit"),
            proc_name("t.tmpllexize"),
            schema_clause("n"),
            extension_clause("t.oid"),
        );
        let rows = self
            .client
            .query(&query, &self.filter.schema_params())
            .await?;
        rows.iter()
            .map(|row| {
                Ok(TextSearchTemplate {
                    oid: row.try_get("oid")?,
                    schema: row.try_get("schema")?,
                    name: row.try_get("name")?,
                    init: row.try_get("init_function")?,
                    lexize: row.try_get("lexize_function")?,
                })
            })
            .collect()
    }

    pub async fn text_search_dictionaries(
        &self,
    ) -> Result<Vec<TextSearchDictionary>, CatalogError> {
        let query = format!(
            "SELECT d.oid, quote_ident(n.nspname) AS schema, quote_ident(d.dictname) AS name, \
                    quote_ident(tn.nspname) || '.' || quote_ident(t.tmplname) AS template, \
                    d.dictinitoption AS options \
             FROM pg_ts_dict d \
             JOIN pg_namespace n ON d.dictnamespace = n.oid \
             JOIN pg_ts_template t ON d.dicttemplate = t.oid \
             JOIN pg_namespace tn ON t.tmplnamespace = tn.oid \
             WHERE {} AND {} \
             ORDER BY d.oid",
            schema_clause("n"),
            extension_clause("d.oid"),
        );
        let rows = self
            .client
            .query(&query, &self.filter.schema_params())
            .await?;
        rows.iter()
            .map(|row| {
                Ok(TextSearchDictionary {
                    oid: row.try_get("oid")?,
                    schema: row.try_get("schema")?,
                    name: row.try_get("name")?,
                    template: row.try_get("template")?,
                    options: row.try_get("options")?,
                })
            })
            .collect()
    }

    /// Configurations with their token mappings, in token type order.
    pub async fn text_search_configurations(
        &self,
    ) -> Result<Vec<TextSearchConfiguration>, CatalogError> {
        let query = format!(
            "SELECT c.oid, quote_ident(n.nspname) AS schema, quote_ident(c.cfgname) AS name, \
                    quote_ident(pn.nspname) || '.' || quote_ident(p.prsname) AS parser \
             FROM pg_ts_config c \
             JOIN pg_namespace n ON c.cfgnamespace = n.oid \
             JOIN pg_ts_parser p ON c.cfgparser = p.oid \
             JOIN pg_namespace pn ON p.prsnamespace = pn.oid \
             WHERE {} AND {} \
             ORDER BY c.oid",
            schema_clause("n"),
            extension_clause("c.oid"),
        );
        let rows = self
            .client
            .query(&query, &self.filter.schema_params())
            .await?;
        let mapping_rows = self
            .client
            .query(
                "SELECT m.mapcfg, t.alias, \
                        array_agg(quote_ident(dn.nspname) || '.' || quote_ident(d.dictname) \
                                  ORDER BY m.mapseqno) AS dictionaries \
                 FROM pg_ts_config_map m \
                 JOIN pg_ts_config c ON m.mapcfg = c.oid \
                 JOIN pg_ts_dict d ON m.mapdict = d.oid \
                 JOIN pg_namespace dn ON d.dictnamespace = dn.oid \
                 CROSS JOIN LATERAL ts_token_type(c.cfgparser) t \
                 WHERE t.tokid = m.maptokentype AND c.oid >= $1 \
                 GROUP BY m.mapcfg, m.maptokentype, t.alias \
                 ORDER BY m.mapcfg, m.maptokentype",
                &[&FIRST_NORMAL_OID],
            )
            .await?;
        let mut mappings = group_rows(&mapping_rows, |row| {
            Ok((
                row.try_get("mapcfg")?,
                TextSearchMapping {
                    token_type: row.try_get("alias")?,
                    dictionaries: row.try_get("dictionaries")?,
                },
            ))
        })?;
        let configurations = rows
            .iter()
            .map(|row| {
                let oid = row.try_get("oid")?;
                Ok(TextSearchConfiguration {
                    oid,
                    schema: row.try_get("schema")?,
                    name: row.try_get("name")?,
                    parser: row.try_get("parser")?,
                    mappings: mappings.remove(&oid).unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>, CatalogError>>()?;
        debug!(
            configurations = configurations.len(),
            "read text search configurations"
        );
        Ok(configurations)
    }
}
