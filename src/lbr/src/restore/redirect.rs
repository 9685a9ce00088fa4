// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Restoring into a database or schema with a different name.

use lbr_catalog::ObjectType;
use lbr_toc::StatementWithType;
use regex::Regex;
use tracing::warn;

/// Rewrites `DATABASE <original>` to `DATABASE <target>` in the statements
/// that name the database itself. Both names must be quoted.
///
/// A name is only replaced where it is followed by `;`, ` OWNER`, ` SET`,
/// ` FROM`, ` TO` or ` IS`, so that a longer name sharing a prefix with
/// `original` is left alone. Only the first occurrence is replaced, which
/// leaves string literals such as comments untouched. Statements of any
/// other type are returned unchanged.
pub fn substitute_redirect_database(
    statements: Vec<StatementWithType>,
    original: &str,
    target: &str,
) -> Vec<StatementWithType> {
    let pattern = format!(
        "DATABASE {}(;| OWNER| SET| FROM| TO| IS)",
        regex::escape(original)
    );
    let pattern = match Regex::new(&pattern) {
        Ok(pattern) => pattern,
        Err(e) => {
            warn!("cannot redirect database {original}: {e}");
            return statements;
        }
    };
    let replacement = format!("DATABASE {}$1", target.replace('$', "$$"));
    statements
        .into_iter()
        .map(|mut statement| {
            if ObjectType::DATABASE_SCOPED.contains(&statement.object_type) {
                statement.statement = pattern
                    .replacen(&statement.statement, 1, replacement.as_str())
                    .into_owned();
            }
            statement
        })
        .collect()
}

/// Whether `statement` still refers to the database named `name` ahead of
/// its first string literal.
pub fn mentions_database(statement: &str, name: &str) -> bool {
    let code = statement.split('\'').next().unwrap_or_default();
    let pattern = format!(r"DATABASE {}(\s|;|$)", regex::escape(name));
    Regex::new(&pattern).is_ok_and(|re| re.is_match(code))
}

/// Moves every schema-scoped statement into the existing schema `target`,
/// which must be quoted.
///
/// `CREATE SCHEMA` and schema metadata are dropped. In every other
/// statement, names qualified with the statement's own schema are
/// requalified with `target` where the qualifier starts the statement or
/// follows whitespace, `(`, `,`, `=` or `'`. References into other schemas
/// are left alone. Statements without a schema are returned unchanged.
pub fn substitute_redirect_schema(
    statements: Vec<StatementWithType>,
    target: &str,
) -> Vec<StatementWithType> {
    statements
        .into_iter()
        .filter(|statement| statement.object_type != ObjectType::Schema)
        .map(|mut statement| {
            if statement.schema.is_empty() || statement.schema == target {
                return statement;
            }
            let pattern = format!(r"(^|[\s(,='])({})\.", regex::escape(&statement.schema));
            match Regex::new(&pattern) {
                Ok(pattern) => {
                    let replacement = format!("${{1}}{}.", target.replace('$', "$$"));
                    statement.statement = pattern
                        .replace_all(&statement.statement, replacement.as_str())
                        .into_owned();
                }
                Err(e) => warn!("cannot redirect schema {}: {e}", statement.schema),
            }
            let prefix = format!("{}.", statement.schema);
            if let Some(table) = &mut statement.reference_object
                && let Some(name) = table.strip_prefix(&prefix)
            {
                *table = format!("{target}.{name}");
            }
            statement.schema = target.to_string();
            statement
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statement(object_type: ObjectType, sql: &str) -> StatementWithType {
        StatementWithType {
            schema: String::new(),
            name: String::new(),
            object_type,
            reference_object: None,
            statement: sql.into(),
        }
    }

    fn redirect(statements: Vec<StatementWithType>, from: &str, to: &str) -> Vec<String> {
        substitute_redirect_database(statements, from, to)
            .into_iter()
            .map(|s| s.statement)
            .collect()
    }

    #[test]
    fn rewrites_database_statements() {
        let rewritten = redirect(
            vec![
                statement(ObjectType::Database, "CREATE DATABASE foo;"),
                statement(ObjectType::DatabaseMetadata, "ALTER DATABASE foo OWNER TO alice;"),
                statement(ObjectType::DatabaseGuc, "ALTER DATABASE foo SET work_mem TO '64MB';"),
            ],
            "foo",
            "bar2",
        );
        assert_eq!(
            rewritten,
            vec![
                "CREATE DATABASE bar2;",
                "ALTER DATABASE bar2 OWNER TO alice;",
                "ALTER DATABASE bar2 SET work_mem TO '64MB';",
            ]
        );
    }

    #[test]
    fn rewrites_privileges_and_comments() {
        let rewritten = redirect(
            vec![
                statement(ObjectType::DatabaseMetadata, "REVOKE ALL ON DATABASE foo FROM PUBLIC;"),
                statement(ObjectType::DatabaseMetadata, "GRANT CONNECT ON DATABASE foo TO bob;"),
                statement(
                    ObjectType::DatabaseMetadata,
                    "COMMENT ON DATABASE foo IS 'copy of DATABASE foo;';",
                ),
                statement(
                    ObjectType::DatabaseMetadata,
                    "SECURITY LABEL FOR selinux ON DATABASE foo IS 'x';",
                ),
            ],
            "foo",
            "bar2",
        );
        assert_eq!(
            rewritten,
            vec![
                "REVOKE ALL ON DATABASE bar2 FROM PUBLIC;",
                "GRANT CONNECT ON DATABASE bar2 TO bob;",
                "COMMENT ON DATABASE bar2 IS 'copy of DATABASE foo;';",
                "SECURITY LABEL FOR selinux ON DATABASE bar2 IS 'x';",
            ]
        );
        assert!(rewritten.iter().all(|s| !mentions_database(s, "foo")));
    }

    #[test]
    fn leaves_other_statements_alone() {
        let rewritten = redirect(
            vec![
                statement(ObjectType::DatabaseMetadata, "GRANT ALL ON bar.baz TO x;"),
                statement(ObjectType::Role, "COMMENT ON ROLE x IS 'DATABASE foo;';"),
                statement(ObjectType::Database, "CREATE DATABASE foobar;"),
            ],
            "foo",
            "bar2",
        );
        assert_eq!(
            rewritten,
            vec![
                "GRANT ALL ON bar.baz TO x;",
                "COMMENT ON ROLE x IS 'DATABASE foo;';",
                "CREATE DATABASE foobar;",
            ]
        );
    }

    #[test]
    fn quoted_names_are_matched_literally() {
        let rewritten = redirect(
            vec![statement(ObjectType::Database, "CREATE DATABASE \"my.db\";")],
            "\"my.db\"",
            "\"new$1db\"",
        );
        assert_eq!(rewritten, vec!["CREATE DATABASE \"new$1db\";"]);
        assert!(!mentions_database("CREATE DATABASE \"myxdb\";", "\"my.db\""));
    }

    fn in_schema(object_type: ObjectType, schema: &str, sql: &str) -> StatementWithType {
        StatementWithType {
            schema: schema.into(),
            ..statement(object_type, sql)
        }
    }

    #[test]
    fn schema_redirect_requalifies_own_schema() {
        let mut index = in_schema(
            ObjectType::Index,
            "app",
            "CREATE INDEX orders_idx ON app.orders USING btree (id);",
        );
        index.reference_object = Some("app.orders".into());
        let redirected = substitute_redirect_schema(
            vec![
                in_schema(ObjectType::Schema, "app", "CREATE SCHEMA app;"),
                in_schema(
                    ObjectType::Table,
                    "app",
                    "CREATE TABLE app.orders (\n\tid integer DEFAULT nextval('app.orders_id_seq'::regclass),\n\tc other.kind\n);\nCOMMENT ON TABLE app.orders IS 'myapp.orders';",
                ),
                index,
                statement(ObjectType::Role, "CREATE ROLE app;"),
            ],
            "\"New$1\"",
        );
        assert_eq!(redirected.len(), 3);
        assert_eq!(redirected[0].schema, "\"New$1\"");
        assert_eq!(
            redirected[0].statement,
            "CREATE TABLE \"New$1\".orders (\n\tid integer DEFAULT nextval('\"New$1\".orders_id_seq'::regclass),\n\tc other.kind\n);\nCOMMENT ON TABLE \"New$1\".orders IS 'myapp.orders';"
        );
        assert_eq!(
            redirected[1].statement,
            "CREATE INDEX orders_idx ON \"New$1\".orders USING btree (id);"
        );
        assert_eq!(
            redirected[1].reference_object.as_deref(),
            Some("\"New$1\".orders")
        );
        assert_eq!(redirected[2].statement, "CREATE ROLE app;");
    }

    #[test]
    fn detects_leftover_references() {
        assert!(mentions_database("COMMENT ON DATABASE foo IS 'x';", "foo"));
        assert!(!mentions_database("COMMENT ON DATABASE foobar IS 'x';", "foo"));
    }
}
