// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Fully qualified `schema.table` names as users write them.

use std::fmt;

use crate::FilterError;

/// A `schema.table` name split into its two identifiers.
///
/// Identifiers are stored unquoted: surrounding double quotes are removed
/// and doubled quotes inside them are collapsed. Case is preserved; the
/// server decides how each identifier has to be quoted.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Fqn {
    pub schema: String,
    pub table: String,
}

impl Fqn {
    pub fn parse(name: &str) -> Result<Fqn, FilterError> {
        let mut parts = split_identifiers(name)?;
        if parts.len() > 2 {
            return Err(FilterError::EmbeddedDots {
                name: name.to_string(),
            });
        }
        if parts.len() < 2 {
            return Err(FilterError::MissingDot {
                name: name.to_string(),
            });
        }
        let table = parts.pop().unwrap_or_default();
        let schema = parts.pop().unwrap_or_default();
        if schema.is_empty() || table.is_empty() {
            return Err(FilterError::EmptyPart {
                name: name.to_string(),
            });
        }
        Ok(Fqn { schema, table })
    }
}

impl fmt::Display for Fqn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Removes the quoting from a single identifier, e.g. a database name as
/// the server's `quote_ident` printed it.
pub fn unquote_identifier(name: &str) -> Result<String, FilterError> {
    let mut parts = split_identifiers(name)?;
    match parts.pop() {
        Some(ident) if parts.is_empty() && !ident.is_empty() => Ok(ident),
        Some(ident) if ident.is_empty() => Err(FilterError::EmptyPart {
            name: name.to_string(),
        }),
        _ => Err(FilterError::EmbeddedDots {
            name: name.to_string(),
        }),
    }
}

/// Checks the overall shape of user supplied table names: something, a dot,
/// something, with no surrounding whitespace.
pub fn validate_fully_qualified(names: &[String]) -> Result<(), FilterError> {
    for name in names {
        let well_formed = name.trim() == name
            && name
                .split_once('.')
                .is_some_and(|(schema, table)| !schema.is_empty() && !table.is_empty());
        if !well_formed {
            return Err(FilterError::NotFullyQualified { name: name.clone() });
        }
    }
    Ok(())
}

/// Splits at dots outside of double quotes, unquoting each identifier.
fn split_identifiers(name: &str) -> Result<Vec<String>, FilterError> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = name.chars().peekable();
    let mut quoted = false;
    while let Some(c) = chars.next() {
        match (c, quoted) {
            ('"', false) => quoted = true,
            ('"', true) if chars.peek() == Some(&'"') => {
                chars.next();
                current.push('"');
            }
            ('"', true) => quoted = false,
            ('.', false) => parts.push(std::mem::take(&mut current)),
            (c, _) => current.push(c),
        }
    }
    if quoted {
        return Err(FilterError::UnterminatedQuote {
            name: name.to_string(),
        });
    }
    parts.push(current);
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fqn(schema: &str, table: &str) -> Fqn {
        Fqn {
            schema: schema.into(),
            table: table.into(),
        }
    }

    #[test]
    fn parses_plain_and_quoted_names() {
        assert_eq!(Fqn::parse("public.foo").unwrap(), fqn("public", "foo"));
        assert_eq!(Fqn::parse("Public.Foo").unwrap(), fqn("Public", "Foo"));
        assert_eq!(
            Fqn::parse(r#""my.schema"."a ""b"" c""#).unwrap(),
            fqn("my.schema", r#"a "b" c"#)
        );
        assert_eq!(Fqn::parse(r#"s."t""#).unwrap(), fqn("s", "t"));
    }

    #[test]
    fn rejects_malformed_names() {
        for (name, expected) in [
            ("foo", "minimum of one dot"),
            ("a.b.c", "embedded dots"),
            (".foo", "must specify the schema and table"),
            ("foo.", "must specify the schema and table"),
            (r#""foo.bar"#, "unterminated"),
        ] {
            let err = Fqn::parse(name).unwrap_err().to_string();
            assert!(err.contains(expected), "{name}: {err}");
            assert!(err.contains(name), "{name}: {err}");
        }
    }

    #[test]
    fn unquotes_single_identifiers() {
        assert_eq!(unquote_identifier("sales").unwrap(), "sales");
        assert_eq!(unquote_identifier(r#""Sales ""EU""""#).unwrap(), r#"Sales "EU""#);
        assert_eq!(unquote_identifier(r#""a.b""#).unwrap(), "a.b");
        assert!(matches!(
            unquote_identifier("a.b"),
            Err(FilterError::EmbeddedDots { .. })
        ));
        assert!(matches!(
            unquote_identifier(r#""""#),
            Err(FilterError::EmptyPart { .. })
        ));
    }

    #[test]
    fn validation_names_the_offending_entry() {
        assert!(validate_fully_qualified(&["public.foo".into(), "a.b".into()]).is_ok());
        for bad in ["nodot", "public.", " public.foo", "public.foo\t"] {
            let err = validate_fully_qualified(&["public.ok".into(), bad.into()]).unwrap_err();
            assert!(
                matches!(&err, FilterError::NotFullyQualified { name } if name == bad),
                "{err}"
            );
            assert!(err.to_string().contains("format schema.table"));
        }
    }
}
