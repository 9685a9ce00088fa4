// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of statement recorded in a table of contents entry.
///
/// The serialized names are part of the on-disk format and must not change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    #[serde(rename = "SESSION GUCS")]
    SessionGucs,
    #[serde(rename = "DATABASE GUC")]
    DatabaseGuc,
    #[serde(rename = "DATABASE")]
    Database,
    #[serde(rename = "DATABASE METADATA")]
    DatabaseMetadata,
    #[serde(rename = "ROLE")]
    Role,
    #[serde(rename = "ROLE GRANT")]
    RoleGrant,
    #[serde(rename = "SCHEMA")]
    Schema,
    #[serde(rename = "TYPE")]
    Type,
    #[serde(rename = "FUNCTION")]
    Function,
    #[serde(rename = "SEQUENCE")]
    Sequence,
    #[serde(rename = "SEQUENCE OWNER")]
    SequenceOwner,
    #[serde(rename = "TABLE")]
    Table,
    #[serde(rename = "VIEW")]
    View,
    #[serde(rename = "PROCEDURAL LANGUAGE")]
    ProceduralLanguage,
    #[serde(rename = "AGGREGATE")]
    Aggregate,
    #[serde(rename = "CAST")]
    Cast,
    #[serde(rename = "CONVERSION")]
    Conversion,
    #[serde(rename = "OPERATOR")]
    Operator,
    #[serde(rename = "OPERATOR FAMILY")]
    OperatorFamily,
    #[serde(rename = "OPERATOR CLASS")]
    OperatorClass,
    #[serde(rename = "TEXT SEARCH PARSER")]
    TextSearchParser,
    #[serde(rename = "TEXT SEARCH TEMPLATE")]
    TextSearchTemplate,
    #[serde(rename = "TEXT SEARCH DICTIONARY")]
    TextSearchDictionary,
    #[serde(rename = "TEXT SEARCH CONFIGURATION")]
    TextSearchConfiguration,
    #[serde(rename = "CONSTRAINT")]
    Constraint,
    #[serde(rename = "INDEX")]
    Index,
    #[serde(rename = "RULE")]
    Rule,
    #[serde(rename = "TRIGGER")]
    Trigger,
}

impl ObjectType {
    /// The object types that name the database itself, and so have to be
    /// rewritten when restoring into a differently named database.
    pub const DATABASE_SCOPED: [ObjectType; 4] = [
        ObjectType::SessionGucs,
        ObjectType::DatabaseGuc,
        ObjectType::Database,
        ObjectType::DatabaseMetadata,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::SessionGucs => "SESSION GUCS",
            ObjectType::DatabaseGuc => "DATABASE GUC",
            ObjectType::Database => "DATABASE",
            ObjectType::DatabaseMetadata => "DATABASE METADATA",
            ObjectType::Role => "ROLE",
            ObjectType::RoleGrant => "ROLE GRANT",
            ObjectType::Schema => "SCHEMA",
            ObjectType::Type => "TYPE",
            ObjectType::Function => "FUNCTION",
            ObjectType::Sequence => "SEQUENCE",
            ObjectType::SequenceOwner => "SEQUENCE OWNER",
            ObjectType::Table => "TABLE",
            ObjectType::View => "VIEW",
            ObjectType::ProceduralLanguage => "PROCEDURAL LANGUAGE",
            ObjectType::Aggregate => "AGGREGATE",
            ObjectType::Cast => "CAST",
            ObjectType::Conversion => "CONVERSION",
            ObjectType::Operator => "OPERATOR",
            ObjectType::OperatorFamily => "OPERATOR FAMILY",
            ObjectType::OperatorClass => "OPERATOR CLASS",
            ObjectType::TextSearchParser => "TEXT SEARCH PARSER",
            ObjectType::TextSearchTemplate => "TEXT SEARCH TEMPLATE",
            ObjectType::TextSearchDictionary => "TEXT SEARCH DICTIONARY",
            ObjectType::TextSearchConfiguration => "TEXT SEARCH CONFIGURATION",
            ObjectType::Constraint => "CONSTRAINT",
            ObjectType::Index => "INDEX",
            ObjectType::Rule => "RULE",
            ObjectType::Trigger => "TRIGGER",
        }
    }

    /// The system catalog holding rows of this type, if there is one.
    ///
    /// This is the class that `pg_description` and `pg_seclabel` key their
    /// entries by.
    pub fn catalog_table(&self) -> Option<&'static str> {
        match self {
            ObjectType::Database | ObjectType::DatabaseMetadata => Some("pg_database"),
            ObjectType::Role => Some("pg_authid"),
            ObjectType::Schema => Some("pg_namespace"),
            ObjectType::Type => Some("pg_type"),
            ObjectType::Function | ObjectType::Aggregate => Some("pg_proc"),
            ObjectType::ProceduralLanguage => Some("pg_language"),
            ObjectType::Cast => Some("pg_cast"),
            ObjectType::Conversion => Some("pg_conversion"),
            ObjectType::Operator => Some("pg_operator"),
            ObjectType::OperatorFamily => Some("pg_opfamily"),
            ObjectType::OperatorClass => Some("pg_opclass"),
            ObjectType::TextSearchParser => Some("pg_ts_parser"),
            ObjectType::TextSearchTemplate => Some("pg_ts_template"),
            ObjectType::TextSearchDictionary => Some("pg_ts_dict"),
            ObjectType::TextSearchConfiguration => Some("pg_ts_config"),
            ObjectType::Sequence | ObjectType::Table | ObjectType::View | ObjectType::Index => {
                Some("pg_class")
            }
            ObjectType::Constraint => Some("pg_constraint"),
            ObjectType::Rule => Some("pg_rewrite"),
            ObjectType::Trigger => Some("pg_trigger"),
            ObjectType::SessionGucs
            | ObjectType::DatabaseGuc
            | ObjectType::RoleGrant
            | ObjectType::SequenceOwner => None,
        }
    }

    /// Whether the catalog rows of this type live in a shared catalog, and so
    /// are described by `pg_shdescription` rather than `pg_description`.
    pub fn is_shared(&self) -> bool {
        matches!(
            self,
            ObjectType::Database | ObjectType::DatabaseMetadata | ObjectType::Role
        )
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_names_match_display() {
        for object_type in [
            ObjectType::SessionGucs,
            ObjectType::DatabaseMetadata,
            ObjectType::SequenceOwner,
            ObjectType::ProceduralLanguage,
            ObjectType::TextSearchConfiguration,
            ObjectType::Trigger,
        ] {
            let plain = serde_plain::to_string(&object_type).expect("unit variant");
            assert_eq!(plain, object_type.as_str());
            let back: ObjectType = serde_plain::from_str(&plain).expect("round trip");
            assert_eq!(back, object_type);
        }
    }

    #[test]
    fn database_scoped_types_have_database_catalog_or_none() {
        for object_type in ObjectType::DATABASE_SCOPED {
            assert!(matches!(
                object_type.catalog_table(),
                None | Some("pg_database")
            ));
        }
        assert!(ObjectType::Role.is_shared());
        assert!(!ObjectType::Table.is_shared());
    }
}
