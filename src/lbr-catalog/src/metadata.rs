// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Descriptive metadata attached to catalog objects: owners, privileges,
//! comments and security labels.
//!
//! Metadata is queried per object type, independently of the objects
//! themselves, and joined to them by OID when DDL is printed. Most objects
//! have no metadata at all, so a missing entry is the common case and reads
//! as [`ObjectMetadata::default`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::Oid;

static NO_METADATA: ObjectMetadata = ObjectMetadata {
    owner: None,
    privileges: Vec::new(),
    comment: None,
    security_label: None,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub owner: Option<String>,
    pub privileges: Vec<AclItem>,
    pub comment: Option<String>,
    pub security_label: Option<SecurityLabel>,
}

impl ObjectMetadata {
    pub fn is_empty(&self) -> bool {
        self.owner.is_none()
            && self.privileges.is_empty()
            && self.comment.is_none()
            && self.security_label.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecurityLabel {
    pub provider: String,
    pub label: String,
}

/// Metadata for every object of one or more object types, keyed by OID.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetadataMap(BTreeMap<Oid, ObjectMetadata>);

impl MetadataMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the metadata of `oid`, or empty metadata if the catalog
    /// reported none.
    pub fn get(&self, oid: Oid) -> &ObjectMetadata {
        self.0.get(&oid).unwrap_or(&NO_METADATA)
    }

    pub fn insert(&mut self, oid: Oid, metadata: ObjectMetadata) {
        self.0.insert(oid, metadata);
    }

    /// Applies `f` to the entry for `oid`, creating an empty one first if
    /// needed.
    pub fn update(&mut self, oid: Oid, f: impl FnOnce(&mut ObjectMetadata)) {
        f(self.0.entry(oid).or_default())
    }

    /// Folds several maps into one. OIDs are unique across the catalogs the
    /// maps are built from, so later maps never overwrite earlier entries in
    /// practice.
    pub fn merge<I>(maps: I) -> Self
    where
        I: IntoIterator<Item = MetadataMap>,
    {
        let mut merged = BTreeMap::new();
        for map in maps {
            merged.extend(map.0);
        }
        MetadataMap(merged)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(Oid, ObjectMetadata)> for MetadataMap {
    fn from_iter<T: IntoIterator<Item = (Oid, ObjectMetadata)>>(iter: T) -> Self {
        MetadataMap(iter.into_iter().collect())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid ACL item {item:?}: {reason}")]
pub struct AclParseError {
    item: String,
    reason: &'static str,
}

/// One entry of an object's access control list, as printed by the server
/// in `grantee=privileges/grantor` form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AclItem {
    /// `None` for `PUBLIC`.
    pub grantee: Option<String>,
    /// Privilege letters; a `*` after a letter marks the grant option.
    pub privileges: String,
    pub grantor: String,
}

impl AclItem {
    /// The SQL privilege names granted by this item, split by whether they
    /// carry the grant option.
    pub fn privilege_names(&self) -> (Vec<&'static str>, Vec<&'static str>) {
        let mut plain = Vec::new();
        let mut with_grant = Vec::new();
        let mut chars = self.privileges.chars().peekable();
        while let Some(c) = chars.next() {
            let Some(name) = privilege_name(c) else {
                continue;
            };
            if chars.peek() == Some(&'*') {
                chars.next();
                with_grant.push(name);
            } else {
                plain.push(name);
            }
        }
        (plain, with_grant)
    }

    /// The grantee as it appears in a `GRANT` statement.
    pub fn grantee_sql(&self) -> &str {
        self.grantee.as_deref().unwrap_or("PUBLIC")
    }
}

fn privilege_name(c: char) -> Option<&'static str> {
    Some(match c {
        'r' => "SELECT",
        'a' => "INSERT",
        'w' => "UPDATE",
        'd' => "DELETE",
        'D' => "TRUNCATE",
        'x' => "REFERENCES",
        't' => "TRIGGER",
        'X' => "EXECUTE",
        'U' => "USAGE",
        'C' => "CREATE",
        'c' => "CONNECT",
        'T' => "TEMPORARY",
        _ => return None,
    })
}

impl FromStr for AclItem {
    type Err = AclParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| AclParseError {
            item: s.to_string(),
            reason,
        };
        let (grantee, rest) = split_role(s, '=').ok_or_else(|| err("missing '='"))?;
        let (privileges, grantor) = rest.split_once('/').ok_or_else(|| err("missing '/'"))?;
        if grantor.is_empty() {
            return Err(err("missing grantor"));
        }
        Ok(AclItem {
            grantee: if grantee.is_empty() {
                None
            } else {
                // Role names stay quoted as the server printed them, ready to
                // be spliced into SQL.
                Some(grantee.to_string())
            },
            privileges: privileges.to_string(),
            grantor: grantor.to_string(),
        })
    }
}

impl fmt::Display for AclItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}/{}",
            self.grantee.as_deref().unwrap_or(""),
            self.privileges,
            self.grantor
        )
    }
}

/// Splits at the first `delim` that is not inside a double-quoted role name.
fn split_role(s: &str, delim: char) -> Option<(&str, &str)> {
    let mut quoted = false;
    for (i, c) in s.char_indices() {
        match c {
            '"' => quoted = !quoted,
            c if c == delim && !quoted => return Some((&s[..i], &s[i + 1..])),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_metadata_reads_as_empty() {
        let map = MetadataMap::new();
        assert!(map.get(42).is_empty());
    }

    #[test]
    fn merge_keeps_all_entries() {
        let mut a = MetadataMap::new();
        a.insert(
            1,
            ObjectMetadata {
                owner: Some("alice".into()),
                ..Default::default()
            },
        );
        let mut b = MetadataMap::new();
        b.update(2, |m| m.comment = Some("hello".into()));
        let merged = MetadataMap::merge([a, b]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get(1).owner.as_deref(), Some("alice"));
        assert_eq!(merged.get(2).comment.as_deref(), Some("hello"));
    }

    #[test]
    fn parse_acl_items() {
        let item: AclItem = "alice=arw*/postgres".parse().unwrap();
        assert_eq!(item.grantee.as_deref(), Some("alice"));
        assert_eq!(item.grantor, "postgres");
        let (plain, with_grant) = item.privilege_names();
        assert_eq!(plain, vec!["INSERT", "SELECT"]);
        assert_eq!(with_grant, vec!["UPDATE"]);

        let public: AclItem = "=X/owner".parse().unwrap();
        assert_eq!(public.grantee_sql(), "PUBLIC");
        assert_eq!(public.to_string(), "=X/owner");

        let quoted: AclItem = r#""we=ird"=U/owner"#.parse().unwrap();
        assert_eq!(quoted.grantee.as_deref(), Some(r#""we=ird""#));

        assert!("alice".parse::<AclItem>().is_err());
        assert!("alice=r".parse::<AclItem>().is_err());
        assert!("alice=r/".parse::<AclItem>().is_err());
    }
}
