// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Operators, operator families and operator classes.

use std::io::Write;

use lbr_catalog::object::{Operator, OperatorClass, OperatorFamily};
use lbr_catalog::{MetadataMap, ObjectType};
use lbr_toc::{ByteCountWriter, Section, Toc, TocError};

use super::{MetadataTarget, with_metadata};

const MEMBER_SEPARATOR: &str = ",\n    ";

pub fn print_create_operator_statements<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    operators: &[Operator],
    metadata: &MetadataMap,
) -> Result<(), TocError> {
    for op in operators {
        let mut options = vec![format!("FUNCTION = {}", op.function)];
        if let Some(left) = &op.left {
            options.push(format!("LEFTARG = {left}"));
        }
        if let Some(right) = &op.right {
            options.push(format!("RIGHTARG = {right}"));
        }
        for (option, value) in [
            ("COMMUTATOR", &op.commutator),
            ("NEGATOR", &op.negator),
            ("RESTRICT", &op.restrict),
            ("JOIN", &op.join),
        ] {
            if let Some(value) = value {
                options.push(format!("{option} = {value}"));
            }
        }
        if op.hashes {
            options.push("HASHES".into());
        }
        if op.merges {
            options.push("MERGES".into());
        }
        let create = format!(
            "CREATE OPERATOR {}.{} (\n    {}\n);",
            op.schema,
            op.name,
            options.join(MEMBER_SEPARATOR)
        );
        let name = op.toc_name();
        let target = MetadataTarget::new(
            "OPERATOR",
            &format!("{}.{name}", op.schema),
            metadata.get(op.oid),
        );
        let statement = with_metadata(create, &target);
        toc.append(Section::Predata, w, ObjectType::Operator, &op.schema, &name, &statement)?;
    }
    Ok(())
}

/// Prints every family, and adds the members that belong to none of its
/// classes. Members of classes are printed with the class.
pub fn print_create_operator_family_statements<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    families: &[OperatorFamily],
    metadata: &MetadataMap,
) -> Result<(), TocError> {
    for family in families {
        let name = format!("{}.{} USING {}", family.schema, family.name, family.method);
        let mut create = format!("CREATE OPERATOR FAMILY {name};");
        if !family.members.is_empty() {
            create.push_str(&format!(
                "\nALTER OPERATOR FAMILY {name} ADD\n    {};",
                family.members.join(MEMBER_SEPARATOR)
            ));
        }
        let target = MetadataTarget::new("OPERATOR FAMILY", &name, metadata.get(family.oid));
        let statement = with_metadata(create, &target);
        toc.append(
            Section::Predata,
            w,
            ObjectType::OperatorFamily,
            &family.schema,
            &family.name,
            &statement,
        )?;
    }
    Ok(())
}

/// Prints every class into its family, which has been created already.
pub fn print_create_operator_class_statements<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    classes: &[OperatorClass],
    metadata: &MetadataMap,
) -> Result<(), TocError> {
    for class in classes {
        let mut items = class.members.clone();
        match &class.storage {
            Some(storage) => items.push(format!("STORAGE {storage}")),
            // A class needs at least one item.
            None if items.is_empty() => items.push(format!("STORAGE {}", class.type_name)),
            None => {}
        }
        let name = format!("{}.{} USING {}", class.schema, class.name, class.method);
        let create = format!(
            "CREATE OPERATOR CLASS {}.{} {}FOR TYPE {} USING {} FAMILY {} AS\n    {};",
            class.schema,
            class.name,
            if class.is_default { "DEFAULT " } else { "" },
            class.type_name,
            class.method,
            class.family,
            items.join(MEMBER_SEPARATOR)
        );
        let target = MetadataTarget::new("OPERATOR CLASS", &name, metadata.get(class.oid));
        let statement = with_metadata(create, &target);
        toc.append(
            Section::Predata,
            w,
            ObjectType::OperatorClass,
            &class.schema,
            &class.name,
            &statement,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::tests::{owned_by, statements};
    use super::*;

    #[test]
    fn operators_name_their_argument_types() {
        let mut toc = Toc::new();
        let mut w = ByteCountWriter::new(Vec::new());
        let equals = Operator {
            oid: 16800,
            schema: "app".into(),
            name: "===".into(),
            left: Some("app.money2".into()),
            right: Some("app.money2".into()),
            function: "app.money2_eq".into(),
            commutator: Some("OPERATOR(app.===)".into()),
            negator: None,
            restrict: Some("eqsel".into()),
            join: Some("eqjoinsel".into()),
            hashes: true,
            merges: false,
        };
        let negate = Operator {
            oid: 16801,
            name: "~~~".into(),
            left: None,
            right: Some("integer".into()),
            function: "app.negate".into(),
            commutator: None,
            restrict: None,
            join: None,
            hashes: false,
            ..equals.clone()
        };
        let metadata: MetadataMap = [(16801, owned_by("alice"))].into_iter().collect();
        print_create_operator_statements(&mut toc, &mut w, &[equals, negate], &metadata).unwrap();
        assert_eq!(toc.predata_entries[0].name, "=== (app.money2, app.money2)");
        assert_eq!(toc.predata_entries[1].name, "~~~ (NONE, integer)");
        let printed = statements(&toc, Section::Predata, w);
        assert_eq!(
            printed,
            vec![
                "CREATE OPERATOR app.=== (\n    \
                 FUNCTION = app.money2_eq,\n    \
                 LEFTARG = app.money2,\n    \
                 RIGHTARG = app.money2,\n    \
                 COMMUTATOR = OPERATOR(app.===),\n    \
                 RESTRICT = eqsel,\n    \
                 JOIN = eqjoinsel,\n    \
                 HASHES\n);",
                "CREATE OPERATOR app.~~~ (\n    \
                 FUNCTION = app.negate,\n    \
                 RIGHTARG = integer\n);\n\
                 ALTER OPERATOR app.~~~ (NONE, integer) OWNER TO alice;",
            ]
        );
    }

    #[test]
    fn classes_join_their_family() {
        let mut toc = Toc::new();
        let mut w = ByteCountWriter::new(Vec::new());
        let family = OperatorFamily {
            oid: 16810,
            schema: "app".into(),
            name: "money2_ops".into(),
            method: "btree".into(),
            members: vec!["OPERATOR 1 app.<(app.money2,integer)".into()],
        };
        let class = OperatorClass {
            oid: 16811,
            schema: "app".into(),
            name: "money2_ops".into(),
            method: "btree".into(),
            type_name: "app.money2".into(),
            is_default: true,
            family: "app.money2_ops".into(),
            storage: None,
            members: vec![
                "OPERATOR 1 app.<(app.money2,app.money2)".into(),
                "FUNCTION 1 (app.money2, app.money2) app.money2_cmp(app.money2,app.money2)".into(),
            ],
        };
        let empty = OperatorClass {
            oid: 16812,
            name: "money2_hash".into(),
            method: "hash".into(),
            is_default: false,
            members: vec![],
            ..class.clone()
        };
        let metadata: MetadataMap = [(16811, owned_by("alice"))].into_iter().collect();
        print_create_operator_family_statements(&mut toc, &mut w, &[family], &metadata).unwrap();
        print_create_operator_class_statements(&mut toc, &mut w, &[class, empty], &metadata)
            .unwrap();
        let printed = statements(&toc, Section::Predata, w);
        assert_eq!(
            printed,
            vec![
                "CREATE OPERATOR FAMILY app.money2_ops USING btree;\n\
                 ALTER OPERATOR FAMILY app.money2_ops USING btree ADD\n    \
                 OPERATOR 1 app.<(app.money2,integer);",
                "CREATE OPERATOR CLASS app.money2_ops DEFAULT FOR TYPE app.money2 USING btree \
                 FAMILY app.money2_ops AS\n    \
                 OPERATOR 1 app.<(app.money2,app.money2),\n    \
                 FUNCTION 1 (app.money2, app.money2) app.money2_cmp(app.money2,app.money2);\n\
                 ALTER OPERATOR CLASS app.money2_ops USING btree OWNER TO alice;",
                "CREATE OPERATOR CLASS app.money2_hash FOR TYPE app.money2 USING hash \
                 FAMILY app.money2_ops AS\n    \
                 STORAGE app.money2;",
            ]
        );
    }
}
