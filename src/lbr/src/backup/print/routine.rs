// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Procedural languages, aggregates, casts and conversions.

use std::collections::BTreeSet;
use std::io::Write;

use lbr_catalog::object::{
    Aggregate, Cast, CastContext, CastMethod, Conversion, Function, ProceduralLanguage,
};
use lbr_catalog::{MetadataMap, ObjectMetadata, ObjectType};
use lbr_toc::{ByteCountWriter, Section, Toc, TocError};

use super::{MetadataTarget, function_statement, quote_literal, with_metadata};

/// Prints each language preceded by the functions it is implemented by.
///
/// `handlers` are the call handlers, inline handlers and validators of
/// `languages`; they are left out of the general function list because
/// they must exist before the language and the language before every
/// function written in it.
pub fn print_create_language_statements<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    languages: &[ProceduralLanguage],
    handlers: &[Function],
    language_metadata: &MetadataMap,
    function_metadata: &MetadataMap,
) -> Result<(), TocError> {
    let mut printed = BTreeSet::new();
    for language in languages {
        for f in handlers.iter().filter(|f| language.functions.contains(&f.oid)) {
            if !printed.insert(f.oid) {
                continue;
            }
            let statement = function_statement(f, function_metadata.get(f.oid));
            let name = format!("{}({})", f.name, f.arguments);
            toc.append(Section::Predata, w, ObjectType::Function, &f.schema, &name, &statement)?;
        }
        let statement = language_statement(language, language_metadata.get(language.oid));
        toc.append(
            Section::Predata,
            w,
            ObjectType::ProceduralLanguage,
            "",
            &language.name,
            &statement,
        )?;
    }
    Ok(())
}

fn language_statement(language: &ProceduralLanguage, metadata: &ObjectMetadata) -> String {
    let mut create = format!(
        "CREATE {}PROCEDURAL LANGUAGE {} HANDLER {}",
        if language.trusted { "TRUSTED " } else { "" },
        language.name,
        language.handler
    );
    if let Some(inline) = &language.inline_handler {
        create.push_str(&format!(" INLINE {inline}"));
    }
    if let Some(validator) = &language.validator {
        create.push_str(&format!(" VALIDATOR {validator}"));
    }
    create.push(';');
    with_metadata(create, &MetadataTarget::new("LANGUAGE", &language.name, metadata))
}

pub fn print_create_aggregate_statements<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    aggregates: &[Aggregate],
    metadata: &MetadataMap,
) -> Result<(), TocError> {
    for a in aggregates {
        let statement = aggregate_statement(a, metadata.get(a.oid));
        let name = format!("{}({})", a.name, a.arguments);
        toc.append(Section::Predata, w, ObjectType::Aggregate, &a.schema, &name, &statement)?;
    }
    Ok(())
}

/// Aggregates without arguments are written `name(*)`.
fn star_if_empty(arguments: &str) -> &str {
    if arguments.is_empty() { "*" } else { arguments }
}

fn aggregate_statement(a: &Aggregate, metadata: &ObjectMetadata) -> String {
    let mut options = vec![
        format!("SFUNC = {}", a.transition),
        format!("STYPE = {}", a.state_type),
    ];
    if a.state_space > 0 {
        options.push(format!("SSPACE = {}", a.state_space));
    }
    if let Some(final_function) = &a.final_function {
        options.push(format!("FINALFUNC = {final_function}"));
        if a.final_extra {
            options.push("FINALFUNC_EXTRA".into());
        }
        options.push(format!("FINALFUNC_MODIFY = {}", a.final_modify));
    }
    for (option, function) in [
        ("COMBINEFUNC", &a.combine),
        ("SERIALFUNC", &a.serial),
        ("DESERIALFUNC", &a.deserial),
    ] {
        if let Some(function) = function {
            options.push(format!("{option} = {function}"));
        }
    }
    if let Some(initial_value) = &a.initial_value {
        options.push(format!("INITCOND = {}", quote_literal(initial_value)));
    }
    if let Some(moving) = &a.moving {
        options.push(format!("MSFUNC = {}", moving.transition));
        options.push(format!("MINVFUNC = {}", moving.inverse_transition));
        options.push(format!("MSTYPE = {}", moving.state_type));
        if moving.state_space > 0 {
            options.push(format!("MSSPACE = {}", moving.state_space));
        }
        if let Some(final_function) = &moving.final_function {
            options.push(format!("MFINALFUNC = {final_function}"));
            if moving.final_extra {
                options.push("MFINALFUNC_EXTRA".into());
            }
            options.push(format!("MFINALFUNC_MODIFY = {}", moving.final_modify));
        }
        if let Some(initial_value) = &moving.initial_value {
            options.push(format!("MINITCOND = {}", quote_literal(initial_value)));
        }
    }
    if let Some(sort_operator) = &a.sort_operator {
        options.push(format!("SORTOP = {sort_operator}"));
    }
    if let Some(parallel) = &a.parallel {
        options.push(format!("PARALLEL = {parallel}"));
    }
    if a.hypothetical {
        options.push("HYPOTHETICAL".into());
    }
    let create = format!(
        "CREATE AGGREGATE {}.{}({}) (\n    {}\n);",
        a.schema,
        a.name,
        star_if_empty(&a.declared_arguments),
        options.join(",\n    ")
    );
    let signature = format!("{}.{}({})", a.schema, a.name, star_if_empty(&a.arguments));
    // Aggregates are granted on as functions.
    let target = MetadataTarget::with_grant("AGGREGATE", "FUNCTION", &signature, metadata);
    with_metadata(create, &target)
}

/// Prints casts, filed under the schema of their source type.
pub fn print_create_cast_statements<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    casts: &[Cast],
    metadata: &MetadataMap,
) -> Result<(), TocError> {
    for cast in casts {
        let signature = cast.signature();
        let method = match &cast.method {
            CastMethod::Function(function) => format!(" WITH FUNCTION {function}"),
            CastMethod::Binary => " WITHOUT FUNCTION".to_string(),
            CastMethod::InOut => " WITH INOUT".to_string(),
        };
        let context = match cast.context {
            CastContext::Explicit => "",
            CastContext::Assignment => " AS ASSIGNMENT",
            CastContext::Implicit => " AS IMPLICIT",
        };
        let create = format!("CREATE CAST {signature}{method}{context};");
        let target = MetadataTarget::new("CAST", &signature, metadata.get(cast.oid));
        let statement = with_metadata(create, &target);
        toc.append(Section::Predata, w, ObjectType::Cast, &cast.schema, &signature, &statement)?;
    }
    Ok(())
}

pub fn print_create_conversion_statements<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    conversions: &[Conversion],
    metadata: &MetadataMap,
) -> Result<(), TocError> {
    for c in conversions {
        let fqn = format!("{}.{}", c.schema, c.name);
        let create = format!(
            "CREATE {}CONVERSION {fqn} FOR {} TO {} FROM {};",
            if c.is_default { "DEFAULT " } else { "" },
            quote_literal(&c.source_encoding),
            quote_literal(&c.target_encoding),
            c.function
        );
        let target = MetadataTarget::new("CONVERSION", &fqn, metadata.get(c.oid));
        let statement = with_metadata(create, &target);
        toc.append(Section::Predata, w, ObjectType::Conversion, &c.schema, &c.name, &statement)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use lbr_catalog::object::MovingAggregate;

    use super::super::tests::{owned_by, statements};
    use super::*;

    fn aggregate(name: &str, arguments: &str) -> Aggregate {
        Aggregate {
            oid: 16600,
            schema: "public".into(),
            name: name.into(),
            arguments: arguments.into(),
            declared_arguments: arguments.into(),
            transition: "public.int_sum".into(),
            state_type: "integer".into(),
            state_space: 0,
            final_function: None,
            final_extra: false,
            final_modify: "READ_ONLY".into(),
            combine: None,
            serial: None,
            deserial: None,
            initial_value: None,
            moving: None,
            sort_operator: None,
            hypothetical: false,
            parallel: None,
        }
    }

    #[test]
    fn languages_follow_their_handlers() {
        let mut toc = Toc::new();
        let mut w = ByteCountWriter::new(Vec::new());
        let handler = Function {
            oid: 16390,
            schema: "public".into(),
            name: "plsample_call_handler".into(),
            arguments: "".into(),
            definition: "CREATE OR REPLACE FUNCTION public.plsample_call_handler()\n RETURNS language_handler\n LANGUAGE c\nAS '$libdir/plsample', $function$plsample_call_handler$function$\n".into(),
            language: "c".into(),
        };
        let language = |oid, name: &str| ProceduralLanguage {
            oid,
            name: name.into(),
            trusted: true,
            handler: "public.plsample_call_handler".into(),
            inline_handler: None,
            validator: None,
            functions: vec![16390],
        };
        let languages = vec![language(16391, "plsample"), language(16392, "plsample2")];
        let language_metadata: MetadataMap = [(16391, owned_by("alice"))].into_iter().collect();
        print_create_language_statements(
            &mut toc,
            &mut w,
            &languages,
            &[handler],
            &language_metadata,
            &MetadataMap::default(),
        )
        .unwrap();
        let types: Vec<_> = toc.predata_entries.iter().map(|e| e.object_type).collect();
        assert_eq!(
            types,
            vec![
                ObjectType::Function,
                ObjectType::ProceduralLanguage,
                ObjectType::ProceduralLanguage
            ]
        );
        let printed = statements(&toc, Section::Predata, w);
        assert_eq!(
            printed[1],
            "CREATE TRUSTED PROCEDURAL LANGUAGE plsample HANDLER public.plsample_call_handler;\n\
             ALTER LANGUAGE plsample OWNER TO alice;"
        );
    }

    #[test]
    fn aggregate_options() {
        let mut toc = Toc::new();
        let mut w = ByteCountWriter::new(Vec::new());
        let mut avg = aggregate("my_avg", "integer");
        avg.state_type = "integer[]".into();
        avg.final_function = Some("public.int_avg_final".into());
        avg.initial_value = Some("{0,0}".into());
        avg.parallel = Some("SAFE".into());
        avg.moving = Some(MovingAggregate {
            transition: "public.int_sum".into(),
            inverse_transition: "public.int_unsum".into(),
            state_type: "integer[]".into(),
            state_space: 0,
            final_function: None,
            final_extra: false,
            final_modify: "READ_ONLY".into(),
            initial_value: Some("{0,0}".into()),
        });
        let mut count = aggregate("my_count", "");
        count.oid = 16601;
        let metadata: MetadataMap = [(16601, ObjectMetadata {
            privileges: vec!["bob=X/alice".parse().unwrap()],
            ..owned_by("alice")
        })]
        .into_iter()
        .collect();
        print_create_aggregate_statements(&mut toc, &mut w, &[avg, count], &metadata).unwrap();
        assert_eq!(toc.predata_entries[0].name, "my_avg(integer)");
        assert_eq!(toc.predata_entries[1].name, "my_count()");
        let printed = statements(&toc, Section::Predata, w);
        assert_eq!(
            printed[0],
            "CREATE AGGREGATE public.my_avg(integer) (\n    \
             SFUNC = public.int_sum,\n    \
             STYPE = integer[],\n    \
             FINALFUNC = public.int_avg_final,\n    \
             FINALFUNC_MODIFY = READ_ONLY,\n    \
             INITCOND = '{0,0}',\n    \
             MSFUNC = public.int_sum,\n    \
             MINVFUNC = public.int_unsum,\n    \
             MSTYPE = integer[],\n    \
             MINITCOND = '{0,0}',\n    \
             PARALLEL = SAFE\n);"
        );
        assert_eq!(
            printed[1],
            "CREATE AGGREGATE public.my_count(*) (\n    \
             SFUNC = public.int_sum,\n    \
             STYPE = integer\n);\n\
             ALTER AGGREGATE public.my_count(*) OWNER TO alice;\n\
             REVOKE ALL ON FUNCTION public.my_count(*) FROM PUBLIC;\n\
             REVOKE ALL ON FUNCTION public.my_count(*) FROM alice;\n\
             GRANT EXECUTE ON FUNCTION public.my_count(*) TO bob;"
        );
    }

    #[test]
    fn casts_and_conversions() {
        let mut toc = Toc::new();
        let mut w = ByteCountWriter::new(Vec::new());
        let cast = |oid, method, context| Cast {
            oid,
            schema: "app".into(),
            source: "app.money2".into(),
            target: "numeric".into(),
            method,
            context,
        };
        let casts = vec![
            cast(
                16700,
                CastMethod::Function("app.money2_numeric(app.money2)".into()),
                CastContext::Implicit,
            ),
            cast(16701, CastMethod::InOut, CastContext::Explicit),
            cast(16702, CastMethod::Binary, CastContext::Assignment),
        ];
        let metadata: MetadataMap = [(16701, ObjectMetadata {
            comment: Some("text path".into()),
            ..Default::default()
        })]
        .into_iter()
        .collect();
        print_create_cast_statements(&mut toc, &mut w, &casts, &metadata).unwrap();
        let conversion = Conversion {
            oid: 16703,
            schema: "app".into(),
            name: "latin1_to_utf8".into(),
            source_encoding: "LATIN1".into(),
            target_encoding: "UTF8".into(),
            function: "app.latin1_utf8".into(),
            is_default: true,
        };
        print_create_conversion_statements(&mut toc, &mut w, &[conversion], &MetadataMap::default())
            .unwrap();
        assert_eq!(toc.predata_entries[0].schema, "app");
        assert_eq!(toc.predata_entries[0].name, "(app.money2 AS numeric)");
        let printed = statements(&toc, Section::Predata, w);
        assert_eq!(
            printed,
            vec![
                "CREATE CAST (app.money2 AS numeric) WITH FUNCTION app.money2_numeric(app.money2) AS IMPLICIT;",
                "CREATE CAST (app.money2 AS numeric) WITH INOUT;\n\
                 COMMENT ON CAST (app.money2 AS numeric) IS 'text path';",
                "CREATE CAST (app.money2 AS numeric) WITHOUT FUNCTION AS ASSIGNMENT;",
                "CREATE DEFAULT CONVERSION app.latin1_to_utf8 FOR 'LATIN1' TO 'UTF8' FROM app.latin1_utf8;",
            ]
        );
    }
}
