// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Text search parsers, templates, dictionaries and configurations, in the
//! order they refer to each other.

use std::io::Write;

use itertools::Itertools;
use lbr_catalog::object::{
    TextSearchConfiguration, TextSearchDictionary, TextSearchParser, TextSearchTemplate,
};
use lbr_catalog::{MetadataMap, ObjectType};
use lbr_toc::{ByteCountWriter, Section, Toc, TocError};

use super::{MetadataTarget, with_metadata};

/// Appends one text search object with its metadata.
fn append_text_search<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    object_type: ObjectType,
    schema: &str,
    name: &str,
    create: String,
    target: &MetadataTarget<'_>,
) -> Result<(), TocError> {
    let statement = with_metadata(create, target);
    toc.append(Section::Predata, w, object_type, schema, name, &statement)
}

pub fn print_create_text_search_parser_statements<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    parsers: &[TextSearchParser],
    metadata: &MetadataMap,
) -> Result<(), TocError> {
    for p in parsers {
        let fqn = format!("{}.{}", p.schema, p.name);
        let mut options = vec![
            format!("START = {}", p.start),
            format!("GETTOKEN = {}", p.get_token),
            format!("END = {}", p.end),
            format!("LEXTYPES = {}", p.lex_types),
        ];
        if let Some(headline) = &p.headline {
            options.push(format!("HEADLINE = {headline}"));
        }
        let create = format!(
            "CREATE TEXT SEARCH PARSER {fqn} (\n    {}\n);",
            options.join(",\n    ")
        );
        let target = MetadataTarget::new("TEXT SEARCH PARSER", &fqn, metadata.get(p.oid));
        append_text_search(
            toc,
            w,
            ObjectType::TextSearchParser,
            &p.schema,
            &p.name,
            create,
            &target,
        )?;
    }
    Ok(())
}

pub fn print_create_text_search_template_statements<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    templates: &[TextSearchTemplate],
    metadata: &MetadataMap,
) -> Result<(), TocError> {
    for t in templates {
        let fqn = format!("{}.{}", t.schema, t.name);
        let init = t
            .init
            .as_ref()
            .map(|init| format!("INIT = {init}, "))
            .unwrap_or_default();
        let create = format!("CREATE TEXT SEARCH TEMPLATE {fqn} ({init}LEXIZE = {});", t.lexize);
        let target = MetadataTarget::new("TEXT SEARCH TEMPLATE", &fqn, metadata.get(t.oid));
        append_text_search(
            toc,
            w,
            ObjectType::TextSearchTemplate,
            &t.schema,
            &t.name,
            create,
            &target,
        )?;
    }
    Ok(())
}

pub fn print_create_text_search_dictionary_statements<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    dictionaries: &[TextSearchDictionary],
    metadata: &MetadataMap,
) -> Result<(), TocError> {
    for d in dictionaries {
        let fqn = format!("{}.{}", d.schema, d.name);
        let options = d
            .options
            .as_ref()
            .map(|options| format!(", {options}"))
            .unwrap_or_default();
        let create = format!(
            "CREATE TEXT SEARCH DICTIONARY {fqn} (TEMPLATE = {}{options});",
            d.template
        );
        let target = MetadataTarget::new("TEXT SEARCH DICTIONARY", &fqn, metadata.get(d.oid));
        append_text_search(
            toc,
            w,
            ObjectType::TextSearchDictionary,
            &d.schema,
            &d.name,
            create,
            &target,
        )?;
    }
    Ok(())
}

/// Prints each configuration empty and then maps its token types, so that
/// the mappings do not depend on those of any other configuration.
pub fn print_create_text_search_configuration_statements<W: Write>(
    toc: &mut Toc,
    w: &mut ByteCountWriter<W>,
    configurations: &[TextSearchConfiguration],
    metadata: &MetadataMap,
) -> Result<(), TocError> {
    for c in configurations {
        let fqn = format!("{}.{}", c.schema, c.name);
        let create = std::iter::once(format!(
            "CREATE TEXT SEARCH CONFIGURATION {fqn} (PARSER = {});",
            c.parser
        ))
        .chain(c.mappings.iter().map(|m| {
            format!(
                "ALTER TEXT SEARCH CONFIGURATION {fqn} ADD MAPPING FOR {} WITH {};",
                m.token_type,
                m.dictionaries.join(", ")
            )
        }))
        .join("\n");
        let target = MetadataTarget::new("TEXT SEARCH CONFIGURATION", &fqn, metadata.get(c.oid));
        append_text_search(
            toc,
            w,
            ObjectType::TextSearchConfiguration,
            &c.schema,
            &c.name,
            create,
            &target,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use lbr_catalog::object::TextSearchMapping;

    use super::super::tests::{owned_by, statements};
    use super::*;

    #[test]
    fn text_search_objects() {
        let mut toc = Toc::new();
        let mut w = ByteCountWriter::new(Vec::new());
        let template = TextSearchTemplate {
            oid: 16900,
            schema: "app".into(),
            name: "simple_tmpl".into(),
            init: None,
            lexize: "app.simple_lexize".into(),
        };
        let dictionary = TextSearchDictionary {
            oid: 16901,
            schema: "app".into(),
            name: "english_stem".into(),
            template: "pg_catalog.snowball".into(),
            options: Some("language = 'english', stopwords = 'english'".into()),
        };
        let configuration = TextSearchConfiguration {
            oid: 16902,
            schema: "app".into(),
            name: "english".into(),
            parser: "pg_catalog.\"default\"".into(),
            mappings: vec![
                TextSearchMapping {
                    token_type: "asciiword".into(),
                    dictionaries: vec!["app.english_stem".into()],
                },
                TextSearchMapping {
                    token_type: "word".into(),
                    dictionaries: vec!["app.english_stem".into(), "pg_catalog.simple".into()],
                },
            ],
        };
        let metadata: MetadataMap = [(16902, owned_by("alice"))].into_iter().collect();
        print_create_text_search_template_statements(&mut toc, &mut w, &[template], &metadata)
            .unwrap();
        print_create_text_search_dictionary_statements(&mut toc, &mut w, &[dictionary], &metadata)
            .unwrap();
        print_create_text_search_configuration_statements(
            &mut toc,
            &mut w,
            &[configuration],
            &metadata,
        )
        .unwrap();
        let types: Vec<_> = toc.predata_entries.iter().map(|e| e.object_type).collect();
        assert_eq!(
            types,
            vec![
                ObjectType::TextSearchTemplate,
                ObjectType::TextSearchDictionary,
                ObjectType::TextSearchConfiguration,
            ]
        );
        let printed = statements(&toc, Section::Predata, w);
        assert_eq!(
            printed,
            vec![
                "CREATE TEXT SEARCH TEMPLATE app.simple_tmpl (LEXIZE = app.simple_lexize);",
                "CREATE TEXT SEARCH DICTIONARY app.english_stem (TEMPLATE = pg_catalog.snowball, \
                 language = 'english', stopwords = 'english');",
                "CREATE TEXT SEARCH CONFIGURATION app.english (PARSER = pg_catalog.\"default\");\n\
                 ALTER TEXT SEARCH CONFIGURATION app.english ADD MAPPING FOR asciiword WITH app.english_stem;\n\
                 ALTER TEXT SEARCH CONFIGURATION app.english ADD MAPPING FOR word WITH app.english_stem, pg_catalog.simple;\n\
                 ALTER TEXT SEARCH CONFIGURATION app.english OWNER TO alice;",
            ]
        );
    }
}
