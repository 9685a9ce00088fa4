// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Dependency annotation of catalog objects.
//!
//! The catalog reports dependencies as a map from an object's OID to the OIDs
//! it depends on. That map covers the whole database, but a backup usually
//! covers only part of it, so only edges that point at an object in the
//! backup's own universe are kept.
//!
//! ```text
//! CREATE TYPE t ...;
//! CREATE FUNCTION f(t) ...;
//! CREATE TABLE x (c t);
//!
//! Dependencies:
//! - f depends on: t
//! - x depends on: t
//! ```

use std::collections::{BTreeMap, BTreeSet};

use crate::object::{Function, Table, Type, View};
use crate::sort::Sortable;
use crate::{CatalogObject, Oid};

/// Catalog-reported dependencies: object OID to the OIDs it depends on.
pub type DependencyMap = BTreeMap<Oid, BTreeSet<Oid>>;

/// A catalog object together with the OIDs that must be emitted before it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortableObject {
    pub object: CatalogObject,
    pub dependencies: BTreeSet<Oid>,
}

impl Sortable for SortableObject {
    fn oid(&self) -> Oid {
        self.object.oid()
    }

    fn dependencies(&self) -> &BTreeSet<Oid> {
        &self.dependencies
    }

    fn describe(&self) -> String {
        format!("{} {}", self.object.object_type(), self.object.fqn())
    }
}

/// Attaches dependencies to functions, types and tables.
///
/// The returned objects keep their retrieval order: functions, then types,
/// then tables, each in the order the catalog returned them. Edges whose
/// target is not one of the given objects are dropped, as are self edges.
///
/// A base type and its I/O functions depend on each other. Base types are
/// declared as shell types ahead of every function, so edges from a function
/// to a base type are already satisfied and are dropped as well; the type
/// itself is created after its functions.
pub fn build_dependency_graph(
    functions: Vec<Function>,
    types: Vec<Type>,
    tables: Vec<Table>,
    edges: &DependencyMap,
) -> Vec<SortableObject> {
    let shells: BTreeSet<Oid> = types
        .iter()
        .filter(|t| t.needs_shell())
        .map(|t| t.oid)
        .collect();
    let function_oids: BTreeSet<Oid> = functions.iter().map(|f| f.oid).collect();
    let objects: Vec<CatalogObject> = functions
        .into_iter()
        .map(CatalogObject::from)
        .chain(types.into_iter().map(CatalogObject::from))
        .chain(tables.into_iter().map(CatalogObject::from))
        .collect();
    let mut graph = annotate(objects, edges);
    for object in &mut graph {
        if function_oids.contains(&object.object.oid()) {
            object.dependencies.retain(|dep| !shells.contains(dep));
        }
    }
    graph
}

/// Attaches view-to-view dependencies to views.
///
/// Views are emitted after every table, so edges to tables are already
/// satisfied and only edges between the given views are kept.
pub fn build_view_graph(views: Vec<View>, edges: &DependencyMap) -> Vec<SortableObject> {
    annotate(views.into_iter().map(CatalogObject::from).collect(), edges)
}

fn annotate(objects: Vec<CatalogObject>, edges: &DependencyMap) -> Vec<SortableObject> {
    let universe: BTreeSet<Oid> = objects.iter().map(|o| o.oid()).collect();
    objects
        .into_iter()
        .map(|object| {
            let oid = object.oid();
            let dependencies = edges
                .get(&oid)
                .into_iter()
                .flatten()
                .copied()
                .filter(|dep| *dep != oid && universe.contains(dep))
                .collect();
            SortableObject {
                object,
                dependencies,
            }
        })
        .collect()
}
