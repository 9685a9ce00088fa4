// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Dependency-respecting emission order.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use thiserror::Error;
use tracing::debug;

use crate::Oid;

/// An object that can be placed in dependency order.
pub trait Sortable {
    fn oid(&self) -> Oid;
    /// OIDs that must be emitted before this object. OIDs that do not belong
    /// to any object being sorted are ignored.
    fn dependencies(&self) -> &BTreeSet<Oid>;
    /// A human-readable identity, used in error messages.
    fn describe(&self) -> String;
}

/// The objects that never became ready because they are part of, or depend
/// on, a dependency cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "dependency cycle among {} objects: {}",
    unresolved.len(),
    unresolved.iter().map(|(oid, name)| format!("{name} (oid {oid})")).join(", ")
)]
pub struct DependencyCycleError {
    /// `(oid, description)` pairs in retrieval order.
    pub unresolved: Vec<(Oid, String)>,
}

impl DependencyCycleError {
    pub fn oids(&self) -> Vec<Oid> {
        self.unresolved.iter().map(|(oid, _)| *oid).collect()
    }
}

/// Orders `objects` so that every object comes after all of its
/// dependencies.
///
/// Among objects whose dependencies have all been emitted, the one retrieved
/// first is emitted first, so the result is a pure function of the input
/// order and the edges. If some objects can never be emitted the whole sort
/// fails; no partial order is returned.
pub fn topological_sort<T: Sortable>(objects: Vec<T>) -> Result<Vec<T>, DependencyCycleError> {
    let index_of: BTreeMap<Oid, usize> = objects
        .iter()
        .enumerate()
        .map(|(i, o)| (o.oid(), i))
        .collect();

    let mut pending = vec![0usize; objects.len()];
    let mut dependents = vec![Vec::new(); objects.len()];
    for (i, object) in objects.iter().enumerate() {
        for dep in object.dependencies() {
            if let Some(&j) = index_of.get(dep) {
                if j != i {
                    pending[i] += 1;
                    dependents[j].push(i);
                }
            }
        }
    }

    let mut ready: BTreeSet<usize> = pending
        .iter()
        .enumerate()
        .filter(|(_, n)| **n == 0)
        .map(|(i, _)| i)
        .collect();
    let mut order = Vec::with_capacity(objects.len());
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &d in &dependents[i] {
            pending[d] -= 1;
            if pending[d] == 0 {
                ready.insert(d);
            }
        }
    }

    if order.len() < objects.len() {
        let unresolved = objects
            .iter()
            .zip(&pending)
            .filter(|(_, n)| **n > 0)
            .map(|(o, _)| (o.oid(), o.describe()))
            .collect();
        return Err(DependencyCycleError { unresolved });
    }

    debug!(objects = order.len(), "sorted objects in dependency order");
    let mut slots: Vec<Option<T>> = objects.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect())
}
