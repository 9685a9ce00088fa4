// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Catalog object model and dependency ordering for logical backups.
//!
//! The crate is organized leaf-first:
//!
//! ```text
//! object / metadata  ->  dependency  ->  sort
//!        ^
//!        |
//!     client (catalog queries against a live snapshot)
//! ```
//!
//! Entities are immutable snapshots of catalog rows. The only thing that is
//! ever attached to them after construction is their dependency set, which
//! [`dependency::build_dependency_graph`] computes from catalog dependency
//! records, and which [`sort::topological_sort`] consumes to produce the
//! emission order of the DDL.

pub mod client;
pub mod dependency;
pub mod metadata;
pub mod object;
pub mod object_type;
pub mod sort;

pub use dependency::{DependencyMap, SortableObject};
pub use metadata::{AclItem, MetadataMap, ObjectMetadata};
pub use object::CatalogObject;
pub use object_type::ObjectType;
pub use sort::{DependencyCycleError, topological_sort};

/// A stable object identifier assigned by the source catalog.
pub type Oid = u32;
