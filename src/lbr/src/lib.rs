// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Logical backup and restore.
//!
//! A backup is a directory named after the time it was taken:
//!
//! ```text
//! <backup-dir>/<timestamp>/
//!     global.sql     session settings, the database, roles
//!     predata.sql    schemas, types, functions, tables, views, constraints
//!     postdata.sql   indexes, rules, triggers
//!     data/<oid>     one file per table, gzipped unless disabled
//!     config.yaml    what was backed up, by which versions
//!     toc.yaml       where every statement lives; written last
//!     report         human readable summary
//! ```
//!
//! [`backup::run`] and [`restore::run`] are the two entry points. Both return
//! an [`Outcome`] on success and a [`RunError`] when the run had to stop.

pub mod backup;
pub mod cli;
pub mod context;
pub mod data_file;
pub mod error;
pub mod logging;
pub mod pool;
pub mod restore;

pub use context::RunContext;
pub use error::{Failure, Outcome, RunError};
