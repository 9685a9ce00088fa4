// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::fmt;
use std::io;
use std::path::PathBuf;

use lbr_catalog::DependencyCycleError;
use lbr_catalog::client::CatalogError;
use lbr_config::{CompatibilityError, ConfigError};
use lbr_filter::FilterError;
use lbr_toc::TocError;
use thiserror::Error;

/// An error that ends a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Toc(#[from] TocError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Compatibility(#[from] CompatibilityError),
    #[error(transparent)]
    Dependency(#[from] DependencyCycleError),
    #[error("failed to connect to database {database}: {source}")]
    Connect {
        database: String,
        source: tokio_postgres::Error,
    },
    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid timestamp {timestamp:?}; expected 14 digits, YYYYMMDDHHMMSS")]
    Timestamp { timestamp: String },
    #[error("{reason}")]
    InvalidOptions { reason: &'static str },
    /// The first failure of a run that does not continue on errors.
    #[error("{0}")]
    Failed(Failure),
}

impl RunError {
    pub fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> RunError {
        let path = path.into();
        move |source| RunError::Io { path, source }
    }
}

/// An object that could not be backed up or restored.
#[derive(Debug)]
pub struct Failure {
    /// What failed, e.g. `TABLE public.orders`.
    pub object: String,
    pub error: anyhow::Error,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:#}", self.object, self.error)
    }
}

/// How a run that did not fail ended.
#[derive(Debug)]
pub enum Outcome {
    Complete,
    /// The run went on past the listed failures.
    Partial(Vec<Failure>),
}

impl Outcome {
    pub fn from_failures(failures: Vec<Failure>) -> Outcome {
        if failures.is_empty() {
            Outcome::Complete
        } else {
            Outcome::Partial(failures)
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Complete => 0,
            Outcome::Partial(_) => 2,
        }
    }
}

/// Exit status of a run that ended with an error.
pub const FATAL_EXIT_CODE: i32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(Outcome::from_failures(vec![]).exit_code(), 0);
        let partial = Outcome::from_failures(vec![Failure {
            object: "TABLE public.orders".into(),
            error: anyhow::anyhow!("permission denied"),
        }]);
        assert_eq!(partial.exit_code(), 2);
        assert_ne!(FATAL_EXIT_CODE, partial.exit_code());
    }

    #[test]
    fn failures_show_their_cause_chain() {
        let failure = Failure {
            object: "TABLE public.orders".into(),
            error: anyhow::anyhow!("disk full").context("writing data/16401.gz"),
        };
        assert_eq!(
            RunError::Failed(failure).to_string(),
            "TABLE public.orders: writing data/16401.gz: disk full"
        );
    }
}
