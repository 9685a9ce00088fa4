// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Overrides the filter derived from `--quiet`, `--verbose` and `--debug`.
pub const LOG_ENV: &str = "LBR_LOG";

const TARGETS: [&str; 5] = ["lbr", "lbr_catalog", "lbr_config", "lbr_filter", "lbr_toc"];

#[derive(Clone, Copy, Debug, Default, clap::Args)]
pub struct LogArgs {
    /// Only print errors.
    #[clap(long, global = true, conflicts_with_all = ["verbose", "debug"])]
    pub quiet: bool,
    /// Print progress details.
    #[clap(long, global = true, conflicts_with = "debug")]
    pub verbose: bool,
    /// Print everything, including the statements being run.
    #[clap(long, global = true)]
    pub debug: bool,
}

impl LogArgs {
    fn level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else if self.debug {
            "trace"
        } else if self.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// The filter directive for our own crates. Everything else only logs
    /// warnings.
    pub fn directive(&self) -> String {
        let level = self.level();
        let mut directive = String::from("warn");
        for target in TARGETS {
            directive.push_str(&format!(",{target}={level}"));
        }
        directive
    }
}

/// Installs the global subscriber: human readable output on stderr and, if
/// `log_dir` exists, a plain copy in `lbr_<timestamp>.log` inside it.
///
/// Returns the path of the log file, if one was opened. Fails if a global
/// subscriber is already installed.
pub fn init(
    args: &LogArgs,
    log_dir: &Path,
    timestamp: &str,
) -> Result<Option<PathBuf>, TryInitError> {
    let filter = || {
        std::env::var(LOG_ENV)
            .ok()
            .and_then(|directive| EnvFilter::try_new(directive).ok())
            .unwrap_or_else(|| EnvFilter::new(args.directive()))
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let log_path = log_dir.join(format!("lbr_{timestamp}.log"));
    let file = log_dir.is_dir().then(|| File::create(&log_path));
    match file {
        Some(Ok(file)) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(file)
                .with_ansi(false);
            tracing_subscriber::registry()
                .with(filter())
                .with(stderr_layer)
                .with(file_layer)
                .try_init()?;
            Ok(Some(log_path))
        }
        Some(Err(e)) => {
            tracing_subscriber::registry()
                .with(filter())
                .with(stderr_layer)
                .try_init()?;
            warn!(path = %log_path.display(), "cannot create log file: {e}");
            Ok(None)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter())
                .with(stderr_layer)
                .try_init()?;
            Ok(None)
        }
    }
}
