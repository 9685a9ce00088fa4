// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Logical backup and restore tool.

use std::process;

use clap::Parser;
use lbr::backup::{self, BackupArgs};
use lbr::context::new_timestamp;
use lbr::error::FATAL_EXIT_CODE;
use lbr::logging::{self, LogArgs};
use lbr::restore::{self, RestoreArgs};
use lbr::{Outcome, RunContext};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[clap(name = "lbr", version, about)]
struct Args {
    #[clap(subcommand)]
    command: Command,
    #[clap(flatten)]
    logging: LogArgs,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Back up a database into a new timestamped directory.
    Backup(BackupArgs),
    /// Restore a backup taken by `lbr backup`.
    Restore(RestoreArgs),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let command_line = std::env::args().collect::<Vec<_>>().join(" ");

    let (backup_dir, timestamp, jobs, connection) = match &args.command {
        Command::Backup(backup) => (
            backup.backup_dir.clone(),
            new_timestamp(),
            backup.jobs,
            backup.connection.clone(),
        ),
        Command::Restore(restore) => (
            restore.backup_dir.clone(),
            restore.timestamp.clone(),
            restore.jobs,
            restore.connection.clone(),
        ),
    };
    let log_file = match logging::init(&args.logging, &backup_dir, &timestamp) {
        Ok(log_file) => log_file,
        Err(e) => {
            eprintln!("lbr: fatal: cannot initialize logging: {e}");
            process::exit(FATAL_EXIT_CODE);
        }
    };
    let ctx = RunContext {
        backup_dir,
        timestamp,
        jobs: usize::from(jobs),
        connection,
        log_file,
    };

    let run = async {
        match &args.command {
            Command::Backup(backup) => backup::run(&ctx, backup, &command_line).await,
            Command::Restore(restore) => restore::run(&ctx, restore).await,
        }
    };
    let result = tokio::select! {
        result = run => result,
        _ = tokio::signal::ctrl_c() => {
            error!("lbr: interrupted; timestamp {} is incomplete", ctx.timestamp);
            process::exit(FATAL_EXIT_CODE);
        }
    };

    let code = match result {
        Ok(outcome) => {
            report_outcome(&args.command, &outcome);
            outcome.exit_code()
        }
        Err(e) => {
            error!("lbr: fatal: {e}");
            FATAL_EXIT_CODE
        }
    };
    process::exit(code);
}

fn report_outcome(command: &Command, outcome: &Outcome) {
    let action = match command {
        Command::Backup(_) => "Backup",
        Command::Restore(_) => "Restore",
    };
    match outcome {
        Outcome::Complete => info!("{action} completed successfully"),
        Outcome::Partial(failures) => {
            warn!(
                "{action} completed with {} failure{}:",
                failures.len(),
                if failures.len() == 1 { "" } else { "s" }
            );
            for failure in failures {
                warn!("  {failure}");
            }
        }
    }
}
