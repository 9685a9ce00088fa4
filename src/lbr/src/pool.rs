// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! A bounded pool of workers draining a queue of tasks.
//!
//! Each worker owns its state (for table copies, a connection) and takes one
//! task at a time off a shared queue until the queue is empty. All workers
//! are driven from the calling task, so neither the state nor the work needs
//! to be `Send`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// What became of every task handed to [`run_pool`], each list in task
/// order.
#[derive(Debug)]
pub struct PoolOutcome<T> {
    pub completed: Vec<T>,
    pub failures: Vec<(T, anyhow::Error)>,
    /// Tasks that were never started because an earlier one failed.
    pub skipped: Vec<T>,
}

enum TaskResult {
    Completed,
    Failed(anyhow::Error),
    Skipped,
}

/// Runs `work` on every task, with at most one task per worker in flight.
///
/// Without `on_error_continue` the first failure stops the pool from
/// starting new tasks. Tasks already in flight run to completion.
pub async fn run_pool<W, T, F>(
    workers: Vec<W>,
    tasks: Vec<T>,
    on_error_continue: bool,
    work: F,
) -> PoolOutcome<T>
where
    F: AsyncFn(&mut W, &T) -> anyhow::Result<()>,
{
    let queue = Mutex::new(tasks.into_iter().enumerate().collect::<VecDeque<_>>());
    let stop = AtomicBool::new(false);
    debug!(workers = workers.len(), "starting worker pool");

    let mut loops: FuturesUnordered<_> = workers
        .into_iter()
        .enumerate()
        .map(|(id, worker)| worker_loop(id, worker, &queue, &stop, on_error_continue, &work))
        .collect();
    let mut results = Vec::new();
    while let Some(worker_results) = loops.next().await {
        results.extend(worker_results);
    }
    drop(loops);
    // Whatever is left was never picked up, either because of a failure or
    // because there were no workers at all.
    results.extend(
        queue
            .into_inner()
            .into_iter()
            .map(|(i, task)| (i, task, TaskResult::Skipped)),
    );
    results.sort_by_key(|(i, _, _)| *i);

    let mut outcome = PoolOutcome {
        completed: Vec::new(),
        failures: Vec::new(),
        skipped: Vec::new(),
    };
    for (_, task, result) in results {
        match result {
            TaskResult::Completed => outcome.completed.push(task),
            TaskResult::Failed(e) => outcome.failures.push((task, e)),
            TaskResult::Skipped => outcome.skipped.push(task),
        }
    }
    outcome
}

async fn worker_loop<W, T, F>(
    id: usize,
    mut worker: W,
    queue: &Mutex<VecDeque<(usize, T)>>,
    stop: &AtomicBool,
    on_error_continue: bool,
    work: &F,
) -> Vec<(usize, T, TaskResult)>
where
    F: AsyncFn(&mut W, &T) -> anyhow::Result<()>,
{
    let mut results = Vec::new();
    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let Some((i, task)) = queue.lock().await.pop_front() else {
            break;
        };
        match work(&mut worker, &task).await {
            Ok(()) => results.push((i, task, TaskResult::Completed)),
            Err(e) => {
                if on_error_continue {
                    warn!(worker = id, "{e:#}");
                } else {
                    stop.store(true, Ordering::SeqCst);
                }
                results.push((i, task, TaskResult::Failed(e)));
            }
        }
    }
    debug!(worker = id, tasks = results.len(), "worker finished");
    results
}
