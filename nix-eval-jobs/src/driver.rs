// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

//! The driver event loop.
//!
//! Single-threaded fan-out/fan-in: feed idle workers from the scheduler,
//! harvest whatever arrives on the shared event channel, keep the
//! aggregator's slot table current. The loop ends when the scheduler has
//! neither pending nor in-flight work; only then does the constituent
//! resolver run and the withheld aggregates flush.

use std::io::Write;

use nix_eval_worker::{ErrorRecord, READY_LINE, Reply, Request, Response};

use crate::aggregator::{Aggregator, Outcome};
use crate::constituents::{JobIndex, resolve_constituents};
use crate::error::DriverError;
use crate::opts::Opts;
use crate::pool::{WorkerPool, WorkerState};
use crate::traversal::Scheduler;

/// Spawn the worker processes and drive the run to completion. Returns the
/// process exit code.
pub async fn run(opts: &Opts, out: impl Write) -> Result<u8, DriverError> {
    let config = opts.worker_config()?;
    let mut pool = WorkerPool::new();
    for _ in 0..opts.workers.max(1) {
        pool.spawn_process(&config).await?;
    }
    run_with_pool(opts, pool, out).await
}

fn worker_failure(request: &Request, reason: &str) -> ErrorRecord {
    ErrorRecord {
        attr: request.path.render(),
        attr_path: request.path.clone(),
        error: format!("worker failure: {reason}"),
        attr_name: None,
    }
}

/// The event loop proper, over an already-populated pool.
pub async fn run_with_pool(
    opts: &Opts,
    mut pool: WorkerPool,
    out: impl Write,
) -> Result<u8, DriverError> {
    let mut scheduler = Scheduler::new();
    let mut aggregator = Aggregator::new(out);
    let mut index = JobIndex::new();

    let mut worker_failed = false;
    let mut stopping = false;

    loop {
        if !stopping {
            while scheduler.has_pending() {
                let Some(worker) = pool.idle_worker() else {
                    break;
                };
                let request = scheduler.next_request().expect("has_pending lied");
                log::debug!("worker {worker} <- {} (tag {})", request.path.render(), request.tag);
                if let Err(e) = pool.dispatch(worker, request.clone()).await {
                    // Retire the broken worker and retry on the next idle one.
                    log::warn!("failed to dispatch to worker {worker}: {e}");
                    pool.retire(worker);
                    scheduler.requeue(request);
                }
            }
        }

        if scheduler.idle() {
            break;
        }
        if pool.alive() == 0 {
            return Err(DriverError::AllWorkersDied);
        }

        tokio::select! {
            event = pool.recv() => {
                let Some(event) = event else { break };
                let worker = event.worker;
                match event.line {
                    // A response line. Taking the request also settles which
                    // state the worker was in: only busy workers have one.
                    Some(line) => {
                        if let Some(request) = pool.take_request(worker) {
                            scheduler.harvested();
                            match serde_json::from_str::<Response>(&line) {
                                Ok(response) => {
                                    if response.tag != request.tag {
                                        log::warn!(
                                            "worker {worker} answered tag {} for tag {}",
                                            response.tag,
                                            request.tag
                                        );
                                    }
                                    handle_reply(
                                        opts,
                                        &request,
                                        response.reply,
                                        &mut scheduler,
                                        &mut aggregator,
                                        &mut index,
                                        &mut pool,
                                        &mut stopping,
                                    )?;
                                }
                                Err(e) => {
                                    log::error!("unparseable response from worker {worker}: {e}");
                                    pool.retire(worker);
                                    worker_failed = true;
                                    aggregator.insert(
                                        request.tag,
                                        Outcome::Error(worker_failure(&request, "unparseable response")),
                                    )?;
                                }
                            }
                        } else if matches!(pool.state(worker), WorkerState::Starting) {
                            if line.trim() == READY_LINE {
                                pool.set_idle(worker);
                            } else {
                                log::error!("unexpected handshake from worker {worker}: {line}");
                                pool.retire(worker);
                                worker_failed = true;
                            }
                        } else {
                            log::warn!("stray line from worker {worker}: {line}");
                        }
                    }
                    // EOF: the worker is gone. Its in-flight job, if any,
                    // becomes a synthetic error record.
                    None => {
                        if let Some(request) = pool.take_request(worker) {
                            scheduler.harvested();
                            worker_failed = true;
                            log::error!(
                                "worker {worker} died evaluating {}",
                                request.path.render()
                            );
                            aggregator.insert(
                                request.tag,
                                Outcome::Error(worker_failure(
                                    &request,
                                    "evaluator process died unexpectedly",
                                )),
                            )?;
                        } else if matches!(pool.state(worker), WorkerState::Starting) && !stopping {
                            log::error!("worker {worker} exited during handshake");
                            worker_failed = true;
                        } else if matches!(pool.state(worker), WorkerState::Idle) && !stopping {
                            log::warn!("worker {worker} exited while idle");
                        }
                        pool.retire(worker);
                    }
                }
            }
            _ = tokio::signal::ctrl_c(), if !stopping => {
                log::warn!("interrupted, draining in-flight jobs");
                stop(&mut scheduler, &mut aggregator, &mut pool, &mut stopping)?;
            }
        }
    }

    pool.shutdown().await;

    if opts.constituents {
        resolve_constituents(aggregator.withheld_mut(), &index);
    }
    aggregator.flush_withheld()?;

    Ok(if worker_failed || stopping { 1 } else { 0 })
}

/// Stop scheduling: drop pending work (accounting for its tags so emission
/// does not stall) and close every request pipe.
fn stop(
    scheduler: &mut Scheduler,
    aggregator: &mut Aggregator<impl Write>,
    pool: &mut WorkerPool,
    stopping: &mut bool,
) -> Result<(), DriverError> {
    *stopping = true;
    for cancelled in scheduler.quench() {
        aggregator.insert(cancelled.tag, Outcome::Nothing)?;
    }
    pool.close_requests();
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn handle_reply(
    opts: &Opts,
    request: &Request,
    reply: Reply,
    scheduler: &mut Scheduler,
    aggregator: &mut Aggregator<impl Write>,
    index: &mut JobIndex,
    pool: &mut WorkerPool,
    stopping: &mut bool,
) -> Result<(), DriverError> {
    match reply {
        Reply::Attrs { children } => {
            scheduler.push_children(&request.path, children);
            aggregator.insert(request.tag, Outcome::Nothing)
        }
        Reply::Drv { record } => {
            index.insert(&record, request.tag);
            if opts.constituents && record.is_aggregate() {
                aggregator.insert(request.tag, Outcome::Aggregate(*record))
            } else {
                aggregator.insert(request.tag, Outcome::Drv(*record))
            }
        }
        Reply::Error { error, attr_name } => {
            aggregator.insert(
                request.tag,
                Outcome::Error(ErrorRecord {
                    attr: request.path.render(),
                    attr_path: request.path.clone(),
                    error,
                    attr_name,
                }),
            )?;
            if opts.quit_on_error && !*stopping {
                log::warn!("evaluation error with --quit-on-error, stopping");
                stop(scheduler, aggregator, pool, stopping)?;
            }
            Ok(())
        }
        Reply::Blocked | Reply::Nothing => aggregator.insert(request.tag, Outcome::Nothing),
    }
}
