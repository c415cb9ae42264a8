// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

//! The worker pool.
//!
//! Each worker is a separate OS process running this same binary in worker
//! mode, with a request pipe on its stdin and a response pipe on its
//! stdout (stderr passes through to the operator). A per-worker reader
//! task forwards complete response lines into one event channel, so the
//! driver multiplexes any number of workers with a single `recv`.
//!
//! A worker that closes its response pipe is retired, never restarted;
//! whatever job it held is the caller's to account for.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use nix_eval_worker::{Request, WORKER_ARG, WORKER_ARGV0, WorkerConfig};

use crate::error::DriverError;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug)]
pub enum WorkerState {
    /// Spawned, handshake sent, ready line not yet seen.
    Starting,
    Idle,
    Busy(Request),
    Dead,
}

struct Worker {
    state: WorkerState,
    writer: Option<BoxedWriter>,
    child: Option<tokio::process::Child>,
}

/// One complete response line from a worker, or `None` for EOF.
pub struct WorkerEvent {
    pub worker: usize,
    pub line: Option<String>,
}

pub struct WorkerPool {
    workers: Vec<Worker>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl WorkerPool {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            workers: Vec::new(),
            events_tx,
            events_rx,
        }
    }

    /// Spawn one worker process and send it the handshake.
    pub async fn spawn_process(&mut self, config: &WorkerConfig) -> Result<usize, DriverError> {
        let exe = std::env::current_exe().map_err(DriverError::Spawn)?;
        let mut cmd = std::process::Command::new(exe);
        {
            use std::os::unix::process::CommandExt;
            cmd.arg0(WORKER_ARGV0);
        }
        cmd.arg(WORKER_ARG)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = tokio::process::Command::from(cmd)
            .kill_on_drop(true)
            .spawn()
            .map_err(DriverError::Spawn)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DriverError::Spawn(std::io::Error::other("worker stdin not piped")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DriverError::Spawn(std::io::Error::other("worker stdout not piped")))?;

        let id = self
            .add_worker(Box::new(stdin), Box::new(stdout), Some(child), config)
            .await?;
        log::info!("spawned worker {id}");
        Ok(id)
    }

    /// Register a worker over arbitrary pipes. Production workers come via
    /// [`Self::spawn_process`]; tests connect in-process workers over
    /// socket pairs.
    pub async fn add_worker(
        &mut self,
        mut writer: BoxedWriter,
        reader: BoxedReader,
        child: Option<tokio::process::Child>,
        config: &WorkerConfig,
    ) -> Result<usize, DriverError> {
        let id = self.workers.len();

        let handshake = serde_json::to_string(config)?;
        writer
            .write_all(format!("{handshake}\n").as_bytes())
            .await
            .map_err(DriverError::Spawn)?;
        writer.flush().await.map_err(DriverError::Spawn)?;

        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if events.send(WorkerEvent {
                            worker: id,
                            line: Some(line),
                        })
                        .is_err()
                        {
                            break;
                        }
                    }
                    Ok(None) | Err(_) => {
                        let _ = events.send(WorkerEvent {
                            worker: id,
                            line: None,
                        });
                        break;
                    }
                }
            }
        });

        self.workers.push(Worker {
            state: WorkerState::Starting,
            writer: Some(writer),
            child,
        });
        Ok(id)
    }

    /// Wait for the next line or EOF from any worker.
    pub async fn recv(&mut self) -> Option<WorkerEvent> {
        self.events_rx.recv().await
    }

    pub fn state(&self, id: usize) -> &WorkerState {
        &self.workers[id].state
    }

    pub fn set_idle(&mut self, id: usize) {
        self.workers[id].state = WorkerState::Idle;
    }

    /// Take a busy worker's request, marking it idle again.
    pub fn take_request(&mut self, id: usize) -> Option<Request> {
        match std::mem::replace(&mut self.workers[id].state, WorkerState::Idle) {
            WorkerState::Busy(request) => Some(request),
            other => {
                self.workers[id].state = other;
                None
            }
        }
    }

    pub fn idle_worker(&self) -> Option<usize> {
        self.workers
            .iter()
            .position(|w| matches!(w.state, WorkerState::Idle))
    }

    /// Send one request to an idle worker.
    pub async fn dispatch(&mut self, id: usize, request: Request) -> std::io::Result<()> {
        let worker = &mut self.workers[id];
        let writer = worker
            .writer
            .as_mut()
            .ok_or_else(|| std::io::Error::other("worker request pipe already closed"))?;
        let line = serde_json::to_string(&request)?;
        writer.write_all(format!("{line}\n").as_bytes()).await?;
        writer.flush().await?;
        worker.state = WorkerState::Busy(request);
        Ok(())
    }

    /// Retire a worker: it gets no further requests and its death is no
    /// longer news.
    pub fn retire(&mut self, id: usize) {
        self.workers[id].state = WorkerState::Dead;
        self.workers[id].writer = None;
    }

    /// Close every request pipe; workers exit when they read EOF.
    pub fn close_requests(&mut self) {
        for worker in &mut self.workers {
            worker.writer = None;
        }
    }

    pub fn alive(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| !matches!(w.state, WorkerState::Dead))
            .count()
    }

    /// Orderly teardown: close request pipes and wait for the processes.
    pub async fn shutdown(mut self) {
        self.close_requests();
        for worker in &mut self.workers {
            if let Some(child) = &mut worker.child
                && let Err(e) = child.wait().await
            {
                log::warn!("failed to reap worker: {e}");
            }
        }
    }
}
