// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

use std::io::BufRead;
use std::process::ExitCode;

use clap::Parser;

use nix_eval_jobs::driver;
use nix_eval_jobs::opts::Opts;
use nix_eval_worker::cli::NixEval;
use nix_eval_worker::{WORKER_ARG, WorkerConfig, run_worker, worker};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    // Workers are this same binary, marked by their first argument; the
    // marker never collides with the CLI surface.
    if std::env::args().nth(1).as_deref() == Some(WORKER_ARG) {
        return worker_main();
    }

    let opts = Opts::parse();
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(driver::run(&opts, std::io::stdout().lock())) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Worker mode: read the handshake config, cap our own memory, then serve
/// the request loop until EOF.
fn worker_main() -> ExitCode {
    let mut stdin = std::io::stdin().lock();

    let mut handshake = String::new();
    if let Err(e) = stdin.read_line(&mut handshake) {
        eprintln!("error: failed to read worker config: {e}");
        return ExitCode::FAILURE;
    }
    let config: WorkerConfig = match serde_json::from_str(&handshake) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: invalid worker config: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(megabytes) = config.opts.max_memory_mb
        && let Err(e) = worker::apply_memory_limit(megabytes)
    {
        log::warn!("{e}");
    }

    match run_worker(NixEval::new(), &config, stdin, std::io::stdout().lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
