//! Calculation worker implementation
//!
//! This module contains the job executor shared by every worker flavour and
//! the loop run by thread workers. Process workers run the same executor in
//! a child process, see [`crate::backend::process`].
//!
//! # Worker loop
//!
//! Each worker polls the shared job queue without blocking and sleeps for
//! [`WORKER_IDLE_SLEEP`] when it is empty. It exits when the stop flag is set
//! or the queue is closed. Exactly one result is sent per job; a worker that
//! panics mid-job exits without a result and the sheet's timeout reports
//! the node.

use super::{CalcJob, CalcJobResult};
use crate::config::ScriptConfig;
use crate::nodes::config::config_str;
use crate::nodes::find_registration;
use crate::scripting::{ScriptRunner, SharedScriptCache};
use crate::types::NodeKind;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Back-off while the job queue is empty
pub const WORKER_IDLE_SLEEP: Duration = Duration::from_micros(100);

/// Runs jobs: scripts through the sandbox, everything else through the
/// node class's `execute` function.
#[derive(Debug)]
pub struct JobExecutor {
    runner: ScriptRunner,
}

impl JobExecutor {
    pub fn new(settings: &ScriptConfig, cache: SharedScriptCache, stop: Arc<AtomicBool>) -> Self {
        Self {
            runner: ScriptRunner::new(settings, cache).with_stop_flag(stop),
        }
    }

    pub fn runner(&self) -> &ScriptRunner {
        &self.runner
    }

    /// Executes `job`, converting every failure into an error result.
    pub fn execute(&self, job: &CalcJob) -> CalcJobResult {
        let start = Instant::now();
        let Some(registration) = find_registration(&job.class) else {
            return CalcJobResult::failure(
                job,
                format!("Could not find node class: {}", job.class),
                "",
                start.elapsed(),
            );
        };

        if job.kind == NodeKind::Script {
            let source = config_str(&job.config, "script").unwrap_or_default();
            let result = self.runner.run_script(source, &job.inputs, job.node_id.raw());
            let elapsed = start.elapsed();
            return match result.error {
                None => CalcJobResult::success(job, result.outputs, elapsed)
                    .with_logs(result.log_messages),
                Some(err) => {
                    CalcJobResult::failure(job, err.to_string(), result.traceback, elapsed)
                        .with_logs(result.log_messages)
                }
            };
        }

        match (registration.execute)(&job.inputs, &job.config, &job.common_config) {
            Ok(outputs) => CalcJobResult::success(job, outputs, start.elapsed()),
            Err(err) => CalcJobResult::failure(job, err.to_string(), "", start.elapsed()),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Channels and flags handed to one thread worker.
pub(crate) struct WorkerChannels {
    pub jobs: Receiver<CalcJob>,
    pub results: Sender<CalcJobResult>,
    pub ready: Sender<String>,
    pub stop: Arc<AtomicBool>,
}

/// Thread worker main loop.
pub(crate) fn run_thread_worker(name: String, executor: JobExecutor, channels: WorkerChannels) {
    tracing::debug!("{} started", name);
    let _ = channels.ready.send(name.clone());

    while !channels.stop.load(Ordering::SeqCst) {
        match channels.jobs.try_recv() {
            Ok(job) => {
                let job_id = job.job_id;
                match catch_unwind(AssertUnwindSafe(|| executor.execute(&job))) {
                    Ok(result) => {
                        if channels.results.send(result).is_err() {
                            break;
                        }
                    }
                    Err(payload) => {
                        tracing::error!(
                            "{} crashed while running job {}: {}",
                            name,
                            job_id,
                            panic_message(payload.as_ref())
                        );
                        break;
                    }
                }
            }
            Err(TryRecvError::Empty) => std::thread::sleep(WORKER_IDLE_SLEEP),
            Err(TryRecvError::Disconnected) => break,
        }
    }

    tracing::debug!("{} stopped", name);
}
