//! Process workers.
//!
//! A process worker is a child running `althea-engine worker`. The parent
//! keeps one bridge thread per child that moves jobs from the shared queue
//! to the child's stdin and results from its stdout to the shared result
//! channel, one JSON document per line. The child's first line is a
//! [`WorkerHello`]; its logs go to stderr.
//!
//! EOF on the child's stdout means it died. The job it was running is lost
//! and the sheet's timeout reports the node.

use super::worker::{JobExecutor, WORKER_IDLE_SLEEP};
use super::{CalcJob, CalcJobResult};
use crate::config::ScriptConfig;
use crate::error::{EngineError, Result, ResultExt};
use crate::scripting::ScriptCache;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// First line written by a child worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerHello {
    pub name: String,
    pub pid: u32,
}

/// Child side: serve jobs from `input` until EOF.
///
/// Malformed lines are logged and skipped.
pub fn run_worker_process<R: BufRead, W: Write>(
    name: &str,
    settings: &ScriptConfig,
    input: R,
    mut output: W,
) -> Result<()> {
    let cache = ScriptCache::shared(settings.cache_max_age());
    let executor = JobExecutor::new(settings, cache, Arc::new(AtomicBool::new(false)));

    let hello = WorkerHello {
        name: name.to_string(),
        pid: std::process::id(),
    };
    writeln!(output, "{}", serde_json::to_string(&hello)?)?;
    output.flush()?;
    tracing::debug!("{} serving jobs", name);

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let job: CalcJob = match serde_json::from_str(&line) {
            Ok(job) => job,
            Err(err) => {
                tracing::error!("{} received an invalid job: {}", name, err);
                continue;
            }
        };
        let result = executor.execute(&job);
        writeln!(output, "{}", serde_json::to_string(&result)?)?;
        output.flush()?;
    }

    tracing::debug!("{} input closed, exiting", name);
    Ok(())
}

/// Parent-side handle of one child worker.
pub(crate) struct ProcessWorker {
    pub name: String,
    child: Child,
    bridge: Option<JoinHandle<()>>,
}

/// Shared channels a bridge thread connects its child to.
pub(crate) struct BridgeChannels {
    pub jobs: Receiver<CalcJob>,
    pub results: Sender<CalcJobResult>,
    pub ready: Sender<String>,
    pub stop: Arc<AtomicBool>,
}

impl ProcessWorker {
    /// Spawns `program worker --name {name}` and its bridge thread.
    pub fn spawn(
        program: &Path,
        name: String,
        settings: &ScriptConfig,
        channels: BridgeChannels,
    ) -> Result<Self> {
        let settings_json = serde_json::to_string(settings)?;
        let mut child = Command::new(program)
            .arg("worker")
            .arg("--name")
            .arg(&name)
            .arg("--settings")
            .arg(settings_json)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("Failed to spawn {} from {}", name, program.display()))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(EngineError::Backend(format!("{} has no stdio pipes", name)));
        };

        let bridge_name = name.clone();
        let bridge = std::thread::Builder::new()
            .name(format!("{}-bridge", name))
            .spawn(move || bridge_loop(bridge_name, stdin, BufReader::new(stdout), channels))?;

        Ok(Self {
            name,
            child,
            bridge: Some(bridge),
        })
    }

    pub fn is_finished(&mut self) -> bool {
        let exited = matches!(self.child.try_wait(), Ok(Some(_)));
        let bridged = self.bridge.as_ref().map_or(true, JoinHandle::is_finished);
        exited && bridged
    }

    pub fn kill(&mut self) {
        if let Err(err) = self.child.kill() {
            tracing::debug!("Failed to kill {}: {}", self.name, err);
        }
        let _ = self.child.wait();
        self.join_bridge();
    }

    pub fn join_bridge(&mut self) {
        if let Some(bridge) = self.bridge.take() {
            let _ = bridge.join();
        }
    }
}

fn read_line(stdout: &mut BufReader<ChildStdout>) -> Option<String> {
    let mut line = String::new();
    match stdout.read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line),
    }
}

fn bridge_loop(
    name: String,
    mut stdin: ChildStdin,
    mut stdout: BufReader<ChildStdout>,
    channels: BridgeChannels,
) {
    let Some(hello) = read_line(&mut stdout) else {
        tracing::error!("{} exited before reporting ready", name);
        return;
    };
    match serde_json::from_str::<WorkerHello>(&hello) {
        Ok(hello) => tracing::debug!("{} running as pid {}", hello.name, hello.pid),
        Err(err) => tracing::warn!("{} sent an unexpected greeting: {}", name, err),
    }
    let _ = channels.ready.send(name.clone());

    while !channels.stop.load(Ordering::SeqCst) {
        let job = match channels.jobs.try_recv() {
            Ok(job) => job,
            Err(TryRecvError::Empty) => {
                std::thread::sleep(WORKER_IDLE_SLEEP);
                continue;
            }
            Err(TryRecvError::Disconnected) => break,
        };

        let job_id = job.job_id;
        let sent = serde_json::to_string(&job)
            .map_err(|err| err.to_string())
            .and_then(|line| writeln!(stdin, "{}", line).map_err(|err| err.to_string()))
            .and_then(|_| stdin.flush().map_err(|err| err.to_string()));
        if let Err(err) = sent {
            tracing::error!("{} could not receive job {}: {}", name, job_id, err);
            break;
        }

        let Some(line) = read_line(&mut stdout) else {
            tracing::error!("{} died while running job {}", name, job_id);
            break;
        };
        match serde_json::from_str::<CalcJobResult>(&line) {
            Ok(result) => {
                if channels.results.send(result).is_err() {
                    break;
                }
            }
            Err(err) => tracing::error!("{} sent an invalid result for job {}: {}", name, job_id, err),
        }
    }

    // closing stdin lets the child exit on its own
    drop(stdin);
    tracing::debug!("{} bridge stopped", name);
}
