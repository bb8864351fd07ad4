//! Job dispatch backend
//!
//! The sheet engine hands node calculations to a [`CalcBackend`]: `submit`
//! queues a [`CalcJob`] with a completion callback, `check` drains finished
//! [`CalcJobResult`]s and runs their callbacks on the calling thread. The
//! backend is polled, never event driven.
//!
//! # Implementations
//!
//! - [`Backend`] - a pool of workers, threads or child processes depending on
//!   [`WorkerMode`], sharing one job queue and one result channel
//! - [`InlineBackend`] - runs jobs on the calling thread
//!
//! # Example
//!
//! ```ignore
//! use althea_engine::backend::{Backend, CalcBackend};
//! use althea_engine::config::AppConfig;
//!
//! let config = AppConfig::default();
//! let mut backend = Backend::new(&config);
//! backend.start(config.num_workers, config.worker_mode)?;
//!
//! backend.submit(job, Box::new(|result| println!("{:?}", result.outputs)));
//! loop {
//!     backend.check();
//!     // ...
//! }
//! ```

pub mod inline;
mod job;
pub mod process;
pub mod worker;

pub use inline::InlineBackend;
pub use job::{CalcJob, CalcJobResult};
pub use process::{run_worker_process, WorkerHello};
pub use worker::{JobExecutor, WORKER_IDLE_SLEEP};

use crate::config::{AppConfig, ScriptConfig, WorkerMode};
use crate::error::{EngineError, Result};
use crate::id::{IdProvider, JobId};
use crate::scripting::{ScriptCache, SharedScriptCache};
use crossbeam_channel::{unbounded, Receiver, Sender};
use process::{BridgeChannels, ProcessWorker};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use worker::{run_thread_worker, WorkerChannels};

/// First job ID handed out after every (re)start
pub const JOB_ID_BASE: u64 = 10;

/// Time workers get to notice the stop flag before the queue is closed
pub const STOP_GRACE: Duration = Duration::from_millis(200);

/// Upper bound for graceful worker exit once the queue is closed
pub const STOP_TIMEOUT: Duration = Duration::from_millis(4000);

/// How long `start` waits for every worker to report alive
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Called with the result of a submitted job
pub type ResultCallback = Box<dyn FnOnce(CalcJobResult) + Send>;

/// Seam between the sheet engine and job execution.
#[cfg_attr(test, mockall::automock)]
pub trait CalcBackend {
    /// Queues `job` under a fresh ID; `callback` runs during a later `check`.
    fn submit(&mut self, job: CalcJob, callback: ResultCallback) -> JobId;

    /// Delivers every finished result, returning how many were delivered.
    fn check(&mut self) -> usize;
}

/// Replays a result's buffered logs and runs its callback.
pub(crate) fn deliver_result(callbacks: &mut HashMap<JobId, ResultCallback>, result: CalcJobResult) {
    for message in &result.log_messages {
        message.replay(result.job_id.raw());
    }
    match callbacks.remove(&result.job_id) {
        Some(callback) => callback(result),
        None => tracing::debug!("No callback registered for job {}", result.job_id),
    }
}

enum WorkerHandle {
    Thread { name: String, handle: JoinHandle<()> },
    Process(ProcessWorker),
}

impl WorkerHandle {
    fn name(&self) -> &str {
        match self {
            WorkerHandle::Thread { name, .. } => name,
            WorkerHandle::Process(worker) => &worker.name,
        }
    }

    fn is_finished(&mut self) -> bool {
        match self {
            WorkerHandle::Thread { handle, .. } => handle.is_finished(),
            WorkerHandle::Process(worker) => worker.is_finished(),
        }
    }

    /// Waits for a voluntary exit; false if `deadline` passed first.
    fn wait_until(&mut self, deadline: Instant) -> bool {
        while !self.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        if let WorkerHandle::Process(worker) = self {
            worker.join_bridge();
        }
        true
    }

    fn terminate(self) {
        match self {
            // threads cannot be killed; the handle is detached
            WorkerHandle::Thread { name, .. } => {
                tracing::warn!("Abandoning unresponsive worker thread {}", name)
            }
            WorkerHandle::Process(mut worker) => worker.kill(),
        }
    }
}

/// Worker pool dispatching jobs to threads or child processes.
pub struct Backend {
    script: ScriptConfig,
    worker_program: Option<PathBuf>,
    job_tx: Option<Sender<CalcJob>>,
    result_tx: Sender<CalcJobResult>,
    result_rx: Receiver<CalcJobResult>,
    callbacks: HashMap<JobId, ResultCallback>,
    job_ids: IdProvider,
    workers: Vec<WorkerHandle>,
    stop: Arc<AtomicBool>,
    cache: SharedScriptCache,
    mode: WorkerMode,
}

impl Backend {
    /// Creates a stopped backend using `config`'s script limits.
    pub fn new(config: &AppConfig) -> Self {
        let (result_tx, result_rx) = unbounded();
        Self {
            script: config.script.clone(),
            worker_program: None,
            job_tx: None,
            result_tx,
            result_rx,
            callbacks: HashMap::new(),
            job_ids: IdProvider::new(JOB_ID_BASE),
            workers: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
            cache: ScriptCache::shared(config.script.cache_max_age()),
            mode: config.worker_mode,
        }
    }

    /// Creates and starts a backend sized by `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut backend = Self::new(config);
        backend.start(config.num_workers, config.worker_mode)?;
        Ok(backend)
    }

    /// Executable spawned for process workers; defaults to the current one.
    pub fn with_worker_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.worker_program = Some(program.into());
        self
    }

    pub fn is_running(&self) -> bool {
        self.job_tx.is_some()
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn mode(&self) -> WorkerMode {
        self.mode
    }

    /// Jobs submitted whose results have not been delivered yet.
    pub fn pending_jobs(&self) -> usize {
        self.callbacks.len()
    }

    /// Spawns `num_workers` workers and waits until all report alive.
    pub fn start(&mut self, num_workers: usize, mode: WorkerMode) -> Result<()> {
        if self.is_running() {
            return Err(EngineError::Backend("Backend is already running".to_string()));
        }
        let num_workers = num_workers.max(1);
        let (job_tx, job_rx) = unbounded();
        let (ready_tx, ready_rx) = unbounded();
        self.stop = Arc::new(AtomicBool::new(false));
        self.mode = mode;

        let program = match (mode, &self.worker_program) {
            (WorkerMode::Process, Some(program)) => Some(program.clone()),
            (WorkerMode::Process, None) => Some(std::env::current_exe()?),
            (WorkerMode::Thread, _) => None,
        };

        for i in 0..num_workers {
            let name = format!("AltheaWorker-{}", i);
            let handle = match &program {
                None => {
                    let executor = JobExecutor::new(&self.script, self.cache.clone(), self.stop.clone());
                    let channels = WorkerChannels {
                        jobs: job_rx.clone(),
                        results: self.result_tx.clone(),
                        ready: ready_tx.clone(),
                        stop: self.stop.clone(),
                    };
                    let thread_name = name.clone();
                    let handle = std::thread::Builder::new()
                        .name(name.clone())
                        .spawn(move || run_thread_worker(thread_name, executor, channels))?;
                    WorkerHandle::Thread { name, handle }
                }
                Some(program) => {
                    let channels = BridgeChannels {
                        jobs: job_rx.clone(),
                        results: self.result_tx.clone(),
                        ready: ready_tx.clone(),
                        stop: self.stop.clone(),
                    };
                    WorkerHandle::Process(ProcessWorker::spawn(program, name, &self.script, channels)?)
                }
            };
            self.workers.push(handle);
        }
        self.job_tx = Some(job_tx);

        let deadline = Instant::now() + STARTUP_TIMEOUT;
        for _ in 0..num_workers {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match ready_rx.recv_timeout(remaining) {
                Ok(name) => tracing::debug!("{} is alive", name),
                Err(_) => {
                    self.stop();
                    return Err(EngineError::Backend(format!(
                        "Workers did not report alive within {:?}",
                        STARTUP_TIMEOUT
                    )));
                }
            }
        }

        tracing::info!("Started {} {} workers", num_workers, mode);
        Ok(())
    }

    /// Stops all workers, forcing those that do not exit in time.
    pub fn stop(&mut self) {
        if self.workers.is_empty() && self.job_tx.is_none() {
            return;
        }
        tracing::info!("Stopping {} workers", self.workers.len());
        self.stop.store(true, Ordering::SeqCst);
        std::thread::sleep(STOP_GRACE);
        self.job_tx = None;

        let deadline = Instant::now() + STOP_TIMEOUT;
        let mut forced = 0;
        for mut worker in self.workers.drain(..) {
            if !worker.wait_until(deadline) {
                tracing::debug!("{} did not exit in time", worker.name());
                worker.terminate();
                forced += 1;
            }
        }
        if forced > 0 {
            tracing::warn!("Forced termination of {} workers", forced);
        }
        self.callbacks.clear();
    }

    /// Stops, resets queue, results and job IDs, then starts again.
    pub fn restart(&mut self, num_workers: usize, mode: WorkerMode) -> Result<()> {
        self.stop();
        let (result_tx, result_rx) = unbounded();
        self.result_tx = result_tx;
        self.result_rx = result_rx;
        self.job_ids.reset();
        self.start(num_workers, mode)
    }
}

impl CalcBackend for Backend {
    fn submit(&mut self, mut job: CalcJob, callback: ResultCallback) -> JobId {
        let job_id = JobId(self.job_ids.next_id());
        job.job_id = job_id;
        self.callbacks.insert(job_id, callback);

        let queued = match &self.job_tx {
            Some(job_tx) => job_tx.send(job).map_err(|err| err.into_inner()),
            None => Err(job),
        };
        if let Err(job) = queued {
            tracing::error!("Cannot queue job {}: backend is not running", job_id);
            let failed = CalcJobResult::failure(&job, "Backend is not running", "", Duration::ZERO);
            let _ = self.result_tx.send(failed);
        }
        job_id
    }

    fn check(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(result) = self.result_rx.try_recv() {
            deliver_result(&mut self.callbacks, result);
            delivered += 1;
        }
        delivered
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("mode", &self.mode)
            .field("workers", &self.workers.len())
            .field("pending", &self.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::NodeId;
    use crate::nodes::{CommonConfig, ConfigMap};
    use crate::types::{NodeKind, Value};
    use std::sync::Mutex;

    fn job(a: i64, b: i64) -> CalcJob {
        CalcJob {
            job_id: JobId::default(),
            node_id: NodeId(10_000_000),
            class: "MathAdd".into(),
            kind: NodeKind::Simple,
            inputs: vec![Value::Int(a), Value::Int(b)],
            config: ConfigMap::new(),
            common_config: CommonConfig::default(),
        }
    }

    fn wait_for(backend: &mut Backend, expected: usize) -> usize {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut delivered = 0;
        while delivered < expected && Instant::now() < deadline {
            delivered += backend.check();
            std::thread::sleep(Duration::from_millis(1));
        }
        delivered
    }

    #[test]
    fn test_thread_pool_runs_jobs() {
        let mut backend = Backend::new(&AppConfig::default());
        backend.start(3, WorkerMode::Thread).unwrap();
        assert_eq!(backend.num_workers(), 3);

        let sums = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            let sink = sums.clone();
            let id = backend.submit(job(i, 1), Box::new(move |r| sink.lock().unwrap().push(r.outputs)));
            assert_eq!(id, JobId(JOB_ID_BASE + i as u64));
        }
        assert_eq!(wait_for(&mut backend, 10), 10);
        let mut sums: Vec<i64> = sums
            .lock()
            .unwrap()
            .iter()
            .map(|outputs| outputs[0].as_i64().unwrap())
            .collect();
        sums.sort();
        assert_eq!(sums, (1..=10).collect::<Vec<_>>());
        assert_eq!(backend.pending_jobs(), 0);

        backend.stop();
        assert!(!backend.is_running());
        assert_eq!(backend.num_workers(), 0);
    }

    #[test]
    fn test_submit_while_stopped_reports_failure() {
        let mut backend = Backend::new(&AppConfig::default());
        let failed = Arc::new(Mutex::new(None));
        let sink = failed.clone();
        backend.submit(job(1, 1), Box::new(move |r| *sink.lock().unwrap() = Some(r)));
        assert_eq!(backend.check(), 1);
        let result = failed.lock().unwrap().take().unwrap();
        assert!(result.error);
        assert_eq!(result.error_message, "Backend is not running");
    }

    #[test]
    fn test_restart_resets_job_ids() {
        let mut backend = Backend::new(&AppConfig::default());
        backend.start(1, WorkerMode::Thread).unwrap();
        backend.submit(job(1, 2), Box::new(|_| {}));
        assert!(backend.start(1, WorkerMode::Thread).is_err());

        backend.restart(2, WorkerMode::Thread).unwrap();
        assert_eq!(backend.num_workers(), 2);
        assert_eq!(backend.pending_jobs(), 0);
        assert_eq!(backend.submit(job(1, 2), Box::new(|_| {})), JobId(JOB_ID_BASE));
        assert_eq!(wait_for(&mut backend, 1), 1);
    }
}
