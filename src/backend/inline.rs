//! Same-thread backend.
//!
//! Runs each job during `submit` and hands the result over on the next
//! `check`, so callers see the same submit/poll cycle as with a worker
//! pool. Used by tests and the CLI when no pool is wanted.

use super::worker::JobExecutor;
use super::{deliver_result, CalcBackend, CalcJob, CalcJobResult, ResultCallback, JOB_ID_BASE};
use crate::config::ScriptConfig;
use crate::id::{IdProvider, JobId};
use crate::scripting::ScriptCache;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub struct InlineBackend {
    executor: JobExecutor,
    job_ids: IdProvider,
    pending: VecDeque<CalcJobResult>,
    callbacks: HashMap<JobId, ResultCallback>,
}

impl InlineBackend {
    pub fn new(settings: &ScriptConfig) -> Self {
        let cache = ScriptCache::shared(settings.cache_max_age());
        Self {
            executor: JobExecutor::new(settings, cache, Arc::new(AtomicBool::new(false))),
            job_ids: IdProvider::new(JOB_ID_BASE),
            pending: VecDeque::new(),
            callbacks: HashMap::new(),
        }
    }

    pub fn executor(&self) -> &JobExecutor {
        &self.executor
    }
}

impl std::fmt::Debug for InlineBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlineBackend")
            .field("pending", &self.pending.len())
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl CalcBackend for InlineBackend {
    fn submit(&mut self, mut job: CalcJob, callback: ResultCallback) -> JobId {
        let job_id = JobId(self.job_ids.next_id());
        job.job_id = job_id;
        self.callbacks.insert(job_id, callback);
        self.pending.push_back(self.executor.execute(&job));
        job_id
    }

    fn check(&mut self) -> usize {
        let mut delivered = 0;
        while let Some(result) = self.pending.pop_front() {
            deliver_result(&mut self.callbacks, result);
            delivered += 1;
        }
        delivered
    }
}
