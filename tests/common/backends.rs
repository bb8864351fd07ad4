//! Backend construction helpers

use althea_engine::config::{AppConfig, WorkerMode};
use althea_engine::{Backend, InlineBackend};

pub fn inline_backend(config: &AppConfig) -> InlineBackend {
    InlineBackend::new(&config.script)
}

/// Started pool of thread workers
pub fn thread_backend(config: &AppConfig, workers: usize) -> Backend {
    let mut backend = Backend::new(config);
    backend
        .start(workers, WorkerMode::Thread)
        .expect("thread workers should start");
    backend
}

/// Started pool of child processes running this crate's binary
pub fn process_backend(config: &AppConfig, workers: usize) -> Backend {
    let mut backend = Backend::new(config).with_worker_program(env!("CARGO_BIN_EXE_althea-engine"));
    backend
        .start(workers, WorkerMode::Process)
        .expect("process workers should start");
    backend
}
