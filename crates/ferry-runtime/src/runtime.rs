//! Process-wide async runtime
//!
//! Callback bodies run as tasks on a single multi-threaded tokio runtime
//! owned by the bridge. The native side may invoke callbacks from any of its
//! own threads, so the runtime cannot be borrowed from the caller's context.
//!
//! The runtime is built lazily with tokio's defaults, or explicitly from a
//! [`RuntimeConfig`] via [`init_runtime`] before first use.

use ferry_config::RuntimeConfig;
use std::future::Future;
use std::sync::OnceLock;
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;

const DEFAULT_THREAD_NAME: &str = "ferry-worker";

/// Global tokio runtime for callback tasks
static TOKIO_RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Runtime initialization errors
#[derive(Error, Debug)]
pub enum RuntimeInitError {
    #[error("the ferry runtime is already running")]
    AlreadyInitialized,

    #[error("failed to build the ferry runtime: {0}")]
    Build(#[from] std::io::Error),
}

fn build(config: &RuntimeConfig) -> std::io::Result<Runtime> {
    let mut builder = Builder::new_multi_thread();
    builder
        .enable_all()
        .thread_name(config.thread_name.as_deref().unwrap_or(DEFAULT_THREAD_NAME));
    if let Some(threads) = config.worker_threads {
        builder.worker_threads(threads);
    }
    builder.build()
}

/// Initialize the global runtime from configuration
///
/// Fails if the runtime was already built, explicitly or lazily.
pub fn init_runtime(config: &RuntimeConfig) -> Result<(), RuntimeInitError> {
    if TOKIO_RUNTIME.get().is_some() {
        return Err(RuntimeInitError::AlreadyInitialized);
    }
    let runtime = build(config)?;
    tracing::debug!(worker_threads = ?config.worker_threads, "starting ferry runtime");
    TOKIO_RUNTIME
        .set(runtime)
        .map_err(|_| RuntimeInitError::AlreadyInitialized)
}

/// Get the global runtime, building it with defaults on first use
///
/// # Panics
/// Panics if the runtime cannot be built (the OS refused to spawn threads).
pub fn runtime() -> &'static Runtime {
    TOKIO_RUNTIME.get_or_init(|| {
        build(&RuntimeConfig::default()).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to build the ferry runtime");
            panic!("failed to build the ferry runtime: {e}")
        })
    })
}

/// Spawn a task on the global runtime
///
/// Usable from any thread, including native threads that have no tokio
/// context.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    runtime().spawn(future)
}

/// Block the current thread on a future
///
/// Bridges synchronous hosts to the async bindings. Must not be called from
/// inside an async task.
pub fn block_on<F: Future>(future: F) -> F::Output {
    runtime().block_on(future)
}
