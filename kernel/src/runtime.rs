// Runtime Glue
//
// Owns the async runtime that drives table operations for callers that
// are not themselves async, and reports outcomes through completion
// callbacks carrying a numeric error code.

use std::future::Future;

use tokio::runtime::{Builder, Handle};
use tracing::debug;

use crate::error::{DeltaError, DeltaResult, ErrorCode};

pub use tokio_util::sync::CancellationToken;

/// Runtime construction settings.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// Worker threads; defaults to the number of cores.
    pub worker_threads: Option<usize>,
}

/// Error handed to a completion callback: the stable code and the
/// rendered message as UTF-8 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: Vec<u8>,
}

impl From<&DeltaError> for ErrorReport {
    fn from(err: &DeltaError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string().into_bytes(),
        }
    }
}

impl ErrorReport {
    pub fn message_lossy(&self) -> String {
        String::from_utf8_lossy(&self.message).into_owned()
    }
}

/// Multi-threaded runtime shared by every handle a caller opens.
#[derive(Debug)]
pub struct Runtime {
    inner: tokio::runtime::Runtime,
}

impl Runtime {
    pub fn new(options: &RuntimeOptions) -> DeltaResult<Self> {
        let mut builder = Builder::new_multi_thread();
        builder.enable_all().thread_name("tidelog-worker");
        if let Some(threads) = options.worker_threads {
            builder.worker_threads(threads.max(1));
        }
        let inner = builder.build()?;
        debug!(worker_threads = ?options.worker_threads, "runtime started");
        Ok(Self { inner })
    }

    pub fn handle(&self) -> Handle {
        self.inner.handle().clone()
    }

    /// Drive `future` to completion on the calling thread.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.inner.block_on(future)
    }

    /// Run `future` on the runtime and invoke `callback` exactly once with
    /// its outcome. Returns immediately.
    pub fn spawn_with_callback<T, F, C>(&self, future: F, callback: C)
    where
        T: Send + 'static,
        F: Future<Output = DeltaResult<T>> + Send + 'static,
        C: FnOnce(Result<T, ErrorReport>) + Send + 'static,
    {
        self.inner.spawn(async move {
            let outcome = future.await.map_err(|err| ErrorReport::from(&err));
            callback(outcome);
        });
    }
}
