//! Routed execution runtime.
//!
//! `SafeguardEngine` is a synchronous executor. Panic activations and other
//! mutations must never wait behind heavy listing queries, so this module
//! provides a small, bounded, thread-based runtime that routes requests into
//! separate worker pools. A full queue is reported as an error instead of
//! blocking the caller.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::auth::Principal;
use crate::config::RuntimeConfig;
use crate::engine::{EngineResponse, SafeguardEngine};
use crate::error::{RuntimeError, SafeguardError, SafeguardResult};
use crate::ir::{Operation, SafeguardIR};

/// Execution path selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionPath {
    /// State-changing, latency-sensitive operations.
    Urgent,
    /// Listings and history reads.
    Query,
}

impl fmt::Display for ExecutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Urgent => write!(f, "urgent"),
            Self::Query => write!(f, "query"),
        }
    }
}

/// Routes operations to an execution path.
pub trait OperationRouter: Send + Sync {
    /// Selects the execution path for the given operation.
    fn route(&self, op: &Operation) -> ExecutionPath;
}

/// Default router.
///
/// Policy:
/// - Panic, escort and report mutations are Urgent.
/// - Catchment updates are Urgent, since dispatch depends on them.
/// - Listings, history and live-location reads are Query.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRouter;

impl OperationRouter for DefaultRouter {
    fn route(&self, op: &Operation) -> ExecutionPath {
        match op {
            Operation::ActivatePanic(_)
            | Operation::LogPanicLocation(_)
            | Operation::DeactivatePanic
            | Operation::StartEscort(_)
            | Operation::LogEscortLocation(_)
            | Operation::StopEscort
            | Operation::CreateReport(_)
            | Operation::MarkReportUploaded(_)
            | Operation::SetCatchment(_) => ExecutionPath::Urgent,
            Operation::MyReports
            | Operation::NearbyReports
            | Operation::NearbyPanics
            | Operation::SubjectHistory(_)
            | Operation::LiveLocation(_)
            | Operation::ViewCatchment => ExecutionPath::Query,
        }
    }
}

enum Job {
    Execute {
        principal: Principal,
        ir: SafeguardIR,
        reply: Sender<SafeguardResult<EngineResponse>>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

struct WorkerPool {
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    fn start(
        path: ExecutionPath,
        workers: usize,
        queue_capacity: usize,
        engine: &Arc<SafeguardEngine>,
    ) -> SafeguardResult<Self> {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let engine = Arc::clone(engine);
            let handle = thread::Builder::new()
                .name(format!("safeguard-{path}-{idx}"))
                .spawn(move || loop {
                    match rx.recv() {
                        Ok(Job::Execute { principal, ir, reply }) => {
                            let result = engine.execute_ir(&principal, ir);
                            let _ = reply.send(result);
                        }
                        Err(_) => break,

                        #[cfg(test)]
                        Ok(Job::Sleep { duration, reply }) => {
                            thread::sleep(duration);
                            let _ = reply.send(());
                        }
                    }
                })
                .map_err(|e| SafeguardError::internal(format!("failed to spawn {path} worker: {e}")))?;
            handles.push(handle);
        }

        Ok(Self {
            tx,
            workers: handles,
            queue_capacity,
        })
    }

    fn try_submit(&self, job: Job, path: ExecutionPath) -> SafeguardResult<()> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::warn!(path = %path, capacity = self.queue_capacity, "runtime queue full");
                Err(RuntimeError::QueueFull {
                    path: path.to_string(),
                    capacity: self.queue_capacity,
                }
                .into())
            }
            Err(TrySendError::Disconnected(_)) => Err(RuntimeError::Disconnected {
                path: path.to_string(),
            }
            .into()),
        }
    }

    fn shutdown(self) {
        // Close the channel: workers will drain queued jobs then exit.
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }

    fn closed() -> Self {
        Self {
            tx: bounded::<Job>(1).0,
            workers: Vec::new(),
            queue_capacity: 1,
        }
    }
}

/// Handle returned by [`EngineRuntime::execute_async`].
pub struct ExecutionHandle {
    path: ExecutionPath,
    rx: Receiver<SafeguardResult<EngineResponse>>,
}

impl ExecutionHandle {
    /// Returns the path selected by the router.
    #[must_use]
    pub const fn path(&self) -> ExecutionPath {
        self.path
    }

    /// Waits for the execution to complete.
    ///
    /// # Errors
    ///
    /// `Runtime` if the worker went away, otherwise the operation's own error.
    pub fn join(self) -> SafeguardResult<EngineResponse> {
        self.rx.recv().map_err(|_| {
            SafeguardError::from(RuntimeError::Disconnected {
                path: self.path.to_string(),
            })
        })?
    }

    /// Waits for the execution to complete with a timeout.
    ///
    /// # Errors
    ///
    /// `Runtime` on timeout or if the worker went away.
    pub fn join_timeout(self, timeout: Duration) -> SafeguardResult<EngineResponse> {
        self.rx.recv_timeout(timeout).map_err(|err| {
            SafeguardError::from(match err {
                RecvTimeoutError::Timeout => RuntimeError::Timeout {
                    duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                },
                RecvTimeoutError::Disconnected => RuntimeError::Disconnected {
                    path: self.path.to_string(),
                },
            })
        })?
    }
}

/// A routed runtime that keeps urgent work isolated from queries.
pub struct EngineRuntime<R: OperationRouter = DefaultRouter> {
    router: R,
    engine: Arc<SafeguardEngine>,
    urgent: WorkerPool,
    query: WorkerPool,
}

impl EngineRuntime<DefaultRouter> {
    /// Create a runtime with the default router.
    ///
    /// # Errors
    ///
    /// `Internal` if a worker thread cannot be spawned.
    pub fn new(engine: SafeguardEngine, config: &RuntimeConfig) -> SafeguardResult<Self> {
        Self::with_router(engine, DefaultRouter, config)
    }
}

impl<R: OperationRouter> EngineRuntime<R> {
    /// Create a runtime with a custom router.
    ///
    /// # Errors
    ///
    /// `Internal` if a worker thread cannot be spawned.
    pub fn with_router(engine: SafeguardEngine, router: R, config: &RuntimeConfig) -> SafeguardResult<Self> {
        let engine = Arc::new(engine);
        let urgent = WorkerPool::start(
            ExecutionPath::Urgent,
            config.urgent_workers,
            config.queue_capacity,
            &engine,
        )?;
        let query = match WorkerPool::start(ExecutionPath::Query, config.query_workers, config.queue_capacity, &engine)
        {
            Ok(pool) => pool,
            Err(e) => {
                urgent.shutdown();
                return Err(e);
            }
        };
        Ok(Self {
            router,
            engine,
            urgent,
            query,
        })
    }

    /// Submit a request on its routed path.
    ///
    /// # Errors
    ///
    /// `Runtime` if the path's queue is full or closed.
    pub fn execute_async(&self, principal: Principal, ir: SafeguardIR) -> SafeguardResult<ExecutionHandle> {
        let path = self.router.route(&ir.operation);
        let (tx, rx) = bounded::<SafeguardResult<EngineResponse>>(1);
        let job = Job::Execute {
            principal,
            ir,
            reply: tx,
        };
        self.pool(path).try_submit(job, path)?;
        Ok(ExecutionHandle { path, rx })
    }

    /// Submit a request and wait for its result.
    ///
    /// # Errors
    ///
    /// As [`Self::execute_async`] and [`ExecutionHandle::join`].
    pub fn execute(&self, principal: Principal, ir: SafeguardIR) -> SafeguardResult<EngineResponse> {
        self.execute_async(principal, ir)?.join()
    }

    /// Returns a shared reference to the underlying engine.
    #[must_use]
    pub fn engine(&self) -> &SafeguardEngine {
        &self.engine
    }

    const fn pool(&self, path: ExecutionPath) -> &WorkerPool {
        match path {
            ExecutionPath::Urgent => &self.urgent,
            ExecutionPath::Query => &self.query,
        }
    }

    #[cfg(test)]
    fn submit_sleep(&self, path: ExecutionPath, duration: Duration) -> SafeguardResult<Receiver<()>> {
        let (tx, rx) = bounded::<()>(1);
        self.pool(path)
            .try_submit(Job::Sleep { duration, reply: tx }, path)?;
        Ok(rx)
    }
}

impl<R: OperationRouter> Drop for EngineRuntime<R> {
    fn drop(&mut self) {
        // Deterministic shutdown: stop workers and join threads.
        let urgent = std::mem::replace(&mut self.urgent, WorkerPool::closed());
        let query = std::mem::replace(&mut self.query, WorkerPool::closed());
        urgent.shutdown();
        query.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::SafeguardConfig;
    use crate::dispatch::RecordingGateway;
    use crate::ids::{ResponderId, SubjectId};
    use crate::ir::{ActivatePanicPayload, LocationPayload, SubjectPayload};

    fn runtime(urgent: usize, query: usize, capacity: usize) -> EngineRuntime {
        let engine = SafeguardEngine::in_memory(Arc::new(RecordingGateway::new()), SafeguardConfig::default());
        EngineRuntime::new(
            engine,
            &RuntimeConfig {
                urgent_workers: urgent,
                query_workers: query,
                queue_capacity: capacity,
            },
        )
        .unwrap()
    }

    fn activate() -> SafeguardIR {
        SafeguardIR::new(Operation::ActivatePanic(ActivatePanicPayload {
            location: LocationPayload::new(6.5244, 3.3792),
            category: None,
        }))
    }

    #[test]
    fn router_routes_as_expected() {
        let router = DefaultRouter;
        assert_eq!(router.route(&activate().operation), ExecutionPath::Urgent);
        assert_eq!(router.route(&Operation::StopEscort), ExecutionPath::Urgent);
        assert_eq!(router.route(&Operation::NearbyPanics), ExecutionPath::Query);
        assert_eq!(
            router.route(&Operation::SubjectHistory(SubjectPayload::default())),
            ExecutionPath::Query
        );
    }

    #[test]
    fn query_work_does_not_starve_urgent() {
        let runtime = runtime(1, 1, 16);

        // Occupy the query worker.
        let sleep = runtime
            .submit_sleep(ExecutionPath::Query, Duration::from_millis(200))
            .unwrap();

        let started = std::time::Instant::now();
        let handle = runtime
            .execute_async(Principal::civil(SubjectId::new()), activate())
            .unwrap();
        assert_eq!(handle.path(), ExecutionPath::Urgent);
        let response = handle.join_timeout(Duration::from_millis(150)).unwrap();
        assert!(matches!(response, EngineResponse::PanicActivated(_)));
        assert!(started.elapsed() < Duration::from_millis(190));

        sleep.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn full_queue_is_an_error() {
        let runtime = runtime(1, 1, 1);
        let busy = runtime
            .submit_sleep(ExecutionPath::Query, Duration::from_millis(200))
            .unwrap();
        // Give the worker time to pick the first job up so the queue is empty.
        thread::sleep(Duration::from_millis(50));
        let queued = runtime
            .submit_sleep(ExecutionPath::Query, Duration::from_millis(1))
            .unwrap();

        let responder = Principal::responder(ResponderId::new());
        let err = runtime
            .execute_async(responder, SafeguardIR::new(Operation::NearbyPanics))
            .err()
            .unwrap();
        assert!(matches!(err, SafeguardError::Runtime(RuntimeError::QueueFull { .. })));
        assert!(err.is_retryable());

        busy.recv_timeout(Duration::from_secs(1)).unwrap();
        queued.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn join_reports_disconnected_when_reply_sender_dropped() {
        let (tx, rx) = bounded::<SafeguardResult<EngineResponse>>(1);
        drop(tx);

        let handle = ExecutionHandle {
            path: ExecutionPath::Urgent,
            rx,
        };

        let err = handle.join().unwrap_err();
        let SafeguardError::Runtime(RuntimeError::Disconnected { path }) = err else {
            panic!("expected Disconnected, got {err:?}");
        };
        assert_eq!(path, "urgent");
    }

    #[test]
    fn join_timeout_reports_disconnected_not_timeout_when_reply_sender_dropped() {
        let (tx, rx) = bounded::<SafeguardResult<EngineResponse>>(1);
        drop(tx);

        let handle = ExecutionHandle {
            path: ExecutionPath::Query,
            rx,
        };

        let err = handle.join_timeout(Duration::from_millis(10)).unwrap_err();
        let SafeguardError::Runtime(RuntimeError::Disconnected { path }) = err else {
            panic!("expected Disconnected, got {err:?}");
        };
        assert_eq!(path, "query");
    }
}
