use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;

tokio::task_local! {
    /// Set only for the task(s) considered "the reactor". Any code running
    /// inside `Reactor::enter` sees this; a `spawn_blocking` worker never
    /// does, since task-locals are not inherited by blocking threads.
    static ON_REACTOR: ();
}

/// Which execution context a caller is in, as far as the bus's dispatch
/// policy is concerned. See spec section 4.2 and the REDESIGN FLAGS note
/// about exposing this as an explicit token instead of re-deriving thread
/// identity at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchContext {
    /// The reactor has not been started yet (tests, boot).
    NotRunning,
    /// The caller is running on the single cooperative reactor task.
    OnReactor,
    /// The caller is running on a worker thread (e.g. inside `spawn_blocking`).
    OnWorker,
}

/// Thin wrapper around the single-threaded cooperative scheduler described in
/// spec section 2. Backed by the ambient Tokio runtime: `schedule_later` and
/// `submit_from_worker` both hand work back to the runtime's task queue,
/// `now()` is the reactor clock, and `is_running` tracks the lifecycle so
/// periodic timers can self-terminate.
#[derive(Clone)]
pub struct Reactor {
    handle: Handle,
    running: Arc<AtomicBool>,
}

impl Reactor {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn now(&self) -> Instant {
        Instant::now()
    }

    /// Runs `fut` tagged as reactor work; code running inside it observes
    /// `DispatchContext::OnReactor`.
    pub fn enter<F>(&self, fut: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        ON_REACTOR.scope((), fut)
    }

    /// Schedules `f` to run on the reactor after `delay`, mirroring
    /// `reactor.callLater(delay, fn)`.
    pub fn schedule_later<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let task = async move {
            tokio::time::sleep(delay).await;
            f();
        };
        self.handle.spawn(ON_REACTOR.scope((), task));
    }

    /// Hands `f` off from a worker thread back to the reactor, mirroring
    /// `reactor.callFromThread(fn)`.
    pub fn submit_from_worker<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.spawn(ON_REACTOR.scope((), async move { f() }));
    }

    /// The dispatch context the *current* call is running in.
    pub fn current_context(&self) -> DispatchContext {
        if !self.is_running() {
            return DispatchContext::NotRunning;
        }
        if ON_REACTOR.try_with(|_| ()).is_ok() {
            DispatchContext::OnReactor
        } else {
            DispatchContext::OnWorker
        }
    }
}
