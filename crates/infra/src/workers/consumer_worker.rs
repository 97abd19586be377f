use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, warn};

use authors_events::{BusMessage, EventBus, Settlement, Subscription};

use crate::author_store::AuthorStore;
use crate::reconciler::{CounterReconciler, ReconcileError, ReconcileOutcome};

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Retry schedule for a failing handler: exponential backoff, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Pause after the `attempt`-th failure (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Generic bus consumer loop.
///
/// - Subscribes to an event bus before the thread starts, so nothing published
///   after `spawn` returns is missed
/// - A failing handler is retried in place per the [`RetryPolicy`]; each message
///   is settled with the bus only once it succeeded or ran out of attempts, and
///   a bus that redelivers gets it back later
/// - Supports graceful shutdown; a message interrupted mid-retry is left
///   unsettled
#[derive(Debug)]
pub struct ConsumerWorker;

impl ConsumerWorker {
    /// Spawn a worker thread with the default retry policy.
    ///
    /// `handler` must tolerate redelivery (at-least-once).
    pub fn spawn<M, B, H, E>(name: &'static str, bus: B, handler: H) -> std::io::Result<WorkerHandle>
    where
        M: Send + 'static,
        B: EventBus<M>,
        H: FnMut(&M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        Self::spawn_with_retry(name, bus, RetryPolicy::default(), handler)
    }

    pub fn spawn_with_retry<M, B, H, E>(
        name: &'static str,
        bus: B,
        policy: RetryPolicy,
        mut handler: H,
    ) -> std::io::Result<WorkerHandle>
    where
        M: Send + 'static,
        B: EventBus<M>,
        H: FnMut(&M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<M> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, policy, &mut handler))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }

    /// Spawn the post-change consumer that keeps `total_posts` in sync.
    ///
    /// The reconciler is async; the worker thread drives it on `runtime`.
    pub fn spawn_reconciler<B, S>(
        bus: B,
        reconciler: Arc<CounterReconciler<S>>,
        runtime: tokio::runtime::Handle,
    ) -> std::io::Result<WorkerHandle>
    where
        B: EventBus<BusMessage>,
        S: AuthorStore + 'static,
    {
        Self::spawn("posts-consumer", bus, move |message: &BusMessage| {
            match runtime.block_on(reconciler.handle_message(message)) {
                Ok(ReconcileOutcome::Duplicate) => {
                    debug!(message_id = message.message_id(), "redelivered post change skipped");
                    Ok(())
                }
                Ok(_) => Ok(()),
                // Retrying cannot fix a payload.
                Err(ReconcileError::Decode(err)) => {
                    warn!(message_id = message.message_id(), error = %err, "undecodable post change dropped");
                    Ok(())
                }
                Err(err) => Err(err),
            }
        })
    }
}

enum Delivery {
    Applied,
    Exhausted,
    Interrupted,
}

fn worker_loop<M, H, E>(
    name: &'static str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    policy: RetryPolicy,
    handler: &mut H,
) where
    H: FnMut(&M) -> Result<(), E>,
    E: core::fmt::Debug,
{
    let tick = Duration::from_millis(250);

    loop {
        // Shutdown check (non-blocking)
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(msg) => match deliver(name, &msg, handler, &policy, &shutdown_rx) {
                Delivery::Applied => sub.settle(Settlement::Done),
                Delivery::Exhausted if sub.redelivers() => {
                    warn!(worker = name, "handler attempts exhausted; leaving message for redelivery");
                    sub.settle(Settlement::Failed);
                }
                Delivery::Exhausted => {
                    error!(worker = name, "handler attempts exhausted; message dropped");
                    sub.settle(Settlement::Failed);
                }
                Delivery::Interrupted => break,
            },
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn deliver<M, H, E>(
    name: &'static str,
    msg: &M,
    handler: &mut H,
    policy: &RetryPolicy,
    shutdown_rx: &mpsc::Receiver<()>,
) -> Delivery
where
    H: FnMut(&M) -> Result<(), E>,
    E: core::fmt::Debug,
{
    let mut attempt = 1;
    loop {
        let err = match handler(msg) {
            Ok(()) => return Delivery::Applied,
            Err(err) => err,
        };

        if attempt >= policy.max_attempts {
            warn!(worker = name, attempt, error = ?err, "consumer worker handler failed");
            return Delivery::Exhausted;
        }

        let backoff = policy.backoff(attempt);
        warn!(worker = name, attempt, ?backoff, error = ?err, "consumer worker handler failed; retrying");
        match shutdown_rx.recv_timeout(backoff) {
            Ok(()) => return Delivery::Interrupted,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            // Handle dropped without shutdown: keep running, just wait out the backoff.
            Err(mpsc::RecvTimeoutError::Disconnected) => thread::sleep(backoff),
        }
        attempt += 1;
    }
}
