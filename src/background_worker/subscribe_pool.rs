use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::context::TaskContext;
use crate::application::usecases::subscriptions::{
    SubscribeExecutor, SubscriptionError, UseCaseResult,
};
use crate::domain::entities::subscriptions::SubscriptionEntity;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("subscribe queue is full")]
    QueueFull,
    #[error("subscribe pool is closed")]
    PoolClosed,
    #[error("subscribe pool did not drain within {0:?}")]
    ShutdownTimeout(Duration),
    #[error("no subscribe result within {0:?}")]
    ResultTimeout(Duration),
    #[error("subscribe task was abandoned before completing")]
    ResultAbandoned,
    #[error("subscribe task failed: {0}")]
    Task(#[from] SubscriptionError),
}

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

/// One subscribe request waiting for a worker.
pub struct SubscribeTask {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    ctx: TaskContext,
    reply_tx: oneshot::Sender<UseCaseResult<SubscriptionEntity>>,
}

impl SubscribeTask {
    /// Builds a task and the ticket its submitter uses to collect the result.
    pub fn new(user_id: Uuid, plan_id: Uuid, ctx: TaskContext) -> (Self, SubscribeTicket) {
        let (reply_tx, reply_rx) = oneshot::channel();
        (
            Self {
                user_id,
                plan_id,
                ctx,
                reply_tx,
            },
            SubscribeTicket { reply_rx },
        )
    }
}

/// Receiving half of a task's result channel, owned by the submitter.
pub struct SubscribeTicket {
    reply_rx: oneshot::Receiver<UseCaseResult<SubscriptionEntity>>,
}

impl SubscribeTicket {
    /// Waits for the task's result for at most `timeout`.
    ///
    /// Tasks abandoned by a timed-out shutdown never answer; they surface here
    /// as `ResultAbandoned` once the pool has dropped them.
    pub async fn wait(self, timeout: Duration) -> Result<SubscriptionEntity, PoolError> {
        match tokio::time::timeout(timeout, self.reply_rx).await {
            Err(_) => Err(PoolError::ResultTimeout(timeout)),
            Ok(Err(_)) => Err(PoolError::ResultAbandoned),
            Ok(Ok(result)) => result.map_err(PoolError::from),
        }
    }
}

/// Fixed set of workers draining a bounded subscribe queue.
///
/// `submit` never waits for room: a full queue is reported as `QueueFull`
/// so callers apply their own backpressure. Tasks for the same user are not
/// serialized; results may complete out of submission order.
pub struct SubscribePool {
    task_tx: Mutex<Option<mpsc::Sender<SubscribeTask>>>,
    workers: AsyncMutex<Vec<JoinHandle<()>>>,
    in_flight: Arc<AtomicUsize>,
}

impl SubscribePool {
    pub fn start(
        executor: Arc<dyn SubscribeExecutor + Send + Sync>,
        config: PoolConfig,
    ) -> Self {
        let worker_count = config.workers.max(1);
        let queue_capacity = config.queue_capacity.max(1);

        let (task_tx, task_rx) = mpsc::channel::<SubscribeTask>(queue_capacity);
        let task_rx = Arc::new(AsyncMutex::new(task_rx));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let workers: Vec<JoinHandle<()>> = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    Arc::clone(&task_rx),
                    Arc::clone(&executor),
                    Arc::clone(&in_flight),
                ))
            })
            .collect();

        info!(
            workers = worker_count,
            queue_capacity, "subscribe_pool: started"
        );

        Self {
            task_tx: Mutex::new(Some(task_tx)),
            workers: AsyncMutex::new(workers),
            in_flight,
        }
    }

    pub fn submit(&self, task: SubscribeTask) -> Result<(), PoolError> {
        let task_tx = self.task_tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(task_tx) = task_tx.as_ref() else {
            debug!(user_id = %task.user_id, "subscribe_pool: rejected, pool closed");
            return Err(PoolError::PoolClosed);
        };

        match task_tx.try_send(task) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(task)) => {
                warn!(
                    user_id = %task.user_id,
                    plan_id = %task.plan_id,
                    "subscribe_pool: queue full; rejecting task"
                );
                Err(PoolError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PoolError::PoolClosed),
        }
    }

    /// Stops accepting submissions. Queued tasks are still executed.
    pub fn close(&self) {
        let task_tx = self
            .task_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if task_tx.is_some() {
            info!("subscribe_pool: closed for new submissions");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.task_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Tasks currently being executed by a worker.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Closes the pool and waits up to `deadline` for queued and running tasks.
    ///
    /// On timeout the workers are aborted; whatever they were running or had
    /// not yet dequeued is dropped without answering its ticket.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), PoolError> {
        self.close();

        let mut workers = std::mem::take(&mut *self.workers.lock().await);
        info!(
            workers = workers.len(),
            in_flight = self.in_flight(),
            ?deadline,
            "subscribe_pool: draining"
        );

        let drained = tokio::time::timeout(deadline, async {
            for worker in workers.iter_mut() {
                if let Err(err) = worker.await {
                    if err.is_panic() {
                        error!(error = %err, "subscribe_pool: worker panicked");
                    }
                }
            }
        })
        .await;

        match drained {
            Ok(()) => {
                info!("subscribe_pool: drained");
                Ok(())
            }
            Err(_) => {
                let abandoned = self.in_flight();
                for worker in &workers {
                    worker.abort();
                }
                // Aborted workers resolve once their futures are dropped.
                for worker in workers {
                    let _ = worker.await;
                }
                warn!(
                    ?deadline,
                    abandoned,
                    "subscribe_pool: drain deadline exceeded; abandoning remaining tasks"
                );
                Err(PoolError::ShutdownTimeout(deadline))
            }
        }
    }
}

/// Counts one running task; released on completion or when an aborted worker
/// drops its future.
struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn run_worker(
    worker_id: usize,
    task_rx: Arc<AsyncMutex<mpsc::Receiver<SubscribeTask>>>,
    executor: Arc<dyn SubscribeExecutor + Send + Sync>,
    in_flight: Arc<AtomicUsize>,
) {
    debug!(worker_id, "subscribe_pool: worker started");
    loop {
        let next = {
            let mut task_rx = task_rx.lock().await;
            task_rx.recv().await
        };
        let Some(task) = next else {
            break;
        };

        let _in_flight = InFlightGuard::enter(&in_flight);
        let SubscribeTask {
            user_id,
            plan_id,
            ctx,
            reply_tx,
        } = task;

        let result = if ctx.is_cancelled() {
            Err(SubscriptionError::Cancelled)
        } else {
            executor.subscribe(&ctx, user_id, plan_id).await
        };

        match &result {
            Ok(subscription) => info!(
                worker_id,
                %user_id,
                %plan_id,
                subscription_id = %subscription.id,
                "subscribe_pool: task completed"
            ),
            Err(err) => warn!(
                worker_id,
                %user_id,
                %plan_id,
                error = %err,
                "subscribe_pool: task failed"
            ),
        }

        if reply_tx.send(result).is_err() {
            debug!(
                worker_id,
                %user_id,
                "subscribe_pool: ticket dropped before result was delivered"
            );
        }
    }
    debug!(worker_id, "subscribe_pool: worker stopped");
}
