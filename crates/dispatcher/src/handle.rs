//! WorkerHandle - one dispatcher worker task

use std::sync::Arc;
use std::time::Duration;

use contracts::{StopSignal, WorkQueue};
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument};

use crate::dispatcher::Shared;
use crate::error::DispatcherError;
use crate::metrics::Outcome;

/// Pause after a failed pop in wait-forever mode
const POP_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Handle to a running worker
pub struct WorkerHandle {
    id: usize,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub(crate) fn spawn<Q>(id: usize, shared: Arc<Shared<Q>>, stop: StopSignal) -> Self
    where
        Q: WorkQueue + Sync + 'static,
    {
        let task = tokio::spawn(async move {
            worker_loop(id, shared, stop).await;
        });
        Self { id, task }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the worker to finish its loop
    #[instrument(name = "worker_handle_join", skip(self), fields(worker = self.id))]
    pub async fn join(self) -> Result<(), DispatcherError> {
        self.task.await.map_err(|e| DispatcherError::Worker {
            worker: self.id,
            message: e.to_string(),
        })?;
        debug!(worker = self.id, "Worker joined");
        Ok(())
    }
}

/// Pop and dispatch until the queue drains or `stop` fires
///
/// In drain mode an empty pop ends the loop. In wait-forever mode each pop
/// blocks up to `extra_wait` and the loop only ends on `stop`. The current
/// item always runs to commit or rollback.
#[instrument(name = "worker_loop", skip(shared, stop))]
async fn worker_loop<Q>(id: usize, shared: Arc<Shared<Q>>, stop: StopSignal)
where
    Q: WorkQueue + Sync + 'static,
{
    let wait_forever = shared.settings.wait_forever;
    let wait = wait_forever.then(|| shared.settings.extra_wait());
    let mut handled: u64 = 0;
    debug!(worker = id, wait_forever, "Worker started");

    loop {
        let popped = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            popped = shared.queue.pop(wait) => popped,
        };

        match popped {
            Ok(Some(delivery)) => {
                handled += 1;
                if shared.dispatch(delivery, &stop).await == Outcome::Shutdown {
                    break;
                }
            }
            Ok(None) if wait_forever => {}
            Ok(None) => {
                debug!(worker = id, "Queue drained");
                break;
            }
            Err(e) => {
                error!(worker = id, error = %e, "Pop failed");
                if !wait_forever {
                    break;
                }
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(POP_ERROR_BACKOFF) => {}
                }
            }
        }
    }

    debug!(worker = id, handled, "Worker stopped");
}
