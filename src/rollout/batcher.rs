use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::base_name;
use crate::metrics::BATCHER_FLUSHES;
use crate::metrics::BATCHER_RECOMPUTE_FAILURES;
use crate::utils::async_task::spawn_task;
use crate::Agent;
use crate::Error;
use crate::Result;
use crate::RolloutConfig;
use crate::Store;

/// Coalesces agent changes into one rollout recompute per configuration
/// name per interval.
///
/// [`batch`](Self::batch) feeds a bounded queue; a single worker drains it
/// into a set of base names and recomputes each once on every tick.
pub struct RolloutBatcher {
    sender: mpsc::Sender<Vec<String>>,
    stop: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RolloutBatcher {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("RolloutBatcher")
            .field("stopped", &self.stop.is_cancelled())
            .finish()
    }
}

impl RolloutBatcher {
    /// Starts the worker. Must be called inside a tokio runtime.
    pub fn new(
        store: Arc<dyn Store>,
        config: &RolloutConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let stop = CancellationToken::new();

        let worker = BatchWorker {
            store,
            receiver,
            interval: config.batch_interval(),
            stop: stop.clone(),
            names: BTreeSet::new(),
        };
        let handle = spawn_task("rollout-batcher", move || worker.run());

        Self {
            sender,
            stop,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Queues the configurations referenced by `agents` for recompute.
    ///
    /// Waits while the queue is full; returns [`Error::Cancelled`] as soon as
    /// `token` is cancelled, and also once the batcher has shut down.
    pub async fn batch(
        &self,
        token: &CancellationToken,
        agents: &[Agent],
    ) -> Result<()> {
        let names: BTreeSet<String> = agents
            .iter()
            .flat_map(|a| a.configuration_status.references())
            .map(|r| base_name(r).to_string())
            .collect();
        if names.is_empty() {
            return Ok(());
        }

        tokio::select! {
            biased;

            _ = token.cancelled() => Err(Error::Cancelled),
            sent = self.sender.send(names.into_iter().collect()) => {
                sent.map_err(|_| Error::Cancelled)
            }
        }
    }

    /// Stops the worker and waits up to `deadline` for it to exit.
    /// Later calls return immediately.
    pub async fn shutdown(
        &self,
        deadline: Duration,
    ) -> Result<()> {
        self.stop.cancel();
        let Some(handle) = self.worker.lock().take() else {
            return Ok(());
        };

        match tokio::time::timeout(deadline, handle).await {
            Ok(Ok(())) => {
                debug!("rollout batcher stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(Error::Fatal(format!("rollout batcher worker failed: {e}"))),
            Err(_) => {
                warn!(?deadline, "rollout batcher did not stop in time");
                Err(Error::Timeout(deadline))
            }
        }
    }
}

struct BatchWorker {
    store: Arc<dyn Store>,
    receiver: mpsc::Receiver<Vec<String>>,
    interval: Duration,
    stop: CancellationToken,
    names: BTreeSet<String>,
}

impl BatchWorker {
    async fn run(mut self) -> Result<()> {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.stop.cancelled() => {
                    debug!(queued = self.names.len(), "rollout batcher stop requested");
                    return Ok(());
                }

                received = self.receiver.recv() => match received {
                    Some(names) => self.names.extend(names),
                    None => return Ok(()),
                },

                _ = interval.tick() => self.flush().await,
            }
        }
    }

    /// Recomputes every queued name once, on the blocking pool.
    async fn flush(&mut self) {
        if self.names.is_empty() {
            return;
        }
        let names = std::mem::take(&mut self.names);
        BATCHER_FLUSHES.inc();
        trace!(count = names.len(), "recomputing rollouts");

        let store = self.store.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || recompute(store.as_ref(), names)).await {
            BATCHER_RECOMPUTE_FAILURES.inc();
            warn!(error = %e, "rollout recompute task failed");
        }
    }
}

/// Failures are logged and dropped; the name comes back with the next agent
/// change that references it.
fn recompute(
    store: &dyn Store,
    names: BTreeSet<String>,
) {
    for name in names {
        match store.update_rollout(&name) {
            Ok(configuration) => trace!(
                %name,
                status = %configuration.rollout_status(),
                "rollout recomputed"
            ),
            Err(e) if e.is_missing() => {
                debug!(%name, "configuration no longer exists");
            }
            Err(e) => {
                BATCHER_RECOMPUTE_FAILURES.inc();
                warn!(%name, error = %e, "rollout recompute failed");
            }
        }
    }
}
