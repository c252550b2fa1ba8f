//! Typed publish/subscribe for update batches.
//!
//! # Architecture
//!
//! ```text
//! Store mutation (after commit, writer lock released):
//!   publish() -> try_send(per-subscriber channel) [non-blocking]
//!                         |
//!            raw subscriber: receiver handed to caller
//!            merged subscriber: merge task -> receiver handed to caller
//! ```
//!
//! Publishing never blocks the write path. When a subscriber buffer is full
//! the event is dropped for that subscriber and counted; subscribers should
//! re-read the store if they detect a gap.
//!
//! Subscribers are removed when their [`Subscription`] is dropped or when the
//! cancellation token passed to `subscribe` fires.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::metrics::EVENT_BUS_DROPPED_EVENTS;
use crate::EventBusConfig;

/// Batches that can be combined before delivery.
pub trait Mergeable: Clone + Send + Sync + 'static {
    /// Merges `other` into `self`; returns false and leaves both unchanged
    /// when they cannot be combined.
    fn merge(
        &mut self,
        other: &Self,
    ) -> bool;

    fn size(&self) -> usize;
}

/// Bounds for merge-before-delivery subscriptions.
#[derive(Debug, Clone, Copy)]
pub struct MergeOptions {
    /// Longest an event waits in the merge buffer
    pub max_latency: Duration,
    /// Number of published events merged into one delivery at most
    pub max_events: usize,
}

impl From<&EventBusConfig> for MergeOptions {
    fn from(config: &EventBusConfig) -> Self {
        Self {
            max_latency: Duration::from_millis(config.max_merge_latency_ms),
            max_events: config.max_events_to_merge,
        }
    }
}

struct EventBusInner<T> {
    subscribers: DashMap<u64, mpsc::Sender<T>>,
    next_id: AtomicU64,
    buffer_size: usize,
}

/// Cheap to clone; clones share the subscriber registry.
pub struct EventBus<T> {
    inner: Arc<EventBusInner<T>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for EventBus<T> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.inner.subscribers.len())
            .field("buffer_size", &self.inner.buffer_size)
            .finish()
    }
}

/// Receiving end of a subscription. Dropping it unsubscribes.
pub struct Subscription<T> {
    id: u64,
    receiver: mpsc::Receiver<T>,
    cancel: CancellationToken,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next delivered event, or None once unsubscribed.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<T> EventBus<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(config: &EventBusConfig) -> Self {
        Self {
            inner: Arc::new(EventBusInner {
                subscribers: DashMap::new(),
                next_id: AtomicU64::new(1),
                buffer_size: config.subscriber_buffer_size,
            }),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Registers a subscriber receiving every published event.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(
        &self,
        token: &CancellationToken,
    ) -> Subscription<T> {
        let (sender, receiver) = mpsc::channel(self.inner.buffer_size);
        let cancel = token.child_token();
        let id = self.register(sender, cancel.clone());
        Subscription {
            id,
            receiver,
            cancel,
        }
    }

    /// Registers a subscriber whose events are merged before delivery.
    ///
    /// A delivery happens once the oldest buffered event has waited
    /// `max_latency`, once `max_events` events were merged, or when an
    /// incoming event conflicts with the buffered batch.
    pub fn subscribe_merged(
        &self,
        token: &CancellationToken,
        options: MergeOptions,
    ) -> Subscription<T>
    where
        T: Mergeable,
    {
        let (raw_sender, raw_receiver) = mpsc::channel(self.inner.buffer_size);
        let (sender, receiver) = mpsc::channel(self.inner.buffer_size);
        let cancel = token.child_token();
        let id = self.register(raw_sender, cancel.clone());

        tokio::spawn(merge_loop(raw_receiver, sender, options, cancel.clone()));

        Subscription {
            id,
            receiver,
            cancel,
        }
    }

    /// Delivers `event` to every subscriber without blocking. Returns the
    /// number of subscribers that accepted it.
    pub fn publish(
        &self,
        event: T,
    ) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in self.inner.subscribers.iter() {
            match entry.value().try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber_id = *entry.key(), "subscriber buffer full, dropping event");
                    EVENT_BUS_DROPPED_EVENTS.inc();
                }
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }

        for id in closed {
            self.inner.subscribers.remove(&id);
            trace!(subscriber_id = id, "removed closed subscriber");
        }

        delivered
    }

    fn register(
        &self,
        sender: mpsc::Sender<T>,
        cancel: CancellationToken,
    ) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.insert(id, sender);
        debug!(subscriber_id = id, "subscriber registered");

        let inner = self.inner.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            inner.subscribers.remove(&id);
            debug!(subscriber_id = id, "subscriber unregistered");
        });

        id
    }
}

async fn merge_loop<T: Mergeable>(
    mut raw_receiver: mpsc::Receiver<T>,
    sender: mpsc::Sender<T>,
    options: MergeOptions,
    cancel: CancellationToken,
) {
    let mut buffered: Option<T> = None;
    let mut merged = 0usize;
    let deadline = tokio::time::sleep(options.max_latency);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            _ = &mut deadline, if buffered.is_some() => {
                if let Some(batch) = buffered.take() {
                    if sender.send(batch).await.is_err() {
                        break;
                    }
                }
                merged = 0;
            }

            received = raw_receiver.recv() => {
                let Some(event) = received else {
                    break;
                };

                let absorbed = match buffered.as_mut() {
                    Some(batch) => batch.merge(&event),
                    None => false,
                };

                if absorbed {
                    merged += 1;
                } else {
                    // Conflicting batches are delivered separately, in order.
                    if let Some(batch) = buffered.take() {
                        if sender.send(batch).await.is_err() {
                            break;
                        }
                    }
                    buffered = Some(event);
                    merged = 1;
                    deadline.as_mut().reset(Instant::now() + options.max_latency);
                }

                if merged >= options.max_events {
                    if let Some(batch) = buffered.take() {
                        if sender.send(batch).await.is_err() {
                            break;
                        }
                    }
                    merged = 0;
                }
            }
        }
    }

    if let Some(batch) = buffered.take() {
        if !cancel.is_cancelled() {
            let _ = sender.send(batch).await;
        }
    }
    trace!("merge loop stopped");
}
