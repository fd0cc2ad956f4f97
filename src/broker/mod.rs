//! In-process, topic-based publish/subscribe.
//!
//! The broker knows nothing about the events it carries. Each call to
//! [`Broker::subscribe`] registers a bounded delivery queue under a stream name;
//! [`Broker::publish`] copies the event into every queue registered for that
//! stream. Subscriptions live until the broker is closed or the receiver is
//! dropped, at which point the dead queue is pruned on the next publish.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

use crate::config::{BrokerConfig, OverflowPolicy};
use crate::metrics::BrokerMetrics;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker closed")]
    Closed,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrokerStats {
    pub streams: usize,
    pub subscribers: usize,
    pub published: u64,
    pub dropped: u64,
    pub closed: bool,
}

pub struct Broker<E> {
    streams: RwLock<HashMap<String, Vec<mpsc::Sender<E>>>>,
    closed: AtomicBool,
    capacity: usize,
    overflow: OverflowPolicy,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl<E> Broker<E>
where
    E: Clone + Send + 'static,
{
    pub fn new(config: &BrokerConfig) -> Self {
        Self::with_policy(config.subscriber_capacity, config.overflow)
    }

    pub fn with_policy(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
            capacity: capacity.max(1),
            overflow,
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a new delivery queue for `stream`.
    ///
    /// Subscribing to a closed broker yields a receiver that is already
    /// terminated.
    pub async fn subscribe(&self, stream: &str) -> mpsc::Receiver<E> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut streams = self.streams.write().await;
        if self.closed.load(Ordering::Acquire) {
            return rx;
        }
        streams.entry(stream.to_string()).or_default().push(tx);
        tracing::debug!(stream = %stream, "Broker subscription registered");
        rx
    }

    /// Deliver `event` to every queue registered for `stream`.
    ///
    /// Returns the number of queues the event was placed on. Per-queue order
    /// matches publish order; order across queues is unspecified.
    pub async fn publish(&self, stream: &str, event: E) -> Result<usize, BrokerError> {
        let senders = {
            let streams = self.streams.read().await;
            if self.closed.load(Ordering::Acquire) {
                return Err(BrokerError::Closed);
            }
            match streams.get(stream) {
                Some(senders) => senders.clone(),
                None => return Ok(0),
            }
        };

        self.published.fetch_add(1, Ordering::Relaxed);
        BrokerMetrics::record_published(stream);

        let mut delivered = 0;
        let mut saw_dead = false;
        for sender in &senders {
            match self.overflow {
                OverflowPolicy::Block => match sender.send(event.clone()).await {
                    Ok(()) => delivered += 1,
                    Err(_) => saw_dead = true,
                },
                OverflowPolicy::DropNewest => match sender.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        BrokerMetrics::record_dropped(stream);
                        tracing::warn!(stream = %stream, "Subscriber queue full, delivery dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => saw_dead = true,
                },
            }
        }

        if saw_dead {
            self.prune(stream).await;
        }

        Ok(delivered)
    }

    /// Close the broker. Every delivery queue is closed exactly once; later
    /// calls are no-ops.
    pub async fn close(&self) {
        let mut streams = self.streams.write().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let count: usize = streams.values().map(Vec::len).sum();
        streams.clear();
        tracing::info!(subscriptions = count, "Broker closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn subscriber_count(&self, stream: &str) -> usize {
        self.streams
            .read()
            .await
            .get(stream)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub async fn stats(&self) -> BrokerStats {
        let streams = self.streams.read().await;
        BrokerStats {
            streams: streams.len(),
            subscribers: streams.values().map(Vec::len).sum(),
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            closed: self.is_closed(),
        }
    }

    async fn prune(&self, stream: &str) {
        let mut streams = self.streams.write().await;
        if let Some(senders) = streams.get_mut(stream) {
            senders.retain(|s| !s.is_closed());
            if senders.is_empty() {
                streams.remove(stream);
            }
        }
        tracing::debug!(stream = %stream, "Pruned dropped broker subscriptions");
    }
}
