//! Value storage - the latest value per (device, register), with live fan-out.
//!
//! Each instance is an actor: one owner task exclusively holds the state map
//! and the subscriber list, and every operation is a message to it. The
//! owner's processing order is the single total order that snapshots,
//! subscribers and the [`ValueStorage::wait`] barrier are defined against.
//!
//! ```text
//!  fill() ──► input queue (bounded) ──┐
//!                                     ├──► owner task ──► subscriber queues
//!  get_state() / subscribe() / wait() ┘      │
//!        ──► control queue                   └──► state: BTreeMap<ValueKey, Value>
//! ```
//!
//! ## Change suppression
//!
//! A value structurally equal to the one already stored at its key is
//! dropped: no state change, no fan-out. Producers can poll at a fixed
//! cadence without flooding consumers.
//!
//! ## Barrier
//!
//! Before serving any control request the owner drains whatever is already
//! buffered in the input queue. Every `fill` that returned before a request
//! was sent is therefore applied before that request is answered.
//!
//! ## Back-pressure
//!
//! `fill` waits once the input queue is full. Subscriber queues are bounded;
//! when one is full the owner either waits ([`OverflowPolicy::Block`], the
//! default, which stalls the whole store behind the slowest subscriber) or
//! drops the update for that subscriber only ([`OverflowPolicy::DropNewest`],
//! counted in [`StorageStats::dropped_deliveries`]). Neither is reported as
//! an error.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::{defaults, OverflowPolicy, StorageConfig};
use crate::error::{Error, Result};
use crate::filter::ValueFilter;
use crate::subscription::{Subscription, SubscriptionId};
use crate::value::{Value, ValueKey};

/// Counters kept by the owner task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Values taken from the input queue
    pub received: u64,
    /// Values that changed the state and were fanned out
    pub applied: u64,
    /// Values equal to the stored one, dropped
    pub suppressed: u64,
    /// Deliveries skipped because a subscriber queue was full
    pub dropped_deliveries: u64,
    /// Keys currently held in the state
    pub keys: usize,
    /// Live subscriptions
    pub subscriptions: usize,
}

enum Request {
    Snapshot {
        filter: ValueFilter,
        reply: oneshot::Sender<Vec<Value>>,
    },
    Subscribe {
        filter: ValueFilter,
        send_initial: bool,
        cancel: CancellationToken,
        reply: oneshot::Sender<(SubscriptionId, mpsc::Receiver<Value>)>,
    },
    Unsubscribe {
        id: SubscriptionId,
    },
    Wait {
        reply: oneshot::Sender<()>,
    },
    Stats {
        reply: oneshot::Sender<StorageStats>,
    },
}

/// Handle to a value store.
///
/// Cloning is cheap and every clone talks to the same owner task. The owner
/// stops once all handles are dropped, closing every subscription.
#[derive(Clone)]
pub struct ValueStorage {
    input: mpsc::Sender<Value>,
    control: mpsc::Sender<Request>,
    config: Arc<StorageConfig>,
}

impl ValueStorage {
    /// Create a store and spawn its owner task.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::spawn(config))
    }

    /// Create a store with default settings.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self::spawn(StorageConfig::named(name))
    }

    fn spawn(config: StorageConfig) -> Self {
        let (input_tx, input_rx) = mpsc::channel(config.input_capacity);
        let (control_tx, control_rx) = mpsc::channel(defaults::CONTROL_CAPACITY);
        let config = Arc::new(config);

        let owner = Owner {
            config: config.clone(),
            input: input_rx,
            control: control_rx,
            state: BTreeMap::new(),
            subscribers: Vec::new(),
            next_id: 1,
            stats: StorageStats::default(),
        };
        tokio::spawn(owner.run());

        Self {
            input: input_tx,
            control: control_tx,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Queue a value for the owner. This is the only write path.
    ///
    /// Waits while the input queue is full.
    pub async fn fill(&self, value: Value) -> Result<()> {
        self.input
            .send(value)
            .await
            .map_err(|_| Error::closed(self.config.name.clone()))
    }

    /// Snapshot of the whole state, ordered by key.
    pub async fn get_state(&self) -> Result<Vec<Value>> {
        self.get_state_filtered(&ValueFilter::all()).await
    }

    /// Snapshot of the values accepted by `filter`, ordered by key.
    pub async fn get_state_filtered(&self, filter: &ValueFilter) -> Result<Vec<Value>> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Snapshot {
            filter: filter.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| self.closed())
    }

    /// Live updates accepted by `filter`, starting after the current state.
    pub async fn subscribe(
        &self,
        cancel: &CancellationToken,
        filter: ValueFilter,
    ) -> Result<Subscription<Value>> {
        self.open_subscription(cancel, filter, false).await
    }

    /// Like [`subscribe`](Self::subscribe), but first replays the matching
    /// current state.
    pub async fn subscribe_send_initial(
        &self,
        cancel: &CancellationToken,
        filter: ValueFilter,
    ) -> Result<Subscription<Value>> {
        self.open_subscription(cancel, filter, true).await
    }

    async fn open_subscription(
        &self,
        cancel: &CancellationToken,
        filter: ValueFilter,
        send_initial: bool,
    ) -> Result<Subscription<Value>> {
        let child = cancel.child_token();
        if child.is_cancelled() {
            return Ok(Subscription::closed(child));
        }

        let (reply, rx) = oneshot::channel();
        self.request(Request::Subscribe {
            filter,
            send_initial,
            cancel: child.clone(),
            reply,
        })
        .await?;
        let (id, values) = rx.await.map_err(|_| self.closed())?;

        let control = self.control.downgrade();
        let watch = child.clone();
        tokio::spawn(async move {
            watch.cancelled().await;
            if let Some(control) = control.upgrade() {
                let _ = control.send(Request::Unsubscribe { id }).await;
            }
        });

        Ok(Subscription::new(id, values, child))
    }

    /// Block until every `fill` that returned before this call has been applied.
    pub async fn wait(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Wait { reply }).await?;
        rx.await.map_err(|_| self.closed())
    }

    pub async fn stats(&self) -> Result<StorageStats> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Stats { reply }).await?;
        rx.await.map_err(|_| self.closed())
    }

    async fn request(&self, request: Request) -> Result<()> {
        self.control.send(request).await.map_err(|_| self.closed())
    }

    fn closed(&self) -> Error {
        Error::closed(self.config.name.clone())
    }
}

impl std::fmt::Debug for ValueStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueStorage")
            .field("name", &self.config.name)
            .finish()
    }
}

struct ValueSubscriber {
    id: SubscriptionId,
    filter: ValueFilter,
    tx: mpsc::Sender<Value>,
    cancel: CancellationToken,
}

/// The task that owns a store's state.
struct Owner {
    config: Arc<StorageConfig>,
    input: mpsc::Receiver<Value>,
    control: mpsc::Receiver<Request>,
    state: BTreeMap<ValueKey, Value>,
    subscribers: Vec<ValueSubscriber>,
    next_id: SubscriptionId,
    stats: StorageStats,
}

impl Owner {
    async fn run(mut self) {
        tracing::info!(store = %self.config.name, "value storage started");

        loop {
            tokio::select! {
                Some(value) = self.input.recv() => self.apply(value).await,
                Some(request) = self.control.recv() => {
                    self.drain_pending().await;
                    self.handle(request).await;
                }
                else => break,
            }
        }

        for sub in self.subscribers.drain(..) {
            sub.cancel.cancel();
        }
        tracing::info!(
            store = %self.config.name,
            received = self.stats.received,
            applied = self.stats.applied,
            "value storage stopped"
        );
    }

    /// Apply what is already buffered in the input queue.
    ///
    /// The queue never holds more than `input_capacity` values, so this
    /// covers every fill that completed before the current request was sent.
    async fn drain_pending(&mut self) {
        for _ in 0..self.config.input_capacity {
            match self.input.try_recv() {
                Ok(value) => self.apply(value).await,
                Err(_) => break,
            }
        }
    }

    async fn handle(&mut self, request: Request) {
        match request {
            Request::Snapshot { filter, reply } => {
                let values = self
                    .state
                    .values()
                    .filter(|v| filter.matches(v))
                    .cloned()
                    .collect();
                let _ = reply.send(values);
            }
            Request::Subscribe {
                filter,
                send_initial,
                cancel,
                reply,
            } => self.subscribe(filter, send_initial, cancel, reply),
            Request::Unsubscribe { id } => {
                let before = self.subscribers.len();
                self.subscribers.retain(|s| s.id != id);
                if self.subscribers.len() != before {
                    tracing::debug!(store = %self.config.name, subscription = id, "subscription removed");
                }
            }
            Request::Wait { reply } => {
                let _ = reply.send(());
            }
            Request::Stats { reply } => {
                let mut stats = self.stats.clone();
                stats.keys = self.state.len();
                stats.subscriptions = self.subscribers.len();
                let _ = reply.send(stats);
            }
        }
    }

    fn subscribe(
        &mut self,
        filter: ValueFilter,
        send_initial: bool,
        cancel: CancellationToken,
        reply: oneshot::Sender<(SubscriptionId, mpsc::Receiver<Value>)>,
    ) {
        let initial: Vec<Value> = if send_initial {
            self.state
                .values()
                .filter(|v| filter.matches(v))
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        // Sized so the replay never waits on a reader that has not started yet
        let (tx, rx) = mpsc::channel(initial.len() + self.config.subscriber_capacity);
        let replayed = initial.len();
        for value in initial {
            let _ = tx.try_send(value);
        }

        let id = self.next_id;
        self.next_id += 1;

        if reply.send((id, rx)).is_err() {
            // Caller went away before the subscription was handed over
            return;
        }
        self.subscribers.push(ValueSubscriber {
            id,
            filter,
            tx,
            cancel,
        });
        tracing::debug!(
            store = %self.config.name,
            subscription = id,
            replayed,
            "subscription added"
        );
    }

    async fn apply(&mut self, value: Value) {
        self.stats.received += 1;

        let key = value.key();
        if self.state.get(&key) == Some(&value) {
            self.stats.suppressed += 1;
            return;
        }

        tracing::trace!(store = %self.config.name, %value, "value changed");
        self.state.insert(key, value.clone());
        self.stats.applied += 1;
        self.fan_out(&value).await;
    }

    /// Deliver one accepted update to every matching subscriber, in order.
    async fn fan_out(&mut self, value: &Value) {
        let mut gone = Vec::new();
        for sub in &self.subscribers {
            if sub.cancel.is_cancelled() || sub.tx.is_closed() {
                gone.push(sub.id);
                continue;
            }
            if !sub.filter.matches(value) {
                continue;
            }
            let delivered = match self.config.overflow {
                OverflowPolicy::Block => tokio::select! {
                    res = sub.tx.send(value.clone()) => res.is_ok(),
                    _ = sub.cancel.cancelled() => false,
                },
                OverflowPolicy::DropNewest => match sub.tx.try_send(value.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        self.stats.dropped_deliveries += 1;
                        tracing::warn!(
                            store = %self.config.name,
                            subscription = sub.id,
                            key = %value.key(),
                            "subscriber queue full, dropping update"
                        );
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                },
            };
            if !delivered {
                gone.push(sub.id);
            }
        }

        if !gone.is_empty() {
            self.subscribers.retain(|s| !gone.contains(&s.id));
            tracing::debug!(store = %self.config.name, removed = ?gone, "subscriptions closed");
        }
    }
}
