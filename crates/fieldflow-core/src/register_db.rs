//! Register catalog - the registers known for one scope, usually one device.
//!
//! The catalog is append-mostly: registers are added as devices discover
//! them and are never removed. Subscribers first receive every matching
//! register known at subscribe time, then each newly added one.
//!
//! ## Locking
//!
//! One read/write lock serializes `add` against reads and subscribe. New
//! registers are delivered to subscriber queues while the write lock is
//! held. With [`OverflowPolicy::Block`] a subscriber that stops reading
//! without cancelling therefore stalls every `add` and every reader of this
//! catalog until it drains or is cancelled. Subscriber queues are bounded
//! ([`RegisterDbConfig::subscriber_capacity`]); choose
//! [`OverflowPolicy::DropNewest`] where a stalled catalog is worse than a
//! missed announcement.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::{OverflowPolicy, RegisterDbConfig};
use crate::error::Result;
use crate::filter::RegisterFilter;
use crate::register::Register;
use crate::subscription::{Subscription, SubscriptionId};

struct RegisterSubscriber {
    id: SubscriptionId,
    filter: RegisterFilter,
    tx: mpsc::Sender<Arc<Register>>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Catalog {
    /// Discovery order
    registers: Vec<Arc<Register>>,
    /// Register name to position in `registers`
    index: HashMap<String, usize>,
    subscribers: Vec<RegisterSubscriber>,
    next_id: SubscriptionId,
}

/// Catalog of registers with live notification of newcomers.
///
/// Cloning is cheap; all clones share the same catalog.
#[derive(Clone)]
pub struct RegisterDb {
    catalog: Arc<RwLock<Catalog>>,
    config: Arc<RegisterDbConfig>,
}

impl RegisterDb {
    /// Create an empty catalog with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            catalog: Arc::new(RwLock::new(Catalog::default())),
            config: Arc::new(RegisterDbConfig::named(name)),
        }
    }

    pub fn with_config(config: RegisterDbConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            catalog: Arc::new(RwLock::new(Catalog::default())),
            config: Arc::new(config),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Add registers, skipping any that are already present unchanged.
    ///
    /// A register whose name is known but whose fields differ replaces the
    /// old entry in place and is delivered again, including to subscribers
    /// that saw the previous version.
    pub async fn add<I>(&self, registers: I)
    where
        I: IntoIterator,
        I::Item: Into<Arc<Register>>,
    {
        let mut catalog = self.catalog.write().await;
        for register in registers {
            let register: Arc<Register> = register.into();

            match catalog.index.get(&register.name).copied() {
                Some(pos) if catalog.registers[pos] == register => continue,
                Some(pos) => {
                    tracing::debug!(
                        catalog = %self.config.name,
                        register = %register.name,
                        "register definition changed"
                    );
                    catalog.registers[pos] = register.clone();
                }
                None => {
                    let pos = catalog.registers.len();
                    catalog.index.insert(register.name.clone(), pos);
                    catalog.registers.push(register.clone());
                }
            }

            self.deliver(&mut *catalog, &register).await;
        }
    }

    /// Hand one register to every matching subscriber, pruning dead ones.
    async fn deliver(&self, catalog: &mut Catalog, register: &Arc<Register>) {
        let mut gone = Vec::new();
        for sub in &catalog.subscribers {
            if sub.cancel.is_cancelled() {
                gone.push(sub.id);
                continue;
            }
            if !sub.filter.matches(register) {
                continue;
            }
            let delivered = match self.config.overflow {
                OverflowPolicy::Block => tokio::select! {
                    res = sub.tx.send(register.clone()) => res.is_ok(),
                    _ = sub.cancel.cancelled() => false,
                },
                OverflowPolicy::DropNewest => match sub.tx.try_send(register.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(
                            catalog = %self.config.name,
                            subscription = sub.id,
                            register = %register.name,
                            "register subscriber queue full, dropping"
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
            catalog.subscribers.retain(|s| !gone.contains(&s.id));
        }
    }

    /// Snapshot of every known register in discovery order.
    pub async fn get_all(&self) -> Vec<Arc<Register>> {
        self.catalog.read().await.registers.clone()
    }

    pub async fn get_by_name(&self, name: &str) -> Option<Arc<Register>> {
        let catalog = self.catalog.read().await;
        catalog
            .index
            .get(name)
            .map(|pos| catalog.registers[*pos].clone())
    }

    pub async fn get_filtered(&self, filter: &RegisterFilter) -> Vec<Arc<Register>> {
        self.catalog
            .read()
            .await
            .registers
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.catalog.read().await.registers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn subscriber_count(&self) -> usize {
        self.catalog.read().await.subscribers.len()
    }

    /// Subscribe to matching registers: the current ones first, then each new one.
    ///
    /// The subscription ends when `cancel` fires; it is then removed from
    /// the catalog by a cleanup task. An already cancelled signal yields an
    /// empty, closed subscription.
    pub async fn subscribe(
        &self,
        cancel: &CancellationToken,
        filter: RegisterFilter,
    ) -> Subscription<Arc<Register>> {
        let child = cancel.child_token();
        if child.is_cancelled() {
            return Subscription::closed(child);
        }

        let mut catalog = self.catalog.write().await;
        let initial: Vec<Arc<Register>> = catalog
            .registers
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();

        // Room for the replay plus live updates, so replay never waits on the reader
        let (tx, rx) = mpsc::channel(initial.len() + self.config.subscriber_capacity);
        for register in initial {
            // Cannot fail: capacity covers the replay and rx is alive
            let _ = tx.try_send(register);
        }

        let id = catalog.next_id;
        catalog.next_id += 1;
        catalog.subscribers.push(RegisterSubscriber {
            id,
            filter,
            tx,
            cancel: child.clone(),
        });
        drop(catalog);

        tracing::debug!(catalog = %self.config.name, subscription = id, "register subscription added");
        spawn_cleanup(Arc::downgrade(&self.catalog), child.clone(), id);

        Subscription::new(id, rx, child)
    }
}

fn spawn_cleanup(catalog: Weak<RwLock<Catalog>>, cancel: CancellationToken, id: SubscriptionId) {
    tokio::spawn(async move {
        cancel.cancelled().await;
        if let Some(catalog) = catalog.upgrade() {
            catalog.write().await.subscribers.retain(|s| s.id != id);
            tracing::debug!(subscription = id, "register subscription removed");
        }
    });
}

impl std::fmt::Debug for RegisterDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterDb")
            .field("name", &self.config.name)
            .finish()
    }
}
