//! Command store - the actuation direction of the dataflow.
//!
//! Consumers that want a device to change something fill the desired value
//! of a writable register into a dedicated [`ValueStorage`]. The device side
//! subscribes with replay, acts on each non-null command and then consumes
//! it by filling the `Null` value at the same key. The reset is what lets a
//! later identical command through change suppression again.

use tokio_util::sync::CancellationToken;

use crate::config::StorageConfig;
use crate::error::Result;
use crate::filter::ValueFilter;
use crate::subscription::Subscription;
use crate::value::Value;
use crate::value_storage::ValueStorage;

/// Store of pending commands, keyed like any other value.
#[derive(Clone, Debug)]
pub struct CommandStore {
    storage: ValueStorage,
}

impl CommandStore {
    pub fn new(config: StorageConfig) -> Result<Self> {
        Ok(Self {
            storage: ValueStorage::new(config)?,
        })
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            storage: ValueStorage::with_name(name),
        }
    }

    /// Wrap an existing store.
    pub fn from_storage(storage: ValueStorage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &ValueStorage {
        &self.storage
    }

    /// Request a new value for a register.
    ///
    /// Read-only registers are accepted as well; devices only act on the
    /// writable ones.
    pub async fn submit(&self, value: Value) -> Result<()> {
        tracing::debug!(store = %self.storage.name(), command = %value, "command submitted");
        self.storage.fill(value).await
    }

    /// Commands addressed to `device`, pending ones first.
    pub async fn subscribe_device(
        &self,
        cancel: &CancellationToken,
        device: impl Into<String>,
    ) -> Result<Subscription<Value>> {
        self.storage
            .subscribe_send_initial(cancel, ValueFilter::commands_for(device))
            .await
    }

    /// Commands for `device` that have not been consumed yet.
    pub async fn pending_for(&self, device: impl Into<String>) -> Result<Vec<Value>> {
        self.storage
            .get_state_filtered(&ValueFilter::commands_for(device))
            .await
    }

    /// Mark a command as actioned by resetting its key to `Null`.
    pub async fn consume(&self, command: &Value) -> Result<()> {
        tracing::debug!(store = %self.storage.name(), key = %command.key(), "command consumed");
        self.storage.fill(command.to_null()).await
    }
}
