//! Dataflow core for the fieldflow gateway.
//!
//! Devices describe their data points as [`Register`]s and publish readings
//! as [`Value`]s. Two kinds of store connect them to consumers:
//!
//! - [`RegisterDb`]: an append-mostly catalog of registers with replay and
//!   live notification of newly discovered ones.
//! - [`ValueStorage`]: the latest value per (device, register), owned by one
//!   task, with change suppression and ordered fan-out to filtered
//!   subscriptions.
//!
//! The same store type carries both directions. Readings flow from devices
//! into a state store; commands flow from consumers into a
//! [`CommandStore`], which devices subscribe to.
//!
//! Every subscription is tied to a cancellation signal
//! ([`CancellationToken`]) and ends promptly once it fires.

pub mod command;
pub mod config;
pub mod error;
pub mod filter;
pub mod register;
pub mod register_db;
pub mod subscription;
pub mod value;
pub mod value_storage;

pub use command::CommandStore;
pub use config::{OverflowPolicy, RegisterDbConfig, RegisterFilterConf, StorageConfig};
pub use error::{Error, Result};
pub use filter::{RegisterFilter, ValueFilter};
pub use register::{Register, RegisterKind};
pub use register_db::RegisterDb;
pub use subscription::{Subscription, SubscriptionId};
pub use value::{Payload, Value, ValueKey};
pub use value_storage::{StorageStats, ValueStorage};

pub use tokio_util::sync::CancellationToken;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-exports commonly used types.
pub mod prelude {
    // Configuration
    pub use crate::config::{
        defaults, env_vars, OverflowPolicy, RegisterDbConfig, RegisterFilterConf, StorageConfig,
    };

    // Error handling
    pub use crate::error::{Error, Result};

    // Data model
    pub use crate::register::{Register, RegisterKind};
    pub use crate::value::{Payload, Value, ValueKey};

    // Stores
    pub use crate::command::CommandStore;
    pub use crate::filter::{RegisterFilter, ValueFilter};
    pub use crate::register_db::RegisterDb;
    pub use crate::subscription::Subscription;
    pub use crate::value_storage::{StorageStats, ValueStorage};

    pub use tokio_util::sync::CancellationToken;
}
