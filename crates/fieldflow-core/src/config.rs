//! Configuration for the dataflow core.
//!
//! Default values and environment variable names live in their own modules,
//! so the CLI and collaborators do not redefine them.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default sizing constants
pub mod defaults {
    /// Capacity of a value store's input queue
    pub const INPUT_CAPACITY: usize = 4;
    /// Capacity of each value subscriber queue
    pub const SUBSCRIBER_CAPACITY: usize = 256;
    /// Capacity of each register subscriber queue
    pub const REGISTER_SUBSCRIBER_CAPACITY: usize = 16;
    /// Capacity of a value store's control queue
    pub const CONTROL_CAPACITY: usize = 16;
    /// Name used when none is configured
    pub const STORE_NAME: &str = "state";
    pub const CATALOG_NAME: &str = "registers";
}

/// Environment variable names
pub mod env_vars {
    pub const INPUT_CAPACITY: &str = "FIELDFLOW_INPUT_CAPACITY";
    pub const SUBSCRIBER_CAPACITY: &str = "FIELDFLOW_SUBSCRIBER_CAPACITY";
    pub const OVERFLOW: &str = "FIELDFLOW_OVERFLOW";
}

/// What the owner does when a subscriber queue is full.
///
/// `Block` waits until the subscriber makes room or is cancelled. Nothing is
/// lost, but one slow consumer stalls every producer and every other
/// consumer of the same store. `DropNewest` never stalls the owner; the
/// update is discarded for that subscriber only and counted in the stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    #[default]
    Block,
    DropNewest,
}

impl std::str::FromStr for OverflowPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "drop_newest" | "drop-newest" | "drop" => Ok(Self::DropNewest),
            other => Err(Error::config(format!("unknown overflow policy: {}", other))),
        }
    }
}

impl std::fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Block => write!(f, "block"),
            Self::DropNewest => write!(f, "drop_newest"),
        }
    }
}

/// Settings for one [`ValueStorage`](crate::value_storage::ValueStorage) instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Name used in logs
    pub name: String,
    /// Bounded input queue; `fill` blocks once it is full
    pub input_capacity: usize,
    /// Live-update room per subscriber, on top of its initial replay
    pub subscriber_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            name: defaults::STORE_NAME.to_string(),
            input_capacity: defaults::INPUT_CAPACITY,
            subscriber_capacity: defaults::SUBSCRIBER_CAPACITY,
            overflow: OverflowPolicy::Block,
        }
    }
}

impl StorageConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_input_capacity(mut self, capacity: usize) -> Self {
        self.input_capacity = capacity;
        self
    }

    pub fn with_subscriber_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_capacity = capacity;
        self
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    /// Apply overrides from the environment on top of this config.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(env_vars::INPUT_CAPACITY) {
            self.input_capacity = parse_capacity(env_vars::INPUT_CAPACITY, &v)?;
        }
        if let Some(v) = lookup(env_vars::SUBSCRIBER_CAPACITY) {
            self.subscriber_capacity = parse_capacity(env_vars::SUBSCRIBER_CAPACITY, &v)?;
        }
        if let Some(v) = lookup(env_vars::OVERFLOW) {
            self.overflow = v.parse()?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_capacity == 0 {
            return Err(crate::config_err!(
                "{}: input_capacity must be at least 1",
                self.name
            ));
        }
        if self.subscriber_capacity == 0 {
            return Err(crate::config_err!(
                "{}: subscriber_capacity must be at least 1",
                self.name
            ));
        }
        Ok(())
    }
}

fn parse_capacity(key: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|e| Error::config(format!("{}={:?}: {}", key, raw, e)))
}

/// Settings for one [`RegisterDb`](crate::register_db::RegisterDb).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterDbConfig {
    pub name: String,
    pub subscriber_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for RegisterDbConfig {
    fn default() -> Self {
        Self {
            name: defaults::CATALOG_NAME.to_string(),
            subscriber_capacity: defaults::REGISTER_SUBSCRIBER_CAPACITY,
            overflow: OverflowPolicy::Block,
        }
    }
}

impl RegisterDbConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.subscriber_capacity == 0 {
            return Err(crate::config_err!(
                "{}: subscriber_capacity must be at least 1",
                self.name
            ));
        }
        Ok(())
    }
}

/// Include/skip lists for selecting registers.
///
/// Evaluated by [`RegisterFilterConf::matches`] with a fixed precedence:
/// include by name, skip by name, include by category, skip by category,
/// then `default_include`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterFilterConf {
    pub include_registers: Vec<String>,
    pub skip_registers: Vec<String>,
    pub include_categories: Vec<String>,
    pub skip_categories: Vec<String>,
    pub default_include: bool,
}

impl Default for RegisterFilterConf {
    fn default() -> Self {
        Self {
            include_registers: Vec::new(),
            skip_registers: Vec::new(),
            include_categories: Vec::new(),
            skip_categories: Vec::new(),
            default_include: true,
        }
    }
}

impl RegisterFilterConf {
    /// Accept everything not explicitly skipped.
    pub fn include_all() -> Self {
        Self::default()
    }

    /// Accept nothing unless explicitly included.
    pub fn exclude_all() -> Self {
        Self {
            default_include: false,
            ..Self::default()
        }
    }

    pub fn include_register(mut self, name: impl Into<String>) -> Self {
        self.include_registers.push(name.into());
        self
    }

    pub fn skip_register(mut self, name: impl Into<String>) -> Self {
        self.skip_registers.push(name.into());
        self
    }

    pub fn include_category(mut self, category: impl Into<String>) -> Self {
        self.include_categories.push(category.into());
        self
    }

    pub fn skip_category(mut self, category: impl Into<String>) -> Self {
        self.skip_categories.push(category.into());
        self
    }
}
