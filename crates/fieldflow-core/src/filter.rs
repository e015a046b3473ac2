//! Filter predicates over values and registers.
//!
//! Filters are pure, cheap to clone and composed by conjunction. Each
//! subscription of a store carries one and the store's owner evaluates it
//! for every accepted update.

use std::sync::Arc;

use crate::config::RegisterFilterConf;
use crate::register::Register;
use crate::value::Value;

type ValuePredicate = dyn Fn(&Value) -> bool + Send + Sync;
type RegisterPredicate = dyn Fn(&Register) -> bool + Send + Sync;

impl RegisterFilterConf {
    /// Decide whether `register` passes this include/skip configuration.
    ///
    /// Precedence is fixed: include by name, skip by name, include by
    /// category, skip by category, then `default_include`.
    pub fn matches(&self, register: &Register) -> bool {
        if self.include_registers.iter().any(|n| *n == register.name) {
            return true;
        }
        if self.skip_registers.iter().any(|n| *n == register.name) {
            return false;
        }
        if self.include_categories.iter().any(|c| *c == register.category) {
            return true;
        }
        if self.skip_categories.iter().any(|c| *c == register.category) {
            return false;
        }
        self.default_include
    }
}

/// Predicate over registers.
#[derive(Clone)]
pub struct RegisterFilter(Arc<RegisterPredicate>);

impl RegisterFilter {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Register) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn all() -> Self {
        Self::from_fn(|_| true)
    }

    pub fn writable() -> Self {
        Self::from_fn(|r| r.writable)
    }

    pub fn conf(conf: RegisterFilterConf) -> Self {
        Self::from_fn(move |r| conf.matches(r))
    }

    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        Self::from_fn(move |r| names.iter().any(|n| *n == r.name))
    }

    /// Both filters must accept.
    pub fn and(self, other: RegisterFilter) -> Self {
        Self::from_fn(move |r| self.matches(r) && other.matches(r))
    }

    pub fn matches(&self, register: &Register) -> bool {
        (self.0)(register)
    }
}

impl Default for RegisterFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl std::fmt::Debug for RegisterFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RegisterFilter(..)")
    }
}

/// Predicate over values.
#[derive(Clone)]
pub struct ValueFilter(Arc<ValuePredicate>);

impl ValueFilter {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn all() -> Self {
        Self::from_fn(|_| true)
    }

    pub fn device_name(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::from_fn(move |v| v.device_name() == name)
    }

    /// Rejects `Null` values.
    pub fn non_null() -> Self {
        Self::from_fn(|v| !v.is_null())
    }

    pub fn writable() -> Self {
        Self::from_fn(|v| v.register().writable)
    }

    /// Apply a register filter to the value's register.
    pub fn register(filter: RegisterFilter) -> Self {
        Self::from_fn(move |v| filter.matches(v.register()))
    }

    pub fn register_conf(conf: RegisterFilterConf) -> Self {
        Self::register(RegisterFilter::conf(conf))
    }

    /// Values of one device whose register passes `conf`.
    pub fn device_registers(device: impl Into<String>, conf: RegisterFilterConf) -> Self {
        Self::device_name(device).and(Self::register_conf(conf))
    }

    /// Pending commands for one device: writable, non-null, addressed to it.
    pub fn commands_for(device: impl Into<String>) -> Self {
        Self::device_name(device)
            .and(Self::writable())
            .and(Self::non_null())
    }

    /// Both filters must accept.
    pub fn and(self, other: ValueFilter) -> Self {
        Self::from_fn(move |v| self.matches(v) && other.matches(v))
    }

    pub fn matches(&self, value: &Value) -> bool {
        (self.0)(value)
    }
}

impl Default for ValueFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl std::fmt::Debug for ValueFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ValueFilter(..)")
    }
}
