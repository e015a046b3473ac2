//! Register - immutable description of one named data point.
//!
//! A register is the schema half of the value model: what a reading means,
//! how to display it and whether consumers may command it. Registers never
//! change after construction; an edited register is a new instance.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::filter::RegisterFilter;

/// Payload kind a register carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterKind {
    Number,
    Text,
    Enum,
}

impl std::fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number => write!(f, "number"),
            Self::Text => write!(f, "text"),
            Self::Enum => write!(f, "enum"),
        }
    }
}

/// Description of one data point of a device.
///
/// Two registers are equal iff every field is equal; [`RegisterDb`] relies on
/// this to treat a re-registration as a no-op.
///
/// [`RegisterDb`]: crate::register_db::RegisterDb
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Register {
    pub category: String,
    /// Unique within one device's namespace
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: RegisterKind,
    /// Index to label mapping, only populated for [`RegisterKind::Enum`]
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub enum_values: BTreeMap<i32, String>,
    /// Empty means dimensionless
    #[serde(default)]
    pub unit: String,
    /// Display ordering hint
    #[serde(default)]
    pub sort: i32,
    #[serde(default)]
    pub writable: bool,
}

impl Register {
    pub fn new(category: impl Into<String>, name: impl Into<String>, kind: RegisterKind) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            description: String::new(),
            kind,
            enum_values: BTreeMap::new(),
            unit: String::new(),
            sort: 0,
            writable: false,
        }
    }

    pub fn number(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(category, name, RegisterKind::Number)
    }

    pub fn text(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(category, name, RegisterKind::Text)
    }

    pub fn enumeration(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(category, name, RegisterKind::Enum)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_sort(mut self, sort: i32) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_enum_entry(mut self, idx: i32, label: impl Into<String>) -> Self {
        self.enum_values.insert(idx, label.into());
        self
    }

    pub fn with_enum<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (i32, S)>,
        S: Into<String>,
    {
        self.enum_values
            .extend(entries.into_iter().map(|(idx, label)| (idx, label.into())));
        self
    }

    /// Mark the register as commandable by consumers.
    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    /// Label for an enum index, if the register maps it.
    pub fn enum_text(&self, idx: i32) -> Option<&str> {
        self.enum_values.get(&idx).map(String::as_str)
    }

    pub fn is_enum(&self) -> bool {
        self.kind == RegisterKind::Enum
    }
}

/// Order registers for display: by sort hint, then category, then name.
pub fn sort_registers(registers: &mut [Arc<Register>]) {
    registers.sort_by(|a, b| {
        a.sort
            .cmp(&b.sort)
            .then_with(|| a.category.cmp(&b.category))
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Keep the registers accepted by `filter`, preserving their order.
pub fn filter_registers<I>(registers: I, filter: &RegisterFilter) -> Vec<Arc<Register>>
where
    I: IntoIterator<Item = Arc<Register>>,
{
    registers
        .into_iter()
        .filter(|r| filter.matches(r))
        .collect()
}
