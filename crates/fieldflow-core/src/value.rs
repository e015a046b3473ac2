//! Value - immutable, timestamped reading of one register of one device.
//!
//! The payload is a closed sum type, so a value can never carry a tag that
//! disagrees with its payload. Whether the payload matches the register's
//! kind is the producer's contract: the stores keep and forward whatever
//! they receive. [`Value::check_kind`] is available for producers that want
//! to verify their own output.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::register::{Register, RegisterKind};

/// Payload of a [`Value`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Payload {
    Numeric(f64),
    Text(String),
    /// Index into the register's enum mapping; not checked against it
    Enum(i32),
    /// No current value: not read yet, or a consumed command
    Null,
}

impl Payload {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Numeric(_) => "numeric",
            Self::Text(_) => "text",
            Self::Enum(_) => "enum",
            Self::Null => "null",
        }
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            // NaN == NaN, so a sensor stuck at NaN is suppressed like any other repeat
            (Self::Numeric(a), Self::Numeric(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Enum(a), Self::Enum(b)) => a == b,
            (Self::Null, Self::Null) => true,
            _ => false,
        }
    }
}

/// Storage key of a value: one slot per (device, register name).
///
/// Device lifetime is not part of the key, so a reconnected device with the
/// same name resumes its previous slots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ValueKey {
    pub device_name: String,
    pub register_name: String,
}

impl ValueKey {
    pub fn new(device_name: impl Into<String>, register_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            register_name: register_name.into(),
        }
    }
}

impl std::fmt::Display for ValueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.device_name, self.register_name)
    }
}

/// A reading bound to one device and one register.
///
/// Equality is structural over device name, register and payload. The
/// timestamp records when the reading was taken and is ignored by `==`, so
/// that identical readings from successive polls compare equal and are
/// suppressed by the value store.
#[derive(Debug, Clone, Serialize)]
pub struct Value {
    device_name: String,
    register: Arc<Register>,
    payload: Payload,
    timestamp: DateTime<Utc>,
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.payload == other.payload
            && self.device_name == other.device_name
            && self.register == other.register
    }
}

impl Value {
    pub fn new(device_name: impl Into<String>, register: Arc<Register>, payload: Payload) -> Self {
        Self {
            device_name: device_name.into(),
            register,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn numeric(device_name: impl Into<String>, register: Arc<Register>, value: f64) -> Self {
        Self::new(device_name, register, Payload::Numeric(value))
    }

    pub fn text(
        device_name: impl Into<String>,
        register: Arc<Register>,
        value: impl Into<String>,
    ) -> Self {
        Self::new(device_name, register, Payload::Text(value.into()))
    }

    pub fn enumeration(device_name: impl Into<String>, register: Arc<Register>, idx: i32) -> Self {
        Self::new(device_name, register, Payload::Enum(idx))
    }

    pub fn null(device_name: impl Into<String>, register: Arc<Register>) -> Self {
        Self::new(device_name, register, Payload::Null)
    }

    /// Override the capture time.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn register(&self) -> &Arc<Register> {
        &self.register
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn key(&self) -> ValueKey {
        ValueKey::new(self.device_name.clone(), self.register.name.clone())
    }

    pub fn as_numeric(&self) -> Option<f64> {
        match self.payload {
            Payload::Numeric(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn enum_idx(&self) -> Option<i32> {
        match self.payload {
            Payload::Enum(idx) => Some(idx),
            _ => None,
        }
    }

    /// Label of an enum payload, if the register maps its index.
    pub fn enum_text(&self) -> Option<&str> {
        self.enum_idx().and_then(|idx| self.register.enum_text(idx))
    }

    pub fn is_null(&self) -> bool {
        matches!(self.payload, Payload::Null)
    }

    /// The `Null` value for the same key, used to consume an actioned command.
    pub fn to_null(&self) -> Self {
        Self::null(self.device_name.clone(), self.register.clone())
    }

    /// Payload as plain JSON, the shape forwarders publish.
    pub fn generic(&self) -> serde_json::Value {
        match &self.payload {
            Payload::Numeric(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Payload::Text(v) => serde_json::Value::String(v.clone()),
            Payload::Enum(idx) => match self.register.enum_text(*idx) {
                Some(label) => serde_json::Value::String(label.to_string()),
                None => serde_json::Value::from(*idx),
            },
            Payload::Null => serde_json::Value::Null,
        }
    }

    /// Check the payload variant against the register kind.
    ///
    /// Null fits every kind. Enum indices must be mapped by the register.
    pub fn check_kind(&self) -> Result<()> {
        let ok = match (&self.payload, self.register.kind) {
            (Payload::Null, _) => true,
            (Payload::Numeric(_), RegisterKind::Number) => true,
            (Payload::Text(_), RegisterKind::Text) => true,
            (Payload::Enum(idx), RegisterKind::Enum) => {
                if self.register.enum_text(*idx).is_none() {
                    return Err(crate::validation_err!(
                        "{}: enum index {} is not mapped",
                        self.key(),
                        idx
                    ));
                }
                true
            }
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(crate::validation_err!(
                "{}: {} payload on a {} register",
                self.key(),
                self.payload.type_name(),
                self.register.kind
            ))
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}=", self.device_name, self.register.name)?;
        match &self.payload {
            Payload::Numeric(v) => write!(f, "{}", v)?,
            Payload::Text(v) => write!(f, "{:?}", v)?,
            Payload::Enum(idx) => match self.register.enum_text(*idx) {
                Some(label) => write!(f, "{}", label)?,
                None => write!(f, "#{}", idx)?,
            },
            Payload::Null => return write!(f, "null"),
        }
        if !self.register.unit.is_empty() {
            write!(f, " {}", self.register.unit)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn voltage() -> Arc<Register> {
        Arc::new(Register::number("Essential", "Voltage").with_unit("V"))
    }

    fn mode() -> Arc<Register> {
        Arc::new(
            Register::enumeration("Settings", "Mode")
                .with_enum([(0, "Off"), (1, "On")])
                .writable(),
        )
    }

    #[test]
    fn test_equality_ignores_timestamp() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let a = Value::numeric("dev", voltage(), 12.5).with_timestamp(early);
        let b = Value::numeric("dev", voltage(), 12.5);
        assert_eq!(a, b);
        assert_ne!(a.timestamp(), b.timestamp());
    }

    #[test]
    fn test_equality_is_structural() {
        let a = Value::numeric("dev", voltage(), 12.5);
        assert_ne!(a, Value::numeric("dev", voltage(), 12.6));
        assert_ne!(a, Value::numeric("other", voltage(), 12.5));
        assert_ne!(a, Value::null("dev", voltage()));

        let other_unit = Arc::new(Register::number("Essential", "Voltage").with_unit("mV"));
        assert_ne!(a, Value::numeric("dev", other_unit, 12.5));

        assert_ne!(
            Value::text("dev", voltage(), "1"),
            Value::enumeration("dev", voltage(), 1)
        );
    }

    #[test]
    fn test_nan_equals_nan() {
        let a = Value::numeric("dev", voltage(), f64::NAN);
        let b = Value::numeric("dev", voltage(), f64::NAN);
        assert_eq!(a, b);
    }

    #[test]
    fn test_accessors() {
        let v = Value::enumeration("relay", mode(), 1);
        assert_eq!(v.enum_idx(), Some(1));
        assert_eq!(v.enum_text(), Some("On"));
        assert_eq!(v.as_numeric(), None);
        assert!(!v.is_null());
        assert_eq!(v.key(), ValueKey::new("relay", "Mode"));

        let reset = v.to_null();
        assert!(reset.is_null());
        assert_eq!(reset.key(), v.key());
        assert_eq!(reset.register(), v.register());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Value::numeric("bmv0", voltage(), 12.5).to_string(),
            "bmv0:Voltage=12.5 V"
        );
        assert_eq!(Value::enumeration("r", mode(), 0).to_string(), "r:Mode=Off");
        assert_eq!(Value::enumeration("r", mode(), 7).to_string(), "r:Mode=#7");
        assert_eq!(Value::null("bmv0", voltage()).to_string(), "bmv0:Voltage=null");
    }

    #[test]
    fn test_generic() {
        assert_eq!(
            Value::numeric("d", voltage(), 1.5).generic(),
            serde_json::json!(1.5)
        );
        assert_eq!(Value::enumeration("d", mode(), 1).generic(), serde_json::json!("On"));
        assert_eq!(Value::enumeration("d", mode(), 9).generic(), serde_json::json!(9));
        assert_eq!(
            Value::numeric("d", voltage(), f64::INFINITY).generic(),
            serde_json::Value::Null
        );
    }

    #[test]
    fn test_check_kind() {
        assert!(Value::numeric("d", voltage(), 1.0).check_kind().is_ok());
        assert!(Value::null("d", mode()).check_kind().is_ok());
        assert!(Value::enumeration("d", mode(), 1).check_kind().is_ok());

        let err = Value::text("d", voltage(), "high").check_kind().unwrap_err();
        assert!(err.to_string().contains("text payload on a number register"));

        assert!(Value::enumeration("d", mode(), 3).check_kind().is_err());
    }

    #[test]
    fn test_serialize() {
        let json = serde_json::to_value(Value::numeric("dev", voltage(), 3.0)).unwrap();
        assert_eq!(json["device_name"], "dev");
        assert_eq!(json["payload"]["type"], "numeric");
        assert_eq!(json["payload"]["value"], 3.0);

        let json = serde_json::to_value(Value::null("dev", voltage())).unwrap();
        assert_eq!(json["payload"]["type"], "null");
        assert_eq!(json["register"]["unit"], "V");
    }
}
