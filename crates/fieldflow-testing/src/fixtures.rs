//! Register and value fixtures shared by tests.

use std::sync::Arc;

use fieldflow_core::{Register, RegisterFilterConf, Value};

/// Plain numeric register
pub fn register(category: &str, name: &str) -> Arc<Register> {
    Arc::new(Register::number(category, name))
}

pub fn voltage() -> Arc<Register> {
    Arc::new(Register::number("Essential", "Voltage").with_unit("V"))
}

pub fn current() -> Arc<Register> {
    Arc::new(Register::number("Essential", "Current").with_unit("A"))
}

pub fn serial() -> Arc<Register> {
    Arc::new(Register::text("Info", "Serial"))
}

/// Writable Off/On register, the usual command target
pub fn mode() -> Arc<Register> {
    Arc::new(
        Register::enumeration("Settings", "Mode")
            .with_enum([(0, "Off"), (1, "On")])
            .writable(),
    )
}

pub fn numeric(device: &str, register: &Arc<Register>, v: f64) -> Value {
    Value::numeric(device, register.clone(), v)
}

/// Registers spread over three categories, in discovery order
pub fn sample_catalog() -> Vec<Arc<Register>> {
    vec![
        voltage(),
        current(),
        register("Essential", "Power"),
        register("Diagnostics", "Uptime"),
        serial(),
        mode(),
    ]
}

/// Skips the diagnostic category, keeps everything else
pub fn no_diagnostics() -> RegisterFilterConf {
    RegisterFilterConf::include_all().skip_category("Diagnostics")
}
