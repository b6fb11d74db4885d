use std::env;
use std::sync::OnceLock;

use crate::types::ValidationMode;

const DEFAULT_KERNELS: &str = "portable";
const DEFAULT_DEVICE_MEMORY: u64 = 4 << 30;

static RUNTIME_CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();

/// Process-wide defaults for new handles and the emulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Kernel set a new handle selects (`BLASRS_KERNELS`).
    pub kernels: String,
    /// Validation mode a new handle starts in (`BLASRS_STRICT_ALIASING`).
    pub validation_mode: ValidationMode,
    /// Capacity of the emulated device in bytes (`BLASRS_DEVICE_MEMORY`).
    pub device_memory: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            kernels: DEFAULT_KERNELS.to_string(),
            validation_mode: ValidationMode::Permissive,
            device_memory: DEFAULT_DEVICE_MEMORY,
        }
    }
}

impl RuntimeConfig {
    /// Builds a configuration from the `BLASRS_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = RuntimeConfig::default();
        if let Some(value) = non_empty(lookup("BLASRS_KERNELS")) {
            config.kernels = value.trim().to_ascii_lowercase();
        }
        if let Some(value) = non_empty(lookup("BLASRS_STRICT_ALIASING")) {
            if parse_bool(&value) {
                config.validation_mode = ValidationMode::Strict;
            }
        }
        if let Some(value) = non_empty(lookup("BLASRS_DEVICE_MEMORY")) {
            match value.trim().parse::<u64>() {
                Ok(bytes) => config.device_memory = bytes,
                Err(_) => log::warn!(
                    "ignoring BLASRS_DEVICE_MEMORY={value:?}: expected a byte count"
                ),
            }
        }
        config
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// Configuration read once from the environment on first use.
pub fn runtime_config() -> &'static RuntimeConfig {
    RUNTIME_CONFIG.get_or_init(RuntimeConfig::from_env)
}
