//! Engine Configuration
//!
//! Process-wide defaults for the reactive engine. Individual states override
//! the relevant ones through [`StateOptions`](crate::reactive::StateOptions).
//!
//! The configuration is plain data and deserializes from JSON, so hosts can
//! ship it alongside their other settings:
//!
//! ```rust,ignore
//! let config = EngineConfig::from_json(r#"{ "strict": true }"#)?;
//! trellis_core::config::set(config);
//! ```

use std::sync::OnceLock;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Number of pushed items up to which ordered arrays use binary insertion
/// instead of append-then-sort.
pub const DEFAULT_ORDERED_INSERT_THRESHOLD: usize = 5;

/// Maximum nesting of mutations made from inside handlers.
pub const DEFAULT_MAX_BROADCAST_DEPTH: usize = 64;

/// Array writes at an index at or past this are refused. Arrays are dense,
/// so a far index would otherwise allocate every slot before it.
pub const DEFAULT_MAX_ARRAY_LENGTH: usize = 1 << 24;

/// Global engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct EngineConfig {
    /// Default for [`StateOptions::strict`](crate::reactive::StateOptions::strict).
    pub strict: bool,

    /// Default for [`StateOptions::observable`](crate::reactive::StateOptions::observable).
    pub observable: bool,

    pub ordered_insert_threshold: usize,

    /// A mutation started from a handler this many broadcasts deep is
    /// refused with a warning, before anything is written.
    pub max_broadcast_depth: usize,

    /// Upper bound on array indices written through `set` and `assign`.
    pub max_array_length: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strict: false,
            observable: true,
            ordered_insert_threshold: DEFAULT_ORDERED_INSERT_THRESHOLD,
            max_broadcast_depth: DEFAULT_MAX_BROADCAST_DEPTH,
            max_array_length: DEFAULT_MAX_ARRAY_LENGTH,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

static CONFIG: OnceLock<RwLock<EngineConfig>> = OnceLock::new();

fn global() -> &'static RwLock<EngineConfig> {
    CONFIG.get_or_init(|| RwLock::new(EngineConfig::default()))
}

/// Replace the global configuration. States created earlier keep their
/// `strict` and `observable` settings; the limits apply immediately.
pub fn set(config: EngineConfig) {
    tracing::debug!(?config, "engine configuration updated");
    *global().write() = config;
}

/// Snapshot of the current global configuration.
pub fn current() -> EngineConfig {
    global().read().clone()
}
