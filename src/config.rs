// Process configuration
//
// Read from the environment (and a `.env` file when present). Missing or
// unparseable values fall back to defaults with a warning.

use std::net::SocketAddr;
use std::str::FromStr;

use crate::engine::EngineSettings;
use crate::infrastructure::invokers::external_http::GEMINI_BASE_URL;

const DEFAULT_DATABASE_URL: &str = "sqlite://conclave.db";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_CLAUDE_BIN: &str = "claude";

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub claude_bin: String,
    /// Key for `external:gemini:*` models, read from `GEMINI_API_KEY`
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    /// Register the echo, coder and reviewer agents at startup
    pub seed_presets: bool,
    pub engine: EngineSettings,
}

impl Settings {
    /// Loads `.env` and reads every `CONCLAVE_*` variable plus `GEMINI_API_KEY`
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = EngineSettings::default();

        let text = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let fallback_addr = SocketAddr::from(([0, 0, 0, 0], 3000));
        let bind_addr = parsed(&lookup, "CONCLAVE_BIND_ADDR", DEFAULT_BIND_ADDR)
            .unwrap_or(fallback_addr);
        let dispatch_capacity = parsed(
            &lookup,
            "CONCLAVE_DISPATCH_CAPACITY",
            &defaults.dispatch_capacity.to_string(),
        )
        .filter(|capacity: &usize| *capacity > 0)
        .unwrap_or(defaults.dispatch_capacity);
        let seed_presets = parsed(&lookup, "CONCLAVE_SEED_PRESETS", "false").unwrap_or(false);

        Self {
            database_url: text("CONCLAVE_DATABASE_URL", DEFAULT_DATABASE_URL),
            bind_addr,
            claude_bin: text("CONCLAVE_CLAUDE_BIN", DEFAULT_CLAUDE_BIN),
            gemini_api_key: lookup("GEMINI_API_KEY")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            gemini_base_url: text("CONCLAVE_GEMINI_BASE_URL", GEMINI_BASE_URL),
            seed_presets,
            engine: EngineSettings {
                planner_id: defaults.planner_id.clone(),
                planner_model: text("CONCLAVE_PLANNER_MODEL", &defaults.planner_model),
                worker_model: text("CONCLAVE_WORKER_MODEL", &defaults.worker_model),
                workdir: lookup("CONCLAVE_WORKDIR")
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty()),
                dispatch_capacity,
            },
        }
    }
}

/// Parses a variable, warning and returning the parsed default when the value is bad
fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> Option<T> {
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(key = key, value = %raw, default = default, "Invalid setting, using default");
                default.parse().ok()
            }
        },
        None => default.parse().ok(),
    }
}
