// src/config/app.rs
use std::env;

use tracing::warn;

use crate::cache::DEFAULT_TTL_MS;
use crate::fetch::fetcher::DEFAULT_USER_AGENT;

/// Process settings read from the environment (`.env` is loaded by the binary).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// `FIELD_CACHE_TTL_MS`; 0 disables the field cache.
    pub cache_ttl_ms: u64,
    /// `BRIEFING_USER_AGENT`
    pub user_agent: String,
    /// `DEBUG_ROUTES=1` exposes /debug/sources and /metrics.
    pub debug_routes: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_ttl_ms: DEFAULT_TTL_MS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            debug_routes: false,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cache_ttl_ms = match env::var("FIELD_CACHE_TTL_MS") {
            Ok(raw) => raw.trim().parse::<u64>().unwrap_or_else(|_| {
                warn!(target: "config", value = %raw, "invalid FIELD_CACHE_TTL_MS, using default");
                defaults.cache_ttl_ms
            }),
            Err(_) => defaults.cache_ttl_ms,
        };

        let user_agent = env::var("BRIEFING_USER_AGENT")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.user_agent);

        let debug_routes = env::var("DEBUG_ROUTES").ok().is_some_and(|v| v == "1");

        Self {
            cache_ttl_ms,
            user_agent,
            debug_routes,
        }
    }
}
