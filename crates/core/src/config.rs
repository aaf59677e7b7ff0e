use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub ai_cache: AiCacheConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `SIGNALFLOW_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("SIGNALFLOW_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            database: DatabaseConfig::from_env_profiled(p),
            engine: EngineConfig::from_env_profiled(p),
            ai_cache: AiCacheConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  database:  host={}, db={}", self.database.host, self.database.database);
        tracing::info!(
            "  engine:    step_timeout={}s, run_deadline={}s, max_steps={}",
            self.engine.step_timeout_secs,
            self.engine.run_deadline_secs,
            self.engine.max_steps
        );
        tracing::info!(
            "  ai_cache:  capacity={}, ttl={}s",
            self.ai_cache.capacity,
            self.ai_cache.ttl_secs
        );
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "database": {
                "host": self.database.host,
                "port": self.database.port,
                "database": self.database.database,
                "configured": self.database.is_configured(),
            },
            "engine": {
                "step_timeout_secs": self.engine.step_timeout_secs,
                "run_deadline_secs": self.engine.run_deadline_secs,
                "max_steps": self.engine.max_steps,
                "default_ai_model": self.engine.default_ai_model,
            },
            "ai_cache": {
                "capacity": self.ai_cache.capacity,
                "ttl_secs": self.ai_cache.ttl_secs,
            },
        })
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_u16(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "signalflow"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_u32(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.username.is_some()
    }
}

// ── Workflow engine ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound for a single step handler invocation.
    pub step_timeout_secs: u64,
    /// Upper bound for a whole run (0 = unbounded).
    pub run_deadline_secs: u64,
    /// Step visits allowed per run before the graph is treated as cyclic.
    pub max_steps: u32,
    pub default_ai_model: String,
}

impl EngineConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            step_timeout_secs: profiled_env_u64(p, "STEP_TIMEOUT_SECS", 120),
            run_deadline_secs: profiled_env_u64(p, "RUN_DEADLINE_SECS", 0),
            max_steps: profiled_env_u32(p, "MAX_STEPS", 100),
            default_ai_model: profiled_env_or(p, "DEFAULT_AI_MODEL", "gpt-4o-mini"),
        }
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        (self.run_deadline_secs > 0).then(|| Duration::from_secs(self.run_deadline_secs))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: 120,
            run_deadline_secs: 0,
            max_steps: 100,
            default_ai_model: "gpt-4o-mini".to_string(),
        }
    }
}

// ── AI response cache ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiCacheConfig {
    pub capacity: u32,
    /// Entry lifetime in seconds (0 disables caching).
    pub ttl_secs: u64,
}

impl AiCacheConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            capacity: profiled_env_u32(p, "AI_CACHE_CAPACITY", 256),
            ttl_secs: profiled_env_u64(p, "AI_CACHE_TTL_SECS", 900),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0 && self.ttl_secs > 0
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_string_defaults_user() {
        let cfg = DatabaseConfig {
            host: "db".into(),
            port: 5433,
            database: "flows".into(),
            username: None,
            password: None,
            ssl_mode: "disable".into(),
            max_connections: 5,
        };
        assert_eq!(
            cfg.connection_string(),
            "postgres://postgres:@db:5433/flows?sslmode=disable"
        );
        assert!(!cfg.is_configured());
    }

    #[test]
    fn run_deadline_zero_means_unbounded() {
        let mut engine = EngineConfig::default();
        assert!(engine.run_deadline().is_none());
        engine.run_deadline_secs = 30;
        assert_eq!(engine.run_deadline(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn profiled_lookup_prefers_prefixed_key() {
        env::set_var("SFTEST_MAX_STEPS", "7");
        assert_eq!(profiled_env_u32("SFTEST", "MAX_STEPS", 100), 7);
        assert_eq!(profiled_env_u32("", "SFTEST_ABSENT_KEY", 42), 42);
        env::remove_var("SFTEST_MAX_STEPS");
    }
}
