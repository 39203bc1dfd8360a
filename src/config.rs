use std::time::Duration;

use clap::Args;

/// Tunables shared by the gateway, the orchestrator and the insight detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub cache_ttl: chrono::Duration,
    pub insight_ttl: chrono::Duration,
    pub query_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl: chrono::Duration::hours(1),
            insight_ttl: chrono::Duration::hours(24),
            query_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct EngineArgs {
    /// Postgres pool size
    #[arg(long, env = "ATTENTION_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,
    /// Per-query timeout at the store boundary
    #[arg(long, env = "ATTENTION_QUERY_TIMEOUT_SECS", default_value_t = 30)]
    pub query_timeout_secs: u64,
    /// Lifetime of cached attention scores
    #[arg(long, env = "ATTENTION_CACHE_TTL_MINUTES", default_value_t = 60)]
    pub cache_ttl_minutes: i64,
    /// Lifetime of detected insights
    #[arg(long, env = "ATTENTION_INSIGHT_TTL_HOURS", default_value_t = 24)]
    pub insight_ttl_hours: i64,
}

impl EngineArgs {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            cache_ttl: chrono::Duration::minutes(self.cache_ttl_minutes.max(1)),
            insight_ttl: chrono::Duration::hours(self.insight_ttl_hours.max(1)),
            query_timeout: Duration::from_secs(self.query_timeout_secs.max(1)),
        }
    }
}
