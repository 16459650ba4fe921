//! Environment-driven configuration: typed defaults, one `from_env()`
//! constructor, no config file format invented beyond what `dotenvy` +
//! `std::env` already gives us.

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Max concurrent in-flight requests per provider (token bucket capacity).
    pub concurrency_cap: u32,
    /// Token bucket refill rate, tokens/second.
    pub rate_per_second: f64,
    /// Hard call-count budget per run before the cooldown window kicks in.
    pub provider_call_budget: u32,
    /// Cooldown window once the budget is exhausted.
    pub budget_cooldown: std::time::Duration,
    /// Per-call timeout for data providers.
    pub provider_timeout: std::time::Duration,
    /// Per-call timeout for the Reasoning provider.
    pub reasoning_timeout: std::time::Duration,
    /// Minimum number of vector-store hits required to report `has_data=true`.
    pub vector_store_k: usize,
    /// Normalized-weight threshold that promotes a factor to "high weight".
    pub high_weight_threshold: f64,
    /// Tier thresholds, highest first.
    pub tier_elite: f64,
    pub tier_quality: f64,
    pub tier_speculative: f64,
    /// Diversification caps.
    pub max_per_sector: usize,
    pub max_per_symbol: usize,
    pub max_per_strategy: usize,
    /// Selection slot caps per tier.
    pub max_elite: usize,
    pub max_quality: usize,
    pub max_speculative: usize,
    /// Max retry attempts per provider call.
    pub max_retries: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency_cap: 2,
            rate_per_second: 2.0,
            provider_call_budget: 500,
            budget_cooldown: std::time::Duration::from_secs(60),
            provider_timeout: std::time::Duration::from_secs(30),
            reasoning_timeout: std::time::Duration::from_secs(120),
            vector_store_k: 10,
            high_weight_threshold: 0.055,
            tier_elite: 90.0,
            tier_quality: 75.0,
            tier_speculative: 60.0,
            max_per_sector: 3,
            max_per_symbol: 2,
            max_per_strategy: 10,
            max_elite: 5,
            max_quality: 10,
            max_speculative: 5,
            max_retries: 3,
        }
    }
}

impl RunnerConfig {
    /// Build from environment, falling back to built-in defaults for any unset key.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            concurrency_cap: env_u32("AGENT_CONCURRENCY_CAP", defaults.concurrency_cap),
            rate_per_second: env_f64("AGENT_RATE_PER_SECOND", defaults.rate_per_second),
            provider_call_budget: env_u32("AGENT_PROVIDER_CALL_BUDGET", defaults.provider_call_budget),
            budget_cooldown: std::time::Duration::from_secs(env_u64(
                "AGENT_BUDGET_COOLDOWN_SECS",
                defaults.budget_cooldown.as_secs(),
            )),
            provider_timeout: std::time::Duration::from_secs(env_u64(
                "AGENT_PROVIDER_TIMEOUT_SECS",
                defaults.provider_timeout.as_secs(),
            )),
            reasoning_timeout: std::time::Duration::from_secs(env_u64(
                "AGENT_REASONING_TIMEOUT_SECS",
                defaults.reasoning_timeout.as_secs(),
            )),
            vector_store_k: env_u32("AGENT_VECTOR_STORE_K", defaults.vector_store_k as u32) as usize,
            high_weight_threshold: env_f64("AGENT_HIGH_WEIGHT_THRESHOLD", defaults.high_weight_threshold),
            ..defaults
        }
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
