//! Runtime configuration: canary flags and pipeline budgets.
//!
//! Canary flags are published as immutable snapshots behind an `ArcSwap` so
//! every request reads a consistent pair lock-free, and operations can roll
//! the canary back without a restart: the service re-reads the environment
//! on a short interval and stores a fresh snapshot.

use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Duration;

/// Traffic-split switches, re-published live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanaryFlags {
    /// Kill switch. `false` sends every request down the Legacy pipeline,
    /// whatever the percent says.
    pub enable_slm_pipeline: bool,
    /// Share of conversations (0–100) routed to the SLM pipeline.
    pub slm_canary_percent: u8,
}

impl Default for CanaryFlags {
    fn default() -> Self {
        Self {
            enable_slm_pipeline: false,
            slm_canary_percent: 0,
        }
    }
}

impl CanaryFlags {
    /// Read flags from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read flags through an arbitrary lookup (tests inject maps here so
    /// they never mutate the process environment).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enable = lookup("ENABLE_SLM_PIPELINE")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let percent = lookup("SLM_CANARY_PERCENT")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .map(|v| v.min(100) as u8)
            .unwrap_or(0);
        Self {
            enable_slm_pipeline: enable,
            slm_canary_percent: percent,
        }
    }
}

/// Shared lock-free handle to the current canary flags.
pub type CanaryHandle = Arc<ArcSwap<CanaryFlags>>;

/// Wrap flags into a publishable handle.
pub fn canary_handle(flags: CanaryFlags) -> CanaryHandle {
    Arc::new(ArcSwap::from_pointee(flags))
}

/// Stage and broker budgets. Loaded once at startup; budget overruns are
/// soft (flagged in telemetry), so these do not need live reload.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub extractor_budget: Duration,
    pub planner_budget: Duration,
    pub total_budget: Duration,
    pub broker_default_timeout: Duration,
    pub broker_max_retries: u32,
    pub circuit_open_cooldown: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            extractor_budget: Duration::from_millis(250),
            planner_budget: Duration::from_millis(200),
            total_budget: Duration::from_millis(1500),
            broker_default_timeout: Duration::from_millis(800),
            broker_max_retries: 3,
            circuit_open_cooldown: Duration::from_millis(30_000),
        }
    }
}

impl PipelineSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, fallback: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        };
        Self {
            broker_default_timeout: millis("BROKER_DEFAULT_TIMEOUT_MS", defaults.broker_default_timeout),
            broker_max_retries: lookup("BROKER_MAX_RETRIES")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.broker_max_retries),
            circuit_open_cooldown: millis("CIRCUIT_OPEN_COOLDOWN_MS", defaults.circuit_open_cooldown),
            total_budget: millis("PIPELINE_TOTAL_BUDGET_MS", defaults.total_budget),
            ..defaults
        }
    }
}
