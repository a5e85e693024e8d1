//! Environment knobs shared by the operator and the agent (§6).
//!
//! Every field has the default from the spec; each can be overridden
//! by an environment variable of the same name (upper-cased, prefixed
//! `STRATUM_`), which both binaries apply through [`EnvKnobs::from_env`].

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct EnvKnobs {
    pub retry_interval: Duration,
    pub retry_attempts: u32,
    pub drain_timeout: Duration,
    pub agent_deploy_timeout: Duration,
    pub endpoint_wait_timeout: Duration,
    pub max_masters: usize,
    pub max_concurrency: usize,
    pub phase_timeout: Duration,
}

impl Default for EnvKnobs {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(5),
            retry_attempts: 100,
            drain_timeout: Duration::from_secs(3600),
            agent_deploy_timeout: Duration::from_secs(300),
            endpoint_wait_timeout: Duration::from_secs(300),
            max_masters: 3,
            max_concurrency: 5,
            phase_timeout: Duration::from_secs(3600),
        }
    }
}

impl EnvKnobs {
    /// Applies `STRATUM_*` environment overrides on top of the defaults.
    pub fn from_env() -> Self {
        let mut knobs = Self::default();
        if let Some(v) = env_secs("STRATUM_RETRY_INTERVAL_SECS") {
            knobs.retry_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_u32("STRATUM_RETRY_ATTEMPTS") {
            knobs.retry_attempts = v;
        }
        if let Some(v) = env_secs("STRATUM_DRAIN_TIMEOUT_SECS") {
            knobs.drain_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_secs("STRATUM_AGENT_DEPLOY_TIMEOUT_SECS") {
            knobs.agent_deploy_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_secs("STRATUM_ENDPOINT_WAIT_TIMEOUT_SECS") {
            knobs.endpoint_wait_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_usize("STRATUM_MAX_MASTERS") {
            knobs.max_masters = v;
        }
        if let Some(v) = env_usize("STRATUM_MAX_CONCURRENCY") {
            knobs.max_concurrency = v;
        }
        if let Some(v) = env_secs("STRATUM_PHASE_TIMEOUT_SECS") {
            knobs.phase_timeout = Duration::from_secs(v);
        }
        knobs
    }
}

fn env_secs(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_spec() {
        let knobs = EnvKnobs::default();
        assert_eq!(knobs.retry_interval, Duration::from_secs(5));
        assert_eq!(knobs.retry_attempts, 100);
        assert_eq!(knobs.drain_timeout, Duration::from_secs(3600));
        assert_eq!(knobs.agent_deploy_timeout, Duration::from_secs(300));
        assert_eq!(knobs.endpoint_wait_timeout, Duration::from_secs(300));
        assert_eq!(knobs.max_masters, 3);
        assert_eq!(knobs.max_concurrency, 5);
    }

    #[test]
    fn env_override_applies() {
        // SAFETY: test-only, single-threaded within this test body.
        unsafe {
            std::env::set_var("STRATUM_MAX_MASTERS", "7");
        }
        let knobs = EnvKnobs::from_env();
        assert_eq!(knobs.max_masters, 7);
        unsafe {
            std::env::remove_var("STRATUM_MAX_MASTERS");
        }
    }
}
