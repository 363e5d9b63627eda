//! Process configuration
//!
//! Read once at startup from the environment (after `.env` is loaded) and
//! passed down explicitly. Pipeline policy values live here rather than as
//! constants in the stages that use them.

use std::time::Duration;

use crate::error::OrchestrationError;
use crate::Result;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Per-request pipeline policy.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelinePolicy {
    /// Upper bound on experts consulted per request.
    pub max_experts: usize,
    /// Experts in flight at once.
    pub expert_concurrency: usize,
    pub classifier_timeout: Option<Duration>,
    pub expert_timeout: Option<Duration>,
}

impl Default for PipelinePolicy {
    fn default() -> Self {
        Self {
            max_experts: 4,
            expert_concurrency: 4,
            classifier_timeout: Some(Duration::from_secs(20)),
            expert_timeout: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdvisorConfig {
    pub gemini_api_key: String,
    pub gemini_model: String,
    /// Overrides the Gemini endpoint, e.g. for a proxy.
    pub gemini_base_url: Option<String>,
    pub port: u16,
    pub database_url: Option<String>,
    pub heartbeat_interval: Duration,
    pub channel_capacity: usize,
    pub policy: PipelinePolicy,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            gemini_model: DEFAULT_MODEL.to_string(),
            gemini_base_url: None,
            port: 8080,
            database_url: None,
            heartbeat_interval: Duration::from_secs(15),
            channel_capacity: 64,
            policy: PipelinePolicy::default(),
        }
    }
}

impl AdvisorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let port = match get("PORT").or_else(|| get("API_PORT")) {
            Some(raw) => parse_number::<u16>("PORT", &raw)?,
            None => defaults.port,
        };

        let heartbeat_secs = get_number(&get, "ADVISOR_HEARTBEAT_SECS")?.unwrap_or(15u64);
        if heartbeat_secs == 0 {
            return Err(OrchestrationError::Config(
                "ADVISOR_HEARTBEAT_SECS must be greater than zero".to_string(),
            ));
        }

        let policy = PipelinePolicy {
            max_experts: get_number(&get, "ADVISOR_MAX_EXPERTS")?
                .unwrap_or(defaults.policy.max_experts),
            expert_concurrency: get_number(&get, "ADVISOR_EXPERT_CONCURRENCY")?
                .unwrap_or(defaults.policy.expert_concurrency),
            classifier_timeout: get_number::<u64, _>(&get, "ADVISOR_CLASSIFIER_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .or(defaults.policy.classifier_timeout),
            expert_timeout: get_number::<u64, _>(&get, "ADVISOR_EXPERT_TIMEOUT_SECS")?
                .map(Duration::from_secs),
        };

        Ok(Self {
            gemini_api_key: get("GEMINI_API_KEY").unwrap_or_default(),
            gemini_model: get("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            gemini_base_url: get("GEMINI_BASE_URL"),
            port,
            database_url: get("DATABASE_URL").or_else(|| get("POSTGRES_URL")),
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            channel_capacity: get_number(&get, "ADVISOR_CHANNEL_CAPACITY")?
                .unwrap_or(defaults.channel_capacity),
            policy,
        })
    }
}

fn get_number<T, G>(get: &G, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    get(key).map(|raw| parse_number(key, &raw)).transpose()
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse::<T>().map_err(|_| {
        OrchestrationError::Config(format!("{} must be a number, got '{}'", key, raw))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AdvisorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.gemini_model, DEFAULT_MODEL);
        assert_eq!(config.policy, PipelinePolicy::default());
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = AdvisorConfig::from_lookup(lookup(&[
            ("API_PORT", "9000"),
            ("POSTGRES_URL", "postgres://localhost/advice"),
            ("ADVISOR_MAX_EXPERTS", "2"),
            ("ADVISOR_EXPERT_TIMEOUT_SECS", "30"),
            ("GEMINI_MODEL", " "),
        ]))
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.policy.max_experts, 2);
        assert_eq!(config.policy.expert_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.gemini_model, DEFAULT_MODEL);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/advice"));
    }

    #[test]
    fn test_invalid_numbers_are_errors() {
        let err = AdvisorConfig::from_lookup(lookup(&[("ADVISOR_MAX_EXPERTS", "many")])).unwrap_err();
        assert!(matches!(err, OrchestrationError::Config(_)));

        let err = AdvisorConfig::from_lookup(lookup(&[("ADVISOR_HEARTBEAT_SECS", "0")])).unwrap_err();
        assert!(err.to_string().contains("greater than zero"));
    }
}
