use std::time::Duration;

use crate::errors::AppError;

/// Runtime knobs for the authorization core.
#[derive(Debug, Clone)]
pub struct AuthzConfig {
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub cache_capacity: u64,
    /// Re-check `org_members.status = 'ACTIVE'` before consulting role rows
    pub require_active_membership: bool,
    pub channel_repair_enabled: bool,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl: Duration::from_secs(Self::DEFAULT_CACHE_TTL_SECS),
            cache_capacity: Self::DEFAULT_CACHE_CAPACITY,
            require_active_membership: false,
            channel_repair_enabled: true,
        }
    }
}

impl AuthzConfig {
    pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
    pub const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

    pub fn from_env() -> Result<Self, AppError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars<F>(var: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let cache_ttl_secs = var("PERMISSION_CACHE_TTL_SECS")
            .map(|val| val.parse::<u64>())
            .unwrap_or(Ok(Self::DEFAULT_CACHE_TTL_SECS))
            .map_err(|_| AppError::configuration("PERMISSION_CACHE_TTL_SECS must be a valid integer"))?;

        let cache_capacity = var("PERMISSION_CACHE_CAPACITY")
            .map(|val| val.parse::<u64>())
            .unwrap_or(Ok(Self::DEFAULT_CACHE_CAPACITY))
            .map_err(|_| AppError::configuration("PERMISSION_CACHE_CAPACITY must be a valid integer"))?;

        if cache_ttl_secs == 0 {
            return Err(AppError::configuration("PERMISSION_CACHE_TTL_SECS must be greater than zero"));
        }

        Ok(Self {
            cache_enabled: parse_flag(&var, "PERMISSION_CACHE_ENABLED", defaults.cache_enabled)?,
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            cache_capacity,
            require_active_membership: parse_flag(
                &var,
                "AUTHZ_REQUIRE_ACTIVE_MEMBERSHIP",
                defaults.require_active_membership,
            )?,
            channel_repair_enabled: parse_flag(&var, "CHANNEL_REPAIR_ENABLED", defaults.channel_repair_enabled)?,
        })
    }
}

fn parse_flag<F>(var: &F, key: &str, default: bool) -> Result<bool, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(AppError::configuration(format!("{key} must be a boolean"))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = AuthzConfig::from_vars(vars(&[])).unwrap();
        assert!(config.cache_enabled);
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.cache_capacity, 10_000);
        assert!(!config.require_active_membership);
        assert!(config.channel_repair_enabled);
    }

    #[test]
    fn reads_overrides() {
        let config = AuthzConfig::from_vars(vars(&[
            ("PERMISSION_CACHE_TTL_SECS", "60"),
            ("PERMISSION_CACHE_ENABLED", "off"),
            ("AUTHZ_REQUIRE_ACTIVE_MEMBERSHIP", "true"),
            ("CHANNEL_REPAIR_ENABLED", "0"),
        ]))
        .unwrap();
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert!(!config.cache_enabled);
        assert!(config.require_active_membership);
        assert!(!config.channel_repair_enabled);
    }

    #[test]
    fn rejects_garbage() {
        let err = AuthzConfig::from_vars(vars(&[("PERMISSION_CACHE_TTL_SECS", "five")])).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));

        let err = AuthzConfig::from_vars(vars(&[("PERMISSION_CACHE_TTL_SECS", "0")])).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));

        let err = AuthzConfig::from_vars(vars(&[("CHANNEL_REPAIR_ENABLED", "maybe")])).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }
}
