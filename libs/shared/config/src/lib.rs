use std::env;
use std::str::FromStr;
use tracing::warn;

/// Which persistence backend the scheduling engine talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Supabase,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "supabase" => Ok(StoreBackend::Supabase),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown scheduling store backend: {}", other)),
        }
    }
}

/// Tunables for slot generation, reschedule policy and store locking.
#[derive(Debug, Clone)]
pub struct SchedulingRules {
    pub slot_minutes: i64,
    pub reschedule_notice_days: i64,
    pub lock_ttl_seconds: i64,
    pub lock_retry_attempts: u32,
}

impl Default for SchedulingRules {
    fn default() -> Self {
        Self {
            slot_minutes: 15,
            reschedule_notice_days: 3,
            lock_ttl_seconds: 30,
            lock_retry_attempts: 3,
        }
    }
}

impl SchedulingRules {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            slot_minutes: at_least_one("SLOT_MINUTES", parse_or("SLOT_MINUTES", defaults.slot_minutes), defaults.slot_minutes),
            reschedule_notice_days: parse_or("RESCHEDULE_NOTICE_DAYS", defaults.reschedule_notice_days),
            lock_ttl_seconds: parse_or("LOCK_TTL_SECONDS", defaults.lock_ttl_seconds),
            lock_retry_attempts: parse_or("LOCK_RETRY_ATTEMPTS", defaults.lock_retry_attempts),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    /// Bearer token for server-side table access. Falls back to the anon key.
    pub supabase_service_role_key: Option<String>,
    pub store_backend: StoreBackend,
    pub bind_addr: String,
    pub scheduling: SchedulingRules,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .ok()
                .filter(|key| !key.is_empty()),
            store_backend: env::var("SCHEDULING_STORE")
                .ok()
                .and_then(|raw| match raw.parse() {
                    Ok(backend) => Some(backend),
                    Err(e) => {
                        warn!("{}, falling back to supabase", e);
                        None
                    }
                })
                .unwrap_or(StoreBackend::Supabase),
            bind_addr: env::var("BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            scheduling: SchedulingRules::from_env(),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        let store_ready = match self.store_backend {
            StoreBackend::Memory => true,
            StoreBackend::Supabase => {
                !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
            }
        };
        store_ready && !self.supabase_jwt_secret.is_empty()
    }

    /// Token the scheduling store sends as `Authorization: Bearer`.
    pub fn store_token(&self) -> Option<String> {
        self.supabase_service_role_key
            .clone()
            .or_else(|| Some(self.supabase_anon_key.clone()).filter(|key| !key.is_empty()))
    }
}

fn parse_or<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} is not a valid value ({}), using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

fn at_least_one(key: &str, value: i64, default: i64) -> i64 {
    if value < 1 {
        warn!("{} must be positive (got {}), using default {}", key, value, default);
        return default;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_slot_length_falls_back_to_default() {
        assert_eq!(at_least_one("SLOT_MINUTES", 0, 15), 15);
        assert_eq!(at_least_one("SLOT_MINUTES", -30, 15), 15);
        assert_eq!(at_least_one("SLOT_MINUTES", 20, 15), 20);
    }

    #[test]
    fn store_backend_parses_case_insensitively() {
        assert_eq!("Memory".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
        assert_eq!(" supabase ".parse::<StoreBackend>(), Ok(StoreBackend::Supabase));
        assert!("postgres".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn default_rules_use_quarter_hour_slots() {
        let rules = SchedulingRules::default();
        assert_eq!(rules.slot_minutes, 15);
        assert_eq!(rules.reschedule_notice_days, 3);
    }

    #[test]
    fn store_token_prefers_service_role_key() {
        let mut config = AppConfig {
            supabase_url: "http://localhost".to_string(),
            supabase_anon_key: "anon".to_string(),
            supabase_jwt_secret: "secret".to_string(),
            supabase_service_role_key: None,
            store_backend: StoreBackend::Supabase,
            bind_addr: "127.0.0.1:0".to_string(),
            scheduling: SchedulingRules::default(),
        };
        assert_eq!(config.store_token().as_deref(), Some("anon"));

        config.supabase_service_role_key = Some("service".to_string());
        assert_eq!(config.store_token().as_deref(), Some("service"));
        assert!(config.is_configured());
    }
}
