use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::allowlist::AllowList;

/// Upper bound for a single outbound call.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_SERVICE_NAME: &str = "nlq-bridge";
pub const DEFAULT_PORT: u16 = 8080;

/// Analytics platform connection.  Any field may be absent; the endpoints that
/// need it fail with a configuration error instead of refusing to start.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub session_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LanguageModelConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

impl Default for LanguageModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
        }
    }
}

/// Process-wide configuration, built once at startup and handed to
/// `build_state`.  Tests construct it directly.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub service_name: String,
    pub port: u16,
    pub analytics: AnalyticsConfig,
    pub language_model: LanguageModelConfig,
    pub allowed_database_ids: AllowList,
    pub max_request_bytes: Option<usize>,
    pub upstream_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            port: DEFAULT_PORT,
            analytics: AnalyticsConfig::default(),
            language_model: LanguageModelConfig::default(),
            allowed_database_ids: AllowList::default(),
            max_request_bytes: None,
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let port = match parse_optional_u64("PORT")? {
            Some(p) => u16::try_from(p).map_err(|_| anyhow!("PORT must be between 0 and 65535"))?,
            None => DEFAULT_PORT,
        };

        let analytics = AnalyticsConfig {
            base_url: optional_var("METABASE_URL")?.map(|u| u.trim_end_matches('/').to_string()),
            api_key: optional_var("METABASE_API_KEY")?,
            session_token: optional_var("METABASE_SESSION_TOKEN")?,
        };

        let language_model = LanguageModelConfig {
            api_key: optional_var("OPENAI_API_KEY")?,
            model: optional_var("OPENAI_MODEL")?.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: optional_var("OPENAI_BASE_URL")?
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
        };

        let allowed_database_ids = optional_var("ALLOWED_DATABASE_IDS")?
            .map(|raw| AllowList::from_csv(&raw))
            .unwrap_or_default();

        let max_request_bytes = parse_optional_u64("MAX_REQUEST_BYTES")?.map(|v| v as usize);

        Ok(Self {
            service_name: optional_var("SERVICE_NAME")?
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            port,
            analytics,
            language_model,
            allowed_database_ids,
            max_request_bytes,
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
        })
    }
}

/// Blank values count as unset.
fn optional_var(var: &str) -> Result<Option<String>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(Some(value.trim().to_string())),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(anyhow!("{} is not valid unicode: {}", var, err)),
    }
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match optional_var(var)? {
        Some(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::Identifier;
    use once_cell::sync::Lazy;
    use std::sync::Mutex;

    static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const VARS: &[&str] = &[
        "PORT",
        "SERVICE_NAME",
        "METABASE_URL",
        "METABASE_API_KEY",
        "METABASE_SESSION_TOKEN",
        "OPENAI_API_KEY",
        "OPENAI_MODEL",
        "OPENAI_BASE_URL",
        "ALLOWED_DATABASE_IDS",
        "MAX_REQUEST_BYTES",
    ];

    fn clear() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn parses_environment_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear();

        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.service_name, "nlq-bridge");
        assert!(cfg.analytics.base_url.is_none());
        assert!(cfg.language_model.api_key.is_none());
        assert_eq!(cfg.language_model.model, "gpt-4o-mini");
        assert_eq!(cfg.language_model.base_url, "https://api.openai.com");
        assert!(cfg.allowed_database_ids.is_empty());
        assert_eq!(cfg.max_request_bytes, None);
        assert_eq!(cfg.upstream_timeout, Duration::from_secs(30));
    }

    #[test]
    fn parses_full_configuration() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear();

        std::env::set_var("PORT", "9090");
        std::env::set_var("SERVICE_NAME", "bridge-test");
        std::env::set_var("METABASE_URL", "https://metabase.internal/");
        std::env::set_var("METABASE_API_KEY", "mb_key");
        std::env::set_var("OPENAI_API_KEY", "sk-test");
        std::env::set_var("OPENAI_MODEL", "gpt-4.1");
        std::env::set_var("OPENAI_BASE_URL", "http://localhost:1234/");
        std::env::set_var("ALLOWED_DATABASE_IDS", "2, 3,,7");
        std::env::set_var("MAX_REQUEST_BYTES", "4096");

        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.service_name, "bridge-test");
        assert_eq!(
            cfg.analytics.base_url.as_deref(),
            Some("https://metabase.internal")
        );
        assert_eq!(cfg.analytics.api_key.as_deref(), Some("mb_key"));
        assert!(cfg.analytics.session_token.is_none());
        assert_eq!(cfg.language_model.api_key.as_deref(), Some("sk-test"));
        assert_eq!(cfg.language_model.model, "gpt-4.1");
        assert_eq!(cfg.language_model.base_url, "http://localhost:1234");
        assert_eq!(cfg.allowed_database_ids.len(), 3);
        assert!(cfg.allowed_database_ids.permits(&Identifier::from(7)));
        assert!(!cfg.allowed_database_ids.permits(&Identifier::from(4)));
        assert_eq!(cfg.max_request_bytes, Some(4096));

        clear();
    }

    #[test]
    fn blank_values_are_unset() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear();
        std::env::set_var("OPENAI_API_KEY", "   ");
        std::env::set_var("ALLOWED_DATABASE_IDS", "");

        let cfg = AppConfig::from_env().unwrap();
        assert!(cfg.language_model.api_key.is_none());
        assert!(cfg.allowed_database_ids.is_empty());

        clear();
    }

    #[test]
    fn rejects_out_of_range_port() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear();
        std::env::set_var("PORT", "70000");
        let err = AppConfig::from_env().expect_err("port out of range");
        assert!(err.to_string().contains("PORT"));
        clear();
    }
}
