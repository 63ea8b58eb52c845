use anyhow::Context;
use std::{env, time::Duration};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_THEMES_TABLE: &str = "n8n_sales_test_themes";
pub const DEFAULT_SESSIONS_TABLE: &str = "n8n_sales_test_sessions";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_MAX_PAGE_SIZE: i64 = 100;
pub const DEFAULT_THEME_CACHE_TTL_SECS: u64 = 60;
pub const DEFAULT_STATIC_DIR: &str = "static";
pub const DEFAULT_ANALYSIS_PROMPT: &str = "Проанализируй ответы сотрудников: выдели сильные и слабые стороны, \
типичные ошибки и дай конкретные рекомендации по улучшению.";

/// Where the session and theme tables live.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreConfig {
    Postgres { database_url: String },
    Rest { url: String, key: String },
    Unconfigured,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub store: StoreConfig,
    pub themes_table: String,
    pub sessions_table: String,
    pub provider: ProviderConfig,
    pub default_prompt: String,
    pub max_page_size: i64,
    pub theme_cache_ttl: Duration,
    pub static_dir: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source. Blank values count
    /// as absent.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let store = match (var("DATABASE_URL"), var("SUPABASE_URL"), var("SUPABASE_KEY")) {
            (Some(database_url), _, _) => StoreConfig::Postgres { database_url },
            (None, Some(url), Some(key)) => StoreConfig::Rest {
                url: url.trim_end_matches('/').to_string(),
                key,
            },
            _ => StoreConfig::Unconfigured,
        };

        let max_page_size = match var("MAX_PAGE_SIZE") {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|v| *v > 0)
                .with_context(|| format!("MAX_PAGE_SIZE must be a positive integer, got {raw:?}"))?,
            None => DEFAULT_MAX_PAGE_SIZE,
        };

        let ttl_secs = match var("THEME_CACHE_TTL_SECS") {
            Some(raw) => raw.trim().parse::<u64>().with_context(|| {
                format!("THEME_CACHE_TTL_SECS must be a non-negative integer, got {raw:?}")
            })?,
            None => DEFAULT_THEME_CACHE_TTL_SECS,
        };

        Ok(Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            store,
            themes_table: var("THEMES_TABLE").unwrap_or_else(|| DEFAULT_THEMES_TABLE.to_string()),
            sessions_table: var("SESSIONS_TABLE")
                .unwrap_or_else(|| DEFAULT_SESSIONS_TABLE.to_string()),
            provider: ProviderConfig {
                api_key: var("OPENAI_API_KEY"),
                base_url: var("OPENAI_BASE_URL")
                    .map(|url| url.trim_end_matches('/').to_string())
                    .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
                model: var("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            },
            default_prompt: var("ANALYSIS_PROMPT")
                .unwrap_or_else(|| DEFAULT_ANALYSIS_PROMPT.to_string()),
            max_page_size,
            theme_cache_ttl: Duration::from_secs(ttl_secs),
            static_dir: var("STATIC_DIR").unwrap_or_else(|| DEFAULT_STATIC_DIR.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_any_variables() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.store, StoreConfig::Unconfigured);
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.provider.base_url, DEFAULT_OPENAI_BASE_URL);
        assert_eq!(config.provider.model, DEFAULT_MODEL);
        assert!(config.provider.api_key.is_none());
        assert_eq!(config.max_page_size, 100);
        assert_eq!(config.theme_cache_ttl, Duration::from_secs(60));
        assert_eq!(config.default_prompt, DEFAULT_ANALYSIS_PROMPT);
    }

    #[test]
    fn database_url_wins_over_rest_credentials() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/review"),
            ("SUPABASE_URL", "https://x.supabase.co"),
            ("SUPABASE_KEY", "secret"),
        ])
        .unwrap();
        assert_eq!(
            config.store,
            StoreConfig::Postgres {
                database_url: "postgres://localhost/review".into()
            }
        );
    }

    #[test]
    fn rest_store_needs_both_url_and_key() {
        let partial = config_from(&[("SUPABASE_URL", "https://x.supabase.co")]).unwrap();
        assert_eq!(partial.store, StoreConfig::Unconfigured);

        let full = config_from(&[
            ("SUPABASE_URL", "https://x.supabase.co/"),
            ("SUPABASE_KEY", "secret"),
        ])
        .unwrap();
        assert_eq!(
            full.store,
            StoreConfig::Rest {
                url: "https://x.supabase.co".into(),
                key: "secret".into()
            }
        );
    }

    #[test]
    fn rejects_invalid_page_size() {
        assert!(config_from(&[("MAX_PAGE_SIZE", "0")]).is_err());
        assert!(config_from(&[("MAX_PAGE_SIZE", "lots")]).is_err());
        let config = config_from(&[("MAX_PAGE_SIZE", "250")]).unwrap();
        assert_eq!(config.max_page_size, 250);
    }

    #[test]
    fn blank_values_count_as_absent() {
        let config = config_from(&[("OPENAI_API_KEY", "  "), ("OPENAI_MODEL", "")]).unwrap();
        assert!(config.provider.api_key.is_none());
        assert_eq!(config.provider.model, DEFAULT_MODEL);
    }
}
