use crate::analysis::AnalysisSettings;
use serde::Deserialize;
use std::time::Duration;

/// Extra attempts per table beyond which retrying stops being useful.
pub const MAX_ANALYSIS_RETRIES: u32 = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub llm_timeout_secs: u64,
    pub analysis_concurrency: usize,
    pub analysis_retries: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_vars<F>(var: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            database_url: var("DB_URL")
                .or_else(|| var("DATABASE_URL"))
                .ok_or_else(|| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: var("PORT")
                .unwrap_or_else(|| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            llm_base_url: var("LLM_BASE_URL")
                .ok_or_else(|| anyhow::anyhow!("LLM_BASE_URL environment variable required"))
                .and_then(|raw| {
                    let parsed = url::Url::parse(raw.trim())
                        .map_err(|e| anyhow::anyhow!("LLM_BASE_URL is not a valid URL: {}", e))?;
                    if parsed.scheme() != "http" && parsed.scheme() != "https" {
                        anyhow::bail!("LLM_BASE_URL must start with http:// or https://");
                    }
                    Ok(raw.trim().to_string())
                })?,
            llm_api_key: var("LLM_API_KEY").filter(|s| !s.trim().is_empty()),
            llm_model: var("LLM_MODEL")
                .map(|m| m.trim().to_string())
                .unwrap_or_else(|| "mistral-large2".to_string()),
            llm_timeout_secs: var("LLM_TIMEOUT_SECS")
                .unwrap_or_else(|| "120".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("LLM_TIMEOUT_SECS must be a positive number"))
                .and_then(|secs: u64| {
                    if secs == 0 {
                        anyhow::bail!("LLM_TIMEOUT_SECS must be a positive number");
                    }
                    Ok(secs)
                })?,
            analysis_concurrency: var("ANALYSIS_CONCURRENCY")
                .unwrap_or_else(|| "1".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("ANALYSIS_CONCURRENCY must be a positive number"))
                .and_then(|n: usize| {
                    if n == 0 {
                        anyhow::bail!("ANALYSIS_CONCURRENCY must be at least 1");
                    }
                    Ok(n)
                })?,
            analysis_retries: var("ANALYSIS_RETRIES")
                .unwrap_or_else(|| "0".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("ANALYSIS_RETRIES must be a non-negative number"))
                .and_then(|n: u32| {
                    if n > MAX_ANALYSIS_RETRIES {
                        anyhow::bail!("ANALYSIS_RETRIES must be at most {}", MAX_ANALYSIS_RETRIES);
                    }
                    Ok(n)
                })?,
        };

        if config.llm_model.is_empty() {
            anyhow::bail!("LLM_MODEL cannot be empty");
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("LLM Base URL: {}", config.llm_base_url);
        tracing::debug!("LLM Model: {}", config.llm_model);
        tracing::debug!(
            "Analysis: concurrency {}, retries {}, timeout {}s",
            config.analysis_concurrency,
            config.analysis_retries,
            config.llm_timeout_secs
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn analysis_settings(&self) -> AnalysisSettings {
        AnalysisSettings {
            model: self.llm_model.clone(),
            concurrency: self.analysis_concurrency,
            retries: self.analysis_retries,
            ..AnalysisSettings::default()
        }
    }
}
