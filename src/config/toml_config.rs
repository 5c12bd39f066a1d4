use crate::config::ApiConfig;
use crate::core::checkout::CheckoutOptions;
use crate::domain::model::{Backoff, PollOptions};
use crate::utils::error::{ConfigError, ConfigResult};
use crate::utils::validation::{validate_range, validate_required_field, Validate};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    pub api: ApiSection,
    pub polling: Option<PollingSection>,
    pub order: Option<OrderSection>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ApiSection {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_seconds: Option<u64>,
}

impl std::fmt::Debug for ApiSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSection")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollingSection {
    pub retries: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub grace_period_ms: Option<u64>,
    pub backoff: Option<String>, // "linear" or "exponential"
    pub backoff_multiplier: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderSection {
    pub allow_reassign: Option<bool>,
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let processed_content = Self::substitute_env_vars(content)?;
        Ok(toml::from_str(&processed_content)?)
    }

    /// 替換環境變數 (例如 ${ESIM_API_KEY})，找不到的保持原樣
    fn substitute_env_vars(content: &str) -> ConfigResult<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}")?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// 套用命令列覆寫值，必須在 `validate` 與 `api_config` 之前呼叫
    pub fn with_api_overrides(mut self, base_url: Option<String>, api_key: Option<String>) -> Self {
        if let Some(base_url) = base_url {
            self.api.base_url = base_url;
        }
        if let Some(api_key) = api_key {
            self.api.api_key = Some(api_key);
        }
        self
    }

    fn polling(&self) -> PollingSection {
        self.polling.clone().unwrap_or_default()
    }

    pub fn backoff(&self) -> ConfigResult<Backoff> {
        let polling = self.polling();
        match polling.backoff.as_deref().unwrap_or("linear") {
            "linear" => Ok(Backoff::Linear),
            "exponential" => Ok(Backoff::Exponential {
                multiplier: polling.backoff_multiplier.unwrap_or(2),
            }),
            other => Err(ConfigError::InvalidConfigValueError {
                field: "polling.backoff".to_string(),
                value: other.to_string(),
                reason: "Valid strategies: linear, exponential".to_string(),
            }),
        }
    }

    pub fn poll_options(&self) -> ConfigResult<PollOptions> {
        let polling = self.polling();
        let defaults = PollOptions::default();
        Ok(PollOptions {
            retries: polling.retries.unwrap_or(defaults.retries),
            initial_delay: polling
                .initial_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_delay),
            grace_period: polling
                .grace_period_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.grace_period),
            backoff: self.backoff()?,
        })
    }

    pub fn checkout_options(&self) -> ConfigResult<CheckoutOptions> {
        Ok(CheckoutOptions {
            poll: self.poll_options()?,
            allow_reassign: self
                .order
                .as_ref()
                .and_then(|o| o.allow_reassign)
                .unwrap_or(false),
        })
    }

    /// 產生注入 transport 的 API 設定
    pub fn api_config(&self) -> ConfigResult<ApiConfig> {
        let api_key = validate_required_field("api.api_key", &self.api.api_key)?;
        if api_key.contains("${") {
            return Err(ConfigError::InvalidConfigValueError {
                field: "api.api_key".to_string(),
                value: api_key.clone(),
                reason: "Referenced environment variable is not set".to_string(),
            });
        }

        let config = ApiConfig {
            base_url: self.api.base_url.clone(),
            api_key: api_key.clone(),
            timeout: Duration::from_secs(self.api.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS)),
        };
        config.validate()?;
        Ok(config)
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> ConfigResult<()> {
        crate::utils::validation::validate_url("api.base_url", &self.api.base_url)?;

        let polling = self.polling();
        if let Some(retries) = polling.retries {
            validate_range("polling.retries", retries, 1, 10)?;
        }
        if let Some(delay) = polling.initial_delay_ms {
            validate_range("polling.initial_delay_ms", delay, 0, 60_000)?;
        }
        if let Some(grace) = polling.grace_period_ms {
            validate_range("polling.grace_period_ms", grace, 0, 60_000)?;
        }
        if let Some(multiplier) = polling.backoff_multiplier {
            validate_range("polling.backoff_multiplier", multiplier, 1, 10)?;
        }
        self.backoff()?;
        Ok(())
    }
}
