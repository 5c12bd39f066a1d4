use crate::config::ApiConfig;
use crate::core::classifier::RawError;
use crate::domain::ports::{EsimTransport, RawResponse};
use crate::utils::error::{ConfigError, ConfigResult};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::{Client, RequestBuilder};
use url::Url;

const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");

/// reqwest-backed [`EsimTransport`]. The credential comes from the injected
/// [`ApiConfig`], never from process-wide state.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(config: &ApiConfig) -> ConfigResult<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| ConfigError::InvalidConfigValueError {
            field: "api.base_url".to_string(),
            value: config.base_url.clone(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidConfigValueError {
                field: "api.base_url".to_string(),
                value: config.base_url.clone(),
                reason: "URL cannot be used as a base".to_string(),
            });
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let mut key = HeaderValue::from_str(config.api_key.trim()).map_err(|e| {
            ConfigError::InvalidConfigValueError {
                field: "api.api_key".to_string(),
                value: "<redacted>".to_string(),
                reason: e.to_string(),
            }
        })?;
        key.set_sensitive(true);
        headers.insert(API_KEY_HEADER, key);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self { client, base_url })
    }

    fn url_for(&self, segments: &[&str]) -> std::result::Result<Url, RawError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RawError::malformed("base URL cannot carry path segments"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> std::result::Result<RawResponse, RawError> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        tracing::debug!("⬅️ {} ({} bytes)", status, body.len());
        Ok(RawResponse { status, body })
    }
}

#[async_trait]
impl EsimTransport for HttpTransport {
    async fn get(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> std::result::Result<RawResponse, RawError> {
        let url = self.url_for(segments)?;
        tracing::debug!("➡️ GET {}", url);
        let mut request = self.client.get(url);
        if !query.is_empty() {
            request = request.query(query);
        }
        self.send(request).await
    }

    async fn post_json(
        &self,
        segments: &[&str],
        body: &serde_json::Value,
    ) -> std::result::Result<RawResponse, RawError> {
        let url = self.url_for(segments)?;
        tracing::debug!("➡️ POST {}", url);
        self.send(self.client.post(url).json(body)).await
    }
}
