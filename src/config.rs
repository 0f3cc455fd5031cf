use std::path::PathBuf;

use crate::error::ConfigError;

pub const DEFAULT_BASE_URL: &str = "https://integrate.api.nvidia.com/v1";
pub const DEFAULT_MODEL: &str = "nvidia/llama-3.1-nemotron-ultra-253b-v1";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Connection and sampling settings for the completion API.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl UpstreamConfig {
    /// Fails when the key is absent or blank.
    pub fn from_api_key(api_key: Option<String>) -> Result<Self, ConfigError> {
        let api_key = api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        Ok(Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.6,
            top_p: 0.95,
            max_tokens: 1024,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

pub struct ServerConfig {
    /// Host name or address; resolved when the listener binds.
    pub host: String,
    pub port: u16,
    pub uploads_dir: PathBuf,
    pub public_dir: Option<PathBuf>,
    pub max_upload_bytes: usize,
    pub upstream: UpstreamConfig,
}

impl ServerConfig {
    pub fn new(host: &str, port: u16, upstream: UpstreamConfig) -> Self {
        Self {
            host: host.to_string(),
            port,
            uploads_dir: PathBuf::from("uploads"),
            public_dir: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            upstream,
        }
    }

    pub fn listen_addr(&self) -> (&str, u16) {
        (&self.host, self.port)
    }
}

pub struct ClientConfig {
    pub base_url: String,
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_api_key_is_rejected() {
        assert!(matches!(
            UpstreamConfig::from_api_key(None),
            Err(ConfigError::MissingApiKey)
        ));
        assert!(matches!(
            UpstreamConfig::from_api_key(Some("   ".to_string())),
            Err(ConfigError::MissingApiKey)
        ));
    }

    #[test]
    fn upstream_defaults_match_the_hosted_model() {
        let config = UpstreamConfig::from_api_key(Some("nvapi-123".to_string())).unwrap();
        assert_eq!(config.api_key, "nvapi-123");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.max_tokens, 1024);
        assert_eq!(
            config.completions_url(),
            "https://integrate.api.nvidia.com/v1/chat/completions"
        );
    }

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let config = UpstreamConfig::from_api_key(Some("k".to_string()))
            .unwrap()
            .with_base_url("http://127.0.0.1:9000/v1/");
        assert_eq!(
            config.completions_url(),
            "http://127.0.0.1:9000/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn server_config_binds_host_names() {
        let upstream = UpstreamConfig::from_api_key(Some("k".to_string())).unwrap();
        let config = ServerConfig::new("localhost", 0, upstream);
        assert_eq!(config.listen_addr(), ("localhost", 0));

        let listener = tokio::net::TcpListener::bind(config.listen_addr())
            .await
            .unwrap();
        assert!(listener.local_addr().unwrap().ip().is_loopback());
    }

    #[test]
    fn client_config_normalizes_base_url() {
        assert_eq!(
            ClientConfig::new("http://localhost:3000/").base_url,
            "http://localhost:3000"
        );
    }
}
