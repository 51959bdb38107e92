//! HTTP backend reachability probe

use super::BackendProbe;
use async_trait::async_trait;
use parlo_common::config::BackendConfig;
use parlo_common::{Error, Result};
use tracing::debug;

/// Probes the hosted backend's REST root
///
/// Only a 2xx counts: a TLS handshake that ends in a 5xx from a proxy in
/// front of a dead backend is still unreachable.
pub struct HttpBackendProbe {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    timeout_ms: u64,
}

impl HttpBackendProbe {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.probe_timeout())
            .build()
            .map_err(|e| Error::Http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: join_url(&config.base_url, &config.probe_path),
            api_key: config.api_key.clone(),
            timeout_ms: config.probe_timeout().as_millis() as u64,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl BackendProbe for HttpBackendProbe {
    async fn probe(&self) -> Result<()> {
        let mut request = self.client.get(&self.url);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key).bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(self.timeout_ms)
            } else {
                Error::Http(format!("Probe request failed: {}", e))
            }
        })?;

        let status = response.status();
        debug!(status_code = status.as_u16(), url = %self.url, "Probe response");
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Http(format!("Probe returned HTTP {}", status.as_u16())))
        }
    }
}

/// Join a base URL and a path without doubling or dropping the slash
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
