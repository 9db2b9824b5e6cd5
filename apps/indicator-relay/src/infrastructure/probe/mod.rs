//! HTTP Proxy Probe
//!
//! A proxy is alive when a `GET` of the probe URL through it answers with a
//! 2xx status within the timeout. Everything else, including connect
//! failures and proxy auth rejections, is a dead verdict.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Proxy};
use url::Url;

use crate::application::ports::ProxyProbePort;
use crate::domain::proxy::ProxyAddress;

/// Proxy probe issuing one HTTP request through the proxy.
#[derive(Debug, Clone)]
pub struct HttpProxyProbe {
    target: Url,
}

impl HttpProxyProbe {
    /// Probe by fetching `target`.
    #[must_use]
    pub const fn new(target: Url) -> Self {
        Self { target }
    }

    fn client(proxy: &ProxyAddress, timeout: Duration) -> Result<Client, reqwest::Error> {
        Client::builder()
            .proxy(Proxy::all(proxy.as_url().as_str())?)
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
    }
}

#[async_trait]
impl ProxyProbePort for HttpProxyProbe {
    async fn probe(&self, proxy: &ProxyAddress, timeout: Duration) -> bool {
        let client = match Self::client(proxy, timeout) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(proxy = %proxy, error = %e, "Could not build probe client");
                return false;
            }
        };

        match client.get(self.target.clone()).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::debug!(proxy = %proxy, status = %response.status(), "Probe rejected");
                false
            }
            Err(e) => {
                tracing::debug!(proxy = %proxy, error = %e, "Probe failed");
                false
            }
        }
    }
}
