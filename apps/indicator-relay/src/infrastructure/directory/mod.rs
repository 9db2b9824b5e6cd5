//! HTTP Indicator Directory
//!
//! Fetches indicator definitions from `GET {base}/studies/{script_id}`.
//! The response body is the JSON form of [`IndicatorDefinition`]:
//!
//! ```json
//! {"scriptId": "STD;RSI", "version": "31", "inputs": ["length", "source"]}
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use url::Url;

use crate::application::ports::{DirectoryError, IndicatorDefinition, IndicatorDirectoryPort};

/// Indicator directory over HTTP.
#[derive(Debug, Clone)]
pub struct HttpIndicatorDirectory {
    client: Client,
    base: Url,
}

impl HttpIndicatorDirectory {
    /// Create a directory client rooted at `base`.
    ///
    /// # Errors
    ///
    /// Returns `DirectoryError::Request` if the HTTP client cannot be built
    /// or `base` cannot carry a path.
    pub fn new(base: Url, timeout: Duration) -> Result<Self, DirectoryError> {
        if base.cannot_be_a_base() {
            return Err(DirectoryError::Request(format!("not a base url: {base}")));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DirectoryError::Request(e.to_string()))?;
        Ok(Self { client, base })
    }

    fn definition_url(&self, script_id: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("studies").push(script_id);
        }
        url
    }
}

#[async_trait]
impl IndicatorDirectoryPort for HttpIndicatorDirectory {
    async fn fetch(&self, script_id: &str) -> Result<IndicatorDefinition, DirectoryError> {
        let url = self.definition_url(script_id);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DirectoryError::Request(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(DirectoryError::NotFound(script_id.to_string()));
        }
        if !status.is_success() {
            return Err(DirectoryError::Request(format!("HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| DirectoryError::Request(e.to_string()))?;
        let definition: IndicatorDefinition =
            serde_json::from_str(&body).map_err(|e| DirectoryError::Decode(e.to_string()))?;

        tracing::debug!(
            script_id,
            version = %definition.version,
            inputs = definition.inputs.len(),
            "Fetched indicator definition"
        );
        Ok(definition)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn directory(server: &MockServer) -> HttpIndicatorDirectory {
        let base = Url::parse(&server.uri()).unwrap();
        HttpIndicatorDirectory::new(base, Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn fetches_definition() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/studies/STD;RSI"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "scriptId": "STD;RSI",
                "version": "31",
                "inputs": ["length", "source"],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let definition = directory(&server).await.fetch("STD;RSI").await.unwrap();
        assert_eq!(definition.version, "31");
        assert_eq!(definition.inputs, vec!["length", "source"]);
    }

    #[tokio::test]
    async fn missing_script_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = directory(&server).await.fetch("STD;NOPE").await.unwrap_err();
        assert_eq!(err, DirectoryError::NotFound("STD;NOPE".into()));
    }

    #[tokio::test]
    async fn server_error_is_request_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = directory(&server).await.fetch("STD;EMA").await.unwrap_err();
        assert!(matches!(err, DirectoryError::Request(msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = directory(&server).await.fetch("STD;EMA").await.unwrap_err();
        assert!(matches!(err, DirectoryError::Decode(_)));
    }

    #[test]
    fn url_keeps_base_path() {
        let base = Url::parse("https://data.example.com/api/").unwrap();
        let directory = HttpIndicatorDirectory::new(base, Duration::from_secs(1)).unwrap();
        assert_eq!(
            directory.definition_url("STD;MACD").as_str(),
            "https://data.example.com/api/studies/STD;MACD"
        );
    }
}
