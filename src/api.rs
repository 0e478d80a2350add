//! Isolated network-request client bound to the API base URL.

use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Options for a per-scenario request client.
#[derive(Debug, Clone, Default)]
pub struct ApiContextOptions {
    /// Base URL relative request paths are resolved against.
    pub base_url: Option<String>,
    /// Accept invalid TLS certificates.
    pub ignore_https_errors: bool,
}

/// HTTP client owned by exactly one scenario.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Option<Url>,
}

impl ApiClient {
    /// Creates a client. An empty base URL is treated as no base URL.
    pub fn new(options: ApiContextOptions) -> Result<Self> {
        let base_url = match options.base_url.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(
                Url::parse(raw)
                    .map_err(|e| Error::Config(format!("invalid API URL '{}': {}", raw, e)))?,
            ),
            _ => None,
        };

        let client = Client::builder()
            .danger_accept_invalid_certs(options.ignore_https_errors)
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    /// Resolves `path` against the base URL. Absolute URLs pass through.
    pub fn url_for(&self, path: &str) -> Result<Url> {
        if let Ok(absolute) = Url::parse(path) {
            return Ok(absolute);
        }
        let base = self.base_url.as_ref().ok_or_else(|| {
            Error::Config(format!(
                "cannot resolve relative path '{}' without an API base URL",
                path
            ))
        })?;
        base.join(path)
            .map_err(|e| Error::Config(format!("invalid API path '{}': {}", path, e)))
    }

    /// Sends a GET request.
    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let url = self.url_for(path)?;
        tracing::debug!(url = %url, "GET");
        Ok(self.client.get(url).send().await?)
    }

    /// Sends a POST request with a JSON body.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response> {
        let url = self.url_for(path)?;
        tracing::debug!(url = %url, "POST");
        Ok(self.client.post(url).json(body).send().await?)
    }

    /// Parses the JSON body of a successful response.
    ///
    /// Non-success statuses fail with [`Error::Api`] before the body is read.
    pub async fn json_body(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| Error::ResponseParse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves a single canned HTTP response on a local port.
    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        format!("http://{}/", addr)
    }

    fn client(base_url: Option<&str>) -> ApiClient {
        ApiClient::new(ApiContextOptions {
            base_url: base_url.map(String::from),
            ignore_https_errors: true,
        })
        .unwrap()
    }

    #[test]
    fn empty_base_url_means_no_base() {
        assert!(client(Some("")).base_url().is_none());
        assert!(client(None).base_url().is_none());
    }

    #[test]
    fn invalid_base_url_is_config_error() {
        let err = ApiClient::new(ApiContextOptions {
            base_url: Some("not a url".to_string()),
            ignore_https_errors: false,
        })
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn url_for_resolves_relative_paths() {
        let api = client(Some("https://api.shop.example.test/rest/"));

        assert_eq!(
            api.url_for("V1/customers").unwrap().as_str(),
            "https://api.shop.example.test/rest/V1/customers"
        );
        assert_eq!(
            api.url_for("https://other.example.test/x").unwrap().as_str(),
            "https://other.example.test/x"
        );
    }

    #[test]
    fn url_for_without_base_rejects_relative_paths() {
        assert!(client(None).url_for("V1/customers").is_err());
    }

    #[tokio::test]
    async fn json_body_parses_success() {
        let base = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 13\r\nConnection: close\r\n\r\n{\"id\":\"c-1\"}\n",
        )
        .await;
        let api = client(Some(&base));

        let response = api.get("customers/me").await.unwrap();
        let body = ApiClient::json_body(response).await.unwrap();

        assert_eq!(body["id"], "c-1");
    }

    #[tokio::test]
    async fn json_body_rejects_error_status() {
        let base = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let api = client(Some(&base));

        let response = api.get("customers/me").await.unwrap();
        let err = ApiClient::json_body(response).await.unwrap_err();

        match err {
            Error::Api { status, reason } => {
                assert_eq!(status, 503);
                assert_eq!(reason, "Service Unavailable");
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
