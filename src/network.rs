//! Waiting for data-fetch responses observed by a page.

use std::time::Duration;

use serde_json::Value;

use crate::browser::{Page, Response};
use crate::error::{Error, Result};

/// Default time to wait for a matching response.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

/// Selects an `xhr`/`fetch` exchange by URL substring and HTTP method.
///
/// Document navigations and static resource loads never match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMatcher {
    url_fragment: String,
    method: String,
}

impl ResponseMatcher {
    pub fn new(url_fragment: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            url_fragment: url_fragment.into(),
            method: method.into(),
        }
    }

    pub fn url_fragment(&self) -> &str {
        &self.url_fragment
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn matches(&self, response: &dyn Response) -> bool {
        response.url().contains(&self.url_fragment)
            && response.request_method() == self.method
            && response.resource_type().is_data_fetch()
    }

    /// Waits for the first matching exchange on `page`.
    ///
    /// An elapsed wait is reported as [`Error::ResponseTimeout`]; other
    /// failures, such as a closed page, are returned unchanged.
    pub async fn wait(&self, page: &dyn Page, timeout: Duration) -> Result<Box<dyn Response>> {
        page.wait_for_response(&|r| self.matches(r), timeout)
            .await
            .map_err(|e| match e {
                Error::Timeout(_) => Error::ResponseTimeout {
                    url: self.url_fragment.clone(),
                    method: self.method.clone(),
                    timeout,
                },
                other => {
                    tracing::debug!(url = %self.url_fragment, method = %self.method, error = %other, "response wait failed");
                    other
                }
            })
    }
}

/// Waits for a matching response and returns its JSON body.
pub async fn wait_for_json(
    page: &dyn Page,
    url: &str,
    method: &str,
    timeout: Duration,
) -> Result<Value> {
    let matcher = ResponseMatcher::new(url, method);
    let response = matcher.wait(page, timeout).await?;
    response.json().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::memory::{Exchange, MemoryLauncher};
    use crate::browser::{BrowserContext, BrowserLauncher, ContextOptions, LaunchOptions, ResourceType};
    use crate::config::EngineKind;
    use serde_json::json;

    async fn open_page(launcher: &MemoryLauncher) -> (Box<dyn BrowserContext>, Box<dyn Page>) {
        let browser = launcher
            .launch(EngineKind::Chromium, LaunchOptions::default())
            .await
            .unwrap();
        let context = browser.new_context(ContextOptions::default()).await.unwrap();
        let page = context.new_page().await.unwrap();
        (context, page)
    }

    #[tokio::test]
    async fn elapsed_wait_is_a_response_timeout() {
        let launcher = MemoryLauncher::new();
        let (_context, page) = open_page(&launcher).await;

        let err = ResponseMatcher::new("/rest/V1/carts", "POST")
            .wait(page.as_ref(), Duration::from_millis(30))
            .await
            .err()
            .unwrap();

        match err {
            Error::ResponseTimeout { url, method, timeout } => {
                assert_eq!(url, "/rest/V1/carts");
                assert_eq!(method, "POST");
                assert_eq!(timeout, Duration::from_millis(30));
            }
            other => panic!("expected a response timeout, got {other}"),
        }
    }

    #[tokio::test]
    async fn closed_page_is_not_reported_as_timeout() {
        let launcher = MemoryLauncher::new();
        let (context, page) = open_page(&launcher).await;
        context.close().await.unwrap();

        let err = ResponseMatcher::new("/rest/V1/carts", "POST")
            .wait(page.as_ref(), Duration::from_secs(5))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, Error::Browser(ref msg) if msg.contains("closed")), "{err}");
    }

    #[test]
    fn matches_requires_url_method_and_data_fetch() {
        let matcher = ResponseMatcher::new("/rest/V1/customers", "POST");

        let hit = Exchange::fetch("POST", "https://shop.example.test/rest/V1/customers/me", &json!({}));
        assert!(matcher.matches(&hit));
        assert!(matcher.matches(&hit.clone().with_resource_type(ResourceType::Xhr)));

        let wrong_method = Exchange::fetch("GET", "https://shop.example.test/rest/V1/customers", &json!({}));
        assert!(!matcher.matches(&wrong_method));

        let navigation = hit.clone().with_resource_type(ResourceType::Document);
        assert!(!matcher.matches(&navigation));

        let script = hit.with_resource_type(ResourceType::Script);
        assert!(!matcher.matches(&script));

        let elsewhere = Exchange::fetch("POST", "https://shop.example.test/checkout", &json!({}));
        assert!(!matcher.matches(&elsewhere));
    }

    #[test]
    fn method_comparison_is_exact() {
        let matcher = ResponseMatcher::new("/cart", "post");
        let exchange = Exchange::fetch("POST", "/cart", &json!({}));
        assert!(!matcher.matches(&exchange));
    }
}
