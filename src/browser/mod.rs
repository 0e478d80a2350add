//! Browser-automation capability.
//!
//! The harness never drives a browser directly; it consumes the traits in
//! this module. [`memory`] provides an in-process implementation for
//! exercising the lifecycle; the `playwright` feature adds an adapter onto a
//! real engine.

pub mod memory;
#[cfg(feature = "playwright")]
pub mod playwright;
mod types;

pub use types::{
    ContextOptions, LaunchOptions, LoadState, NavigationOptions, ResourceType, ScreenshotOptions,
    TracingOptions, Viewport,
};

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::EngineKind;
use crate::error::{Error, Result};

/// Predicate selecting one network exchange.
pub type ResponseFilter<'a> = dyn Fn(&dyn Response) -> bool + Send + Sync + 'a;

/// Launches the shared browser process.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Launches one browser of the given engine family.
    async fn launch(&self, kind: EngineKind, options: LaunchOptions) -> Result<Box<dyn Browser>>;
}

/// The shared browser process. Safe for concurrent context creation.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Creates a new isolated browsing context.
    async fn new_context(&self, options: ContextOptions) -> Result<Box<dyn BrowserContext>>;

    /// Closes the browser process.
    async fn close(&self) -> Result<()>;

    /// Browser version string.
    fn version(&self) -> String;
}

/// An isolated, cookie/storage-scoped browser session.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    /// Opens a new page in this context.
    async fn new_page(&self) -> Result<Box<dyn Page>>;

    /// Starts diagnostic tracing.
    async fn start_tracing(&self, options: TracingOptions) -> Result<()>;

    /// Stops tracing, persisting the archive to `path` or discarding it when `None`.
    async fn stop_tracing(&self, path: Option<&Path>) -> Result<()>;

    /// Closes the context. Pages opened in it become unusable.
    async fn close(&self) -> Result<()>;
}

/// A page within a browsing context.
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigates to `url`, resolved against the context base URL.
    async fn goto(&self, url: &str, options: NavigationOptions) -> Result<()>;

    /// Current page URL.
    fn url(&self) -> String;

    /// Fills the input matched by `selector`.
    async fn fill(&self, selector: &str, value: &str) -> Result<()>;

    /// Clicks the button with the given accessible name.
    async fn click_button(&self, name: &str) -> Result<()>;

    /// Waits until the page reaches `state`.
    async fn wait_for_load_state(&self, state: LoadState) -> Result<()>;

    /// Text content of the first element matched by `selector`.
    async fn text_content(&self, selector: &str) -> Result<Option<String>>;

    /// Captures a PNG screenshot.
    async fn screenshot(&self, options: ScreenshotOptions) -> Result<Vec<u8>>;

    /// Waits for a network exchange accepted by `predicate`.
    ///
    /// Fails with [`Error::Timeout`] when `timeout` elapses first; any other
    /// error means the page could not be observed at all.
    async fn wait_for_response(
        &self,
        predicate: &ResponseFilter<'_>,
        timeout: Duration,
    ) -> Result<Box<dyn Response>>;

    /// Closes the page.
    async fn close(&self) -> Result<()>;

    /// Persists the page video to `path`, returning it if one was recorded.
    async fn save_video(&self, path: &Path) -> Result<Option<PathBuf>>;

    fn is_closed(&self) -> bool;
}

/// A completed network exchange observed by a page.
#[async_trait]
pub trait Response: Send + Sync {
    fn url(&self) -> &str;

    fn status(&self) -> u16;

    /// HTTP method of the originating request.
    fn request_method(&self) -> &str;

    /// Resource type of the originating request.
    fn resource_type(&self) -> ResourceType;

    /// Raw response body.
    async fn body(&self) -> Result<Vec<u8>>;

    /// Response body parsed as JSON.
    async fn json(&self) -> Result<Value> {
        let body = self.body().await?;
        serde_json::from_slice(&body).map_err(|e| Error::ResponseParse(e.to_string()))
    }
}
