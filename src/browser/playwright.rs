//! Browser capability backed by Playwright through `playwright-rs`.
//!
//! Built with the `playwright` cargo feature. The binding exposes no trace or
//! video API: tracing is accepted but a trace archive cannot be written, and
//! no videos are saved. Network exchanges are captured from the page's
//! response events as they happen.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use playwright_rs as pw;
use reqwest::Url;

use crate::config::EngineKind;
use crate::error::{Error, Result};

use super::memory::Exchange;
use super::{
    Browser, BrowserContext, BrowserLauncher, ContextOptions, LaunchOptions, LoadState,
    NavigationOptions, Page, ResourceType, Response, ResponseFilter, ScreenshotOptions,
    TracingOptions,
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn engine_error(e: pw::Error) -> Error {
    Error::Browser(e.to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn resource_type(name: &str) -> ResourceType {
    match name {
        "document" => ResourceType::Document,
        "stylesheet" => ResourceType::Stylesheet,
        "image" => ResourceType::Image,
        "script" => ResourceType::Script,
        "xhr" => ResourceType::Xhr,
        "fetch" => ResourceType::Fetch,
        _ => ResourceType::Other,
    }
}

fn wait_until(state: LoadState) -> pw::WaitUntil {
    match state {
        LoadState::Load => pw::WaitUntil::Load,
        LoadState::DomContentLoaded => pw::WaitUntil::DomContentLoaded,
        LoadState::NetworkIdle => pw::WaitUntil::NetworkIdle,
    }
}

/// Starts the Playwright driver once and launches browsers through it.
pub struct PlaywrightLauncher {
    playwright: pw::Playwright,
}

impl PlaywrightLauncher {
    /// Starts the Playwright driver process.
    pub async fn new() -> Result<Self> {
        let playwright = pw::Playwright::launch().await.map_err(|e| Error::Launch {
            engine: "playwright".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { playwright })
    }
}

#[async_trait]
impl BrowserLauncher for PlaywrightLauncher {
    async fn launch(&self, kind: EngineKind, options: LaunchOptions) -> Result<Box<dyn Browser>> {
        let engine = format!("{:?}", kind).to_lowercase();
        let browser_type = match kind {
            EngineKind::Chromium => self.playwright.chromium(),
            EngineKind::Webkit => self.playwright.webkit(),
        };

        let mut launch = pw::LaunchOptions::default().headless(options.headless);
        if let Some(channel) = options.channel {
            launch = launch.channel(channel);
        }
        if !options.args.is_empty() {
            launch = launch.args(options.args);
        }

        let browser = browser_type
            .launch_with_options(launch)
            .await
            .map_err(|e| Error::Launch {
                engine,
                reason: e.to_string(),
            })?;
        Ok(Box::new(PlaywrightBrowser { browser }))
    }
}

struct PlaywrightBrowser {
    browser: pw::Browser,
}

#[async_trait]
impl Browser for PlaywrightBrowser {
    async fn new_context(&self, options: ContextOptions) -> Result<Box<dyn BrowserContext>> {
        let context_options = pw::BrowserContextOptions::builder()
            .viewport(pw::Viewport {
                width: options.viewport.width as _,
                height: options.viewport.height as _,
            })
            .accept_downloads(options.accept_downloads)
            .ignore_https_errors(options.ignore_https_errors)
            .build();
        if options.record_video_dir.is_some() {
            tracing::warn!("video recording requested but not available through playwright-rs");
        }

        let context = self
            .browser
            .new_context_with_options(context_options)
            .await
            .map_err(engine_error)?;

        let base_url = match options.base_url.as_deref() {
            Some(url) => Some(
                Url::parse(url).map_err(|e| Error::Config(format!("invalid base URL '{}': {}", url, e)))?,
            ),
            None => None,
        };

        Ok(Box::new(PlaywrightContext {
            context,
            base_url,
            tracing: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.browser.close().await.map_err(engine_error)
    }

    fn version(&self) -> String {
        self.browser.version().to_string()
    }
}

struct PlaywrightContext {
    context: pw::BrowserContext,
    base_url: Option<Url>,
    tracing: AtomicBool,
}

#[async_trait]
impl BrowserContext for PlaywrightContext {
    async fn new_page(&self) -> Result<Box<dyn Page>> {
        let page = self.context.new_page().await.map_err(engine_error)?;

        let observed: Arc<Mutex<Vec<Exchange>>> = Arc::default();
        let sink = observed.clone();
        page.on_response(move |response: pw::Response| {
            let sink = sink.clone();
            async move {
                let request = response.request();
                let kind = resource_type(&request.resource_type());
                // Only data fetches are ever matched; skip buffering other bodies.
                let body = if kind.is_data_fetch() {
                    response.body().await.unwrap_or_default()
                } else {
                    Vec::new()
                };
                lock(&sink).push(Exchange {
                    url: response.url().to_string(),
                    method: request.method().to_string(),
                    resource_type: kind,
                    status: response.status(),
                    body,
                });
                Ok(())
            }
        })
        .await
        .map_err(engine_error)?;

        Ok(Box::new(PlaywrightPage {
            page,
            base_url: self.base_url.clone(),
            observed,
            closed: AtomicBool::new(false),
        }))
    }

    async fn start_tracing(&self, options: TracingOptions) -> Result<()> {
        if self.tracing.swap(true, Ordering::SeqCst) {
            return Err(Error::Browser("tracing has already been started".to_string()));
        }
        tracing::debug!(
            screenshots = options.screenshots,
            snapshots = options.snapshots,
            "tracing requested; no archive will be recorded"
        );
        Ok(())
    }

    async fn stop_tracing(&self, path: Option<&Path>) -> Result<()> {
        if !self.tracing.swap(false, Ordering::SeqCst) {
            return Err(Error::Browser("tracing is not started".to_string()));
        }
        match path {
            Some(path) => Err(Error::Browser(format!(
                "cannot write trace archive {}: playwright-rs has no tracing API",
                path.display()
            ))),
            None => Ok(()),
        }
    }

    async fn close(&self) -> Result<()> {
        self.tracing.store(false, Ordering::SeqCst);
        self.context.close().await.map_err(engine_error)
    }
}

struct PlaywrightPage {
    page: pw::Page,
    base_url: Option<Url>,
    observed: Arc<Mutex<Vec<Exchange>>>,
    closed: AtomicBool,
}

impl PlaywrightPage {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Browser("page has been closed".to_string()));
        }
        Ok(())
    }

    fn resolve(&self, url: &str) -> Result<Url> {
        if let Ok(absolute) = Url::parse(url) {
            return Ok(absolute);
        }
        let base = self
            .base_url
            .as_ref()
            .ok_or_else(|| Error::Browser(format!("cannot navigate to relative URL '{}'", url)))?;
        base.join(url)
            .map_err(|e| Error::Browser(format!("invalid URL '{}': {}", url, e)))
    }
}

#[async_trait]
impl Page for PlaywrightPage {
    async fn goto(&self, url: &str, options: NavigationOptions) -> Result<()> {
        self.ensure_open()?;
        let target = self.resolve(url)?;
        let goto = pw::GotoOptions::new()
            .timeout(options.timeout)
            .wait_until(wait_until(options.wait_until));
        self.page
            .goto(target.as_str(), Some(goto))
            .await
            .map_err(engine_error)?;
        Ok(())
    }

    fn url(&self) -> String {
        self.page.url().to_string()
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        self.ensure_open()?;
        self.page
            .locator(selector)
            .await
            .fill(value, None)
            .await
            .map_err(engine_error)
    }

    async fn click_button(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        let selector = format!("button:has-text(\"{}\")", name.replace('"', "\\\""));
        self.page
            .locator(&selector)
            .await
            .click(None)
            .await
            .map_err(engine_error)
    }

    async fn wait_for_load_state(&self, _state: LoadState) -> Result<()> {
        // Clicks already wait for the navigation they start.
        self.ensure_open()
    }

    async fn text_content(&self, selector: &str) -> Result<Option<String>> {
        self.ensure_open()?;
        self.page
            .locator(selector)
            .await
            .text_content()
            .await
            .map_err(engine_error)
    }

    async fn screenshot(&self, options: ScreenshotOptions) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let options = pw::ScreenshotOptions::builder()
            .full_page(options.full_page)
            .build();
        self.page
            .screenshot(Some(options))
            .await
            .map_err(engine_error)
    }

    async fn wait_for_response(
        &self,
        predicate: &ResponseFilter<'_>,
        timeout: Duration,
    ) -> Result<Box<dyn Response>> {
        let started = Instant::now();
        loop {
            self.ensure_open()?;
            if let Some(found) = lock(&self.observed).iter().find(|e| predicate(*e)) {
                return Ok(Box::new(found.clone()));
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(Error::Timeout(timeout));
            }
            tokio::time::sleep(POLL_INTERVAL.min(timeout - elapsed)).await;
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.page.close().await.map_err(engine_error)
    }

    async fn save_video(&self, _path: &Path) -> Result<Option<PathBuf>> {
        Ok(None)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
