//! In-process browser.
//!
//! Serves documents from a [`Site`], records every resource it hands out in
//! a [`Ledger`], and can be told to fail at a chosen [`FailPoint`]. Traces and
//! videos are written to disk as small placeholder files so artifact paths
//! can be checked.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Url;

use crate::config::EngineKind;
use crate::error::{Error, Result};

use super::{
    Browser, BrowserContext, BrowserLauncher, ContextOptions, LaunchOptions, LoadState,
    NavigationOptions, Page, ResourceType, Response, ResponseFilter, ScreenshotOptions,
    TracingOptions,
};

const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A canned network exchange.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub url: String,
    pub method: String,
    pub resource_type: ResourceType,
    pub status: u16,
    pub body: Vec<u8>,
}

impl Exchange {
    /// A successful `fetch` exchange with a JSON body.
    pub fn fetch(method: &str, url: &str, body: &serde_json::Value) -> Self {
        Self {
            url: url.to_string(),
            method: method.to_string(),
            resource_type: ResourceType::Fetch,
            status: 200,
            body: body.to_string().into_bytes(),
        }
    }

    pub fn with_resource_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_type = resource_type;
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

#[async_trait]
impl Response for Exchange {
    fn url(&self) -> &str {
        &self.url
    }

    fn status(&self) -> u16 {
        self.status
    }

    fn request_method(&self) -> &str {
        &self.method
    }

    fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    async fn body(&self) -> Result<Vec<u8>> {
        Ok(self.body.clone())
    }
}

/// A rendered page: its inputs, buttons, visible texts, and the network
/// exchanges its loading triggers.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub url: String,
    pub inputs: Vec<String>,
    pub buttons: Vec<String>,
    pub texts: HashMap<String, String>,
    pub exchanges: Vec<Exchange>,
}

impl Document {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_input(mut self, selector: &str) -> Self {
        self.inputs.push(selector.to_string());
        self
    }

    pub fn with_button(mut self, name: &str) -> Self {
        self.buttons.push(name.to_string());
        self
    }

    pub fn with_text(mut self, selector: &str, text: impl Into<String>) -> Self {
        self.texts.insert(selector.to_string(), text.into());
        self
    }

    pub fn with_exchange(mut self, exchange: Exchange) -> Self {
        self.exchanges.push(exchange);
        self
    }
}

/// Application served to in-memory pages.
pub trait Site: Send + Sync {
    /// Document served at `url`, or `None` when nothing is served there.
    fn open(&self, url: &Url) -> Option<Document>;

    /// Handles a button press, returning the document navigated to, if any.
    fn press(
        &self,
        document: &Document,
        button: &str,
        inputs: &HashMap<String, String>,
    ) -> Option<Document>;
}

/// Serves an empty document for every URL.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlankSite;

impl Site for BlankSite {
    fn open(&self, url: &Url) -> Option<Document> {
        Some(Document::new(url.as_str()))
    }

    fn press(&self, _: &Document, _: &str, _: &HashMap<String, String>) -> Option<Document> {
        None
    }
}

/// Operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Launch,
    NewContext,
    StartTracing,
    StopTracing,
    NewPage,
    Screenshot,
    ClosePage,
    SaveVideo,
    CloseContext,
    CloseBrowser,
}

/// Counts of everything handed out and released.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    pub launches: usize,
    pub browsers_closed: usize,
    pub contexts_opened: usize,
    pub contexts_closed: usize,
    pub pages_opened: usize,
    pub pages_closed: usize,
    pub traces_started: usize,
    pub traces_stopped: usize,
    pub screenshots: usize,
    pub saved_traces: Vec<PathBuf>,
    pub saved_videos: Vec<PathBuf>,
    pub last_launch: Option<(EngineKind, LaunchOptions)>,
    pub context_options: Vec<ContextOptions>,
}

impl Ledger {
    pub fn open_contexts(&self) -> usize {
        self.contexts_opened - self.contexts_closed
    }

    pub fn open_pages(&self) -> usize {
        self.pages_opened - self.pages_closed
    }

    pub fn active_traces(&self) -> usize {
        self.traces_started - self.traces_stopped
    }
}

struct Shared {
    site: Arc<dyn Site>,
    ledger: Mutex<Ledger>,
    failures: Mutex<HashSet<FailPoint>>,
}

impl Shared {
    fn check(&self, point: FailPoint) -> Result<()> {
        if lock(&self.failures).contains(&point) {
            return Err(Error::Browser(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }

    fn record(&self, f: impl FnOnce(&mut Ledger)) {
        f(&mut lock(&self.ledger));
    }
}

/// Launcher for in-memory browsers. Clones share one ledger.
#[derive(Clone)]
pub struct MemoryLauncher {
    shared: Arc<Shared>,
}

impl MemoryLauncher {
    /// Creates a launcher serving [`BlankSite`].
    pub fn new() -> Self {
        Self::with_site(Arc::new(BlankSite))
    }

    pub fn with_site(site: Arc<dyn Site>) -> Self {
        Self {
            shared: Arc::new(Shared {
                site,
                ledger: Mutex::new(Ledger::default()),
                failures: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Makes every subsequent call to `point` fail.
    pub fn fail_at(&self, point: FailPoint) {
        lock(&self.shared.failures).insert(point);
    }

    pub fn clear_failures(&self) {
        lock(&self.shared.failures).clear();
    }

    /// Snapshot of the resource ledger.
    pub fn ledger(&self) -> Ledger {
        lock(&self.shared.ledger).clone()
    }
}

impl Default for MemoryLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserLauncher for MemoryLauncher {
    async fn launch(&self, kind: EngineKind, options: LaunchOptions) -> Result<Box<dyn Browser>> {
        if let Err(e) = self.shared.check(FailPoint::Launch) {
            return Err(Error::Launch {
                engine: format!("{:?}", kind).to_lowercase(),
                reason: e.to_string(),
            });
        }

        self.shared.record(|l| {
            l.launches += 1;
            l.last_launch = Some((kind, options));
        });

        Ok(Box::new(MemoryBrowser {
            shared: self.shared.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryBrowser {
    shared: Arc<Shared>,
    closed: AtomicBool,
}

#[async_trait]
impl Browser for MemoryBrowser {
    async fn new_context(&self, options: ContextOptions) -> Result<Box<dyn BrowserContext>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Browser("browser has been closed".to_string()));
        }
        self.shared.check(FailPoint::NewContext)?;

        self.shared.record(|l| {
            l.contexts_opened += 1;
            l.context_options.push(options.clone());
        });

        Ok(Box::new(MemoryContext {
            shared: self.shared.clone(),
            options,
            closed: Arc::new(AtomicBool::new(false)),
            trace: Arc::new(Mutex::new(None)),
            pages: Mutex::new(Vec::new()),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.shared.check(FailPoint::CloseBrowser)?;
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shared.record(|l| l.browsers_closed += 1);
        }
        Ok(())
    }

    fn version(&self) -> String {
        "memory/1.0".to_string()
    }
}

type TraceBuffer = Arc<Mutex<Option<Vec<String>>>>;

struct MemoryContext {
    shared: Arc<Shared>,
    options: ContextOptions,
    closed: Arc<AtomicBool>,
    trace: TraceBuffer,
    pages: Mutex<Vec<Arc<PageInner>>>,
}

#[async_trait]
impl BrowserContext for MemoryContext {
    async fn new_page(&self) -> Result<Box<dyn Page>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Browser("context has been closed".to_string()));
        }
        self.shared.check(FailPoint::NewPage)?;

        let inner = Arc::new(PageInner {
            shared: self.shared.clone(),
            base_url: self.options.base_url.clone(),
            recording: self.options.record_video_dir.is_some(),
            trace: self.trace.clone(),
            state: Mutex::new(PageState {
                document: Document::new("about:blank"),
                values: HashMap::new(),
                observed: Vec::new(),
                closed: false,
            }),
        });

        lock(&self.pages).push(inner.clone());
        self.shared.record(|l| l.pages_opened += 1);

        Ok(Box::new(MemoryPage { inner }))
    }

    async fn start_tracing(&self, options: TracingOptions) -> Result<()> {
        self.shared.check(FailPoint::StartTracing)?;

        let mut trace = lock(&self.trace);
        if trace.is_some() {
            return Err(Error::Browser("tracing has already been started".to_string()));
        }
        *trace = Some(vec![format!(
            "start screenshots={} snapshots={}",
            options.screenshots, options.snapshots
        )]);
        drop(trace);

        self.shared.record(|l| l.traces_started += 1);
        Ok(())
    }

    async fn stop_tracing(&self, path: Option<&Path>) -> Result<()> {
        self.shared.check(FailPoint::StopTracing)?;

        let events = lock(&self.trace)
            .take()
            .ok_or_else(|| Error::Browser("tracing is not started".to_string()))?;
        self.shared.record(|l| l.traces_stopped += 1);

        if let Some(path) = path {
            let archive = serde_json::to_vec(&serde_json::json!({ "events": events }))?;
            tokio::fs::write(path, archive).await?;
            self.shared.record(|l| l.saved_traces.push(path.to_path_buf()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.shared.check(FailPoint::CloseContext)?;
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Closing a context closes its pages and drops any running trace.
        for page in lock(&self.pages).iter() {
            page.mark_closed();
        }
        if lock(&self.trace).take().is_some() {
            self.shared.record(|l| l.traces_stopped += 1);
        }

        self.shared.record(|l| l.contexts_closed += 1);
        Ok(())
    }
}

struct PageState {
    document: Document,
    values: HashMap<String, String>,
    observed: Vec<Exchange>,
    closed: bool,
}

struct PageInner {
    shared: Arc<Shared>,
    base_url: Option<String>,
    recording: bool,
    trace: TraceBuffer,
    state: Mutex<PageState>,
}

impl PageInner {
    fn mark_closed(&self) {
        let mut state = lock(&self.state);
        if !state.closed {
            state.closed = true;
            self.shared.record(|l| l.pages_closed += 1);
        }
    }

    fn trace_event(&self, event: String) {
        if let Some(events) = lock(&self.trace).as_mut() {
            events.push(event);
        }
    }

    fn resolve(&self, url: &str) -> Result<Url> {
        if let Ok(absolute) = Url::parse(url) {
            return Ok(absolute);
        }
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| Error::Browser(format!("cannot navigate to relative URL '{}'", url)))?;
        Url::parse(base)
            .and_then(|b| b.join(url))
            .map_err(|e| Error::Browser(format!("invalid URL '{}': {}", url, e)))
    }

    fn load(&self, state: &mut PageState, document: Document) {
        self.trace_event(format!("navigate {}", document.url));
        state.observed.extend(document.exchanges.iter().cloned());
        state.values.clear();
        state.document = document;
    }

    fn ensure_open(state: &PageState) -> Result<()> {
        if state.closed {
            return Err(Error::Browser("page has been closed".to_string()));
        }
        Ok(())
    }
}

struct MemoryPage {
    inner: Arc<PageInner>,
}

#[async_trait]
impl Page for MemoryPage {
    async fn goto(&self, url: &str, _options: NavigationOptions) -> Result<()> {
        let target = self.inner.resolve(url)?;
        let mut state = lock(&self.inner.state);
        PageInner::ensure_open(&state)?;

        let document = self
            .inner
            .shared
            .site
            .open(&target)
            .ok_or_else(|| Error::Browser(format!("navigation to {} failed: 404", target)))?;
        self.inner.load(&mut state, document);
        Ok(())
    }

    fn url(&self) -> String {
        lock(&self.inner.state).document.url.clone()
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        let mut state = lock(&self.inner.state);
        PageInner::ensure_open(&state)?;

        if !state.document.inputs.iter().any(|s| s == selector) {
            return Err(Error::Browser(format!(
                "no element matches selector '{}'",
                selector
            )));
        }
        state.values.insert(selector.to_string(), value.to_string());
        self.inner.trace_event(format!("fill {}", selector));
        Ok(())
    }

    async fn click_button(&self, name: &str) -> Result<()> {
        let mut state = lock(&self.inner.state);
        PageInner::ensure_open(&state)?;

        if !state.document.buttons.iter().any(|b| b == name) {
            return Err(Error::Browser(format!("no button named '{}'", name)));
        }
        self.inner.trace_event(format!("click {}", name));

        let next = self
            .inner
            .shared
            .site
            .press(&state.document, name, &state.values);
        if let Some(document) = next {
            self.inner.load(&mut state, document);
        }
        Ok(())
    }

    async fn wait_for_load_state(&self, _state: LoadState) -> Result<()> {
        PageInner::ensure_open(&lock(&self.inner.state))
    }

    async fn text_content(&self, selector: &str) -> Result<Option<String>> {
        let state = lock(&self.inner.state);
        PageInner::ensure_open(&state)?;
        Ok(state.document.texts.get(selector).cloned())
    }

    async fn screenshot(&self, options: ScreenshotOptions) -> Result<Vec<u8>> {
        self.inner.shared.check(FailPoint::Screenshot)?;
        let state = lock(&self.inner.state);
        PageInner::ensure_open(&state)?;

        let mut image = PNG_SIGNATURE.to_vec();
        image.extend_from_slice(state.document.url.as_bytes());
        if options.full_page {
            image.extend_from_slice(b"#full");
        }
        self.inner.shared.record(|l| l.screenshots += 1);
        Ok(image)
    }

    async fn wait_for_response(
        &self,
        predicate: &ResponseFilter<'_>,
        timeout: Duration,
    ) -> Result<Box<dyn Response>> {
        let started = Instant::now();
        loop {
            {
                let state = lock(&self.inner.state);
                PageInner::ensure_open(&state)?;
                if let Some(found) = state.observed.iter().find(|e| predicate(*e)) {
                    return Ok(Box::new(found.clone()));
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(Error::Timeout(timeout));
            }
            tokio::time::sleep(POLL_INTERVAL.min(timeout - elapsed)).await;
        }
    }

    async fn close(&self) -> Result<()> {
        self.inner.shared.check(FailPoint::ClosePage)?;
        self.inner.mark_closed();
        Ok(())
    }

    async fn save_video(&self, path: &Path) -> Result<Option<PathBuf>> {
        if !self.inner.recording {
            return Ok(None);
        }
        self.inner.shared.check(FailPoint::SaveVideo)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let url = self.url();
        tokio::fs::write(path, url.as_bytes()).await?;
        self.inner
            .shared
            .record(|l| l.saved_videos.push(path.to_path_buf()));
        Ok(Some(path.to_path_buf()))
    }

    fn is_closed(&self) -> bool {
        lock(&self.inner.state).closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_page(launcher: &MemoryLauncher) -> (Box<dyn BrowserContext>, Box<dyn Page>) {
        let browser = launcher
            .launch(EngineKind::Chromium, LaunchOptions::default())
            .await
            .unwrap();
        let context = browser
            .new_context(ContextOptions {
                base_url: Some("https://shop.example.test/".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let page = context.new_page().await.unwrap();
        (context, page)
    }

    #[tokio::test]
    async fn relative_navigation_uses_context_base_url() {
        let launcher = MemoryLauncher::new();
        let (_context, page) = open_page(&launcher).await;

        page.goto("customer/account/create/", NavigationOptions::default())
            .await
            .unwrap();

        assert_eq!(
            page.url(),
            "https://shop.example.test/customer/account/create/"
        );
    }

    #[tokio::test]
    async fn closing_context_closes_its_pages() {
        let launcher = MemoryLauncher::new();
        let (context, page) = open_page(&launcher).await;

        context.close().await.unwrap();

        assert!(page.is_closed());
        let ledger = launcher.ledger();
        assert_eq!(ledger.open_contexts(), 0);
        assert_eq!(ledger.open_pages(), 0);
    }

    #[tokio::test]
    async fn tracing_cannot_start_twice() {
        let launcher = MemoryLauncher::new();
        let (context, _page) = open_page(&launcher).await;

        context.start_tracing(TracingOptions::default()).await.unwrap();
        assert!(context.start_tracing(TracingOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn stop_tracing_writes_archive_only_with_path() {
        let temp = TempDir::new().unwrap();
        let launcher = MemoryLauncher::new();
        let (context, _page) = open_page(&launcher).await;

        context.start_tracing(TracingOptions::default()).await.unwrap();
        context.stop_tracing(None).await.unwrap();
        assert!(launcher.ledger().saved_traces.is_empty());

        let archive = temp.path().join("trace.zip");
        context.start_tracing(TracingOptions::default()).await.unwrap();
        context.stop_tracing(Some(&archive)).await.unwrap();
        assert!(archive.exists());
        assert_eq!(launcher.ledger().active_traces(), 0);
    }

    #[tokio::test]
    async fn injected_failures_surface_as_errors() {
        let launcher = MemoryLauncher::new();
        launcher.fail_at(FailPoint::Launch);

        let err = launcher
            .launch(EngineKind::Webkit, LaunchOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Launch { .. }));

        launcher.clear_failures();
        assert!(launcher
            .launch(EngineKind::Webkit, LaunchOptions::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn wait_for_response_times_out() {
        let launcher = MemoryLauncher::new();
        let (_context, page) = open_page(&launcher).await;

        let started = Instant::now();
        let result = page
            .wait_for_response(&|_| true, Duration::from_millis(40))
            .await;

        assert!(matches!(result, Err(Error::Timeout(t)) if t == Duration::from_millis(40)));
        assert!(started.elapsed() >= Duration::from_millis(40));
    }
}
