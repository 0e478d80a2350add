//! Option and value types shared by the browser traits.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Viewport size in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Options for launching the shared browser.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LaunchOptions {
    pub headless: bool,
    /// Branded browser channel (`chrome`, `msedge`).
    pub channel: Option<String>,
    /// Extra command-line arguments.
    pub args: Vec<String>,
}

/// Options for a new browsing context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextOptions {
    pub viewport: Viewport,
    pub accept_downloads: bool,
    /// Directory for page videos; `None` disables recording.
    pub record_video_dir: Option<PathBuf>,
    /// Accept invalid TLS certificates.
    pub ignore_https_errors: bool,
    /// Base URL relative navigation is resolved against.
    pub base_url: Option<String>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            viewport: Viewport::new(1280, 720),
            accept_downloads: true,
            record_video_dir: None,
            ignore_https_errors: true,
            base_url: None,
        }
    }
}

/// What tracing records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracingOptions {
    pub screenshots: bool,
    pub snapshots: bool,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            screenshots: true,
            snapshots: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScreenshotOptions {
    pub full_page: bool,
}

impl ScreenshotOptions {
    pub fn full_page() -> Self {
        Self { full_page: true }
    }
}

/// Page load milestones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Load,
    DomContentLoaded,
    NetworkIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationOptions {
    pub timeout: Duration,
    pub wait_until: LoadState,
}

impl Default for NavigationOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            wait_until: LoadState::DomContentLoaded,
        }
    }
}

/// Kind of resource a request was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Document,
    Stylesheet,
    Image,
    Script,
    Xhr,
    Fetch,
    Other,
}

impl ResourceType {
    /// True for asynchronous data fetches (`xhr` and `fetch`).
    pub fn is_data_fetch(&self) -> bool {
        matches!(self, ResourceType::Xhr | ResourceType::Fetch)
    }
}
