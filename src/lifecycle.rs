//! Per-scenario resource lifecycle.
//!
//! One [`LifecycleManager`] owns the shared browser for a whole run. Every
//! scenario gets its own browsing context, page and request client from
//! [`LifecycleManager::before_scenario`] and gives them back through
//! [`LifecycleManager::after_scenario`].
//!
//! Hook order for one scenario:
//!
//! ```text
//! initialize_run -> before_scenario -> (step -> after_each_step)* -> after_scenario -> finalize_run
//! ```

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::api::{ApiClient, ApiContextOptions};
use crate::browser::{
    Browser, BrowserContext, BrowserLauncher, ContextOptions, LaunchOptions, Page,
    ScreenshotOptions, TracingOptions,
};
use crate::config::RunConfig;
use crate::error::{Error, ProvisionStep, Result, TeardownStep};
use crate::world::{BrowserEnvironment, ScenarioId, ScenarioInfo, ScenarioWorld};

/// Name and tags of a scenario about to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioMeta {
    pub name: String,
    pub tags: Vec<String>,
}

impl ScenarioMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Final status of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioStatus {
    Passed,
    Failed,
    Skipped,
}

impl ScenarioStatus {
    pub fn is_passed(&self) -> bool {
        matches!(self, ScenarioStatus::Passed)
    }
}

impl fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScenarioStatus::Passed => "PASSED",
            ScenarioStatus::Failed => "FAILED",
            ScenarioStatus::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// Outcome handed to the teardown hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScenarioOutcome {
    pub status: ScenarioStatus,
    pub duration: Duration,
}

impl ScenarioOutcome {
    pub fn new(status: ScenarioStatus, duration: Duration) -> Self {
        Self { status, duration }
    }
}

/// What teardown produced and what went wrong along the way.
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Trace archive written for a non-passing scenario.
    pub trace: Option<PathBuf>,
    /// Recorded video, if recording was enabled.
    pub video: Option<PathBuf>,
    /// Release failures, in the order they happened.
    pub errors: Vec<Error>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn record(&mut self, scenario: &str, step: TeardownStep, error: Error) {
        tracing::warn!(scenario = %scenario, step = %step, error = %error, "teardown step failed");
        self.errors.push(Error::Teardown {
            step,
            reason: error.to_string(),
        });
    }
}

/// Provisions and releases per-scenario browser resources.
pub struct LifecycleManager {
    browser: Box<dyn Browser>,
    config: Arc<RunConfig>,
    finalized: AtomicBool,
}

impl LifecycleManager {
    /// Launches the shared browser and prepares the artifact directories.
    ///
    /// Any failure here is fatal to the run.
    pub async fn initialize_run(
        launcher: &dyn BrowserLauncher,
        config: Arc<RunConfig>,
    ) -> Result<Self> {
        let engine = config.launch.engine;

        tokio::fs::create_dir_all(config.artifacts.traces_dir()).await?;

        let options = LaunchOptions {
            headless: config.launch.headless,
            channel: engine.channel().map(String::from),
            args: Vec::new(),
        };

        let browser = launcher
            .launch(engine.kind(), options)
            .await
            .map_err(|e| match e {
                launch @ Error::Launch { .. } => launch,
                other => Error::Launch {
                    engine: engine.as_str().to_string(),
                    reason: other.to_string(),
                },
            })?;

        tracing::info!(
            engine = engine.as_str(),
            headless = config.launch.headless,
            version = %browser.version(),
            profile = %config.profile_name,
            "browser launched"
        );

        Ok(Self {
            browser,
            config,
            finalized: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Arc<RunConfig> {
        &self.config
    }

    /// Creates an isolated environment for one scenario.
    ///
    /// On failure every resource created so far is released before the
    /// error is returned.
    pub async fn before_scenario(&self, meta: &ScenarioMeta) -> Result<ScenarioWorld> {
        if self.finalized.load(Ordering::SeqCst) {
            return Err(Error::RunFinalized);
        }

        let info = ScenarioInfo::new(meta.name.clone(), meta.tags.clone());
        let fail = |step: ProvisionStep, e: Error| Error::Provisioning {
            scenario: meta.name.clone(),
            step,
            reason: e.to_string(),
        };

        let launch = &self.config.launch;
        let record_video_dir = if launch.record_video {
            let dir = self.config.artifacts.recordings_dir();
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| fail(ProvisionStep::ArtifactDirs, e.into()))?;
            Some(dir)
        } else {
            None
        };

        let options = ContextOptions {
            viewport: launch.engine.device().viewport,
            accept_downloads: true,
            record_video_dir,
            ignore_https_errors: true,
            base_url: Some(self.config.profile.base_url.clone()),
        };

        let context = self
            .browser
            .new_context(options)
            .await
            .map_err(|e| fail(ProvisionStep::BrowserContext, e))?;

        let mut tracing_started = false;
        let opened = self.open_in(context.as_ref(), &mut tracing_started).await;
        match opened {
            Ok((request, page)) => {
                tracing::info!(scenario = %info.name, id = %info.id, "scenario provisioned");
                let environment =
                    BrowserEnvironment::new(context, page, request, tracing_started);
                Ok(ScenarioWorld::provisioned(
                    info,
                    self.config.clone(),
                    environment,
                ))
            }
            Err((step, e)) => {
                rollback(context.as_ref(), tracing_started, &info.name).await;
                Err(fail(step, e))
            }
        }
    }

    /// Creates the request client, starts tracing and opens the page.
    async fn open_in(
        &self,
        context: &dyn BrowserContext,
        tracing_started: &mut bool,
    ) -> std::result::Result<(ApiClient, Box<dyn Page>), (ProvisionStep, Error)> {
        let request = ApiClient::new(ApiContextOptions {
            base_url: Some(self.config.profile.api_url.clone()),
            ignore_https_errors: true,
        })
        .map_err(|e| (ProvisionStep::RequestContext, e))?;

        context
            .start_tracing(TracingOptions {
                screenshots: true,
                snapshots: true,
            })
            .await
            .map_err(|e| (ProvisionStep::Tracing, e))?;
        *tracing_started = true;

        let page = context
            .new_page()
            .await
            .map_err(|e| (ProvisionStep::Page, e))?;

        Ok((request, page))
    }

    /// Records diagnostics and releases the scenario's environment.
    ///
    /// Never fails: every release step runs even when an earlier one
    /// errored, and the errors are collected in the returned report.
    pub async fn after_scenario(
        &self,
        world: &mut ScenarioWorld,
        outcome: &ScenarioOutcome,
    ) -> TeardownReport {
        let mut report = TeardownReport::default();

        let name = world
            .scenario()
            .map(|s| s.name.clone())
            .unwrap_or_default();
        let id = world
            .scenario_id()
            .cloned()
            .unwrap_or_else(|| ScenarioId::from_name(&name));

        world.attach_text(format!(
            "Status: {}. Duration:{}s",
            outcome.status,
            outcome.duration.as_secs()
        ));

        let Some(mut env) = world.take_environment() else {
            tracing::warn!(scenario = %name, "no browser environment to release");
            return report;
        };

        let failed = !outcome.status.is_passed();

        if failed {
            match env.page.screenshot(ScreenshotOptions::full_page()).await {
                Ok(image) => world.attach_png(image),
                Err(e) => report.record(&name, TeardownStep::FailureScreenshot, e),
            }
        }

        if env.tracing {
            if failed {
                let path = self.config.artifacts.trace_path(id.as_str());
                match env.context.stop_tracing(Some(&path)).await {
                    Ok(()) => {
                        tracing::info!(scenario = %name, path = %path.display(), "trace saved");
                        report.trace = Some(path);
                    }
                    Err(e) => report.record(&name, TeardownStep::StopTracing, e),
                }
            } else if let Err(e) = env.context.stop_tracing(None).await {
                report.record(&name, TeardownStep::StopTracing, e);
            }
        }

        // Page before context: closing the context invalidates the page.
        if let Err(e) = env.page.close().await {
            report.record(&name, TeardownStep::ClosePage, e);
        }

        let video_path = self.config.artifacts.video_path(id.as_str());
        match env.page.save_video(&video_path).await {
            Ok(saved) => report.video = saved,
            Err(e) => report.record(&name, TeardownStep::SaveVideo, e),
        }

        if let Err(e) = env.context.close().await {
            report.record(&name, TeardownStep::CloseContext, e);
        }
        env.mark_released();

        tracing::info!(
            scenario = %name,
            status = %outcome.status,
            errors = report.errors.len(),
            "scenario released"
        );
        report
    }

    /// Closes the shared browser. Calls after the first are no-ops.
    pub async fn finalize_run(&self) -> Result<()> {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.browser.close().await?;
        tracing::info!(profile = %self.config.profile_name, "browser closed");
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        if !self.finalized.load(Ordering::SeqCst) {
            tracing::warn!(
                profile = %self.config.profile_name,
                "lifecycle manager dropped without finalize_run; browser left open"
            );
        }
    }
}

/// Best-effort release of a partially provisioned context.
async fn rollback(context: &dyn BrowserContext, tracing_started: bool, scenario: &str) {
    if tracing_started {
        if let Err(e) = context.stop_tracing(None).await {
            tracing::warn!(scenario = %scenario, error = %e, "failed to stop tracing during rollback");
        }
    }
    if let Err(e) = context.close().await {
        tracing::warn!(scenario = %scenario, error = %e, "failed to close context during rollback");
    }
}

/// After-step hook: attaches a full-page screenshot when enabled for the run.
///
/// Capture is best-effort; a failed screenshot is logged and never affects
/// the step outcome.
pub async fn after_each_step(world: &mut ScenarioWorld) {
    let enabled = world
        .config()
        .map(|c| c.launch.screenshot_on_step)
        .unwrap_or(false);
    if !enabled {
        return;
    }

    if !world.is_provisioned() {
        return;
    }
    let name = world
        .scenario()
        .map(|s| s.name.clone())
        .unwrap_or_default();
    world.attach_text(format!("Scenario: {}", name));

    let Ok(page) = world.page() else {
        return;
    };
    match page.screenshot(ScreenshotOptions::full_page()).await {
        Ok(image) => world.attach_png(image),
        Err(e) => {
            tracing::warn!(scenario = %name, error = %e, "step screenshot failed");
        }
    }
}
