//! Scenario runner and run driver.
//!
//! Drives the lifecycle hooks around each scenario in a fixed order and
//! turns the outcome into a [`ScenarioReport`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};

use crate::browser::BrowserLauncher;
use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::lifecycle::{
    after_each_step, LifecycleManager, ScenarioMeta, ScenarioOutcome, ScenarioStatus,
};
use crate::report::{RunReport, ScenarioReport, StepReport};
use crate::world::ScenarioWorld;

/// Default limit for a single step.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(60);

/// Future returned by a step body.
pub type StepFuture<'a> = BoxFuture<'a, Result<()>>;

type StepFn = Box<dyn for<'a> Fn(&'a mut ScenarioWorld) -> StepFuture<'a> + Send + Sync>;

/// One named step.
pub struct Step {
    name: String,
    run: StepFn,
}

impl Step {
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: for<'a> Fn(&'a mut ScenarioWorld) -> StepFuture<'a> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(run),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish()
    }
}

/// A scenario: name, tags and ordered steps.
#[derive(Debug)]
pub struct ScenarioSpec {
    /// Feature the scenario is reported under.
    pub feature: String,
    pub name: String,
    pub tags: Vec<String>,
    pub steps: Vec<Step>,
}

impl ScenarioSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            feature: String::new(),
            name: name.into(),
            tags: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn in_feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = feature.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Appends a step.
    pub fn step<F>(mut self, name: impl Into<String>, run: F) -> Self
    where
        F: for<'a> Fn(&'a mut ScenarioWorld) -> StepFuture<'a> + Send + Sync + 'static,
    {
        self.steps.push(Step::new(name, run));
        self
    }

    fn meta(&self) -> ScenarioMeta {
        ScenarioMeta::new(self.name.clone()).with_tags(self.tags.clone())
    }

    fn report(&self, status: ScenarioStatus) -> ScenarioReport {
        ScenarioReport::new(self.name.clone(), self.tags.clone(), status)
            .with_feature(self.feature.clone())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs scenarios against one lifecycle manager.
pub struct ScenarioRunner {
    manager: Arc<LifecycleManager>,
    step_timeout: Duration,
}

impl ScenarioRunner {
    pub fn new(manager: Arc<LifecycleManager>) -> Self {
        Self {
            manager,
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn manager(&self) -> &Arc<LifecycleManager> {
        &self.manager
    }

    /// Runs one scenario: provision, steps with the after-step hook, teardown.
    ///
    /// The first failing step fails the scenario; the steps after it are
    /// counted as skipped. A panicking step counts as a failing one and
    /// teardown still runs. A provisioning failure fails the scenario without
    /// running any step.
    pub async fn run_scenario(&self, spec: &ScenarioSpec) -> ScenarioReport {
        let started = Instant::now();

        let mut world = match self.manager.before_scenario(&spec.meta()).await {
            Ok(world) => world,
            Err(e) => {
                tracing::error!(scenario = %spec.name, error = %e, "provisioning failed");
                let mut report = spec.report(ScenarioStatus::Failed);
                report.steps_skipped = spec.steps.len();
                report.steps = spec.steps.iter().map(|s| StepReport::skipped(&s.name)).collect();
                report.error = Some(e.to_string());
                report.duration_ms = started.elapsed().as_millis() as u64;
                return report;
            }
        };

        let mut steps = Vec::with_capacity(spec.steps.len());
        let mut failure = None;
        for step in &spec.steps {
            if failure.is_some() {
                steps.push(StepReport::skipped(&step.name));
                continue;
            }

            tracing::debug!(scenario = %spec.name, step = %step.name, "running step");
            let step_started = Instant::now();
            let result = self.run_step(step, &mut world).await;
            after_each_step(&mut world).await;

            let mut record = StepReport {
                name: step.name.clone(),
                status: ScenarioStatus::Passed,
                duration_ms: step_started.elapsed().as_millis() as u64,
                error: None,
            };
            if let Err(e) = result {
                tracing::warn!(scenario = %spec.name, step = %step.name, error = %e, "step failed");
                record.status = ScenarioStatus::Failed;
                record.error = Some(e.to_string());
                failure = Some(e);
            }
            steps.push(record);
        }

        let status = if failure.is_some() {
            ScenarioStatus::Failed
        } else {
            ScenarioStatus::Passed
        };
        let duration = started.elapsed();
        let teardown = self
            .manager
            .after_scenario(&mut world, &ScenarioOutcome::new(status, duration))
            .await;

        let mut report = spec.report(status);
        report.steps_passed = steps.iter().filter(|s| s.status.is_passed()).count();
        report.steps_skipped = steps
            .iter()
            .filter(|s| s.status == ScenarioStatus::Skipped)
            .count();
        report.steps = steps;
        report.error = failure.map(|e| e.to_string());
        report.duration_ms = duration.as_millis() as u64;
        report.absorb(&mut world, teardown);
        report
    }

    async fn run_step(&self, step: &Step, world: &mut ScenarioWorld) -> Result<()> {
        let guarded = AssertUnwindSafe((step.run)(world)).catch_unwind();
        match tokio::time::timeout(self.step_timeout, guarded).await {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => Err(Error::StepPanicked {
                step: step.name.clone(),
                message: panic_message(payload.as_ref()),
            }),
            Err(_) => Err(Error::StepTimeout {
                step: step.name.clone(),
                timeout: self.step_timeout,
            }),
        }
    }

    /// Runs every scenario selected by the profile's tag filter, at most
    /// `parallel` at a time. Reports come back in completion order.
    pub async fn run_all(&self, scenarios: &[ScenarioSpec]) -> Vec<ScenarioReport> {
        let profile = &self.manager.config().profile;
        let selected: Vec<&ScenarioSpec> = scenarios
            .iter()
            .filter(|s| profile.selects(&s.tags))
            .collect();

        tracing::info!(
            selected = selected.len(),
            filtered = scenarios.len() - selected.len(),
            parallel = profile.parallel,
            "running scenarios"
        );

        stream::iter(selected)
            .map(|spec| self.run_scenario(spec))
            .buffer_unordered(profile.parallel.max(1))
            .collect()
            .await
    }
}

/// Runs a whole suite: launch, scenarios, browser shutdown, result files.
///
/// Writes the Cucumber JSON result file to the profile's `report` path and
/// the run summary next to the artifacts. A launch failure aborts before any
/// scenario runs.
pub async fn run_suite(
    launcher: &dyn BrowserLauncher,
    config: Arc<RunConfig>,
    scenarios: &[ScenarioSpec],
) -> Result<RunReport> {
    let started_at = Utc::now();
    let started = Instant::now();

    let manager = Arc::new(LifecycleManager::initialize_run(launcher, config.clone()).await?);
    let runner = ScenarioRunner::new(manager.clone());
    let results = runner.run_all(scenarios).await;

    if let Err(e) = manager.finalize_run().await {
        tracing::warn!(error = %e, "failed to close browser");
    }

    let mut report = RunReport::new(&config, started_at);
    report.scenarios = results;
    report.duration_ms = started.elapsed().as_millis() as u64;

    report.write_cucumber_json(&config.artifacts.resolve(&config.profile.report))?;
    report.write_summary(&config.artifacts.summary_path())?;

    tracing::info!(
        passed = report.count(ScenarioStatus::Passed),
        failed = report.count(ScenarioStatus::Failed),
        "run finished"
    );
    Ok(report)
}
