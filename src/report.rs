//! Run results: the Cucumber JSON result file consumed by report renderers,
//! and a run summary carrying the harness's own diagnostics.
//!
//! The Cucumber file follows the cucumber-json schema (an array of features,
//! each with `elements` and `steps`), so existing HTML reporters read it
//! unchanged. Attachments and teardown problems go into the `after` hook
//! entry of each scenario.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::RunConfig;
use crate::error::Result;
use crate::lifecycle::{ScenarioStatus, TeardownReport};
use crate::world::{Attachment, AttachmentBody, ScenarioId, ScenarioWorld};

/// Feature name used for scenarios that do not belong to one.
pub const DEFAULT_FEATURE: &str = "Scenarios";

/// Outcome of one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub name: String,
    pub status: ScenarioStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepReport {
    pub fn skipped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ScenarioStatus::Skipped,
            duration_ms: 0,
            error: None,
        }
    }
}

/// Result of one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub feature: String,
    pub name: String,
    /// Sanitized id used for artifact names.
    pub id: String,
    pub tags: Vec<String>,
    pub status: ScenarioStatus,
    pub duration_ms: u64,
    pub steps_passed: usize,
    pub steps_skipped: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attachments: Vec<Attachment>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub teardown_errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<PathBuf>,
}

impl ScenarioReport {
    /// Starts a report for a scenario with nothing recorded yet.
    pub fn new(name: impl Into<String>, tags: Vec<String>, status: ScenarioStatus) -> Self {
        let name = name.into();
        Self {
            feature: String::new(),
            id: ScenarioId::from_name(&name).to_string(),
            name,
            tags,
            status,
            duration_ms: 0,
            steps_passed: 0,
            steps_skipped: 0,
            steps: Vec::new(),
            error: None,
            attachments: Vec::new(),
            teardown_errors: Vec::new(),
            trace: None,
            video: None,
        }
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = feature.into();
        self
    }

    /// Moves the world's attachments and the teardown results into the report.
    pub fn absorb(&mut self, world: &mut ScenarioWorld, teardown: TeardownReport) {
        self.attachments.extend(world.take_attachments());
        self.teardown_errors
            .extend(teardown.errors.iter().map(ToString::to_string));
        self.trace = teardown.trace;
        self.video = teardown.video;
    }

    /// Failure that happened before any step ran.
    fn setup_error(&self) -> Option<&str> {
        let step_failed = self
            .steps
            .iter()
            .any(|s| s.status == ScenarioStatus::Failed);
        if self.status == ScenarioStatus::Failed && !step_failed {
            self.error.as_deref()
        } else {
            None
        }
    }
}

/// Results of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub profile: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub engine: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub scenarios: Vec<ScenarioReport>,
}

impl RunReport {
    pub fn new(config: &RunConfig, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            profile: config.profile_name.clone(),
            environment: config.profile.env.clone(),
            engine: config.launch.engine.as_str().to_string(),
            started_at,
            duration_ms: 0,
            scenarios: Vec::new(),
        }
    }

    pub fn count(&self, status: ScenarioStatus) -> usize {
        self.scenarios.iter().filter(|s| s.status == status).count()
    }

    /// True when every scenario passed.
    pub fn is_success(&self) -> bool {
        self.scenarios.iter().all(|s| s.status.is_passed())
    }

    /// Scenarios grouped by feature, in the order features first appear.
    pub fn cucumber_features(&self) -> Vec<CucumberFeature> {
        let mut features: Vec<CucumberFeature> = Vec::new();
        for scenario in &self.scenarios {
            let name = if scenario.feature.is_empty() {
                DEFAULT_FEATURE
            } else {
                scenario.feature.as_str()
            };
            let element = CucumberElement::from_report(name, scenario);
            match features.iter_mut().find(|f| f.name == name) {
                Some(feature) => feature.elements.push(element),
                None => features.push(CucumberFeature {
                    keyword: "Feature",
                    id: slug(name),
                    name: name.to_string(),
                    line: 1,
                    tags: Vec::new(),
                    elements: vec![element],
                }),
            }
        }
        features
    }

    /// Writes the Cucumber JSON result file.
    pub fn write_cucumber_json(&self, path: &Path) -> Result<()> {
        write_pretty(path, &self.cucumber_features())?;
        tracing::info!(path = %path.display(), scenarios = self.scenarios.len(), "cucumber report written");
        Ok(())
    }

    /// Writes the run summary with trace, video and teardown details.
    pub fn write_summary(&self, path: &Path) -> Result<()> {
        write_pretty(path, self)?;
        tracing::info!(path = %path.display(), run_id = %self.run_id, "run summary written");
        Ok(())
    }
}

fn write_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}

fn slug(name: &str) -> String {
    ScenarioId::from_name(name).as_str().to_lowercase()
}

/// One feature of the Cucumber JSON result file.
#[derive(Debug, Clone, Serialize)]
pub struct CucumberFeature {
    pub keyword: &'static str,
    pub id: String,
    pub name: String,
    pub line: usize,
    pub tags: Vec<CucumberTag>,
    pub elements: Vec<CucumberElement>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CucumberTag {
    pub name: String,
    pub line: usize,
}

/// A scenario entry.
#[derive(Debug, Clone, Serialize)]
pub struct CucumberElement {
    pub keyword: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: String,
    pub name: String,
    pub line: usize,
    pub tags: Vec<CucumberTag>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub before: Vec<CucumberHook>,
    pub steps: Vec<CucumberStep>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<CucumberHook>,
}

impl CucumberElement {
    fn from_report(feature: &str, report: &ScenarioReport) -> Self {
        let before = report
            .setup_error()
            .map(|error| CucumberHook {
                result: CucumberResult::failed(0, error),
                embeddings: Vec::new(),
            })
            .into_iter()
            .collect();

        let steps = report
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| CucumberStep {
                keyword: "* ",
                name: step.name.clone(),
                line: i + 2,
                result: CucumberResult {
                    status: step.status,
                    duration: u128::from(step.duration_ms) * 1_000_000,
                    error_message: step.error.clone(),
                },
            })
            .collect();

        let after_result = if report.teardown_errors.is_empty() {
            CucumberResult::passed()
        } else {
            CucumberResult::failed(0, &report.teardown_errors.join("; "))
        };
        let after = vec![CucumberHook {
            result: after_result,
            embeddings: report.attachments.iter().map(CucumberEmbedding::from).collect(),
        }];

        Self {
            keyword: "Scenario",
            kind: "scenario",
            id: format!("{};{}", slug(feature), slug(&report.name)),
            name: report.name.clone(),
            line: 1,
            tags: report
                .tags
                .iter()
                .map(|t| CucumberTag {
                    name: t.clone(),
                    line: 1,
                })
                .collect(),
            before,
            steps,
            after,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CucumberStep {
    pub keyword: &'static str,
    pub name: String,
    pub line: usize,
    pub result: CucumberResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct CucumberHook {
    pub result: CucumberResult,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeddings: Vec<CucumberEmbedding>,
}

/// Step or hook result. `duration` is in nanoseconds.
#[derive(Debug, Clone, Serialize)]
pub struct CucumberResult {
    pub status: ScenarioStatus,
    pub duration: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CucumberResult {
    fn passed() -> Self {
        Self {
            status: ScenarioStatus::Passed,
            duration: 0,
            error_message: None,
        }
    }

    fn failed(duration: u128, error: &str) -> Self {
        Self {
            status: ScenarioStatus::Failed,
            duration,
            error_message: Some(error.to_string()),
        }
    }
}

/// Base64 payload attached to a hook.
#[derive(Debug, Clone, Serialize)]
pub struct CucumberEmbedding {
    pub data: String,
    pub mime_type: String,
}

impl From<&Attachment> for CucumberEmbedding {
    fn from(attachment: &Attachment) -> Self {
        let bytes = match &attachment.body {
            AttachmentBody::Text(text) => text.as_bytes(),
            AttachmentBody::Data(data) => data.as_slice(),
        };
        Self {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            mime_type: attachment.mime_type.clone(),
        }
    }
}

/// Collects scenario reports from concurrently running hooks.
#[derive(Debug, Clone, Default)]
pub struct ResultCollector {
    inner: Arc<Mutex<Vec<ScenarioReport>>>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, report: ScenarioReport) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report);
    }

    /// Takes every collected report, leaving the collector empty.
    pub fn drain(&self) -> Vec<ScenarioReport> {
        std::mem::take(&mut *self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunProfile;
    use serde_json::Value;
    use tempfile::TempDir;

    fn config() -> RunConfig {
        RunConfig::new(
            "sit",
            RunProfile::new("https://shop.example.test/").with_env("sit"),
        )
    }

    fn step(name: &str, status: ScenarioStatus, error: Option<&str>) -> StepReport {
        StepReport {
            name: name.to_string(),
            status,
            duration_ms: 3,
            error: error.map(String::from),
        }
    }

    #[test]
    fn report_counts_statuses() {
        let mut report = RunReport::new(&config(), Utc::now());
        report
            .scenarios
            .push(ScenarioReport::new("a", vec![], ScenarioStatus::Passed));
        report
            .scenarios
            .push(ScenarioReport::new("b", vec![], ScenarioStatus::Failed));

        assert_eq!(report.count(ScenarioStatus::Passed), 1);
        assert_eq!(report.count(ScenarioStatus::Failed), 1);
        assert!(!report.is_success());
    }

    #[test]
    fn cucumber_json_is_a_feature_array() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cucumber-report.json");

        let mut report = RunReport::new(&config(), Utc::now());
        let mut passed = ScenarioReport::new(
            "Register a customer",
            vec!["@smoke".to_string()],
            ScenarioStatus::Passed,
        )
        .with_feature("Customer registration");
        passed.steps.push(step("I submit the form", ScenarioStatus::Passed, None));
        passed.attachments.push(Attachment::text("Status: PASSED. Duration:1s"));

        let mut failed = ScenarioReport::new("Checkout", vec![], ScenarioStatus::Failed);
        failed.steps.push(step("I pay", ScenarioStatus::Failed, Some("card declined")));
        failed.steps.push(StepReport::skipped("I see the receipt"));
        failed.error = Some("card declined".to_string());

        report.scenarios.push(passed);
        report.scenarios.push(failed);
        report.write_cucumber_json(&path).unwrap();

        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let features = written.as_array().unwrap();
        assert_eq!(features.len(), 2);

        let registration = &features[0];
        assert_eq!(registration["keyword"], "Feature");
        assert_eq!(registration["name"], "Customer registration");
        let element = &registration["elements"][0];
        assert_eq!(element["type"], "scenario");
        assert_eq!(element["id"], "customer-registration;register-a-customer");
        assert_eq!(element["tags"][0]["name"], "@smoke");
        assert_eq!(element["steps"][0]["result"]["status"], "passed");
        assert_eq!(element["steps"][0]["result"]["duration"], 3_000_000);
        assert_eq!(element["after"][0]["embeddings"][0]["mime_type"], "text/plain");
        assert!(element.get("before").is_none());

        let checkout = &features[1]["elements"][0];
        assert_eq!(features[1]["name"], DEFAULT_FEATURE);
        assert_eq!(checkout["steps"][0]["result"]["error_message"], "card declined");
        assert_eq!(checkout["steps"][1]["result"]["status"], "skipped");
        assert!(checkout.get("before").is_none());
    }

    #[test]
    fn setup_failure_becomes_a_failed_before_hook() {
        let mut scenario = ScenarioReport::new("Broken", vec![], ScenarioStatus::Failed);
        scenario.steps.push(StepReport::skipped("anything"));
        scenario.error = Some("failed to provision page".to_string());
        scenario.teardown_errors.push("close context failed".to_string());

        let element = CucumberElement::from_report("F", &scenario);
        let json = serde_json::to_value(&element).unwrap();

        assert_eq!(json["before"][0]["result"]["status"], "failed");
        assert_eq!(
            json["before"][0]["result"]["error_message"],
            "failed to provision page"
        );
        assert_eq!(json["after"][0]["result"]["status"], "failed");
    }

    #[test]
    fn embeddings_are_base64() {
        let text = CucumberEmbedding::from(&Attachment::text("hi"));
        assert_eq!(text.data, "aGk=");
        let image = CucumberEmbedding::from(&Attachment::png(vec![1, 2, 3]));
        assert_eq!(image.data, "AQID");
        assert_eq!(image.mime_type, "image/png");
    }

    #[test]
    fn summary_keeps_artifact_details() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("reports").join("run-summary.json");

        let mut report = RunReport::new(&config(), Utc::now());
        let mut scenario = ScenarioReport::new("Register a customer", vec![], ScenarioStatus::Failed);
        scenario.trace = Some(PathBuf::from("traces/Register-a-customer.zip"));
        report.scenarios.push(scenario);
        report.write_summary(&path).unwrap();

        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["profile"], "sit");
        assert_eq!(written["environment"], "sit");
        assert_eq!(written["engine"], "chromium");
        assert_eq!(written["scenarios"][0]["id"], "Register-a-customer");
        assert_eq!(written["scenarios"][0]["status"], "failed");
        assert_eq!(
            written["scenarios"][0]["trace"],
            "traces/Register-a-customer.zip"
        );
    }

    #[test]
    fn collector_is_shared_between_clones() {
        let collector = ResultCollector::new();
        let other = collector.clone();

        other.push(ScenarioReport::new("x", vec![], ScenarioStatus::Skipped));

        assert_eq!(collector.len(), 1);
        assert_eq!(collector.drain().len(), 1);
        assert!(other.is_empty());
    }
}
