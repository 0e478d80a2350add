//! Shared execution context carried between the steps of one scenario.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::api::ApiClient;
use crate::browser::{BrowserContext, Page, Response};
use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::pages::RegistrationDetails;

/// Filesystem-safe scenario identifier used for artifact naming.
///
/// Every character outside `[A-Za-z0-9_]` becomes `-`, so sanitizing an id
/// again yields the same id. Two names differing only in punctuation map to
/// the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ScenarioId(String);

impl ScenarioId {
    pub fn from_name(name: &str) -> Self {
        Self(
            name.chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '-' })
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata of the running scenario.
#[derive(Debug, Clone)]
pub struct ScenarioInfo {
    pub id: ScenarioId,
    pub name: String,
    pub tags: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub started: Instant,
}

impl ScenarioInfo {
    pub fn new(name: impl Into<String>, tags: Vec<String>) -> Self {
        let name = name.into();
        Self {
            id: ScenarioId::from_name(&name),
            name,
            tags,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }
}

/// Browsing context, page and request client of one scenario.
///
/// All three are created together and released together; they are never
/// handed to another scenario. Dropping an environment that teardown never
/// released logs a warning.
pub struct BrowserEnvironment {
    pub context: Box<dyn BrowserContext>,
    pub page: Box<dyn Page>,
    pub request: ApiClient,
    /// Whether tracing is still running on `context`.
    pub tracing: bool,
    released: bool,
}

impl BrowserEnvironment {
    pub(crate) fn new(
        context: Box<dyn BrowserContext>,
        page: Box<dyn Page>,
        request: ApiClient,
        tracing: bool,
    ) -> Self {
        Self {
            context,
            page,
            request,
            tracing,
            released: false,
        }
    }

    /// Marks the environment as torn down.
    pub(crate) fn mark_released(&mut self) {
        self.released = true;
    }
}

impl Drop for BrowserEnvironment {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(
                page_url = %self.page.url(),
                "browser environment dropped without teardown; context left open"
            );
        }
    }
}

/// Outcome of capturing a response body.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredResponse {
    /// Body parsed as JSON.
    Body(Value),
    /// Capture was attempted but the body could not be parsed.
    Unreadable,
}

impl StoredResponse {
    pub fn body(&self) -> Option<&Value> {
        match self {
            StoredResponse::Body(value) => Some(value),
            StoredResponse::Unreadable => None,
        }
    }
}

/// Values handed from one step to a later one.
#[derive(Debug, Clone, Default)]
pub struct ScenarioData {
    /// Submitted registration form.
    pub registration: Option<RegistrationDetails>,
    /// Anything else, keyed by step-chosen names.
    pub values: HashMap<String, Value>,
}

/// Payload of a diagnostic attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentBody {
    Text(String),
    #[serde(serialize_with = "encode_base64")]
    Data(Vec<u8>),
}

fn encode_base64<S: Serializer>(data: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    use base64::Engine as _;
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
}

/// Diagnostic attached to the scenario record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub mime_type: String,
    #[serde(flatten)]
    pub body: AttachmentBody,
}

impl Attachment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            mime_type: "text/plain".to_string(),
            body: AttachmentBody::Text(text.into()),
        }
    }

    pub fn png(data: Vec<u8>) -> Self {
        Self {
            mime_type: "image/png".to_string(),
            body: AttachmentBody::Data(data),
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// Per-scenario state visible to every step.
///
/// Starts empty; `LifecycleManager::before_scenario` returns a populated
/// world and `after_scenario` releases its browser environment.
#[derive(Default, cucumber::World)]
pub struct ScenarioWorld {
    scenario: Option<ScenarioInfo>,
    config: Option<Arc<RunConfig>>,
    environment: Option<BrowserEnvironment>,
    responses: HashMap<String, StoredResponse>,
    attachments: Vec<Attachment>,
    steps_completed: usize,
    /// Values crossing step boundaries.
    pub data: ScenarioData,
}

impl ScenarioWorld {
    pub(crate) fn provisioned(
        scenario: ScenarioInfo,
        config: Arc<RunConfig>,
        environment: BrowserEnvironment,
    ) -> Self {
        Self {
            scenario: Some(scenario),
            config: Some(config),
            environment: Some(environment),
            ..Default::default()
        }
    }

    pub(crate) fn take_environment(&mut self) -> Option<BrowserEnvironment> {
        self.environment.take()
    }

    /// True while the scenario owns a browser environment.
    pub fn is_provisioned(&self) -> bool {
        self.environment.is_some()
    }

    pub fn scenario(&self) -> Option<&ScenarioInfo> {
        self.scenario.as_ref()
    }

    pub fn scenario_id(&self) -> Option<&ScenarioId> {
        self.scenario.as_ref().map(|s| &s.id)
    }

    /// Time since provisioning started.
    pub fn elapsed(&self) -> Duration {
        self.scenario
            .as_ref()
            .map(|s| s.started.elapsed())
            .unwrap_or_default()
    }

    pub fn config(&self) -> Result<&RunConfig> {
        self.config
            .as_deref()
            .ok_or(Error::NotProvisioned("run configuration"))
    }

    /// The scenario's page.
    pub fn page(&self) -> Result<&dyn Page> {
        self.environment
            .as_ref()
            .map(|env| env.page.as_ref())
            .ok_or(Error::NotProvisioned("page"))
    }

    /// The scenario's network-request client.
    pub fn request(&self) -> Result<&ApiClient> {
        self.environment
            .as_ref()
            .map(|env| &env.request)
            .ok_or(Error::NotProvisioned("request context"))
    }

    /// Captures the JSON body of `response` under `key`.
    ///
    /// An unparseable body is stored as [`StoredResponse::Unreadable`] and
    /// logged; it never fails the step.
    pub async fn save_response(&mut self, key: impl Into<String>, response: &dyn Response) {
        let key = key.into();
        let stored = match response.json().await {
            Ok(value) => StoredResponse::Body(value),
            Err(e) => {
                tracing::warn!(key = %key, url = %response.url(), error = %e, "failed to parse response");
                StoredResponse::Unreadable
            }
        };
        self.responses.insert(key, stored);
    }

    /// Previously captured response, or `None` if `key` was never saved.
    pub fn get_response_data(&self, key: &str) -> Option<&StoredResponse> {
        self.responses.get(key)
    }

    pub fn attach_text(&mut self, text: impl Into<String>) {
        self.attachments.push(Attachment::text(text));
    }

    pub fn attach_png(&mut self, data: Vec<u8>) {
        self.attachments.push(Attachment::png(data));
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn take_attachments(&mut self) -> Vec<Attachment> {
        std::mem::take(&mut self.attachments)
    }

    /// Runs the after-step diagnostic hook and counts the step as completed.
    ///
    /// For step definitions driven by an external executor that has no
    /// after-step hook of its own.
    pub async fn after_step(&mut self) {
        crate::lifecycle::after_each_step(self).await;
        self.steps_completed += 1;
    }

    /// Steps that reached [`ScenarioWorld::after_step`].
    pub fn steps_completed(&self) -> usize {
        self.steps_completed
    }
}

impl fmt::Debug for ScenarioWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioWorld")
            .field("scenario", &self.scenario.as_ref().map(|s| &s.name))
            .field("provisioned", &self.is_provisioned())
            .field("page_url", &self.environment.as_ref().map(|e| e.page.url()))
            .field("responses", &self.responses.keys().collect::<Vec<_>>())
            .field("attachments", &self.attachments.len())
            .field("data", &self.data)
            .finish()
    }
}
