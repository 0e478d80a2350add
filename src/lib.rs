//! Storefront E2E - behaviour-driven browser test harness
//!
//! This library provides per-scenario browser resource isolation, a shared
//! scenario world for step code, diagnostic capture on failure and a
//! structured JSON result file for report renderers.

pub mod api;
pub mod browser;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod network;
pub mod pages;
pub mod report;
pub mod runner;
pub mod world;

pub use api::{ApiClient, ApiContextOptions};
pub use browser::{Browser, BrowserContext, BrowserLauncher, Page, Response};
pub use config::{
    ArtifactLayout, BrowserEngine, EngineKind, LaunchSettings, ProfileSet, RunConfig, RunProfile,
    Validate, ValidationResult,
};
pub use error::{Error, ProvisionStep, Result, TeardownStep};
pub use lifecycle::{
    after_each_step, LifecycleManager, ScenarioMeta, ScenarioOutcome, ScenarioStatus,
    TeardownReport,
};
pub use network::{wait_for_json, ResponseMatcher, DEFAULT_RESPONSE_TIMEOUT};
pub use pages::{BasePage, RegisterPage, RegistrationDetails};
pub use report::{CucumberFeature, ResultCollector, RunReport, ScenarioReport, StepReport};
pub use runner::{run_suite, ScenarioRunner, ScenarioSpec, Step, StepFuture};
pub use world::{Attachment, ScenarioId, ScenarioWorld, StoredResponse};
