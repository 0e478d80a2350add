//! Error types for the storefront end-to-end harness.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Resource step during scenario provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
    /// Creating the trace/recording directories.
    ArtifactDirs,
    /// Creating the isolated browsing context.
    BrowserContext,
    /// Creating the isolated network-request client.
    RequestContext,
    /// Starting diagnostic tracing on the context.
    Tracing,
    /// Opening the scenario's page.
    Page,
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProvisionStep::ArtifactDirs => "artifact directories",
            ProvisionStep::BrowserContext => "browser context",
            ProvisionStep::RequestContext => "request context",
            ProvisionStep::Tracing => "tracing",
            ProvisionStep::Page => "page",
        };
        f.write_str(name)
    }
}

/// Resource step during scenario teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    FailureScreenshot,
    StopTracing,
    ClosePage,
    SaveVideo,
    CloseContext,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TeardownStep::FailureScreenshot => "failure screenshot",
            TeardownStep::StopTracing => "stop tracing",
            TeardownStep::ClosePage => "close page",
            TeardownStep::SaveVideo => "save video",
            TeardownStep::CloseContext => "close context",
        };
        f.write_str(name)
    }
}

/// Top-level error type for harness operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The shared browser process could not be launched.
    #[error("failed to launch {engine} browser: {reason}")]
    Launch { engine: String, reason: String },

    /// A per-scenario resource could not be created.
    #[error("failed to provision {step} for scenario '{scenario}': {reason}")]
    Provisioning {
        scenario: String,
        step: ProvisionStep,
        reason: String,
    },

    /// An expected network exchange was never observed.
    #[error(
        "failed to receive response for URL: {url} with method: {method} within {}ms timeout",
        .timeout.as_millis()
    )]
    ResponseTimeout {
        url: String,
        method: String,
        timeout: Duration,
    },

    /// A response body could not be parsed.
    #[error("failed to parse response body: {0}")]
    ResponseParse(String),

    /// A validation expectation was not met.
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// A cleanup step failed.
    #[error("teardown step '{step}' failed: {reason}")]
    Teardown { step: TeardownStep, reason: String },

    /// The browser capability reported an error.
    #[error("browser error: {0}")]
    Browser(String),

    /// The API answered with a non-success status.
    #[error("request failed with status {status}: {reason}")]
    Api { status: u16, reason: String },

    /// A step did not finish within the step timeout.
    #[error("step '{step}' timed out after {}ms", .timeout.as_millis())]
    StepTimeout { step: String, timeout: Duration },

    /// A step panicked.
    #[error("step '{step}' panicked: {message}")]
    StepPanicked { step: String, message: String },

    /// A browser wait elapsed without its condition being met.
    #[error("timeout {}ms exceeded", .0.as_millis())]
    Timeout(Duration),

    /// A scenario resource was used before provisioning.
    #[error("scenario has no {0}; was the scenario provisioned?")]
    NotProvisioned(&'static str),

    /// The run was already finalized.
    #[error("run has already been finalized")]
    RunFinalized,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error while writing artifacts.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, Error>;
