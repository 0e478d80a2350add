//! Run configuration: profiles, launch settings and artifact layout.
//!
//! A run resolves exactly one [`RunConfig`] before any scenario starts and
//! shares it read-only with every scenario world.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::browser::Viewport;
use crate::error::{Error, Result};

/// Environment variable selecting the active profile.
pub const PROFILE_ENV: &str = "E2E_PROFILE";

/// Environment variable overriding the artifact root directory.
pub const ARTIFACTS_ENV: &str = "E2E_ARTIFACTS_DIR";

/// Browser selection, one of a fixed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrowserEngine {
    /// Chromium engine driven through the branded Chrome channel.
    #[default]
    Chromium,
    /// WebKit rendering engine.
    Webkit,
    /// Chromium engine, Microsoft Edge channel.
    Msedge,
    /// Chromium engine, Google Chrome channel.
    Chrome,
}

/// Underlying rendering engine family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Chromium,
    Webkit,
}

/// Emulated device descriptor tied to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    pub name: &'static str,
    pub viewport: Viewport,
}

impl BrowserEngine {
    /// Parses a `browserType` value. Unrecognised values select the default engine.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "webkit" => BrowserEngine::Webkit,
            "msedge" => BrowserEngine::Msedge,
            "chrome" => BrowserEngine::Chrome,
            _ => BrowserEngine::Chromium,
        }
    }

    /// Engine family used to launch this selection.
    pub fn kind(&self) -> EngineKind {
        match self {
            BrowserEngine::Webkit => EngineKind::Webkit,
            _ => EngineKind::Chromium,
        }
    }

    /// Browser channel passed to the launcher, if any.
    pub fn channel(&self) -> Option<&'static str> {
        match self {
            BrowserEngine::Webkit => None,
            BrowserEngine::Msedge => Some("msedge"),
            BrowserEngine::Chromium | BrowserEngine::Chrome => Some("chrome"),
        }
    }

    /// Device profile whose viewport every browsing context uses.
    pub fn device(&self) -> DeviceProfile {
        match self {
            BrowserEngine::Webkit => DeviceProfile {
                name: "Desktop Safari",
                viewport: Viewport::new(1280, 720),
            },
            _ => DeviceProfile {
                name: "Desktop Chrome",
                viewport: Viewport::new(1280, 720),
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserEngine::Chromium => "chromium",
            BrowserEngine::Webkit => "webkit",
            BrowserEngine::Msedge => "msedge",
            BrowserEngine::Chrome => "chrome",
        }
    }
}

/// Environment-level toggles consumed by the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LaunchSettings {
    /// Which browser to launch.
    pub engine: BrowserEngine,
    /// Run without a visible window.
    pub headless: bool,
    /// Record a video of every page.
    pub record_video: bool,
    /// Attach a full-page screenshot after every step.
    pub screenshot_on_step: bool,
}

impl LaunchSettings {
    /// Loads settings from the process environment.
    ///
    /// - `browserType` - `chromium`, `webkit`, `msedge` or `chrome`
    /// - `CI=true` - headless mode
    /// - `videoRecording=true` - record videos
    /// - `takeScreenshot=true` - screenshot after every step
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads settings through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| lookup(key).map(|v| v == "true").unwrap_or(false);

        Self {
            engine: lookup("browserType")
                .map(|v| BrowserEngine::parse(&v))
                .unwrap_or_default(),
            headless: flag("CI"),
            record_video: flag("videoRecording"),
            screenshot_on_step: flag("takeScreenshot"),
        }
    }
}

/// One named set of run parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProfile {
    /// Base URL every browsing context resolves relative navigation against.
    pub base_url: String,

    /// Base URL of the network-request client.
    #[serde(default)]
    pub api_url: String,

    /// Environment tag, reported alongside results.
    #[serde(default)]
    pub env: Option<String>,

    /// Tag expression restricting which scenarios run (`@smoke`, `not @wip`).
    #[serde(default)]
    pub tags: Option<String>,

    /// Maximum number of scenarios running at once.
    #[serde(default = "default_parallel")]
    pub parallel: usize,

    /// Directory holding the feature files.
    #[serde(default = "default_features")]
    pub features: PathBuf,

    /// Cucumber JSON result file read by the HTML reporter.
    #[serde(default = "default_report")]
    pub report: PathBuf,
}

fn default_parallel() -> usize {
    1
}

fn default_features() -> PathBuf {
    PathBuf::from("features")
}

fn default_report() -> PathBuf {
    PathBuf::from("cucumber-report.json")
}

const DEFAULT_BASE_URL: &str = "https://magento.softwaretestingboard.com/";

impl RunProfile {
    /// Creates a profile targeting `base_url` with defaults for everything else.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_url: String::new(),
            env: None,
            tags: None,
            parallel: default_parallel(),
            features: default_features(),
            report: default_report(),
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = Some(tags.into());
        self
    }

    pub fn with_parallel(mut self, parallel: usize) -> Self {
        self.parallel = parallel;
        self
    }

    /// Returns whether a scenario carrying `tags` is selected by this profile.
    ///
    /// Supports a single tag (`@smoke`) or its negation (`not @wip`). Tags may
    /// be given with or without the leading `@`.
    pub fn selects(&self, tags: &[String]) -> bool {
        let Some(expr) = self.tags.as_deref().map(str::trim).filter(|e| !e.is_empty()) else {
            return true;
        };

        let (negated, tag) = match expr.strip_prefix("not ") {
            Some(rest) => (true, rest.trim()),
            None => (false, expr),
        };
        let tag = tag.trim_start_matches('@');
        let present = tags.iter().any(|t| t.trim_start_matches('@') == tag);

        present != negated
    }
}

/// Named profiles, one active per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSet {
    #[serde(flatten)]
    profiles: BTreeMap<String, RunProfile>,
}

impl ProfileSet {
    /// Profiles shipped with the suite.
    pub fn builtin() -> Self {
        let default = RunProfile::new(DEFAULT_BASE_URL);

        let mut profiles = BTreeMap::new();
        profiles.insert("sit".to_string(), default.clone().with_env("sit"));
        profiles.insert(
            "uat".to_string(),
            RunProfile::new("https://magento.softwaretestingboarduat.com/")
                .with_api_url("https://api.softwaretestingboarduat.com/")
                .with_env("uat"),
        );
        profiles.insert("smoke".to_string(), default.clone().with_tags("@smoke"));
        profiles.insert("default".to_string(), default);

        Self { profiles }
    }

    /// Loads profiles from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parses profiles from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse profiles: {}", e)))
    }

    /// Returns the named profile.
    pub fn get(&self, name: &str) -> Result<&RunProfile> {
        self.profiles
            .get(name)
            .ok_or_else(|| Error::Config(format!("unknown profile '{}'", name)))
    }

    /// Profile names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }
}

/// On-disk locations of run artifacts.
///
/// The relative layout (`traces/<id>.zip`, `recordings/<id>.mp4`) is consumed
/// by downstream reporting tools and must not change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn traces_dir(&self) -> PathBuf {
        self.root.join("traces")
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.root.join("recordings")
    }

    /// Trace archive for a sanitized scenario id.
    pub fn trace_path(&self, scenario_id: &str) -> PathBuf {
        self.traces_dir().join(format!("{}.zip", scenario_id))
    }

    /// Recorded video for a sanitized scenario id.
    pub fn video_path(&self, scenario_id: &str) -> PathBuf {
        self.recordings_dir().join(format!("{}.mp4", scenario_id))
    }

    /// Run summary with per-scenario artifact and teardown details.
    pub fn summary_path(&self) -> PathBuf {
        self.root.join("run-summary.json")
    }

    /// Resolves a possibly relative path against the artifact root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl Default for ArtifactLayout {
    fn default() -> Self {
        Self::new(".")
    }
}

/// Everything resolved once per run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub profile_name: String,
    pub profile: RunProfile,
    pub launch: LaunchSettings,
    pub artifacts: ArtifactLayout,
}

impl RunConfig {
    pub fn new(profile_name: impl Into<String>, profile: RunProfile) -> Self {
        Self {
            profile_name: profile_name.into(),
            profile,
            launch: LaunchSettings::default(),
            artifacts: ArtifactLayout::default(),
        }
    }

    pub fn with_launch(mut self, launch: LaunchSettings) -> Self {
        self.launch = launch;
        self
    }

    pub fn with_artifacts(mut self, artifacts: ArtifactLayout) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Resolves the profile named by `E2E_PROFILE` (default `default`) with
    /// launch settings from the environment. `E2E_ARTIFACTS_DIR` moves the
    /// artifact root away from the working directory.
    pub fn from_env(profiles: &ProfileSet) -> Result<Self> {
        Self::from_lookup(profiles, |key| std::env::var(key).ok())
    }

    /// Resolves the run configuration through an arbitrary variable lookup.
    pub fn from_lookup(
        profiles: &ProfileSet,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let name = lookup(PROFILE_ENV).unwrap_or_else(|| "default".to_string());
        let profile = profiles.get(&name)?.clone();
        let artifacts = lookup(ARTIFACTS_ENV)
            .map(ArtifactLayout::new)
            .unwrap_or_default();

        let config = Self::new(name, profile)
            .with_launch(LaunchSettings::from_lookup(&lookup))
            .with_artifacts(artifacts);
        let warnings = config.validate().into_result()?;
        for warning in warnings {
            tracing::warn!(profile = %config.profile_name, "{}", warning);
        }
        tracing::info!(
            profile = %config.profile_name,
            base_url = %config.profile.base_url,
            engine = config.launch.engine.as_str(),
            "run configuration resolved"
        );
        Ok(config)
    }
}

/// Problems found in a run configuration.
///
/// Messages read `<field>: <problem>`; [`ValidationResult::scoped`] prefixes
/// them with where the field lives, e.g. `profile 'uat'`.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// Problems that stop the run.
    pub errors: Vec<String>,
    /// Problems logged at startup.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error(&mut self, field: &str, problem: impl std::fmt::Display) {
        self.errors.push(format!("{}: {}", field, problem));
    }

    pub fn warn(&mut self, field: &str, problem: impl std::fmt::Display) {
        self.warnings.push(format!("{}: {}", field, problem));
    }

    /// Prefixes every message with `scope`.
    pub fn scoped(self, scope: &str) -> Self {
        let prefix = |m: String| format!("{} {}", scope, m);
        Self {
            errors: self.errors.into_iter().map(prefix).collect(),
            warnings: self.warnings.into_iter().map(prefix).collect(),
        }
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Warnings when valid, otherwise every error joined into one.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Configuration that can check itself before a run starts.
pub trait Validate {
    fn validate(&self) -> ValidationResult;
}

impl Validate for RunProfile {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.base_url.trim().is_empty() {
            result.error("base_url", "must not be empty");
        } else if reqwest::Url::parse(&self.base_url)
            .map(|u| !matches!(u.scheme(), "http" | "https"))
            .unwrap_or(true)
        {
            result.error(
                "base_url",
                format!("'{}' is not an absolute http(s) URL", self.base_url),
            );
        }

        if self.api_url.trim().is_empty() {
            result.warn("api_url", "empty, the request client has no base URL");
        } else if reqwest::Url::parse(&self.api_url).is_err() {
            result.error("api_url", format!("'{}' is not a URL", self.api_url));
        }

        if self.parallel == 0 {
            result.error("parallel", "must be at least 1");
        }

        result
    }
}

impl Validate for LaunchSettings {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.screenshot_on_step && self.record_video {
            result.warn(
                "takeScreenshot",
                "combined with videoRecording, runs get noticeably slower",
            );
        }

        result
    }
}

impl Validate for RunConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = self
            .profile
            .validate()
            .scoped(&format!("profile '{}'", self.profile_name));
        result.merge(self.launch.validate().scoped("launch"));
        result
    }
}
