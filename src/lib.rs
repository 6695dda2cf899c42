//! Autonomous exploratory and regression testing for web targets
//!
//! Alternates machine-generated decisions ("what to do next") with browser
//! actions ("do it") against a live page, leaving behind a reproducible
//! artifact trail: numbered screenshots, optional screencast frames and an
//! `actions.json` audit log. Decisions come from uploaded test cases, from
//! an external decision service, or from both in sequence.

pub mod artifacts;
pub mod browser;
pub mod browser_setup;
pub mod cases;
pub mod console;
pub mod decision;
pub mod executor;
pub mod resolve;
pub mod runner;
pub mod safety;
pub mod source;
pub mod summary;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfigSection,

    #[serde(default)]
    pub browser: BrowserConfigSection,

    /// Present only when a generative planner backs the run.
    #[serde(default)]
    pub planner: Option<PlannerConfigSection>,

    #[serde(default)]
    pub gateway: GatewayConfigSection,

    #[serde(default)]
    pub artifacts: ArtifactConfigSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfigSection {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause after each action before the next summary, in milliseconds.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    #[serde(default)]
    pub record_video: bool,
}

/// Browser launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfigSection {
    /// Run browser in headless mode
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Window dimensions
    #[serde(default)]
    pub window: WindowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_window_width")]
    pub width: u32,

    #[serde(default = "default_window_height")]
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfigSection {
    /// Chat-completions endpoint of the decision service.
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the service API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Byte cap on serialized page/history context per request.
    #[serde(default = "default_context_budget")]
    pub context_budget_bytes: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfigSection {
    /// Minimum spacing between decision-service calls, in milliseconds.
    /// Absent means no spacing.
    #[serde(default)]
    pub min_interval_ms: Option<u64>,

    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,

    /// Seed for the squared exponential backoff curve, in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfigSection {
    #[serde(default = "default_artifact_root")]
    pub root: PathBuf,

    /// Base URL artifact links are derived from.
    #[serde(default = "default_artifact_base_url")]
    pub public_base_url: String,
}

fn default_max_steps() -> usize {
    25
}
fn default_batch_size() -> usize {
    5
}
fn default_settle_ms() -> u64 {
    800
}

fn default_headless() -> bool {
    true
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    720
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "DECISION_SERVICE_API_KEY".to_string()
}

fn default_context_budget() -> usize {
    12 * 1024
}

fn default_temperature() -> f64 {
    0.2
}

fn default_retry_budget() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    2_000
}

fn default_artifact_root() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_artifact_base_url() -> String {
    "/artifacts".to_string()
}

impl Default for RunConfigSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            batch_size: default_batch_size(),
            settle_ms: default_settle_ms(),
            record_video: false,
        }
    }
}

impl Default for BrowserConfigSection {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            window: WindowConfig::default(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_window_width(),
            height: default_window_height(),
        }
    }
}

impl Default for GatewayConfigSection {
    fn default() -> Self {
        Self {
            min_interval_ms: None,
            retry_budget: default_retry_budget(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

impl Default for ArtifactConfigSection {
    fn default() -> Self {
        Self {
            root: default_artifact_root(),
            public_base_url: default_artifact_base_url(),
        }
    }
}

/// Load config from config.yaml in package root
pub fn load_yaml_config() -> anyhow::Result<Config> {
    let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config.yaml");

    if config_path.exists() {
        let contents = fs::read_to_string(&config_path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    } else {
        Ok(Config::default())
    }
}

pub use artifacts::{Artifact, ArtifactKind, ArtifactStore};
pub use browser::{BrowserError, BrowserResult, BrowserSession, VideoRecorder};
pub use decision::{Decision, DecisionKind, FieldHint, TargetRef};
pub use runner::{
    ActionRecord, ActionStatus, LoginProfile, RunError, RunOutcome, RunStatus, RunTarget, Runner,
    RunnerConfig, SessionStore,
};
pub use source::{
    CallGateway, DecisionSource, GenerativePlanner, PlannerError, PlannerSettings, ScriptedSource,
};
pub use summary::{Interactable, PageSummary};
