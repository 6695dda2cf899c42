//! uiprobe CLI - run one autonomous test session from the command line

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use uiprobe::cases::{self, CaseRow};
use uiprobe::{
    ActionStatus, CallGateway, GenerativePlanner, PlannerSettings, RunTarget, Runner, RunnerConfig,
    ScriptedSource, SessionStore, load_yaml_config,
};

#[derive(Parser, Debug)]
#[command(name = "uiprobe", about = "Autonomous exploratory testing of a web target")]
struct Cli {
    /// Target URL to test
    #[arg(long, conflicts_with = "image")]
    target: Option<String>,

    /// Static image rendered as the page content instead of a URL
    #[arg(long)]
    image: Option<PathBuf>,

    /// Case file: .json with explicit rows, anything else treated as
    /// behavior lines
    #[arg(long)]
    cases: Option<PathBuf>,

    /// Test category recorded with the run
    #[arg(long)]
    category: Option<String>,

    /// Record a screencast of the run
    #[arg(long)]
    video: bool,

    /// Override the configured step budget
    #[arg(long)]
    max_steps: Option<usize>,

    /// Override the configured artifact directory
    #[arg(long)]
    artifacts: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_yaml_config().context("failed to load config.yaml")?;

    let target = match (&cli.target, &cli.image) {
        (Some(url), None) => RunTarget::Url(url.clone()),
        (None, Some(path)) => RunTarget::Image(path.clone()),
        _ => anyhow::bail!("exactly one of --target or --image is required"),
    };

    let scripted = match &cli.cases {
        Some(path) => Some(load_cases(path)?),
        None => None,
    };

    let planner = config.planner.as_ref().map(|section| {
        let gateway = CallGateway::new(
            config.gateway.min_interval_ms.map(Duration::from_millis),
            config.gateway.retry_budget,
            Duration::from_millis(config.gateway.backoff_base_ms),
        );
        GenerativePlanner::new(
            PlannerSettings {
                endpoint: section.endpoint.clone(),
                model: section.model.clone(),
                api_key: std::env::var(&section.api_key_env).ok(),
                context_budget: section.context_budget_bytes,
                temperature: section.temperature,
            },
            gateway,
        )
    });

    if scripted.is_none() && planner.is_none() {
        anyhow::bail!(
            "no decision source: pass --cases or configure a planner in config.yaml"
        );
    }

    let runner = Runner::new(RunnerConfig {
        max_steps: cli.max_steps.unwrap_or(config.run.max_steps),
        batch_size: config.run.batch_size,
        settle: Duration::from_millis(config.run.settle_ms),
        headless: config.browser.headless,
        window: (config.browser.window.width, config.browser.window.height),
        record_video: cli.video || config.run.record_video,
        artifact_root: cli.artifacts.unwrap_or(config.artifacts.root),
        artifact_base_url: config.artifacts.public_base_url,
        login: None,
    });

    let store = SessionStore::new();
    let run_id = Uuid::new_v4();
    let cancel = store.register(run_id);

    match runner
        .run(run_id, target, cli.category, scripted, planner, cancel)
        .await
    {
        Ok(outcome) => {
            let failed = outcome
                .actions
                .iter()
                .filter(|a| a.status == ActionStatus::Error)
                .count();
            println!(
                "run {run_id}: {} actions ({failed} failed), {} artifacts, {} console errors",
                outcome.actions.len(),
                outcome.artifacts.len(),
                outcome.console_errors.len()
            );
            for artifact in &outcome.artifacts {
                println!("  {}", artifact.path.display());
            }
            store.complete(run_id, outcome);
            Ok(())
        }
        Err(e) => {
            store.fail(run_id, e.to_string());
            Err(e.into())
        }
    }
}

/// Read a case file into the scripted decision queue.
fn load_cases(path: &PathBuf) -> Result<ScriptedSource> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read case file {}", path.display()))?;

    let queue = if path.extension().is_some_and(|ext| ext == "json") {
        let rows: Vec<CaseRow> = serde_json::from_str(&contents)
            .with_context(|| format!("case file {} is not a row array", path.display()))?;
        cases::queue_from_rows(&rows)
    } else {
        cases::parse_script(&contents).into_iter().collect()
    };

    anyhow::ensure!(!queue.is_empty(), "case file {} produced no decisions", path.display());
    Ok(ScriptedSource::new(queue))
}
