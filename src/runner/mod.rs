//! Run orchestrator - the autonomous test-execution loop
//!
//! Drives one run through `INIT -> (LOGIN) -> STEP* -> END`. Each step
//! summarizes the page, refills the decision queue when it runs dry
//! (scripted cases first, generative planner as fallback), then pushes one
//! decision through resolve -> safety -> execute and appends exactly one
//! action record. Per-action failures are recorded and the loop continues;
//! only a session that cannot be started at all escapes as an error.

mod state;
mod store;

pub use state::{ActionRecord, ActionStatus, RunError, RunOutcome, RunState, RunTarget};
pub use store::{RunInfo, RunStatus, SessionStore};

use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::Page;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::artifacts::ArtifactStore;
use crate::browser::{BrowserSession, VideoRecorder};
use crate::console::ConsoleCapture;
use crate::decision::{Decision, DecisionKind};
use crate::executor::{Executor, recorded_value, synthesize_value};
use crate::resolve::{ResolvedTarget, resolve};
use crate::safety;
use crate::source::{DecisionSource, GenerativePlanner, ScriptedSource};
use crate::summary::{PageSummary, summarize};

/// Credentials and selectors for the optional pre-run login step.
#[derive(Debug, Clone)]
pub struct LoginProfile {
    /// Login page path, resolved against the starting origin.
    pub path: String,
    pub username_selector: String,
    pub password_selector: String,
    pub submit_selector: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Absolute bound on loop iterations, independent of decision content.
    pub max_steps: usize,
    /// Decisions requested per queue refill.
    pub batch_size: usize,
    /// Pause after every attempted action, letting UI updates land before
    /// the next summary.
    pub settle: Duration,
    pub headless: bool,
    pub window: (u32, u32),
    pub record_video: bool,
    pub artifact_root: PathBuf,
    pub artifact_base_url: String,
    pub login: Option<LoginProfile>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_steps: 25,
            batch_size: 5,
            settle: Duration::from_millis(800),
            headless: true,
            window: (1280, 720),
            record_video: false,
            artifact_root: PathBuf::from("artifacts"),
            artifact_base_url: "/artifacts".to_string(),
            login: None,
        }
    }
}

pub struct Runner {
    config: RunnerConfig,
    executor: Executor,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            executor: Executor::default(),
        }
    }

    /// Execute one run to completion.
    ///
    /// Always returns a best-effort [`RunOutcome`] unless the session could
    /// not be started (or was cancelled), in which case the session is torn
    /// down best-effort before the error propagates.
    pub async fn run(
        &self,
        run_id: Uuid,
        target: RunTarget,
        category: Option<String>,
        scripted: Option<ScriptedSource>,
        planner: Option<GenerativePlanner>,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, RunError> {
        info!(%run_id, "starting run");

        // INIT: anything failing in here is infrastructural and fatal.
        let session = BrowserSession::launch(self.config.headless, self.config.window)
            .await
            .map_err(|e| RunError::Init(e.to_string()))?;

        let page = match session.new_page().await {
            Ok(page) => page,
            Err(e) => {
                session.close().await;
                return Err(RunError::Init(e.to_string()));
            }
        };

        let console = match ConsoleCapture::attach(&page).await {
            Ok(console) => console,
            Err(e) => {
                session.close().await;
                return Err(RunError::Init(e.to_string()));
            }
        };

        let mut artifacts = match ArtifactStore::create(
            &self.config.artifact_root,
            run_id,
            &self.config.artifact_base_url,
        ) {
            Ok(store) => store,
            Err(e) => {
                session.close().await;
                return Err(RunError::Init(e.to_string()));
            }
        };

        let mut state = RunState::new(run_id, target, category);
        if let Err(e) = self.load_target(&page, &mut state).await {
            session.close().await;
            return Err(RunError::Init(e));
        }

        // Recording is part of the artifact trail, not a precondition; a
        // run without video is still a run.
        let mut recorder = if self.config.record_video {
            match VideoRecorder::start(&page, artifacts.video_dir()).await {
                Ok(recorder) => Some(recorder),
                Err(e) => {
                    warn!("video recording unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        if let Err(e) = artifacts.capture_screenshot(&page).await {
            warn!("initial screenshot failed: {e}");
        }

        // OPTIONAL LOGIN: best-effort, never fatal.
        if let Some(login) = self.config.login.clone() {
            let note = match self.try_login(&page, &login, state.start_origin.as_ref()).await {
                Ok(()) => "login submitted".to_string(),
                Err(e) => format!("login failed, continuing anyway: {e}"),
            };
            state
                .actions
                .push(ActionRecord::ok(DecisionKind::Note, None, None).with_note(note));
        }

        // STEP loop.
        let mut scripted = scripted;
        let mut planner = planner;
        let end_note = loop {
            if cancel.is_cancelled() {
                warn!(%run_id, "run cancelled, tearing down session");
                if let Some(recorder) = recorder.take() {
                    recorder.stop(&page).await;
                }
                session.close().await;
                return Err(RunError::Cancelled);
            }
            if state.step >= self.config.max_steps {
                break format!("step budget of {} reached", self.config.max_steps);
            }
            state.step += 1;

            let summary = match summarize(&page).await {
                Ok(summary) => summary,
                Err(e) => break format!("page became unusable: {e}"),
            };
            if summary.interactables.is_empty() {
                break "no interactable elements on page".to_string();
            }

            if state.queue.is_empty() {
                let batch = self
                    .refill(&summary, &state.actions, scripted.as_mut(), planner.as_mut())
                    .await;
                if batch.is_empty() {
                    break "decision sources exhausted".to_string();
                }
                state.queue.extend(batch);
            }

            let decision = state.queue.pop_front().expect("queue refilled above");
            if decision.kind == DecisionKind::End {
                break decision
                    .note
                    .unwrap_or_else(|| "end requested by decision source".to_string());
            }

            let record = self.process_decision(&page, &decision, &summary, &state).await;
            if record.status == ActionStatus::Error {
                warn!(kind = %record.kind, note = ?record.note, "action failed");
            }

            tokio::time::sleep(self.config.settle).await;
            if let Err(e) = artifacts.capture_screenshot(&page).await {
                warn!("step screenshot failed: {e}");
            }
            state.actions.push(record);
        };

        // END: collect everything, close the session, finalize.
        info!(%run_id, steps = state.step, "run ending: {end_note}");
        state.actions.push(ActionRecord::end(Some(end_note)));

        if let Some(recorder) = recorder.take() {
            let frames = recorder.stop(&page).await;
            artifacts.register_video_frames(frames);
        }
        state.console_errors = console.drain();
        if let Err(e) = artifacts.write_actions_json(&state.actions, &state.console_errors) {
            warn!("failed to write actions.json: {e}");
        }
        session.close().await;

        Ok(RunOutcome {
            artifacts: artifacts.into_artifacts(),
            actions: state.actions,
            console_errors: state.console_errors,
        })
    }

    /// Load the run target: navigate to the URL, or render a static image
    /// as the page content.
    async fn load_target(&self, page: &Page, state: &mut RunState) -> Result<(), String> {
        match &state.target {
            RunTarget::Url(raw) => {
                let url = Url::parse(raw).map_err(|e| format!("target URL invalid: {e}"))?;
                self.executor
                    .navigate(page, &url)
                    .await
                    .map_err(|e| e.to_string())?;
                let final_url = page
                    .url()
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| url.to_string());
                state.start_origin = Url::parse(&final_url).ok();
                Ok(())
            }
            RunTarget::Image(path) => {
                let absolute = std::fs::canonicalize(path).map_err(|e| {
                    format!("static image {} not readable: {e}", path.display())
                })?;
                let html = format!(
                    "<html><body style=\"margin:0\">\
                     <img src=\"file://{}\" style=\"max-width:100%\">\
                     </body></html>",
                    absolute.display()
                );
                page.set_content(html)
                    .await
                    .map_err(|e| format!("failed to render static image: {e}"))?;
                Ok(())
            }
        }
    }

    /// Fill the decision queue from whichever source still has something to
    /// say: explicit cases first, generative planner once they run dry. Any
    /// source failure (including an exhausted rate-limit retry budget)
    /// degrades to an empty batch, which ends the run.
    async fn refill(
        &self,
        summary: &PageSummary,
        history: &[ActionRecord],
        scripted: Option<&mut ScriptedSource>,
        planner: Option<&mut GenerativePlanner>,
    ) -> Vec<Decision> {
        if let Some(source) = scripted {
            if !source.is_empty() {
                match source.next_batch(summary, history, self.config.batch_size).await {
                    Ok(batch) if !batch.is_empty() => return batch,
                    Ok(_) => {}
                    Err(e) => warn!("scripted source failed: {e}"),
                }
            }
        }
        if let Some(source) = planner {
            match source.next_batch(summary, history, self.config.batch_size).await {
                Ok(batch) => return batch,
                Err(e) => {
                    warn!("decision refill failed: {e}");
                    return Vec::new();
                }
            }
        }
        Vec::new()
    }

    /// Resolve, safety-check and execute one decision, producing its record.
    async fn process_decision(
        &self,
        page: &Page,
        decision: &Decision,
        summary: &PageSummary,
        state: &RunState,
    ) -> ActionRecord {
        let kind = decision.kind;
        match kind {
            DecisionKind::Note => {
                let note = decision
                    .note
                    .clone()
                    .or_else(|| decision.value.clone())
                    .unwrap_or_else(|| "noted".to_string());
                ActionRecord::ok(kind, None, None).with_note(note)
            }

            DecisionKind::Navigate => {
                let Some(dest) = decision.value.as_deref() else {
                    return ActionRecord::error(kind, None, "navigate decision has no destination".into());
                };
                let Some(origin) = state.start_origin.as_ref() else {
                    return ActionRecord::error(
                        kind,
                        Some(dest.to_string()),
                        "no starting origin to navigate within".into(),
                    );
                };
                let url = match safety::check_navigation(origin, dest) {
                    Ok(url) => url,
                    Err(block) => {
                        return ActionRecord::error(kind, Some(dest.to_string()), block.to_string());
                    }
                };
                match self.executor.navigate(page, &url).await {
                    Ok(final_url) => {
                        ActionRecord::ok(kind, Some(dest.to_string()), Some(final_url))
                    }
                    Err(e) => ActionRecord::error(kind, Some(dest.to_string()), e.to_string()),
                }
            }

            DecisionKind::Press => {
                let key = decision.value.clone().unwrap_or_else(|| "Enter".to_string());
                match self.executor.press(page, &key).await {
                    Ok(()) => ActionRecord::ok(kind, None, Some(key)),
                    Err(e) => ActionRecord::error(kind, None, e.to_string()),
                }
            }

            DecisionKind::AssertText => {
                let Some(text) = decision.value.as_deref() else {
                    return ActionRecord::error(kind, None, "assertText decision has no text".into());
                };
                match self.executor.assert_text(page, text).await {
                    Ok(()) => ActionRecord::ok(kind, None, Some(text.to_string())),
                    Err(e) => ActionRecord::error(kind, None, e.to_string()),
                }
            }

            DecisionKind::Fill | DecisionKind::Click | DecisionKind::Hover | DecisionKind::Select => {
                let Some(target) = resolve(decision, summary) else {
                    return ActionRecord::error(
                        kind,
                        None,
                        format!("no locator rule matched {:?}", decision.target),
                    );
                };
                self.execute_on_target(page, decision, &target).await
            }

            // End decisions terminate in the step loop before reaching here.
            DecisionKind::End => ActionRecord::end(decision.note.clone()),
        }
    }

    async fn execute_on_target(
        &self,
        page: &Page,
        decision: &Decision,
        target: &ResolvedTarget,
    ) -> ActionRecord {
        let kind = decision.kind;
        let described = Some(target.description.clone());

        match kind {
            DecisionKind::Fill => {
                let typed = decision
                    .value
                    .clone()
                    .unwrap_or_else(|| synthesize_value(target).to_string());
                match self.executor.fill(page, target, &typed).await {
                    Ok(()) => {
                        ActionRecord::ok(kind, described, Some(recorded_value(target, &typed)))
                    }
                    Err(e) => ActionRecord::error(kind, described, e.to_string()),
                }
            }
            DecisionKind::Click => {
                // The safety filter runs before any DOM interaction.
                if let Err(block) = safety::check_click(target) {
                    return ActionRecord::error(kind, described, block.to_string());
                }
                match self.executor.click(page, target).await {
                    Ok(()) => ActionRecord::ok(kind, described, None),
                    Err(e) => ActionRecord::error(kind, described, e.to_string()),
                }
            }
            DecisionKind::Hover => match self.executor.hover(page, target).await {
                Ok(()) => ActionRecord::ok(kind, described, None),
                Err(e) => ActionRecord::error(kind, described, e.to_string()),
            },
            DecisionKind::Select => {
                match self
                    .executor
                    .select(page, target, decision.value.as_deref())
                    .await
                {
                    Ok(chosen) => ActionRecord::ok(kind, described, Some(chosen)),
                    Err(e) => ActionRecord::error(kind, described, e.to_string()),
                }
            }
            _ => unreachable!("execute_on_target only handles element actions"),
        }
    }

    /// Navigate to the login path, fill credentials, submit. Outcome is
    /// reported to the caller as a note; the run continues either way.
    async fn try_login(
        &self,
        page: &Page,
        login: &LoginProfile,
        origin: Option<&Url>,
    ) -> Result<(), String> {
        let base = origin.ok_or("no base URL to resolve the login path against")?;
        let url = base
            .join(&login.path)
            .map_err(|e| format!("login path invalid: {e}"))?;
        self.executor
            .navigate(page, &url)
            .await
            .map_err(|e| e.to_string())?;

        let username = selector_target(&login.username_selector, false);
        let password = selector_target(&login.password_selector, true);
        let submit = selector_target(&login.submit_selector, false);

        self.executor
            .fill(page, &username, &login.username)
            .await
            .map_err(|e| e.to_string())?;
        self.executor
            .fill(page, &password, &login.password)
            .await
            .map_err(|e| e.to_string())?;
        self.executor
            .click(page, &submit)
            .await
            .map_err(|e| e.to_string())?;
        tokio::time::sleep(self.config.settle).await;
        Ok(())
    }
}

fn selector_target(selector: &str, secret: bool) -> ResolvedTarget {
    ResolvedTarget {
        selector: selector.to_string(),
        description: selector.to_string(),
        text: None,
        href: None,
        secret,
        signature: selector.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::parse_script;
    use pretty_assertions::assert_eq;

    fn runner() -> Runner {
        Runner::new(RunnerConfig::default())
    }

    fn summary_with_button() -> PageSummary {
        serde_json::from_str(
            r#"{"url": "https://app.test/", "title": "t", "interactables":
                [{"index": 0, "tag": "button", "text": "Go", "selector": "text=Go"}]}"#,
        )
        .expect("fixture")
    }

    #[tokio::test]
    async fn refill_prefers_scripted_cases() {
        let runner = runner();
        let mut scripted = ScriptedSource::new(
            parse_script("click Go\nfill Email with a@b.com").into_iter().collect(),
        );
        let batch = runner
            .refill(&summary_with_button(), &[], Some(&mut scripted), None)
            .await;
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].kind, DecisionKind::Click);
        assert_eq!(batch[1].kind, DecisionKind::Fill);
    }

    #[tokio::test]
    async fn refill_without_sources_is_empty() {
        let runner = runner();
        let batch = runner.refill(&summary_with_button(), &[], None, None).await;
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn exhausted_scripted_source_without_planner_ends_refill() {
        let runner = runner();
        let mut scripted = ScriptedSource::new(Default::default());
        let batch = runner
            .refill(&summary_with_button(), &[], Some(&mut scripted), None)
            .await;
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn planner_failure_degrades_to_empty_refill() {
        use crate::source::{CallGateway, PlannerSettings};
        use httpmock::prelude::*;
        use std::time::Duration;

        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(500).body("internal error");
            })
            .await;

        let runner = runner();
        let mut planner = GenerativePlanner::new(
            PlannerSettings {
                endpoint: server.url("/v1/chat/completions"),
                model: "planner-test".to_string(),
                api_key: None,
                context_budget: 8192,
                temperature: 0.2,
            },
            CallGateway::new(None, 0, Duration::from_millis(1)),
        );
        let batch = runner
            .refill(&summary_with_button(), &[], None, Some(&mut planner))
            .await;
        assert!(batch.is_empty());
    }
}
