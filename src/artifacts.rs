//! Per-run artifact trail: screenshots, screencast frames, actions.json
//!
//! Everything a run leaves behind lives in one directory named after the
//! run id. Screenshots are numbered in capture order; the action log is
//! written once at run end. Public URLs are derived from a configured base
//! so the (external) report layer can link artifacts without knowing the
//! filesystem layout.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chromiumoxide::Page;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide_cdp::cdp::browser_protocol::page::CaptureScreenshotFormat;
use serde::Serialize;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::runner::ActionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Screenshot,
    Video,
}

/// One produced file with its externally visible URL.
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub public_url: String,
}

/// Append-only store for one run's artifacts.
pub struct ArtifactStore {
    dir: PathBuf,
    public_base: String,
    run_segment: String,
    shot_seq: u32,
    artifacts: Vec<Artifact>,
}

impl ArtifactStore {
    /// Create the run directory under `root`.
    pub fn create(root: &Path, run_id: Uuid, public_base: &str) -> Result<Self> {
        let run_segment = run_id.to_string();
        let dir = root.join(&run_segment);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create artifact directory {}", dir.display()))?;
        Ok(Self {
            dir,
            public_base: public_base.trim_end_matches('/').to_string(),
            run_segment,
            shot_seq: 0,
            artifacts: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory screencast frames are written into while recording.
    pub fn video_dir(&self) -> PathBuf {
        self.dir.join("video")
    }

    /// Capture a full-page screenshot as the next numbered artifact.
    pub async fn capture_screenshot(&mut self, page: &Page) -> Result<&Artifact> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        let bytes = page
            .screenshot(params)
            .await
            .context("page screenshot failed")?;

        self.shot_seq += 1;
        let file_name = format!("{:04}.png", self.shot_seq);
        let path = self.dir.join(&file_name);
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("failed to write screenshot {}", path.display()))?;
        debug!(path = %path.display(), "screenshot captured");

        self.artifacts.push(Artifact {
            kind: ArtifactKind::Screenshot,
            path,
            public_url: self.public_url(&file_name),
        });
        Ok(self.artifacts.last().expect("artifact just pushed"))
    }

    /// Register screencast frames collected after the session closed.
    pub fn register_video_frames(&mut self, frames: Vec<PathBuf>) {
        for frame in frames {
            let name = frame
                .file_name()
                .map(|n| format!("video/{}", n.to_string_lossy()))
                .unwrap_or_default();
            self.artifacts.push(Artifact {
                kind: ArtifactKind::Video,
                public_url: self.public_url(&name),
                path: frame,
            });
        }
    }

    /// Write the authoritative action log for this run.
    pub fn write_actions_json(
        &self,
        actions: &[ActionRecord],
        console_errors: &[String],
    ) -> Result<PathBuf> {
        let path = self.dir.join("actions.json");
        let payload = json!({
            "actions": actions,
            "consoleErrors": console_errors,
        });
        std::fs::write(&path, serde_json::to_vec_pretty(&payload)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn screenshot_count(&self) -> u32 {
        self.shot_seq
    }

    pub fn into_artifacts(self) -> Vec<Artifact> {
        self.artifacts
    }

    fn public_url(&self, file_name: &str) -> String {
        format!("{}/{}/{}", self.public_base, self.run_segment, file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DecisionKind;
    use crate::runner::{ActionRecord, ActionStatus};
    use pretty_assertions::assert_eq;

    #[test]
    fn actions_json_has_the_contract_shape() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let run_id = Uuid::new_v4();
        let store =
            ArtifactStore::create(tmp.path(), run_id, "https://qa.test/artifacts/").expect("store");

        let actions = vec![
            ActionRecord::ok(DecisionKind::Click, Some("<button \"Login\">".into()), None),
            ActionRecord::error(DecisionKind::Fill, None, "no locator rule matched".into()),
        ];
        let errors = vec!["console.error: boom".to_string()];
        let path = store.write_actions_json(&actions, &errors).expect("write");

        let payload: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).expect("read")).expect("json");
        assert_eq!(payload["actions"].as_array().expect("actions").len(), 2);
        assert_eq!(payload["consoleErrors"][0], "console.error: boom");
        assert_eq!(payload["actions"][0]["status"], "ok");
        assert_eq!(payload["actions"][1]["status"], "error");
    }

    #[test]
    fn public_urls_are_derived_from_base_and_run_id() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let run_id = Uuid::new_v4();
        let mut store =
            ArtifactStore::create(tmp.path(), run_id, "https://qa.test/artifacts/").expect("store");

        store.register_video_frames(vec![store.video_dir().join("frame-00001.jpg")]);
        let artifacts = store.into_artifacts();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].kind, ArtifactKind::Video);
        assert_eq!(
            artifacts[0].public_url,
            format!("https://qa.test/artifacts/{run_id}/video/frame-00001.jpg")
        );
    }
}
