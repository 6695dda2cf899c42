//! Screencast video recorder
//!
//! Implements the record-video mode on top of CDP screencasting: Chrome
//! pushes JPEG frames, each one is acked (Chrome stops sending without the
//! ack) and written as a numbered file. The frame files are collected as
//! video artifacts after the session closes.

use std::path::PathBuf;

use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chromiumoxide::Page;
use chromiumoxide_cdp::cdp::browser_protocol::page::{
    EventScreencastFrame, ScreencastFrameAckParams, StartScreencastFormat, StartScreencastParams,
    StopScreencastParams,
};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct VideoRecorder {
    dir: PathBuf,
    collector: JoinHandle<()>,
}

impl VideoRecorder {
    /// Start screencasting `page` into `dir`.
    pub async fn start(page: &Page, dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create video directory {}", dir.display()))?;

        let mut frames = page
            .event_listener::<EventScreencastFrame>()
            .await
            .context("failed to subscribe to screencast frames")?;

        let ack_page = page.clone();
        let frames_dir = dir.clone();
        let collector = tokio::spawn(async move {
            let mut seq = 0u32;
            while let Some(frame) = frames.next().await {
                // Ack first; an unacked frame stalls the whole screencast.
                if let Err(e) = ack_page
                    .execute(ScreencastFrameAckParams::new(frame.session_id))
                    .await
                {
                    warn!("screencast ack failed: {e}");
                }
                match BASE64.decode(&frame.data) {
                    Ok(bytes) => {
                        seq += 1;
                        let path = frames_dir.join(format!("frame-{seq:05}.jpg"));
                        if let Err(e) = std::fs::write(&path, bytes) {
                            warn!("failed to write screencast frame {}: {e}", path.display());
                        }
                    }
                    Err(e) => warn!("screencast frame was not valid base64: {e}"),
                }
            }
            debug!(frames = seq, "screencast collector finished");
        });

        page.execute(
            StartScreencastParams::builder()
                .format(StartScreencastFormat::Jpeg)
                .every_nth_frame(2)
                .build(),
        )
        .await
        .context("failed to start screencast")?;

        info!(dir = %dir.display(), "video recording started");
        Ok(Self { dir, collector })
    }

    /// Stop recording and return the captured frame files in order.
    pub async fn stop(self, page: &Page) -> Vec<PathBuf> {
        if let Err(e) = page.execute(StopScreencastParams::default()).await {
            warn!("failed to stop screencast: {e}");
        }
        self.collector.abort();

        let mut frames: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.extension().is_some_and(|ext| ext == "jpg"))
                    .collect()
            })
            .unwrap_or_default();
        frames.sort();
        info!(frames = frames.len(), "video recording stopped");
        frames
    }
}
