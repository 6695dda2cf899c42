//! Per-run browser session
//!
//! One session per run: its own Chrome process, profile directory and
//! handler task, nothing shared with concurrent runs. The handler MUST be
//! aborted when the session ends or it runs indefinitely after the browser
//! is gone, and the temp profile can only be removed after `browser.wait()`
//! has released all file handles.

use anyhow::{Context, Result};
use chromiumoxide::browser::Browser;
use chromiumoxide::page::Page;
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::{BrowserError, BrowserResult};
use crate::browser_setup::launch_browser;

pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    user_data_dir: Option<PathBuf>,
}

impl BrowserSession {
    /// Launch a fresh browser with an isolated profile directory.
    ///
    /// The profile path embeds the process id and a random component so
    /// concurrent runs never contend on a Chrome profile lock.
    pub async fn launch(headless: bool, window: (u32, u32)) -> Result<Self> {
        let user_data_dir = std::env::temp_dir().join(format!(
            "uiprobe_run_{}_{}",
            std::process::id(),
            Uuid::new_v4().simple()
        ));

        let (browser, handler) = launch_browser(headless, Some(user_data_dir.clone()), window)
            .await
            .context("browser launch failed")?;

        Ok(Self {
            browser,
            handler,
            user_data_dir: Some(user_data_dir),
        })
    }

    /// Open the run's page. Starts blank; the runner navigates it.
    pub async fn new_page(&self) -> BrowserResult<Page> {
        self.browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::PageCreationFailed(e.to_string()))
    }

    /// Shut the session down: close the browser, wait for the process to
    /// exit, then remove the temp profile. All best-effort; a crashed
    /// Chrome must not keep the run from finalizing.
    pub async fn close(mut self) {
        info!("closing browser session");
        if let Err(e) = self.browser.close().await {
            warn!("failed to close browser cleanly: {e}");
        }
        if let Err(e) = self.browser.wait().await {
            warn!("failed to wait for browser exit: {e}");
        }
        self.handler.abort();
        self.cleanup_temp_dir();
    }

    fn cleanup_temp_dir(&mut self) {
        if let Some(path) = self.user_data_dir.take() {
            if let Err(e) = std::fs::remove_dir_all(&path) {
                warn!(
                    "failed to clean up profile directory {}: {e}. Manual cleanup may be required.",
                    path.display()
                );
            }
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler.abort();
        // Browser::drop kills the Chrome process. If close() never ran, the
        // profile directory is orphaned; flag it rather than racing the
        // still-exiting process for its file handles.
        if let Some(dir) = &self.user_data_dir {
            warn!(
                "browser session dropped without close(); profile directory orphaned: {}",
                dir.display()
            );
        }
    }
}
