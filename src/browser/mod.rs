//! Browser infrastructure: per-run sessions and the screencast recorder

mod recorder;
mod wrapper;

pub use crate::browser_setup::{download_managed_browser, find_browser_executable};
pub use recorder::VideoRecorder;
pub use wrapper::BrowserSession;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Failed to find browser executable: {0}")]
    NotFound(String),

    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("Failed to create page: {0}")]
    PageCreationFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("IO error: {0}")]
    IoError(String),
}

pub type BrowserResult<T> = Result<T, BrowserError>;
