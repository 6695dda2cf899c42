//! Console and page-error capture
//!
//! Page events are forwarded into an explicit channel that the runner
//! drains once, at the end of the run. Nothing downstream observes the
//! capture mid-run, so callback ordering never matters.

use anyhow::{Context, Result};
use chromiumoxide::Page;
use chromiumoxide_cdp::cdp::js_protocol::runtime::{
    ConsoleApiCalledType, EventConsoleApiCalled, EventExceptionThrown, RemoteObject,
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Collector for error-level console output and uncaught page exceptions.
pub struct ConsoleCapture {
    rx: mpsc::UnboundedReceiver<String>,
    listeners: Vec<JoinHandle<()>>,
}

impl ConsoleCapture {
    /// Attach to `page` and start forwarding error events.
    pub async fn attach(page: &Page) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut exceptions = page
            .event_listener::<EventExceptionThrown>()
            .await
            .context("failed to subscribe to page exceptions")?;
        let exception_tx = tx.clone();
        let exception_task = tokio::spawn(async move {
            while let Some(event) = exceptions.next().await {
                let details = &event.exception_details;
                let message = details
                    .exception
                    .as_ref()
                    .and_then(|obj| obj.description.clone())
                    .unwrap_or_else(|| details.text.clone());
                let _ = exception_tx.send(format!("uncaught exception: {message}"));
            }
        });

        let mut console = page
            .event_listener::<EventConsoleApiCalled>()
            .await
            .context("failed to subscribe to console events")?;
        let console_task = tokio::spawn(async move {
            while let Some(event) = console.next().await {
                if event.r#type != ConsoleApiCalledType::Error {
                    continue;
                }
                let message = format_args_preview(&event.args);
                let _ = tx.send(format!("console.error: {message}"));
            }
        });

        Ok(Self {
            rx,
            listeners: vec![exception_task, console_task],
        })
    }

    /// Stop listening and return everything captured so far, in arrival
    /// order. Called exactly once, at run end.
    pub fn drain(mut self) -> Vec<String> {
        for task in &self.listeners {
            task.abort();
        }
        self.rx.close();

        let mut errors = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            errors.push(message);
        }
        debug!(count = errors.len(), "console capture drained");
        errors
    }
}

fn format_args_preview(args: &[RemoteObject]) -> String {
    if args.is_empty() {
        return "(no arguments)".to_string();
    }
    args.iter()
        .map(|arg| {
            arg.value
                .as_ref()
                .map(|v| v.to_string())
                .or_else(|| arg.description.clone())
                .unwrap_or_else(|| "?".to_string())
        })
        .collect::<Vec<_>>()
        .join(" ")
}
