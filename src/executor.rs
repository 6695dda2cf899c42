//! Action executor - performs one browser operation per decision kind
//!
//! Interaction sequence for element actions: poll for the element with
//! exponential backoff (SPAs render after load), scroll it into view, take
//! its clickable point, then act through the page. Every failure is scoped
//! to the action; the runner records it and moves on.

use std::time::Duration;

use chromiumoxide::Page;
use chromiumoxide::element::Element;
use chromiumoxide_cdp::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType,
};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::resolve::ResolvedTarget;

/// Placeholder recorded instead of the literal value typed into secret
/// fields.
pub const MASKED_VALUE: &str = "********";

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("element not found within {timeout_ms}ms: {selector}")]
    ElementNotFound { selector: String, timeout_ms: u64 },

    #[error("interaction failed on {selector}: {message}")]
    Interaction { selector: String, message: String },

    #[error("text \"{0}\" did not appear within the wait bound")]
    TextNotFound(String),

    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("unsupported key \"{0}\"")]
    UnsupportedKey(String),

    #[error("no selectable option on {0}")]
    NoOption(String),
}

pub type ExecResult<T> = Result<T, ExecError>;

/// Named keys the executor can dispatch, with their CDP key identity.
const KEY_TABLE: &[(&str, &str, i64, Option<&str>)] = &[
    ("Enter", "Enter", 13, Some("\r")),
    ("Tab", "Tab", 9, None),
    ("Escape", "Escape", 27, None),
    ("Backspace", "Backspace", 8, None),
    ("Space", " ", 32, Some(" ")),
    ("ArrowUp", "ArrowUp", 38, None),
    ("ArrowDown", "ArrowDown", 40, None),
    ("ArrowLeft", "ArrowLeft", 37, None),
    ("ArrowRight", "ArrowRight", 39, None),
];

#[derive(Debug, Clone)]
pub struct Executor {
    pub interaction_timeout: Duration,
    pub assert_timeout: Duration,
    pub navigation_timeout: Duration,
}

impl Default for Executor {
    fn default() -> Self {
        Self {
            interaction_timeout: Duration::from_secs(5),
            assert_timeout: Duration::from_secs(10),
            navigation_timeout: Duration::from_secs(30),
        }
    }
}

impl Executor {
    /// Clear the field, then type `value` into it.
    pub async fn fill(&self, page: &Page, target: &ResolvedTarget, value: &str) -> ExecResult<()> {
        let element = self.focus(page, target).await?;
        element
            .call_js_fn("function() { this.value = ''; }", false)
            .await
            .map_err(|e| interaction(target, e))?;
        element
            .type_str(value)
            .await
            .map_err(|e| interaction(target, e))?;
        Ok(())
    }

    pub async fn click(&self, page: &Page, target: &ResolvedTarget) -> ExecResult<()> {
        let element = self.locate(page, target).await?;
        let point = clickable_point(&element, target).await?;
        page.click(point)
            .await
            .map_err(|e| interaction(target, e))?;
        Ok(())
    }

    /// Move the cursor over the element without pressing.
    pub async fn hover(&self, page: &Page, target: &ResolvedTarget) -> ExecResult<()> {
        let element = self.locate(page, target).await?;
        let point = clickable_point(&element, target).await?;
        page.move_mouse(point)
            .await
            .map_err(|e| interaction(target, e))?;
        Ok(())
    }

    /// Choose an option: label match, then value match, then the first
    /// enabled option with a non-empty value. Returns the chosen label.
    pub async fn select(
        &self,
        page: &Page,
        target: &ResolvedTarget,
        wanted: Option<&str>,
    ) -> ExecResult<String> {
        let element = self.locate(page, target).await?;
        let wanted_json = serde_json::to_string(&wanted).unwrap_or_else(|_| "null".to_string());
        let body = format!(
            r#"function() {{
                const want = {wanted_json};
                const options = Array.from(this.options || []);
                let choice = null;
                if (want) {{
                    choice = options.find(o => o.label.trim() === want || o.value === want)
                        || options.find(o =>
                            o.label.toLowerCase().includes(want.toLowerCase()));
                }}
                if (!choice) choice = options.find(o => !o.disabled && o.value !== '');
                if (!choice) return null;
                this.value = choice.value;
                this.dispatchEvent(new Event('input', {{ bubbles: true }}));
                this.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return choice.label.trim();
            }}"#
        );
        let returns = element
            .call_js_fn(&body, false)
            .await
            .map_err(|e| interaction(target, e))?;
        returns
            .result
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| ExecError::NoOption(target.selector.clone()))
    }

    /// Dispatch a named key at the page level (whatever currently holds
    /// focus), not scoped to a locator.
    pub async fn press(&self, page: &Page, key: &str) -> ExecResult<()> {
        let (_, cdp_key, code, text) = KEY_TABLE
            .iter()
            .find(|(name, ..)| name.eq_ignore_ascii_case(key))
            .ok_or_else(|| ExecError::UnsupportedKey(key.to_string()))?;

        let down = key_event(DispatchKeyEventType::KeyDown, cdp_key, *code, *text)?;
        page.execute(down)
            .await
            .map_err(|e| ExecError::Interaction {
                selector: format!("key:{key}"),
                message: e.to_string(),
            })?;
        let up = key_event(DispatchKeyEventType::KeyUp, cdp_key, *code, None)?;
        page.execute(up)
            .await
            .map_err(|e| ExecError::Interaction {
                selector: format!("key:{key}"),
                message: e.to_string(),
            })?;
        Ok(())
    }

    /// Wait for `text` to become visible anywhere on the page.
    pub async fn assert_text(&self, page: &Page, text: &str) -> ExecResult<()> {
        let needle = serde_json::to_string(text).unwrap_or_default();
        let expr = format!("!!document.body && document.body.innerText.includes({needle})");
        let deadline = tokio::time::Instant::now() + self.assert_timeout;

        loop {
            let found: bool = page
                .evaluate(expr.as_str())
                .await
                .ok()
                .and_then(|v| v.into_value().ok())
                .unwrap_or(false);
            if found {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ExecError::TextNotFound(text.to_string()));
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    /// Load `url` (already safety-checked by the caller) and wait for the
    /// page to settle. Returns the final URL, which may differ after
    /// redirects.
    pub async fn navigate(&self, page: &Page, url: &Url) -> ExecResult<String> {
        let goto = tokio::time::timeout(self.navigation_timeout, page.goto(url.as_str()));
        goto.await
            .map_err(|_| ExecError::Navigation {
                url: url.to_string(),
                message: format!("timeout after {}ms", self.navigation_timeout.as_millis()),
            })?
            .map_err(|e| ExecError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        page.wait_for_navigation()
            .await
            .map_err(|e| ExecError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string()))
    }

    /// Locate and focus an element (click to focus, which also dismisses
    /// overlays that swallow the first pointer event).
    async fn focus(&self, page: &Page, target: &ResolvedTarget) -> ExecResult<Element> {
        let element = self.locate(page, target).await?;
        let point = clickable_point(&element, target).await?;
        page.click(point)
            .await
            .map_err(|e| interaction(target, e))?;
        Ok(element)
    }

    /// Poll for the element with exponential backoff, then scroll it into
    /// view.
    async fn locate(&self, page: &Page, target: &ResolvedTarget) -> ExecResult<Element> {
        let start = std::time::Instant::now();
        let mut poll_interval = Duration::from_millis(100);
        let max_interval = Duration::from_secs(1);

        let element = loop {
            if let Ok(element) = page.find_element(&target.selector).await {
                break element;
            }
            if start.elapsed() >= self.interaction_timeout {
                return Err(ExecError::ElementNotFound {
                    selector: target.selector.clone(),
                    timeout_ms: self.interaction_timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(poll_interval).await;
            poll_interval = (poll_interval * 2).min(max_interval);
        };

        element
            .scroll_into_view()
            .await
            .map_err(|e| interaction(target, e))?;
        debug!(selector = %target.selector, "element located");
        Ok(element)
    }
}

async fn clickable_point(
    element: &Element,
    target: &ResolvedTarget,
) -> ExecResult<chromiumoxide::layout::Point> {
    element
        .clickable_point()
        .await
        .map_err(|e| interaction(target, e))
}

fn interaction(target: &ResolvedTarget, err: impl std::fmt::Display) -> ExecError {
    ExecError::Interaction {
        selector: target.selector.clone(),
        message: err.to_string(),
    }
}

fn key_event(
    kind: DispatchKeyEventType,
    key: &str,
    code: i64,
    text: Option<&str>,
) -> ExecResult<DispatchKeyEventParams> {
    let mut builder = DispatchKeyEventParams::builder()
        .r#type(kind)
        .key(key)
        .windows_virtual_key_code(code);
    if let Some(text) = text {
        builder = builder.text(text);
    }
    builder.build().map_err(|e| ExecError::Interaction {
        selector: format!("key:{key}"),
        message: e,
    })
}

/// Canned plausible values keyed by field shape, tried in order. The first
/// pattern found in the target's field signature wins.
const VALUE_PATTERNS: &[(&[&str], &str)] = &[
    (&["email", "e-mail"], "qa.tester@example.com"),
    (&["phone", "tel", "mobile"], "+1 555 0134"),
    (&["pass"], "S3cure!Probe42"),
    (&["url", "website", "link"], "https://example.com"),
    (&["zip", "postal"], "94107"),
    (&["city", "town"], "Springfield"),
    (&["name"], "Alex Probe"),
    (&["search", "query"], "integration test"),
    (&["address", "street"], "742 Evergreen Terrace"),
    (&["company", "organization", "organisation"], "Acme Corp"),
    (&["number", "qty", "quantity", "amount", "age"], "42"),
];

/// Synthesize a plausible input value for a fill with no caller-supplied
/// value.
pub fn synthesize_value(target: &ResolvedTarget) -> &'static str {
    let signature = target.signature.to_ascii_lowercase();
    for (needles, value) in VALUE_PATTERNS {
        if needles.iter().any(|n| signature.contains(n)) {
            return value;
        }
    }
    "Test input"
}

/// The value written into the action record: secret fields are masked no
/// matter what was actually typed.
pub fn recorded_value(target: &ResolvedTarget, typed: &str) -> String {
    if target.secret {
        MASKED_VALUE.to_string()
    } else {
        typed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn target(signature: &str, secret: bool) -> ResolvedTarget {
        ResolvedTarget {
            selector: "input".to_string(),
            description: signature.to_string(),
            text: None,
            href: None,
            secret,
            signature: signature.to_string(),
        }
    }

    #[test]
    fn synthesis_matches_field_shapes() {
        assert_eq!(synthesize_value(&target("email work_email", false)), "qa.tester@example.com");
        assert_eq!(synthesize_value(&target("tel contact", false)), "+1 555 0134");
        assert_eq!(synthesize_value(&target("password", true)), "S3cure!Probe42");
        assert_eq!(synthesize_value(&target("zip_code", false)), "94107");
        assert_eq!(synthesize_value(&target("full name", false)), "Alex Probe");
        assert_eq!(synthesize_value(&target("companyField", false)), "Acme Corp");
        assert_eq!(synthesize_value(&target("mystery", false)), "Test input");
    }

    #[test]
    fn synthesis_priority_prefers_earlier_patterns() {
        // "username" contains "name"; "user email" must still map to email.
        assert_eq!(synthesize_value(&target("user email name", false)), "qa.tester@example.com");
        // Password beats name when both appear.
        assert_eq!(synthesize_value(&target("password name", true)), "S3cure!Probe42");
    }

    #[test]
    fn secret_values_are_masked_in_records() {
        assert_eq!(recorded_value(&target("password", true), "hunter2"), MASKED_VALUE);
        assert_eq!(recorded_value(&target("email", false), "a@b.com"), "a@b.com");
    }

    #[test]
    fn key_table_covers_press_vocabulary() {
        for key in ["Enter", "tab", "ESCAPE", "ArrowDown", "space"] {
            assert!(
                KEY_TABLE.iter().any(|(name, ..)| name.eq_ignore_ascii_case(key)),
                "missing key {key}"
            );
        }
    }
}
