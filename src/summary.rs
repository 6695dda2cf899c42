//! Interactable summarizer - one-shot scan of the page's actionable surface
//!
//! Produces a flat, stable-ordered list of visible, actionable elements with
//! enough descriptive metadata to re-identify them. Indices are only valid
//! within the snapshot they came from; the runner takes a fresh summary every
//! iteration and never caches one across steps.

use anyhow::{Context, Result};
use chromiumoxide::Page;
use serde::{Deserialize, Serialize};

/// One visible, actionable element in a snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Interactable {
    /// Position in this snapshot. Not stable across snapshots.
    pub index: usize,
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub disabled: bool,
    /// Best-effort selector, synthesized with priority id > name >
    /// placeholder > visible text.
    pub selector: String,
}

impl Interactable {
    /// Short human-readable description used in action records and planner
    /// context, e.g. `<button "Login" #login-btn>`.
    pub fn describe(&self) -> String {
        let mut out = format!("<{}", self.tag);
        if let Some(text) = self.text.as_deref().filter(|t| !t.is_empty()) {
            out.push_str(&format!(" \"{}\"", truncate(text, 40)));
        }
        if let Some(id) = self.id.as_deref().filter(|i| !i.is_empty()) {
            out.push_str(&format!(" #{id}"));
        } else if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            out.push_str(&format!(" name={name}"));
        }
        out.push('>');
        out
    }

    /// True for fields whose typed value must never appear in the action log.
    pub fn is_secret(&self) -> bool {
        if self.input_type.as_deref() == Some("password") {
            return true;
        }
        [&self.name, &self.id, &self.placeholder, &self.label]
            .into_iter()
            .flatten()
            .any(|s| s.to_ascii_lowercase().contains("pass"))
    }

    /// True for plain text-entry fields usable as a fill target of last
    /// resort.
    pub fn is_generic_input(&self) -> bool {
        if self.disabled {
            return false;
        }
        match self.tag.as_str() {
            "textarea" => true,
            "input" => !matches!(
                self.input_type.as_deref(),
                Some("submit" | "button" | "checkbox" | "radio" | "hidden" | "file" | "image")
            ),
            _ => false,
        }
    }
}

/// Snapshot of the interactive surface of the current page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageSummary {
    pub url: String,
    pub title: String,
    pub interactables: Vec<Interactable>,
}

impl PageSummary {
    pub fn by_index(&self, index: usize) -> Option<&Interactable> {
        self.interactables.iter().find(|i| i.index == index)
    }
}

/// DOM scan evaluated in-page. Selection rule: the actionable tag set, kept
/// only when the computed style is not hidden and the bounding box has
/// positive area. Returns the whole summary as one JSON string so the scan
/// is a single CDP round trip.
const SCAN_JS: &str = r#"
(() => {
  const visible = (el) => {
    const style = window.getComputedStyle(el);
    if (style.display === 'none' || style.visibility === 'hidden') return false;
    const rect = el.getBoundingClientRect();
    return rect.width > 0 && rect.height > 0;
  };
  const attr = (el, name) => {
    const v = el.getAttribute(name);
    return v && v.length ? v : null;
  };
  const esc = (v) => v.replace(/\\/g, '\\\\').replace(/"/g, '\\"');
  const selectorFor = (el, text) => {
    if (el.id) return '#' + (window.CSS && CSS.escape ? CSS.escape(el.id) : el.id);
    const name = attr(el, 'name');
    if (name) return el.tagName.toLowerCase() + '[name="' + esc(name) + '"]';
    const ph = attr(el, 'placeholder');
    if (ph) return '[placeholder="' + esc(ph) + '"]';
    if (text) return 'text=' + text;
    return el.tagName.toLowerCase();
  };
  const labelFor = (el) => {
    if (el.labels && el.labels.length) {
      const t = el.labels[0].innerText.trim();
      if (t.length) return t;
    }
    return attr(el, 'aria-label');
  };
  const out = [];
  const nodes = document.querySelectorAll(
    'input, textarea, select, button, a, [role="button"]'
  );
  for (const el of nodes) {
    if (!visible(el)) continue;
    const text = ((el.innerText || el.value || '').trim().slice(0, 80)) || null;
    out.push({
      index: out.length,
      tag: el.tagName.toLowerCase(),
      role: attr(el, 'role'),
      type: attr(el, 'type'),
      id: el.id && el.id.length ? el.id : null,
      name: attr(el, 'name'),
      placeholder: attr(el, 'placeholder'),
      label: labelFor(el),
      text,
      href: attr(el, 'href'),
      required: !!el.required,
      disabled: !!el.disabled,
      selector: selectorFor(el, text),
    });
  }
  return JSON.stringify({
    url: location.href,
    title: document.title,
    interactables: out,
  });
})()
"#;

/// Scan the live page for its current interactables. No side effects, no
/// caching; cheap enough to run once per loop iteration.
pub async fn summarize(page: &Page) -> Result<PageSummary> {
    let payload: String = page
        .evaluate(SCAN_JS)
        .await
        .context("interactable scan failed to evaluate")?
        .into_value()
        .context("interactable scan returned a non-string payload")?;

    let summary: PageSummary =
        serde_json::from_str(&payload).context("interactable scan returned malformed JSON")?;
    Ok(summary)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn input(name: &str, input_type: Option<&str>) -> Interactable {
        Interactable {
            index: 0,
            tag: "input".to_string(),
            input_type: input_type.map(str::to_string),
            name: Some(name.to_string()),
            selector: format!("input[name=\"{name}\"]"),
            ..Interactable::default()
        }
    }

    #[test]
    fn password_fields_are_secret() {
        assert!(input("login", Some("password")).is_secret());
        assert!(input("user_passphrase", Some("text")).is_secret());
        assert!(!input("email", Some("email")).is_secret());
    }

    #[test]
    fn submit_inputs_are_not_generic_fill_targets() {
        assert!(input("q", Some("text")).is_generic_input());
        assert!(input("q", None).is_generic_input());
        assert!(!input("go", Some("submit")).is_generic_input());
        let mut disabled = input("q", Some("text"));
        disabled.disabled = true;
        assert!(!disabled.is_generic_input());
    }

    #[test]
    fn describe_prefers_text_and_id() {
        let mut el = Interactable {
            tag: "button".to_string(),
            text: Some("Login".to_string()),
            id: Some("login-btn".to_string()),
            ..Interactable::default()
        };
        assert_eq!(el.describe(), "<button \"Login\" #login-btn>");
        el.id = None;
        el.name = Some("login".to_string());
        assert_eq!(el.describe(), "<button \"Login\" name=login>");
    }

    #[test]
    fn summary_round_trips_scan_payload() {
        let payload = r#"{
            "url": "https://app.test/login",
            "title": "Login",
            "interactables": [
                {"index": 0, "tag": "input", "type": "email", "name": "email",
                 "required": true, "disabled": false, "selector": "input[name=\"email\"]"},
                {"index": 1, "tag": "button", "text": "Login", "selector": "text=Login"}
            ]
        }"#;
        let summary: PageSummary = serde_json::from_str(payload).expect("parse");
        assert_eq!(summary.interactables.len(), 2);
        assert!(summary.by_index(1).is_some());
        assert!(summary.by_index(7).is_none());
        assert!(summary.interactables[0].required);
    }
}
