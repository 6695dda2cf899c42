//! Action resolver - maps an abstract decision to a concrete page target
//!
//! Resolution is pure: it only consults the summary snapshot taken this
//! iteration, never the live page. A `None` result is a failed action for
//! the caller, not a no-op.
//!
//! Fallback order: explicit selector (unless it is a `text=` pseudo
//! selector) > summary index > id hint > name hint > placeholder hint >
//! role+text heuristic for buttons and links > free-text match > first
//! generic input field (fill only).

use tracing::debug;

use crate::decision::{Decision, DecisionKind, FieldHint, TargetRef};
use crate::summary::{Interactable, PageSummary};

/// A decision target pinned to something the executor can act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// CSS selector handed to the browser.
    pub selector: String,
    /// Human-readable description for the action record.
    pub description: String,
    /// Visible text, for the safety filter.
    pub text: Option<String>,
    /// Link destination, for the safety filter.
    pub href: Option<String>,
    /// Whether the typed value must be masked in the record.
    pub secret: bool,
    /// Concatenated field-shape attributes (type, name, id, placeholder,
    /// label), fed to input value synthesis.
    pub signature: String,
}

impl ResolvedTarget {
    fn from_interactable(el: &Interactable) -> Self {
        let signature = [
            el.input_type.as_deref(),
            el.name.as_deref(),
            el.id.as_deref(),
            el.placeholder.as_deref(),
            el.label.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");

        Self {
            selector: el.selector.clone(),
            description: el.describe(),
            text: el.text.clone(),
            href: el.href.clone(),
            secret: el.is_secret(),
            signature,
        }
    }

    fn from_raw_selector(selector: &str) -> Self {
        Self {
            selector: selector.to_string(),
            description: selector.to_string(),
            text: None,
            href: None,
            secret: selector.to_ascii_lowercase().contains("pass"),
            signature: selector.to_string(),
        }
    }
}

/// Resolve `decision` against the current snapshot.
pub fn resolve(decision: &Decision, summary: &PageSummary) -> Option<ResolvedTarget> {
    let resolved = match &decision.target {
        Some(TargetRef::Selector(selector)) => resolve_selector(selector, summary),
        Some(TargetRef::Element(index)) => summary
            .by_index(*index)
            .map(ResolvedTarget::from_interactable),
        Some(TargetRef::Hint(hint)) => resolve_hint(hint, summary),
        None => None,
    };

    resolved.or_else(|| last_resort(decision, summary))
}

fn resolve_selector(selector: &str, summary: &PageSummary) -> Option<ResolvedTarget> {
    // `text=` selectors are summarizer shorthand, not real CSS; route them
    // through the text-matching rules instead.
    if let Some(text) = selector.strip_prefix("text=") {
        return resolve_hint(&FieldHint::text(text), summary);
    }
    // Prefer the snapshot's descriptor when the selector matches one, so the
    // record and safety filter see text/href metadata.
    if let Some(el) = summary.interactables.iter().find(|i| i.selector == selector) {
        return Some(ResolvedTarget::from_interactable(el));
    }
    Some(ResolvedTarget::from_raw_selector(selector))
}

fn resolve_hint(hint: &FieldHint, summary: &PageSummary) -> Option<ResolvedTarget> {
    let els = &summary.interactables;

    if let Some(id) = hint.id.as_deref() {
        if let Some(el) = els.iter().find(|e| attr_eq(e.id.as_deref(), id)) {
            return Some(ResolvedTarget::from_interactable(el));
        }
    }
    if let Some(name) = hint.name.as_deref() {
        if let Some(el) = els.iter().find(|e| attr_eq(e.name.as_deref(), name)) {
            return Some(ResolvedTarget::from_interactable(el));
        }
    }
    if let Some(placeholder) = hint.placeholder.as_deref() {
        if let Some(el) = els
            .iter()
            .find(|e| attr_contains(e.placeholder.as_deref(), placeholder))
        {
            return Some(ResolvedTarget::from_interactable(el));
        }
    }
    if let Some(text) = hint.text.as_deref() {
        // Buttons and links first: "click Login" almost always means the
        // control, not a heading that mentions the word.
        if let Some(el) = els
            .iter()
            .filter(|e| is_clickable_role(e))
            .find(|e| attr_contains(e.text.as_deref(), text))
        {
            return Some(ResolvedTarget::from_interactable(el));
        }
        if let Some(el) = els.iter().find(|e| {
            attr_contains(e.text.as_deref(), text)
                || attr_contains(e.label.as_deref(), text)
                || attr_contains(e.placeholder.as_deref(), text)
                || attr_contains(e.name.as_deref(), text)
                || attr_contains(e.id.as_deref(), text)
        }) {
            return Some(ResolvedTarget::from_interactable(el));
        }
    }
    None
}

/// A fill with nothing better to aim at goes to the first usable text input.
fn last_resort(decision: &Decision, summary: &PageSummary) -> Option<ResolvedTarget> {
    if decision.kind != DecisionKind::Fill {
        return None;
    }
    let el = summary.interactables.iter().find(|e| e.is_generic_input())?;
    debug!(selector = %el.selector, "fill target fell back to first generic input");
    Some(ResolvedTarget::from_interactable(el))
}

fn is_clickable_role(el: &Interactable) -> bool {
    el.tag == "button"
        || el.tag == "a"
        || el.role.as_deref() == Some("button")
        || matches!(el.input_type.as_deref(), Some("submit" | "button"))
}

fn attr_eq(attr: Option<&str>, wanted: &str) -> bool {
    attr.is_some_and(|a| a.eq_ignore_ascii_case(wanted))
}

fn attr_contains(attr: Option<&str>, wanted: &str) -> bool {
    attr.is_some_and(|a| a.to_ascii_lowercase().contains(&wanted.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Decision;
    use pretty_assertions::assert_eq;

    fn summary() -> PageSummary {
        let payload = r##"{
            "url": "https://app.test/",
            "title": "Fixture",
            "interactables": [
                {"index": 0, "tag": "input", "type": "email", "name": "email",
                 "placeholder": "Work email", "selector": "input[name=\"email\"]"},
                {"index": 1, "tag": "input", "type": "password", "name": "password",
                 "selector": "input[name=\"password\"]"},
                {"index": 2, "tag": "button", "type": "submit", "text": "Login",
                 "selector": "text=Login"},
                {"index": 3, "tag": "a", "text": "Forgot password?",
                 "href": "/reset", "selector": "text=Forgot password?"},
                {"index": 4, "tag": "input", "type": "text", "id": "city",
                 "selector": "#city"}
            ]
        }"##;
        serde_json::from_str(payload).expect("fixture summary")
    }

    #[test]
    fn explicit_selector_passes_through() {
        let decision = Decision::new(DecisionKind::Click)
            .with_target(TargetRef::Selector("#submit".to_string()));
        let target = resolve(&decision, &summary()).expect("resolved");
        assert_eq!(target.selector, "#submit");
    }

    #[test]
    fn text_pseudo_selector_routes_to_text_match() {
        let decision = Decision::new(DecisionKind::Click)
            .with_target(TargetRef::Selector("text=Login".to_string()));
        let target = resolve(&decision, &summary()).expect("resolved");
        assert_eq!(target.text.as_deref(), Some("Login"));
    }

    #[test]
    fn summary_index_resolves_descriptor() {
        let decision =
            Decision::new(DecisionKind::Click).with_target(TargetRef::Element(2));
        let target = resolve(&decision, &summary()).expect("resolved");
        assert_eq!(target.selector, "text=Login");
        let gone = Decision::new(DecisionKind::Click).with_target(TargetRef::Element(42));
        assert_eq!(resolve(&gone, &summary()), None);
    }

    #[test]
    fn hint_resolution_order_id_name_placeholder() {
        let by_id = Decision::new(DecisionKind::Fill).with_target(TargetRef::Hint(FieldHint {
            id: Some("city".to_string()),
            ..FieldHint::default()
        }));
        assert_eq!(resolve(&by_id, &summary()).expect("id").selector, "#city");

        let by_name = Decision::new(DecisionKind::Fill)
            .with_target(TargetRef::Hint(FieldHint::field("email")));
        assert_eq!(
            resolve(&by_name, &summary()).expect("name").selector,
            "input[name=\"email\"]"
        );

        let by_placeholder =
            Decision::new(DecisionKind::Fill).with_target(TargetRef::Hint(FieldHint {
                placeholder: Some("work email".to_string()),
                ..FieldHint::default()
            }));
        assert_eq!(
            resolve(&by_placeholder, &summary()).expect("placeholder").selector,
            "input[name=\"email\"]"
        );
    }

    #[test]
    fn text_hint_prefers_clickable_roles() {
        // "password" appears in an input name and in link text; a click by
        // text must pick the link, not the input.
        let decision = Decision::click_text("password");
        let target = resolve(&decision, &summary()).expect("resolved");
        assert_eq!(target.selector, "text=Forgot password?");
    }

    #[test]
    fn password_target_is_secret() {
        let decision = Decision::new(DecisionKind::Fill)
            .with_target(TargetRef::Hint(FieldHint::field("password")));
        assert!(resolve(&decision, &summary()).expect("resolved").secret);
    }

    #[test]
    fn fill_falls_back_to_first_generic_input() {
        let decision = Decision::new(DecisionKind::Fill)
            .with_target(TargetRef::Hint(FieldHint::field("no-such-field")));
        let target = resolve(&decision, &summary()).expect("fallback");
        assert_eq!(target.selector, "input[name=\"email\"]");
    }

    #[test]
    fn click_with_unresolvable_target_fails() {
        let decision = Decision::click_text("Nonexistent Button");
        assert_eq!(resolve(&decision, &summary()), None);
        let untargeted = Decision::new(DecisionKind::Click);
        assert_eq!(resolve(&untargeted, &summary()), None);
    }
}
