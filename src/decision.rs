//! Decision model - the unit of work flowing from a decision source to the runner
//!
//! Decisions arrive from two places with very different hygiene: pre-parsed
//! structured cases, and free-form JSON produced by the generative planner.
//! Both funnel into the same closed `DecisionKind` enum and a single
//! `TargetRef` variant type, so downstream code never dispatches on bare
//! strings or probes optional fields.

use serde::{Deserialize, Serialize};

/// What a decision asks the runner to do.
///
/// Closed set: kind-specific payloads (`value` for fill, a key name for
/// press) live on [`Decision`], and each executor arm checks exactly the
/// fields its kind requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DecisionKind {
    Fill,
    Click,
    Hover,
    Press,
    Select,
    Navigate,
    AssertText,
    Note,
    End,
}

impl DecisionKind {
    /// Parse a kind from the loose vocabulary decision services use.
    ///
    /// Returns `None` for unknown kinds; the caller drops the decision
    /// rather than guessing.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fill" | "type" | "input" | "input_text" => Some(Self::Fill),
            "click" | "tap" | "click_element" => Some(Self::Click),
            "hover" => Some(Self::Hover),
            "press" | "keypress" | "key" => Some(Self::Press),
            "select" | "select_option" => Some(Self::Select),
            "navigate" | "goto" | "go_to_url" | "open_url" => Some(Self::Navigate),
            "asserttext" | "assert_text" | "assert" | "expect" | "verify" => Some(Self::AssertText),
            "note" | "comment" | "log" => Some(Self::Note),
            "end" | "done" | "finish" | "stop" => Some(Self::End),
            _ => None,
        }
    }

    /// Kinds that act on a page element and therefore need target resolution.
    pub fn needs_target(self) -> bool {
        matches!(self, Self::Fill | Self::Click | Self::Hover | Self::Select)
    }
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Fill => "fill",
            Self::Click => "click",
            Self::Hover => "hover",
            Self::Press => "press",
            Self::Select => "select",
            Self::Navigate => "navigate",
            Self::AssertText => "assertText",
            Self::Note => "note",
            Self::End => "end",
        };
        f.write_str(name)
    }
}

/// Field-shape hints describing an element without a concrete selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldHint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl FieldHint {
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.name.is_none() && self.placeholder.is_none() && self.text.is_none()
    }

    /// Hint matching only on visible text (buttons, links).
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Hint matching a form field by name or placeholder.
    pub fn field(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            name: Some(field.clone()),
            placeholder: Some(field),
            ..Self::default()
        }
    }
}

/// Reference to the element a decision targets. Exactly one way of
/// identifying the element is populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetRef {
    /// Index into the interactables of the *current* summary snapshot.
    /// Never valid across steps; the resolver only sees the summary taken
    /// in the same iteration.
    Element(usize),
    /// Explicit CSS selector supplied by the decision source.
    Selector(String),
    /// Field-shape hints resolved against the current summary.
    Hint(FieldHint),
}

/// One proposed step, consumed exactly once from the decision queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub kind: DecisionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Decision {
    pub fn new(kind: DecisionKind) -> Self {
        Self {
            kind,
            target: None,
            value: None,
            note: None,
        }
    }

    pub fn with_target(mut self, target: TargetRef) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn click_text(text: impl Into<String>) -> Self {
        Self::new(DecisionKind::Click).with_target(TargetRef::Hint(FieldHint::text(text)))
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self::new(DecisionKind::Navigate).with_value(url)
    }

    pub fn end() -> Self {
        Self::new(DecisionKind::End)
    }
}

/// The loose JSON shape decision services actually emit.
///
/// Kind and target information may arrive flattened (`id`, `selector`,
/// `name` as top-level keys) or nested under `target`; values may be
/// numbers as well as strings. Everything is optional and normalized by
/// [`RawDecision::into_decision`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDecision {
    #[serde(alias = "kind")]
    pub action: Option<String>,
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub target: Option<Box<RawDecision>>,
    #[serde(default, deserialize_with = "de_loose_string")]
    pub value: Option<String>,
    #[serde(default, alias = "notes")]
    pub note: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

fn de_loose_string<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(de)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }))
}

impl RawDecision {
    /// Normalize into a typed [`Decision`], or `None` when the kind is
    /// missing or unrecognized.
    pub fn into_decision(self) -> Option<Decision> {
        let kind = DecisionKind::parse(self.action.as_deref()?)?;

        // Navigation and key presses carry their payload in `value`; tolerate
        // services that put it under `url` / `key` instead.
        let value = match kind {
            DecisionKind::Navigate => self.value.clone().or_else(|| self.url.clone()),
            DecisionKind::Press => self.value.clone().or_else(|| self.key.clone()),
            _ => self.value.clone(),
        };

        let target = self
            .target
            .as_deref()
            .and_then(RawDecision::target_ref)
            .or_else(|| self.target_ref());

        Some(Decision {
            kind,
            target,
            value,
            note: self.note,
        })
    }

    /// Extract a target reference from this shape's flattened keys.
    fn target_ref(&self) -> Option<TargetRef> {
        if let Some(selector) = &self.selector {
            if !selector.trim().is_empty() {
                return Some(TargetRef::Selector(selector.trim().to_string()));
            }
        }
        if let Some(id) = &self.id {
            // A numeric id is a summary index; a string id is a DOM id hint.
            if let Some(index) = id.as_u64() {
                return Some(TargetRef::Element(index as usize));
            }
            if let Some(index) = id.as_str().and_then(|s| s.parse::<usize>().ok()) {
                return Some(TargetRef::Element(index));
            }
        }
        let hint = FieldHint {
            id: self.id.as_ref().and_then(|v| v.as_str().map(str::to_string)),
            name: self.name.clone(),
            placeholder: self.placeholder.clone(),
            text: self.text.clone(),
        };
        if hint.is_empty() {
            None
        } else {
            Some(TargetRef::Hint(hint))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn kind_parse_accepts_aliases() {
        assert_eq!(DecisionKind::parse("type"), Some(DecisionKind::Fill));
        assert_eq!(DecisionKind::parse("DONE"), Some(DecisionKind::End));
        assert_eq!(DecisionKind::parse("go_to_url"), Some(DecisionKind::Navigate));
        assert_eq!(DecisionKind::parse("assert_text"), Some(DecisionKind::AssertText));
        assert_eq!(DecisionKind::parse("teleport"), None);
    }

    #[test]
    fn raw_decision_numeric_id_is_summary_index() {
        let raw: RawDecision =
            serde_json::from_str(r#"{"action": "click", "id": 3}"#).expect("parse");
        let decision = raw.into_decision().expect("decision");
        assert_eq!(decision.kind, DecisionKind::Click);
        assert_eq!(decision.target, Some(TargetRef::Element(3)));
    }

    #[test]
    fn raw_decision_string_id_is_dom_hint() {
        let raw: RawDecision =
            serde_json::from_str(r#"{"action": "fill", "id": "email-input", "value": "x"}"#)
                .expect("parse");
        let decision = raw.into_decision().expect("decision");
        match decision.target {
            Some(TargetRef::Hint(hint)) => assert_eq!(hint.id.as_deref(), Some("email-input")),
            other => panic!("expected hint target, got {other:?}"),
        }
    }

    #[test]
    fn raw_decision_nested_target_wins() {
        let raw: RawDecision = serde_json::from_str(
            r##"{"action": "click", "target": {"selector": "#submit"}, "text": "ignored"}"##,
        )
        .expect("parse");
        let decision = raw.into_decision().expect("decision");
        assert_eq!(
            decision.target,
            Some(TargetRef::Selector("#submit".to_string()))
        );
    }

    #[test]
    fn raw_decision_numeric_value_stringified() {
        let raw: RawDecision =
            serde_json::from_str(r#"{"action": "fill", "name": "zip", "value": 94107}"#)
                .expect("parse");
        let decision = raw.into_decision().expect("decision");
        assert_eq!(decision.value.as_deref(), Some("94107"));
    }

    #[test]
    fn raw_decision_unknown_kind_dropped() {
        let raw: RawDecision =
            serde_json::from_str(r#"{"action": "launch_missiles"}"#).expect("parse");
        assert!(raw.into_decision().is_none());
    }

    #[test]
    fn navigate_url_key_tolerated() {
        let raw: RawDecision =
            serde_json::from_str(r#"{"action": "navigate", "url": "/dashboard"}"#).expect("parse");
        let decision = raw.into_decision().expect("decision");
        assert_eq!(decision.value.as_deref(), Some("/dashboard"));
    }
}
