//! Case adapter - translates uploaded test cases into decisions
//!
//! Two ingestion shapes feed the scripted decision queue: rows with explicit
//! `action`/`selector`/`value`/`target` columns, and free-text behavior
//! lines ("clicks the Login button") parsed by first-match rules. The
//! adapter is purely textual; it never touches the page.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::VecDeque;
use tracing::debug;

use crate::decision::{Decision, DecisionKind, FieldHint, TargetRef};

/// Key names accepted by a `press` step. Anything else falls through to the
/// default whole-line click rule.
const KEY_VOCABULARY: &[&str] = &[
    "Enter",
    "Tab",
    "Escape",
    "Backspace",
    "Space",
    "ArrowUp",
    "ArrowDown",
    "ArrowLeft",
    "ArrowRight",
];

static RE_GIVEN_LOGGED_IN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^given\b.*\blogged\s+in").expect("given-logged-in regex"));
static RE_NAVIGATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bnavigat(?:es|ed|e)\s+(?:to|towards)\s+(\S+)").expect("navigate regex")
});
static RE_HOVER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bhovers?(?:ed)?\s+(?:over|on)\s+(?:the\s+)?(.+)").expect("hover regex")
});
static RE_CLICK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:clicks?|selects?|chooses?|opens?|go(?:es)?\s+to)\s+(?:on\s+)?(?:the\s+)?(.+)")
        .expect("click regex")
});
static RE_FILL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bfills?\s+(?:in\s+)?(.+?)\s+with\s+(.+)").expect("fill regex")
});
static RE_PRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bpress(?:es)?\s+(\w+)").expect("press regex"));
static RE_ASSERT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:then|expects?|should)\b.*?\bsees?\s+(.+)").expect("assert regex")
});

/// Parse one behavior line into zero or more decisions.
///
/// Rules apply in priority order; the first match wins. An unmatched line is
/// treated as a click target wholesale, which keeps sloppy case files moving
/// instead of silently skipping steps.
pub fn parse_line(line: &str) -> Vec<Decision> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }

    if RE_GIVEN_LOGGED_IN.is_match(line) {
        return vec![Decision::new(DecisionKind::Note).with_note(line)];
    }

    if let Some(caps) = RE_NAVIGATE.captures(line) {
        return vec![Decision::navigate(clean_capture(&caps[1]))];
    }

    if let Some(caps) = RE_HOVER.captures(line) {
        return vec![
            Decision::new(DecisionKind::Hover)
                .with_target(TargetRef::Hint(FieldHint::text(clean_capture(&caps[1])))),
        ];
    }

    if let Some(caps) = RE_CLICK.captures(line) {
        return vec![Decision::click_text(clean_capture(&caps[1]))];
    }

    if let Some(caps) = RE_FILL.captures(line) {
        let field = clean_capture(&caps[1]);
        let value = clean_capture(&caps[2]);
        return vec![
            Decision::new(DecisionKind::Fill)
                .with_target(TargetRef::Hint(FieldHint::field(field)))
                .with_value(value),
        ];
    }

    if let Some(caps) = RE_PRESS.captures(line) {
        let requested = &caps[1];
        if let Some(key) = KEY_VOCABULARY
            .iter()
            .find(|k| k.eq_ignore_ascii_case(requested))
        {
            return vec![Decision::new(DecisionKind::Press).with_value(*key)];
        }
        debug!(key = requested, "press step with unknown key, treating line as click");
    }

    if let Some(caps) = RE_ASSERT.captures(line) {
        return vec![
            Decision::new(DecisionKind::AssertText).with_value(clean_capture(&caps[1])),
        ];
    }

    vec![Decision::click_text(clean_capture(line))]
}

/// Parse a multi-line behavior script, one step per line.
pub fn parse_script(script: &str) -> Vec<Decision> {
    script.lines().flat_map(parse_line).collect()
}

/// One row of an uploaded case sheet.
///
/// Either the explicit columns are populated, or a single free-text cell
/// (header matching "bdd" or "test script") holds a behavior script. The
/// spreadsheet file itself is parsed upstream; this crate consumes rows.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaseRow {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default, alias = "test_script", alias = "script")]
    pub bdd: Option<String>,
}

impl CaseRow {
    /// Lower this row into decisions. Unknown explicit actions are dropped
    /// (the queue must only ever contain executable steps).
    pub fn decisions(&self) -> Vec<Decision> {
        if let Some(script) = self.bdd.as_deref() {
            return parse_script(script);
        }

        let Some(kind) = self.action.as_deref().and_then(DecisionKind::parse) else {
            if let Some(action) = &self.action {
                debug!(action, "case row with unknown action dropped");
            }
            return Vec::new();
        };

        let mut decision = Decision::new(kind);
        if let Some(selector) = self.selector.as_deref().filter(|s| !s.trim().is_empty()) {
            decision = decision.with_target(TargetRef::Selector(selector.trim().to_string()));
        } else if let Some(target) = self.target.as_deref().filter(|t| !t.trim().is_empty()) {
            decision = decision.with_target(TargetRef::Hint(FieldHint::text(target.trim())));
        }
        if let Some(value) = &self.value {
            decision = decision.with_value(value.clone());
        }
        vec![decision]
    }
}

/// Build the scripted decision queue from uploaded case rows.
pub fn queue_from_rows(rows: &[CaseRow]) -> VecDeque<Decision> {
    rows.iter().flat_map(CaseRow::decisions).collect()
}

/// Strip quoting and trailing punctuation a human left in the cell.
fn clean_capture(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(['.', ','])
        .trim_matches(['"', '\'', '`'])
        .trim()
        .to_string()
}
