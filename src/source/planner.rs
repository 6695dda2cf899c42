//! Generative planner - asks an external decision service what to do next
//!
//! The planner formats the current page summary plus recent history into a
//! chat-completion request demanding a strict JSON array of decisions, then
//! parses whatever comes back as tolerantly as possible: the first balanced
//! JSON array wins, a bare object is wrapped, and anything unparsable
//! becomes an empty batch (which the runner reads as "nothing left to do").

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use super::{CallGateway, DecisionSource, PlannerError, PlannerResult};
use crate::decision::{Decision, RawDecision};
use crate::runner::ActionRecord;
use crate::summary::PageSummary;

/// How many trailing action records are offered as planner context.
const HISTORY_WINDOW: usize = 20;

#[derive(Debug, Clone)]
pub struct PlannerSettings {
    /// Chat-completions endpoint of the decision service.
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Byte cap applied to the serialized page/history context.
    pub context_budget: usize,
    pub temperature: f64,
}

pub struct GenerativePlanner {
    client: reqwest::Client,
    settings: PlannerSettings,
    gateway: CallGateway,
}

impl GenerativePlanner {
    pub fn new(settings: PlannerSettings, gateway: CallGateway) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings,
            gateway,
        }
    }

    async fn complete(&self, system: &str, user: &str) -> PlannerResult<String> {
        let body = json!({
            "model": self.settings.model,
            "temperature": self.settings.temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let mut request = self.client.post(&self.settings.endpoint).json(&body);
        if let Some(key) = &self.settings.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.as_u16() == 429 {
            return Err(PlannerError::RateLimited(text));
        }
        if !status.is_success() {
            return Err(PlannerError::Service(format!("HTTP {status}: {text}")));
        }

        let payload: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| PlannerError::Service(format!("malformed completion response: {e}")))?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                PlannerError::Service("completion response missing message content".to_string())
            })
    }
}

#[async_trait]
impl DecisionSource for GenerativePlanner {
    async fn next_batch(
        &mut self,
        current: &PageSummary,
        history: &[ActionRecord],
        batch: usize,
    ) -> PlannerResult<Vec<Decision>> {
        let system = build_instruction(batch);
        let user = build_context(current, history, self.settings.context_budget);

        let raw = self.gateway.call(|| self.complete(&system, &user)).await?;
        debug!(bytes = raw.len(), "decision service responded");

        Ok(parse_decision_batch(&raw, batch))
    }

    fn name(&self) -> &'static str {
        "generative-planner"
    }
}

/// System instruction: strict JSON array, bounded size, no destructive
/// actions, explicit end when the page is exhausted.
fn build_instruction(batch: usize) -> String {
    format!(
        "You drive an exploratory test of a web page. Given the page's \
         interactable elements and the actions taken so far, propose the next \
         test steps.\n\
         Respond with a JSON array only, no prose, of at most {batch} objects. \
         Each object has an \"action\" of fill|click|hover|press|select|navigate|\
         assertText|note|end, an optional target (\"id\" for an element index \
         from the summary, or \"selector\", or \"name\"/\"placeholder\"/\"text\" \
         hints), an optional \"value\", and an optional \"note\".\n\
         Never propose destructive actions: nothing that deletes, purchases, \
         pays, unsubscribes, logs out or closes accounts. Stay on the current \
         site.\n\
         When no reasonable step remains, respond with [{{\"action\": \"end\"}}]."
    )
}

/// Serialize the page and a trailing window of history, truncated to the
/// byte budget so request size stays bounded regardless of page complexity.
fn build_context(current: &PageSummary, history: &[ActionRecord], budget: usize) -> String {
    let recent: Vec<_> = history
        .iter()
        .rev()
        .take(HISTORY_WINDOW)
        .rev()
        .collect();
    let context = json!({
        "page": current,
        "recentActions": recent,
    });
    truncate_to_budget(context.to_string(), budget)
}

fn truncate_to_budget(mut s: String, budget: usize) -> String {
    if s.len() > budget {
        let mut end = budget;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

/// Extract decisions from the service's free-form reply. Unparsable text or
/// items are dropped, never fatal; the batch is capped at `cap`.
pub(crate) fn parse_decision_batch(text: &str, cap: usize) -> Vec<Decision> {
    let Some(value) = extract_json_array(text) else {
        warn!("decision service reply contained no JSON batch");
        return Vec::new();
    };
    let Some(items) = value.as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            serde_json::from_value::<RawDecision>(item.clone())
                .ok()
                .and_then(RawDecision::into_decision)
        })
        .take(cap)
        .collect()
}

/// Find the first well-formed JSON array in `text`; failing that, the first
/// well-formed object, wrapped into a one-element array.
pub(crate) fn extract_json_array(text: &str) -> Option<serde_json::Value> {
    extract_balanced(text, b'[', b']')
        .or_else(|| extract_balanced(text, b'{', b'}').map(|obj| json!([obj])))
}

/// Scan for a balanced `open`..`close` span that parses as JSON, skipping
/// brackets inside string literals. Each candidate start is tried in turn,
/// so prose containing stray brackets before the real payload is tolerated.
fn extract_balanced(text: &str, open: u8, close: u8) -> Option<serde_json::Value> {
    let bytes = text.as_bytes();
    let mut search_from = 0;

    while let Some(offset) = bytes[search_from..].iter().position(|&b| b == open) {
        let start = search_from + offset;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (i, &b) in bytes[start..].iter().enumerate() {
            if escaped {
                escaped = false;
                continue;
            }
            match b {
                b'\\' if in_string => escaped = true,
                b'"' => in_string = !in_string,
                _ if in_string => {}
                b if b == open => depth += 1,
                b if b == close => {
                    depth -= 1;
                    if depth == 0 {
                        let candidate = &text[start..=start + i];
                        if let Ok(value) = serde_json::from_str(candidate) {
                            return Some(value);
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
        search_from = start + 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{DecisionKind, TargetRef};
    use httpmock::prelude::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn extracts_array_surrounded_by_prose() {
        let text = r#"Sure! Here is the plan:
            [{"action": "click", "text": "Login"}, {"action": "end"}]
            Let me know if you need anything else."#;
        let batch = parse_decision_batch(text, 5);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].kind, DecisionKind::Click);
        assert_eq!(batch[1].kind, DecisionKind::End);
    }

    #[test]
    fn garbage_reply_is_an_empty_batch() {
        assert!(parse_decision_batch("not json at all", 5).is_empty());
        assert!(parse_decision_batch("", 5).is_empty());
        assert!(parse_decision_batch("[1, 2, \"oops\"", 5).is_empty());
    }

    #[test]
    fn single_object_reply_is_wrapped() {
        let batch = parse_decision_batch(r#"{"action": "navigate", "value": "/home"}"#, 5);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].kind, DecisionKind::Navigate);
    }

    #[test]
    fn stray_brackets_before_payload_are_skipped() {
        let text = r#"steps [see above] then: [{"action": "end"}]"#;
        let batch = parse_decision_batch(text, 5);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].kind, DecisionKind::End);
    }

    #[test]
    fn batch_is_capped_and_bad_items_skipped() {
        let text = r#"[
            {"action": "click", "id": 0},
            17,
            {"action": "warp_reality"},
            {"action": "click", "id": 1},
            {"action": "click", "id": 2}
        ]"#;
        let batch = parse_decision_batch(text, 2);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].target, Some(TargetRef::Element(0)));
        assert_eq!(batch[1].target, Some(TargetRef::Element(1)));
    }

    #[test]
    fn context_truncated_to_byte_budget() {
        let summary = PageSummary {
            url: "https://app.test/".into(),
            title: "x".repeat(4096),
            interactables: Vec::new(),
        };
        let context = build_context(&summary, &[], 512);
        assert!(context.len() <= 512);
    }

    fn settings(server: &MockServer) -> PlannerSettings {
        PlannerSettings {
            endpoint: server.url("/v1/chat/completions"),
            model: "planner-test".to_string(),
            api_key: Some("secret".to_string()),
            context_budget: 16 * 1024,
            temperature: 0.2,
        }
    }

    fn gateway() -> CallGateway {
        CallGateway::new(None, 0, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn next_batch_parses_service_reply() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(serde_json::json!({
                    "choices": [{"message": {"content":
                        "Plan: [{\"action\": \"click\", \"text\": \"Login\"}]"}}]
                }));
            })
            .await;

        let mut planner = GenerativePlanner::new(settings(&server), gateway());
        let batch = planner
            .next_batch(&PageSummary::default(), &[], 5)
            .await
            .expect("batch");

        mock.assert_async().await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].kind, DecisionKind::Click);
    }

    #[tokio::test]
    async fn unparsable_service_reply_is_empty_batch_not_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200).json_body(serde_json::json!({
                    "choices": [{"message": {"content": "not json at all"}}]
                }));
            })
            .await;

        let mut planner = GenerativePlanner::new(settings(&server), gateway());
        let batch = planner
            .next_batch(&PageSummary::default(), &[], 5)
            .await
            .expect("no error");
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn server_error_propagates_as_service_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(500).body("boom");
            })
            .await;

        let mut planner = GenerativePlanner::new(settings(&server), gateway());
        let err = planner
            .next_batch(&PageSummary::default(), &[], 5)
            .await
            .expect_err("error");
        assert!(matches!(err, PlannerError::Service(_)));
    }
}
