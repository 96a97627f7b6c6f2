//! Wire types for the batch push endpoint.
//!
//! All identifiers in these payloads are post-transformation (namespaced).
//! The response contract is the typed
//! `results.{persisted,deduplicated,failed}` shape; legacy count-only
//! responses are not supported.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One usage message as transmitted to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub id: String,
    pub session_id: String,
    pub project_id: String,
    pub machine_id: String,
    pub user_id: String,
    pub role: String,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_creation_tokens: i64,
    pub cache_read_tokens: i64,
    pub price_per_input_token: f64,
    pub price_per_output_token: f64,
    pub price_per_cache_write_token: f64,
    pub price_per_cache_read_token: f64,
    pub cache_duration_minutes: i64,
    pub message_cost: f64,
    /// Unix millis of the original message.
    pub timestamp: i64,
    pub writer: String,
}

/// A machine entity referenced by a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMachine {
    pub id: String,
    pub name: String,
    pub platform: String,
}

/// A project entity referenced by a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireProject {
    pub id: String,
    pub name: String,
    pub path: String,
}

/// A session entity referenced by a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSession {
    pub id: String,
    pub project_id: String,
    pub machine_id: String,
    pub started_at: i64,
}

/// Entity maps, deduplicated by transformed id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEntities {
    pub machines: HashMap<String, WireMachine>,
    pub projects: HashMap<String, WireProject>,
    pub sessions: HashMap<String, WireSession>,
}

/// Batch push request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub messages: Vec<WireMessage>,
    pub entities: WireEntities,
}

/// Per-outcome id set in the response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeSet {
    pub count: u64,
    #[serde(default)]
    pub message_ids: Vec<String>,
}

/// One structured per-message failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDetail {
    pub message_id: String,
    pub code: String,
    pub error: String,
}

/// Failed subset of the response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedSet {
    pub count: u64,
    #[serde(default)]
    pub details: Vec<FailureDetail>,
}

/// The server's verdict, partitioning the batch into three disjoint sets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResults {
    #[serde(default)]
    pub persisted: OutcomeSet,
    #[serde(default)]
    pub deduplicated: OutcomeSet,
    #[serde(default)]
    pub failed: FailedSet,
}

/// Aggregate response summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSummary {
    pub total_messages: u64,
    pub messages_succeeded: u64,
    pub messages_failed: u64,
    #[serde(default)]
    pub processing_time_ms: u64,
}

/// Batch push response body.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub results: PushResults,
    #[serde(default)]
    pub summary: PushSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_camel_case() {
        let request = PushRequest {
            messages: vec![WireMessage {
                id: "a".to_string(),
                session_id: "s".to_string(),
                project_id: "p".to_string(),
                machine_id: "m".to_string(),
                user_id: "u".to_string(),
                role: "assistant".to_string(),
                model: "sonnet".to_string(),
                input_tokens: 1,
                output_tokens: 2,
                cache_creation_tokens: 0,
                cache_read_tokens: 0,
                price_per_input_token: 0.0,
                price_per_output_token: 0.0,
                price_per_cache_write_token: 0.0,
                price_per_cache_read_token: 0.0,
                cache_duration_minutes: 5,
                message_cost: 0.01,
                timestamp: 1000,
                writer: "cli".to_string(),
            }],
            entities: WireEntities::default(),
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"sessionId\""));
        assert!(json.contains("\"cacheCreationTokens\""));
        assert!(json.contains("\"pricePerInputToken\""));
        assert!(!json.contains("session_id"));
    }

    #[test]
    fn test_response_parses_canonical_shape() {
        let json = r#"{
            "results": {
                "persisted": { "count": 2, "messageIds": ["a", "b"] },
                "deduplicated": { "count": 1, "messageIds": ["c"] },
                "failed": {
                    "count": 1,
                    "details": [{ "messageId": "d", "code": "validation", "error": "bad project" }]
                }
            },
            "summary": {
                "totalMessages": 4,
                "messagesSucceeded": 3,
                "messagesFailed": 1,
                "processingTimeMs": 12
            }
        }"#;

        let response: PushResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.results.persisted.message_ids, vec!["a", "b"]);
        assert_eq!(response.results.failed.details[0].code, "validation");
        assert_eq!(response.summary.total_messages, 4);
    }

    #[test]
    fn test_response_tolerates_missing_sections() {
        let json = r#"{ "results": { "persisted": { "count": 0 } } }"#;
        let response: PushResponse = serde_json::from_str(json).unwrap();
        assert!(response.results.persisted.message_ids.is_empty());
        assert!(response.results.failed.details.is_empty());
    }
}
