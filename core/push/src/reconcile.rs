//! Response reconciliation: map the server's verdict back to local state.

use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::warn;

use meterlog_store::{FailureGroup, ReconcilePlan};

use crate::wire::PushResponse;

/// Outcome string recorded for batch members the server did not mention.
const UNREPORTED_RESPONSE: &str = "failed: unreported - message missing from server response";

/// Summary of one reconciled batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub persisted: usize,
    pub deduplicated: usize,
    pub failed: usize,
    /// Sample of distinct failure strings, for user-facing reporting.
    pub failure_samples: Vec<String>,
}

/// Build the store's reconciliation plan from a transport response.
///
/// The server partitions the batch by transformed id; this maps each verdict
/// back to the local id. Any batch member absent from all three result sets
/// is treated as an unreported failure rather than silently dropped, so the
/// invariant holds: every transmitted message ends the cycle either synced
/// or with its retry count incremented.
pub fn reconcile_response(
    response: &PushResponse,
    id_map: &HashMap<String, String>,
    batch_local_ids: &[String],
) -> (ReconcilePlan, BatchOutcome) {
    let mut accounted: HashSet<&str> = HashSet::with_capacity(batch_local_ids.len());
    let mut plan = ReconcilePlan::default();

    for transformed in &response.results.persisted.message_ids {
        if let Some(local) = id_map.get(transformed) {
            if accounted.insert(local) {
                plan.persisted.push(local.clone());
            }
        } else {
            warn!("Server reported unknown persisted id {}", transformed);
        }
    }

    for transformed in &response.results.deduplicated.message_ids {
        if let Some(local) = id_map.get(transformed) {
            if accounted.insert(local) {
                plan.deduplicated.push(local.clone());
            }
        } else {
            warn!("Server reported unknown deduplicated id {}", transformed);
        }
    }

    // Group failures by identical outcome string so the store issues one
    // update per distinct cause. BTreeMap keeps group order deterministic.
    let mut failure_groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for detail in &response.results.failed.details {
        let Some(local) = id_map.get(&detail.message_id) else {
            warn!("Server reported unknown failed id {}", detail.message_id);
            continue;
        };
        if accounted.insert(local) {
            let outcome = format!("failed: {} - {}", detail.code, detail.error);
            failure_groups.entry(outcome).or_default().push(local.clone());
        }
    }

    let unreported: Vec<String> = batch_local_ids
        .iter()
        .filter(|id| !accounted.contains(id.as_str()))
        .cloned()
        .collect();
    if !unreported.is_empty() {
        warn!(
            "{} batch messages missing from server response; treating as failed",
            unreported.len()
        );
        failure_groups
            .entry(UNREPORTED_RESPONSE.to_string())
            .or_default()
            .extend(unreported);
    }

    let outcome = BatchOutcome {
        persisted: plan.persisted.len(),
        deduplicated: plan.deduplicated.len(),
        failed: failure_groups.values().map(Vec::len).sum(),
        failure_samples: failure_groups.keys().cloned().collect(),
    };

    plan.failed = failure_groups
        .into_iter()
        .map(|(response, message_ids)| FailureGroup {
            response,
            message_ids,
        })
        .collect();

    (plan, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{FailedSet, FailureDetail, OutcomeSet, PushResponse, PushResults, PushSummary};

    fn id_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(t, l)| (t.to_string(), l.to_string()))
            .collect()
    }

    fn response(
        persisted: &[&str],
        deduplicated: &[&str],
        failed: &[(&str, &str, &str)],
    ) -> PushResponse {
        PushResponse {
            results: PushResults {
                persisted: OutcomeSet {
                    count: persisted.len() as u64,
                    message_ids: persisted.iter().map(|s| s.to_string()).collect(),
                },
                deduplicated: OutcomeSet {
                    count: deduplicated.len() as u64,
                    message_ids: deduplicated.iter().map(|s| s.to_string()).collect(),
                },
                failed: FailedSet {
                    count: failed.len() as u64,
                    details: failed
                        .iter()
                        .map(|(id, code, error)| FailureDetail {
                            message_id: id.to_string(),
                            code: code.to_string(),
                            error: error.to_string(),
                        })
                        .collect(),
                },
            },
            summary: PushSummary::default(),
        }
    }

    #[test]
    fn test_partition_maps_back_to_local_ids() {
        let map = id_map(&[("t1", "m1"), ("t2", "m2"), ("t3", "m3")]);
        let batch = vec!["m1".to_string(), "m2".to_string(), "m3".to_string()];

        let (plan, outcome) = reconcile_response(
            &response(&["t1"], &["t2"], &[("t3", "validation", "bad project")]),
            &map,
            &batch,
        );

        assert_eq!(plan.persisted, vec!["m1"]);
        assert_eq!(plan.deduplicated, vec!["m2"]);
        assert_eq!(plan.failed.len(), 1);
        assert_eq!(plan.failed[0].response, "failed: validation - bad project");
        assert_eq!(plan.failed[0].message_ids, vec!["m3"]);
        assert_eq!(
            outcome,
            BatchOutcome {
                persisted: 1,
                deduplicated: 1,
                failed: 1,
                failure_samples: vec!["failed: validation - bad project".to_string()],
            }
        );
    }

    #[test]
    fn test_failures_grouped_by_identical_error() {
        let map = id_map(&[("t1", "m1"), ("t2", "m2"), ("t3", "m3")]);
        let batch = vec!["m1".to_string(), "m2".to_string(), "m3".to_string()];

        let (plan, outcome) = reconcile_response(
            &response(
                &[],
                &[],
                &[
                    ("t1", "validation", "bad project"),
                    ("t2", "validation", "bad project"),
                    ("t3", "quota", "limit reached"),
                ],
            ),
            &map,
            &batch,
        );

        assert_eq!(plan.failed.len(), 2);
        let by_response: HashMap<&str, usize> = plan
            .failed
            .iter()
            .map(|g| (g.response.as_str(), g.message_ids.len()))
            .collect();
        assert_eq!(by_response["failed: validation - bad project"], 2);
        assert_eq!(by_response["failed: quota - limit reached"], 1);
        assert_eq!(outcome.failed, 3);
    }

    #[test]
    fn test_unreported_messages_become_failures() {
        let map = id_map(&[("t1", "m1"), ("t2", "m2")]);
        let batch = vec!["m1".to_string(), "m2".to_string()];

        let (plan, outcome) = reconcile_response(&response(&["t1"], &[], &[]), &map, &batch);

        assert_eq!(plan.persisted, vec!["m1"]);
        assert_eq!(plan.failed.len(), 1);
        assert_eq!(plan.failed[0].response, UNREPORTED_RESPONSE);
        assert_eq!(plan.failed[0].message_ids, vec!["m2"]);
        assert_eq!(outcome.failed, 1);
    }

    #[test]
    fn test_unknown_server_ids_ignored() {
        let map = id_map(&[("t1", "m1")]);
        let batch = vec!["m1".to_string()];

        let (plan, outcome) =
            reconcile_response(&response(&["t1", "t-unknown"], &[], &[]), &map, &batch);

        assert_eq!(plan.persisted, vec!["m1"]);
        assert!(plan.failed.is_empty());
        assert_eq!(outcome.persisted, 1);
    }

    #[test]
    fn test_duplicate_verdicts_counted_once() {
        let map = id_map(&[("t1", "m1")]);
        let batch = vec!["m1".to_string()];

        // Server reports the same id as both persisted and deduplicated;
        // the first verdict wins and the union still covers the batch.
        let (plan, outcome) = reconcile_response(&response(&["t1"], &["t1"], &[]), &map, &batch);

        assert_eq!(plan.persisted, vec!["m1"]);
        assert!(plan.deduplicated.is_empty());
        assert_eq!(outcome.persisted + outcome.deduplicated + outcome.failed, 1);
    }
}
