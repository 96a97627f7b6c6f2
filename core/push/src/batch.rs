//! Batch assembly: messages plus their referenced entities, namespaced.

use std::collections::{HashMap, HashSet};

use meterlog_common::{Result, UserId};
use meterlog_store::{MessageRecord, UsageDb};

use crate::namespace::IdTransformer;
use crate::wire::{PushRequest, WireEntities, WireMachine, WireMessage, WireProject, WireSession};

/// One assembled batch, ready for transmission.
#[derive(Debug, Clone)]
pub struct BatchPayload {
    pub request: PushRequest,
    /// Local ids of the batch, in selection order, for reconciliation.
    pub local_ids: Vec<String>,
    /// transformed message id → local message id.
    pub id_map: HashMap<String, String>,
}

impl BatchPayload {
    pub fn len(&self) -> usize {
        self.local_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local_ids.is_empty()
    }
}

/// Assemble a wire payload from a batch of eligible messages.
///
/// Every identifier a message references is rewritten into the user's
/// namespace, and the entity maps are deduplicated by transformed id so an
/// entity shared by many messages is transmitted once per batch.
pub fn build_batch(
    db: &UsageDb,
    transformer: &IdTransformer,
    user_id: &UserId,
    messages: &[MessageRecord],
) -> Result<BatchPayload> {
    let mut machine_ids = HashSet::new();
    let mut project_ids = HashSet::new();
    let mut session_ids = HashSet::new();

    let mut local_ids = Vec::with_capacity(messages.len());
    let mut id_map = HashMap::with_capacity(messages.len());
    let mut wire_messages = Vec::with_capacity(messages.len());

    for msg in messages {
        machine_ids.insert(msg.machine_id.clone());
        project_ids.insert(msg.project_id.clone());
        session_ids.insert(msg.session_id.clone());

        let transformed_id = transformer.transform(&msg.id);
        local_ids.push(msg.id.clone());
        id_map.insert(transformed_id.clone(), msg.id.clone());

        wire_messages.push(WireMessage {
            id: transformed_id,
            session_id: transformer.transform(&msg.session_id),
            project_id: transformer.transform(&msg.project_id),
            machine_id: transformer.transform(&msg.machine_id),
            user_id: user_id.as_str().to_string(),
            role: msg.role.clone(),
            model: msg.model.clone(),
            input_tokens: msg.input_tokens,
            output_tokens: msg.output_tokens,
            cache_creation_tokens: msg.cache_creation_tokens,
            cache_read_tokens: msg.cache_read_tokens,
            price_per_input_token: msg.price_per_input_token,
            price_per_output_token: msg.price_per_output_token,
            price_per_cache_write_token: msg.price_per_cache_write_token,
            price_per_cache_read_token: msg.price_per_cache_read_token,
            cache_duration_minutes: msg.cache_duration_minutes,
            message_cost: msg.message_cost,
            timestamp: msg.timestamp,
            writer: msg.writer.clone(),
        });
    }

    let mut entities = WireEntities::default();

    let machine_ids: Vec<String> = machine_ids.into_iter().collect();
    for machine in db.machines_by_ids(&machine_ids)? {
        let id = transformer.transform(&machine.id);
        entities.machines.insert(
            id.clone(),
            WireMachine {
                id,
                name: machine.name,
                platform: machine.platform,
            },
        );
    }

    let project_ids: Vec<String> = project_ids.into_iter().collect();
    for project in db.projects_by_ids(&project_ids)? {
        let id = transformer.transform(&project.id);
        entities.projects.insert(
            id.clone(),
            WireProject {
                id,
                name: project.name,
                path: project.path,
            },
        );
    }

    let session_ids: Vec<String> = session_ids.into_iter().collect();
    for session in db.sessions_by_ids(&session_ids)? {
        let id = transformer.transform(&session.id);
        entities.sessions.insert(
            id.clone(),
            WireSession {
                id,
                project_id: transformer.transform(&session.project_id),
                machine_id: transformer.transform(&session.machine_id),
                started_at: session.started_at,
            },
        );
    }

    Ok(BatchPayload {
        request: PushRequest {
            messages: wire_messages,
            entities,
        },
        local_ids,
        id_map,
    })
}
