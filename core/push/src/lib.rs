//! meterlog Push Synchronization Engine
//!
//! This module pushes locally recorded usage messages to the remote service:
//! - Per-user identity namespace transform for collision-free ids
//! - Batch assembly with deduplicated entity payloads
//! - HTTP transport with error classification
//! - Per-batch reconciliation of server verdicts into local sync state
//! - A session controller with auth rechecks, force reset and dry run

pub mod batch;
pub mod credentials;
pub mod namespace;
pub mod reconcile;
pub mod session;
pub mod transport;
pub mod wire;

// Re-export main types
pub use batch::{BatchPayload, build_batch};
pub use credentials::{CredentialProvider, StoredCredentials};
pub use namespace::IdTransformer;
pub use reconcile::reconcile_response;
pub use session::{AbortReason, PushConfig, PushReport, PushSession};
pub use transport::{ApiClient, PushTransport};
pub use wire::{PushRequest, PushResponse};
