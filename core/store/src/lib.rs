//! Local SQLite store for meterlog usage records and sync state.
//!
//! This module owns the embedded database: the immutable `messages` table and
//! its referenced entity tables (written by the ingestion pipeline), and the
//! `sync_status` table owned by the push engine. It exposes:
//! - Eligibility selection for push batches
//! - Read-only statistics projections
//! - Atomic per-batch reconciliation of push outcomes
//! - Explicit retry reset for force mode

pub mod db;
pub mod models;
pub mod sync_status;

pub use db::UsageDb;
pub use models::{
    MachineEntity, MessageRecord, ProjectEntity, SessionEntity, SyncStats, SyncStatusRow,
};
pub use sync_status::{FailureGroup, ReconcilePlan};
