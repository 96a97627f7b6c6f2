//! Push session controller: the state machine driving batch cycles.
//!
//! One session runs to completion (or fatal abort) before another may start
//! against the same store. Batches are strictly sequential; the only
//! suspension points are transport calls.

use std::sync::Arc;
use tracing::{debug, info, warn};

use meterlog_common::{Error, Result, UserId};
use meterlog_store::UsageDb;

use crate::batch::build_batch;
use crate::credentials::CredentialProvider;
use crate::namespace::IdTransformer;
use crate::reconcile::reconcile_response;
use crate::transport::PushTransport;

/// Cap on user-facing failure detail samples.
const MAX_FAILURE_SAMPLES: usize = 5;

/// Configuration for a push session.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Maximum number of messages per batch.
    pub batch_size: usize,
    /// Delivery attempts per message before it requires a force reset.
    pub max_retries: u32,
    /// Re-verify authentication every N batches (0 disables rechecks).
    pub auth_recheck_interval: u32,
    /// Report what would be pushed without any network call or mutation.
    pub dry_run: bool,
    /// Reset retry state for unsynchronized messages before batching.
    pub force: bool,
    /// Optional id scope for the force reset.
    pub force_scope: Option<Vec<String>>,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 3,
            auth_recheck_interval: 10,
            dry_run: false,
            force: false,
            force_scope: None,
        }
    }
}

/// Why a session stopped before exhausting the eligible set.
///
/// Authentication loss is not represented here: it surfaces as a fatal
/// `Error::Authentication` instead, because the user must re-authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The endpoint became unreachable; remaining batches were left eligible
    /// for the next session rather than hammering it.
    Connectivity(String),
}

/// Outcome of one push session.
#[derive(Debug, Clone, Default)]
pub struct PushReport {
    /// Messages eligible when the session started.
    pub eligible: u64,
    /// Rows whose retry state was cleared by force mode.
    pub reset: Option<usize>,
    /// Batches that would be required (dry run only).
    pub planned_batches: Option<u64>,
    pub batches_sent: u32,
    pub persisted: usize,
    pub deduplicated: usize,
    pub failed: usize,
    /// Capped sample of distinct failure strings.
    pub failure_samples: Vec<String>,
    pub aborted: Option<AbortReason>,
}

impl PushReport {
    pub fn succeeded(&self) -> usize {
        self.persisted + self.deduplicated
    }
}

/// The push session state machine.
pub struct PushSession<T: PushTransport> {
    db: UsageDb,
    transport: T,
    credentials: Arc<dyn CredentialProvider>,
    config: PushConfig,
}

impl<T: PushTransport> PushSession<T> {
    /// Create a new push session.
    pub fn new(
        db: UsageDb,
        transport: T,
        credentials: Arc<dyn CredentialProvider>,
        config: PushConfig,
    ) -> Self {
        Self {
            db,
            transport,
            credentials,
            config,
        }
    }

    /// Access the underlying store (read-only projections).
    pub fn db(&self) -> &UsageDb {
        &self.db
    }

    /// Access the transport.
    pub fn transport_ref(&self) -> &T {
        &self.transport
    }

    /// Consume the session, returning the store.
    pub fn into_db(self) -> UsageDb {
        self.db
    }

    /// Run the session to completion.
    ///
    /// Returns `Ok` with a report even when individual messages failed;
    /// errors are reserved for fatal conditions (no credential, auth loss,
    /// local storage failure).
    pub async fn run(&mut self) -> Result<PushReport> {
        if self.config.batch_size == 0 {
            return Err(Error::InvalidInput(
                "batch_size must be at least 1".to_string(),
            ));
        }

        // Precondition: a credential must exist before any network call.
        if !self.credentials.is_authenticated().await {
            return Err(Error::Precondition(
                "Not authenticated. Log in before pushing usage data.".to_string(),
            ));
        }
        let user_id = self.credentials.user_id().await?;
        let transformer = IdTransformer::new(&user_id);

        let mut report = PushReport::default();

        if self.config.dry_run {
            return self.dry_run_report(report);
        }

        if self.config.force {
            let reset = self
                .db
                .reset_retries(self.config.force_scope.as_deref())?;
            report.reset = Some(reset);
        }

        report.eligible = self.db.eligible_count(self.config.max_retries)?;
        if report.eligible == 0 {
            // Nothing to push; don't touch the network at all.
            info!("No eligible messages; queue is already synced or maxed out");
            return Ok(report);
        }

        // Verify the credential actually works before spending batch cycles.
        self.transport.health_check().await?;
        info!("Authentication verified for user {}", user_id);

        info!(
            "Starting push session: {} eligible messages, batch size {}",
            report.eligible, self.config.batch_size
        );

        self.batch_loop(&user_id, &transformer, &mut report).await?;

        info!(
            "Push session done: {} batches, {} persisted, {} deduplicated, {} failed",
            report.batches_sent, report.persisted, report.deduplicated, report.failed
        );
        Ok(report)
    }

    /// Dry run: report the queue shape, no network call, no state mutation.
    fn dry_run_report(&self, mut report: PushReport) -> Result<PushReport> {
        report.eligible = if self.config.force {
            // Force would reset retry counts first, so every unsynced
            // message counts as eligible.
            self.db.sync_stats()?.unsynced
        } else {
            self.db.eligible_count(self.config.max_retries)?
        };
        report.planned_batches =
            Some(report.eligible.div_ceil(self.config.batch_size as u64));
        Ok(report)
    }

    async fn batch_loop(
        &mut self,
        user_id: &UserId,
        transformer: &IdTransformer,
        report: &mut PushReport,
    ) -> Result<()> {
        loop {
            // Long sessions can outlive the credential; recheck periodically
            // so expiry aborts the session instead of failing every batch.
            if report.batches_sent > 0
                && self.config.auth_recheck_interval > 0
                && report.batches_sent % self.config.auth_recheck_interval == 0
            {
                debug!("Re-verifying authentication after {} batches", report.batches_sent);
                match self.transport.health_check().await {
                    Ok(()) => {}
                    Err(e @ Error::Authentication(_)) => return Err(e),
                    Err(e) if e.is_connectivity() => {
                        warn!("Connectivity lost during auth recheck: {}", e);
                        report.aborted = Some(AbortReason::Connectivity(e.to_string()));
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            }

            let messages = self
                .db
                .select_eligible(self.config.batch_size, self.config.max_retries)?;
            if messages.is_empty() {
                break;
            }

            let payload = build_batch(&self.db, transformer, user_id, &messages)?;
            debug!(
                "Transmitting batch {} ({} messages)",
                report.batches_sent + 1,
                payload.len()
            );

            match self.transport.push_batch(&payload.request).await {
                Ok(response) => {
                    let (plan, outcome) =
                        reconcile_response(&response, &payload.id_map, &payload.local_ids);
                    self.db.apply_reconcile_plan(&plan)?;

                    report.persisted += outcome.persisted;
                    report.deduplicated += outcome.deduplicated;
                    report.failed += outcome.failed;
                    for sample in outcome.failure_samples {
                        if report.failure_samples.len() < MAX_FAILURE_SAMPLES
                            && !report.failure_samples.contains(&sample)
                        {
                            report.failure_samples.push(sample);
                        }
                    }
                    report.batches_sent += 1;
                }
                Err(e @ Error::Authentication(_)) => return Err(e),
                Err(e) => {
                    // Whole-batch delivery failure: no partial credit, the
                    // entire batch gets a retry increment as a group.
                    warn!("Batch transmission failed: {}", e);
                    let outcome_tag = format!("failed: transport - {}", e);
                    self.db.mark_batch_failed(&payload.local_ids, &outcome_tag)?;
                    report.failed += payload.len();
                    report.batches_sent += 1;
                    if report.failure_samples.len() < MAX_FAILURE_SAMPLES
                        && !report.failure_samples.contains(&outcome_tag)
                    {
                        report.failure_samples.push(outcome_tag);
                    }

                    if e.is_connectivity() {
                        report.aborted = Some(AbortReason::Connectivity(e.to_string()));
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }
}
