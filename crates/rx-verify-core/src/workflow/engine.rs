//! Workflow engine tying storage, the reconciler, and the external services
//! together.
//!
//! The database lock is only ever held for synchronous work; every await
//! happens with it released. Decisions additionally pass through an async
//! gate so concurrent reviewers in one process are serialized, while the
//! version compare-and-set in [`Database::commit_prescription`] protects
//! against writers elsewhere.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::session::{RefreshFailure, ReviewSession};
use super::transitions::{apply_edit, check_decision_guards, transition, WorkflowEvent};
use super::{WorkflowError, WorkflowResult};
use crate::audit::{verify_chain, AuditEntry, DecisionRecord};
use crate::collaborators::{call_with_timeout, CatalogSearch, DependencyError, OrderService};
use crate::config::WorkflowConfig;
use crate::db::{CommitOutcome, Database, DbError};
use crate::models::{
    DecisionAction, ExtractionBatch, MappingStatus, Prescription, PrescriptionLine,
    PrescriptionStatus,
};
use crate::reconciler::Reconciler;
use crate::scoring::{classify, priority, ConfidenceScore, PriorityAssessment};

/// Service name used in order errors.
pub const ORDER_SERVICE: &str = "orders";

/// Summary of a reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationReport {
    pub prescription: Prescription,
    pub mapped: usize,
    pub pending: usize,
    pub unavailable: usize,
    /// Lines whose catalog search failed; they were left pending
    pub failures: Vec<RefreshFailure>,
}

/// Result of a committed decision.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionOutcome {
    pub prescription: Prescription,
    pub order_id: Option<String>,
    pub audit: AuditEntry,
}

/// One row of the pharmacist review queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueEntry {
    pub prescription: Prescription,
    pub priority: PriorityAssessment,
    pub confidence: ConfidenceScore,
}

/// Prescription verification workflow.
pub struct PrescriptionWorkflow {
    db: Arc<Mutex<Database>>,
    catalog: Arc<dyn CatalogSearch>,
    orders: Arc<dyn OrderService>,
    reconciler: Reconciler,
    config: WorkflowConfig,
    decision_gate: tokio::sync::Mutex<()>,
}

impl PrescriptionWorkflow {
    pub fn new(
        db: Arc<Mutex<Database>>,
        catalog: Arc<dyn CatalogSearch>,
        orders: Arc<dyn OrderService>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            reconciler: Reconciler::new(config.reconciler.clone()),
            db,
            catalog,
            orders,
            config,
            decision_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Swap in a reconciler, e.g. one with pharmacy-specific aliases.
    pub fn with_reconciler(mut self, reconciler: Reconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    // =========================================================================
    // Intake
    // =========================================================================

    /// Register an uploaded prescription image.
    #[instrument(skip(self))]
    pub fn create_prescription(
        &self,
        image_uri: &str,
        uploaded_at: DateTime<Utc>,
    ) -> WorkflowResult<Prescription> {
        if image_uri.trim().is_empty() {
            return Err(WorkflowError::Validation("image uri is empty".into()));
        }
        let prescription = Prescription::new(image_uri.trim(), uploaded_at);
        self.db()?.insert_prescription(&prescription)?;

        info!(prescription_id = %prescription.id, "prescription uploaded");
        Ok(prescription)
    }

    /// Store extraction output, replacing any previous lines.
    #[instrument(skip(self, batch), fields(prescription_id = %prescription_id, lines = batch.lines.len()))]
    pub fn ingest_extraction(
        &self,
        prescription_id: &str,
        batch: ExtractionBatch,
    ) -> WorkflowResult<Prescription> {
        let mut prescription = self.load_prescription(prescription_id)?;
        let to = transition(prescription.status, WorkflowEvent::ExtractionCompleted)?;
        if batch.lines.is_empty() {
            return Err(WorkflowError::Validation("extraction produced no lines".into()));
        }

        let lines: Vec<PrescriptionLine> = batch
            .lines
            .iter()
            .enumerate()
            .map(|(i, extracted)| PrescriptionLine::from_extraction(prescription_id, i as u32, extracted))
            .collect();

        let expected = prescription.version;
        let from = prescription.status;
        prescription.status = to;
        prescription.recompute_confidence(&lines);
        prescription.touch();

        if let Some(reported) = batch.overall_confidence {
            debug!(
                reported = crate::scoring::normalize_confidence(reported),
                derived = prescription.overall_confidence,
                "extraction overall confidence"
            );
        }

        self.commit(&mut prescription, &lines, expected, None)?;
        info!(from = %from, to = %to, "extraction ingested");
        Ok(prescription)
    }

    /// Reconcile every line against the catalog and move the prescription
    /// to review.
    #[instrument(skip(self), fields(prescription_id = %prescription_id))]
    pub async fn reconcile_all(&self, prescription_id: &str) -> WorkflowResult<ReconciliationReport> {
        let (mut prescription, mut lines) = self.snapshot(prescription_id)?;
        let to = transition(prescription.status, WorkflowEvent::ReconciliationCompleted)?;

        let results = self
            .reconciler
            .reconcile_lines(&lines, self.catalog.as_ref())
            .await;

        let mut failures = Vec::new();
        for (line, result) in lines.iter_mut().zip(&results) {
            result.apply_to(line);
            if let Some(error) = &result.error {
                failures.push(RefreshFailure {
                    line_id: line.id.clone(),
                    error: error.clone(),
                });
            }
        }

        let count = |status: MappingStatus| lines.iter().filter(|l| l.mapping_status() == status).count();
        let (mapped, pending, unavailable) = (
            count(MappingStatus::Mapped),
            count(MappingStatus::Pending),
            count(MappingStatus::Unavailable),
        );

        let expected = prescription.version;
        prescription.status = to;
        prescription.touch();
        self.commit(&mut prescription, &lines, expected, None)?;

        info!(mapped, pending, unavailable, failures = failures.len(), "reconciliation completed");
        Ok(ReconciliationReport {
            prescription,
            mapped,
            pending,
            unavailable,
            failures,
        })
    }

    // =========================================================================
    // Triage
    // =========================================================================

    /// Priority of a prescription as seen at `now`.
    pub fn get_priority(&self, prescription_id: &str, now: DateTime<Utc>) -> WorkflowResult<PriorityAssessment> {
        let prescription = self.load_prescription(prescription_id)?;
        Ok(priority(prescription.uploaded_at, now))
    }

    /// Prescriptions awaiting review: most urgent first, then oldest, then
    /// least confident.
    pub fn review_queue(&self, now: DateTime<Utc>) -> WorkflowResult<Vec<QueueEntry>> {
        let pending = self
            .db()?
            .list_prescriptions_by_status(PrescriptionStatus::PendingReview)?;

        let mut queue: Vec<QueueEntry> = pending
            .into_iter()
            .map(|prescription| QueueEntry {
                priority: priority(prescription.uploaded_at, now),
                confidence: classify(prescription.overall_confidence),
                prescription,
            })
            .collect();

        queue.sort_by(|a, b| {
            b.priority
                .tier
                .cmp(&a.priority.tier)
                .then(a.prescription.uploaded_at.cmp(&b.prescription.uploaded_at))
                .then(
                    a.prescription
                        .overall_confidence
                        .partial_cmp(&b.prescription.overall_confidence)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });
        Ok(queue)
    }

    // =========================================================================
    // Review
    // =========================================================================

    /// Open a review session and fetch catalog candidates for its lines.
    #[instrument(skip(self), fields(prescription_id = %prescription_id))]
    pub async fn load_session(&self, prescription_id: &str, reviewer: &str) -> WorkflowResult<ReviewSession> {
        if reviewer.trim().is_empty() {
            return Err(WorkflowError::Validation("reviewer is empty".into()));
        }
        let (prescription, lines) = self.snapshot(prescription_id)?;
        let mut session = ReviewSession::open(reviewer.trim(), prescription, lines);

        self.refresh_suggestions(&mut session).await?;
        debug!(version = session.loaded_version(), "review session loaded");
        Ok(session)
    }

    /// Re-query the catalog for every line that has suggestions or is not
    /// mapped. A failed line keeps its stored suggestions.
    pub async fn refresh_suggestions(&self, session: &mut ReviewSession) -> WorkflowResult<()> {
        if !session.is_open() {
            return Err(WorkflowError::SessionClosed);
        }

        let targets: Vec<PrescriptionLine> = session
            .lines()
            .iter()
            .filter(|l| !l.suggested_product_ids.is_empty() || !l.is_mapped())
            .cloned()
            .collect();

        let catalog = self.catalog.as_ref();
        let results = join_all(
            targets
                .iter()
                .map(|line| self.reconciler.candidates(line, catalog)),
        )
        .await;

        let mut failures = Vec::new();
        for (line, result) in targets.iter().zip(results) {
            match result {
                Ok(ranked) => {
                    let products = ranked
                        .unwrap_or_default()
                        .into_iter()
                        .map(|scored| scored.product)
                        .collect();
                    session.set_candidates(&line.id, products);
                }
                Err(error) => {
                    warn!(line_id = %line.id, error = %error, "candidate refresh failed");
                    failures.push(RefreshFailure {
                        line_id: line.id.clone(),
                        error,
                    });
                }
            }
        }
        session.set_refresh_failures(failures);
        Ok(())
    }

    /// Commit the session's edits together with a decision.
    ///
    /// Nothing is persisted unless every step succeeds. For Verify the
    /// order is created after all guards pass and cancelled again if the
    /// commit fails.
    #[instrument(
        skip(self, session, notes),
        fields(prescription_id = %session.prescription().id, reviewer = %session.reviewer())
    )]
    pub async fn submit_decision(
        &self,
        session: &mut ReviewSession,
        action: DecisionAction,
        notes: &str,
    ) -> WorkflowResult<DecisionOutcome> {
        let _gate = self.decision_gate.lock().await;

        let current = self.load_prescription(&session.prescription().id)?;
        let to = transition(current.status, WorkflowEvent::from(action))?;
        if !session.is_open() {
            return Err(WorkflowError::SessionClosed);
        }
        if current.version != session.loaded_version() {
            return Err(WorkflowError::ConcurrentModification {
                prescription_id: current.id.clone(),
            });
        }

        let decision = session.build_decision(action, notes);
        let mut lines = session.base_lines().to_vec();
        for edit in &decision.line_edits {
            apply_edit(&mut lines, edit)?;
        }
        check_decision_guards(action, &decision.notes, &lines)?;

        let order_id = match action {
            DecisionAction::Verify => Some(self.create_order(&current.id).await?),
            _ => None,
        };

        let mut updated = current.clone();
        updated.status = to;
        updated.linked_order_id = order_id.clone();
        if !decision.notes.is_empty() {
            updated.append_note(&decision.reviewer, &decision.notes, Utc::now());
        }
        updated.recompute_confidence(&lines);
        updated.touch();

        let record = DecisionRecord {
            prescription_id: current.id.clone(),
            action: action.as_str().to_string(),
            from_status: current.status.as_str().to_string(),
            to_status: to.as_str().to_string(),
            reviewer: decision.reviewer.clone(),
            notes: decision.notes.clone(),
            linked_order_id: order_id.clone(),
            payload: decision.to_canonical_json().map_err(DbError::from)?,
        };

        let committed = self.commit(&mut updated, &lines, current.version, Some(&record));
        let audit = match committed {
            Ok(Some(audit)) => audit,
            Ok(None) => {
                return Err(DbError::Constraint("decision was not recorded".into()).into());
            }
            Err(e) => {
                if let Some(order_id) = &order_id {
                    self.cancel_order(order_id).await;
                }
                return Err(e);
            }
        };

        session.close();
        info!(
            action = %action,
            from = %current.status,
            to = %to,
            order_id = ?order_id,
            "decision committed"
        );
        Ok(DecisionOutcome {
            prescription: updated,
            order_id,
            audit,
        })
    }

    /// Customer answered a clarification request.
    #[instrument(skip(self), fields(prescription_id = %prescription_id))]
    pub fn resubmit(&self, prescription_id: &str) -> WorkflowResult<Prescription> {
        let (mut prescription, lines) = self.snapshot(prescription_id)?;
        let to = transition(prescription.status, WorkflowEvent::Resubmitted)?;

        let expected = prescription.version;
        prescription.status = to;
        prescription.touch();
        self.commit(&mut prescription, &lines, expected, None)?;

        info!("prescription resubmitted");
        Ok(prescription)
    }

    /// Append a reviewer note. Allowed in every status.
    #[instrument(skip(self, note), fields(prescription_id = %prescription_id))]
    pub fn append_pharmacist_note(
        &self,
        prescription_id: &str,
        reviewer: &str,
        note: &str,
    ) -> WorkflowResult<Prescription> {
        if reviewer.trim().is_empty() || note.trim().is_empty() {
            return Err(WorkflowError::Validation("note and reviewer are required".into()));
        }
        let (mut prescription, lines) = self.snapshot(prescription_id)?;

        let expected = prescription.version;
        prescription.append_note(reviewer.trim(), note, Utc::now());
        prescription.touch();
        self.commit(&mut prescription, &lines, expected, None)?;
        Ok(prescription)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn get_prescription(&self, prescription_id: &str) -> WorkflowResult<Prescription> {
        self.load_prescription(prescription_id)
    }

    pub fn get_lines(&self, prescription_id: &str) -> WorkflowResult<Vec<PrescriptionLine>> {
        Ok(self.snapshot(prescription_id)?.1)
    }

    /// Committed decisions for one prescription, oldest first.
    pub fn decision_log(&self, prescription_id: &str) -> WorkflowResult<Vec<AuditEntry>> {
        Ok(self.db()?.list_decisions_for(prescription_id)?)
    }

    /// Check the whole decision chain. Returns the number of entries.
    pub fn verify_audit_chain(&self) -> WorkflowResult<usize> {
        let entries = self.db()?.list_decision_log()?;
        verify_chain(&entries)?;
        Ok(entries.len())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn db(&self) -> WorkflowResult<MutexGuard<'_, Database>> {
        Ok(self.db.lock()?)
    }

    fn load_prescription(&self, prescription_id: &str) -> WorkflowResult<Prescription> {
        self.db()?
            .get_prescription(prescription_id)?
            .ok_or_else(|| WorkflowError::NotFound(format!("prescription {}", prescription_id)))
    }

    /// Prescription and lines read under one lock.
    fn snapshot(&self, prescription_id: &str) -> WorkflowResult<(Prescription, Vec<PrescriptionLine>)> {
        let db = self.db()?;
        let prescription = db
            .get_prescription(prescription_id)?
            .ok_or_else(|| WorkflowError::NotFound(format!("prescription {}", prescription_id)))?;
        let lines = db.get_lines(prescription_id)?;
        Ok((prescription, lines))
    }

    fn commit(
        &self,
        prescription: &mut Prescription,
        lines: &[PrescriptionLine],
        expected_version: u64,
        record: Option<&DecisionRecord>,
    ) -> WorkflowResult<Option<AuditEntry>> {
        let outcome = {
            let mut db = self.db()?;
            db.commit_prescription(prescription, lines, expected_version, record)?
        };

        match outcome {
            CommitOutcome::Committed { version, audit } => {
                prescription.version = version;
                Ok(audit)
            }
            CommitOutcome::VersionConflict => {
                warn!(prescription_id = %prescription.id, expected_version, "version conflict");
                Err(WorkflowError::ConcurrentModification {
                    prescription_id: prescription.id.clone(),
                })
            }
        }
    }

    async fn create_order(&self, prescription_id: &str) -> Result<String, DependencyError> {
        let result = call_with_timeout(
            ORDER_SERVICE,
            self.config.order_timeout(),
            self.orders.create_from_prescription(prescription_id),
        )
        .await;

        if let Err(e) = &result {
            warn!(error = %e, "order creation failed, nothing committed");
        }
        result
    }

    async fn cancel_order(&self, order_id: &str) {
        let result = call_with_timeout(
            ORDER_SERVICE,
            self.config.order_timeout(),
            self.orders.cancel_order(order_id),
        )
        .await;

        match result {
            Ok(()) => warn!(order_id, "commit failed, order cancelled"),
            Err(e) => warn!(order_id, error = %e, "commit failed and order cancellation failed"),
        }
    }
}
