//! End-to-end tests for the verification workflow.
//!
//! These drive a prescription from upload to decision against in-memory
//! storage and fake catalog/order services.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};

use rx_verify_core::{
    CatalogSearch, Database, DecisionAction, DependencyError, ExtractedLine, ExtractionBatch,
    LineMapping, LineOrigin, LocalCatalog, MappingStatus, NewLine, OrderService,
    PrescriptionStatus, PrescriptionWorkflow, PriorityTier, Product, VerifiedFields,
    WorkflowConfig, WorkflowError,
};

/// Catalog fake answering by substring, with call counting and failure
/// injection.
struct FakeCatalog {
    products: Vec<Product>,
    calls: AtomicUsize,
    fail_on: Option<&'static str>,
}

impl FakeCatalog {
    fn new() -> Self {
        Self {
            products: vec![
                Product::new("P-500", "Paracetamol 500mg Tablet"),
                Product::new("P-650", "Paracetamol 650mg Tablet"),
                Product::new("A-250", "Amoxicillin 250mg Capsule"),
                Product::new("A-500", "Amoxicillin 500mg Capsule"),
                Product::new("A-SYR", "Amoxicillin 125mg/5ml Syrup"),
                Product::new("C-10", "Cetirizine 10mg Tablet"),
            ],
            calls: AtomicUsize::new(0),
            fail_on: None,
        }
    }

    fn failing_on(needle: &'static str) -> Self {
        Self {
            fail_on: Some(needle),
            ..Self::new()
        }
    }
}

#[async_trait]
impl CatalogSearch for FakeCatalog {
    async fn search(&self, text: &str) -> Result<Vec<Product>, DependencyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.is_some_and(|f| text.contains(f)) {
            return Err(DependencyError::failed("catalog", "503 Service Unavailable"));
        }
        let text = text.to_lowercase();
        Ok(self
            .products
            .iter()
            .filter(|p| p.name.to_lowercase().contains(&text))
            .cloned()
            .collect())
    }
}

/// Order service fake that records created and cancelled orders.
#[derive(Default)]
struct FakeOrders {
    created: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
    fail: AtomicBool,
    delay: Option<Duration>,
}

impl FakeOrders {
    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderService for FakeOrders {
    async fn create_from_prescription(
        &self,
        prescription_id: &str,
    ) -> Result<String, DependencyError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(DependencyError::failed("orders", "payment gateway down"));
        }
        let mut created = self.created.lock().unwrap();
        let order_id = format!("ORD-{}-{}", created.len() + 1, &prescription_id[..8]);
        created.push(order_id.clone());
        Ok(order_id)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), DependencyError> {
        self.cancelled.lock().unwrap().push(order_id.to_string());
        Ok(())
    }
}

fn workflow_with(
    catalog: Arc<FakeCatalog>,
    orders: Arc<FakeOrders>,
    config: WorkflowConfig,
) -> PrescriptionWorkflow {
    let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
    PrescriptionWorkflow::new(db, catalog, orders, config)
}

fn extracted(name: &str, dosage: &str, confidence: f64) -> ExtractedLine {
    ExtractedLine {
        name: name.into(),
        dosage: dosage.into(),
        frequency: "BD".into(),
        instructions: "after food".into(),
        confidence,
    }
}

/// Two lines: a confident Crocin with one strong match, and a shaky
/// Amoxicillin with three candidates.
fn two_line_batch() -> ExtractionBatch {
    ExtractionBatch {
        lines: vec![
            extracted("Tab. Crocin", "650mg", 0.95),
            extracted("Amoxicillin", "", 0.4),
        ],
        overall_confidence: Some(67.5),
    }
}

/// Upload, ingest and reconcile; returns the prescription id.
async fn pending_review(workflow: &PrescriptionWorkflow, batch: ExtractionBatch) -> String {
    let rx = workflow
        .create_prescription("s3://rx/upload.jpg", Utc::now())
        .unwrap();
    workflow.ingest_extraction(&rx.id, batch).unwrap();
    let report = workflow.reconcile_all(&rx.id).await.unwrap();
    assert_eq!(report.prescription.status, PrescriptionStatus::PendingReview);
    rx.id
}

#[tokio::test]
async fn test_upload_to_verified() -> anyhow::Result<()> {
    let catalog = Arc::new(FakeCatalog::new());
    let orders = Arc::new(FakeOrders::default());
    let workflow = workflow_with(catalog, orders.clone(), WorkflowConfig::default());

    let rx = workflow.create_prescription("s3://rx/1.jpg", Utc::now())?;
    assert_eq!(rx.status, PrescriptionStatus::Uploaded);

    let rx = workflow.ingest_extraction(&rx.id, two_line_batch())?;
    assert_eq!(rx.status, PrescriptionStatus::AiProcessed);
    assert!((rx.overall_confidence - 0.675).abs() < 1e-9);

    let report = workflow.reconcile_all(&rx.id).await?;
    assert_eq!(report.prescription.status, PrescriptionStatus::PendingReview);
    assert_eq!((report.mapped, report.pending, report.unavailable), (1, 1, 0));
    assert!(report.failures.is_empty());

    let lines = workflow.get_lines(&rx.id)?;
    assert_eq!(lines[0].mapping, LineMapping::Mapped { product_id: "P-650".into() });
    assert_eq!(lines[1].mapping, LineMapping::Pending);
    assert_eq!(lines[1].suggested_product_ids, vec!["A-250", "A-500", "A-SYR"]);

    let mut session = workflow.load_session(&rx.id, "pharm-1").await?;
    let amox = lines[1].id.clone();
    assert_eq!(session.candidates(&amox).len(), 3);
    assert_eq!(session.unmapped_line_ids(), vec![amox.clone()]);

    session.apply_manual_mapping(&amox, "A-500")?;
    let outcome = workflow
        .submit_decision(&mut session, DecisionAction::Verify, "")
        .await?;

    assert_eq!(outcome.prescription.status, PrescriptionStatus::Verified);
    assert_eq!(outcome.order_id, orders.created().first().cloned());
    assert_eq!(outcome.prescription.linked_order_id, outcome.order_id);
    assert!(outcome.prescription.invariants_hold());
    assert!(!session.is_open());

    let stored = workflow.get_prescription(&rx.id)?;
    assert_eq!(stored.status, PrescriptionStatus::Verified);
    assert_eq!(stored.version, outcome.prescription.version);
    assert_eq!(stored.linked_order_id, outcome.order_id);
    let lines = workflow.get_lines(&rx.id)?;
    assert_eq!(lines[1].mapped_product_id(), Some("A-500"));
    // extraction output is kept untouched
    assert_eq!(lines[1].extracted_name, "Amoxicillin");

    // verified is terminal
    let err = workflow
        .submit_decision(&mut session, DecisionAction::Reject, "changed my mind")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::InvalidTransition { from: PrescriptionStatus::Verified, .. }
    ));

    let log = workflow.decision_log(&rx.id)?;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].record.action, "verify");
    assert_eq!(log[0].record.linked_order_id, outcome.order_id);
    assert_eq!(workflow.verify_audit_chain()?, 1);
    Ok(())
}

#[tokio::test]
async fn test_verify_blocked_by_unmapped_lines() {
    let orders = Arc::new(FakeOrders::default());
    let workflow = workflow_with(Arc::new(FakeCatalog::new()), orders.clone(), WorkflowConfig::default());
    let id = pending_review(&workflow, two_line_batch()).await;
    let before = workflow.get_prescription(&id).unwrap();

    let mut session = workflow.load_session(&id, "pharm-1").await.unwrap();
    let amox = session.lines()[1].id.clone();

    let err = workflow
        .submit_decision(&mut session, DecisionAction::Verify, "")
        .await
        .unwrap_err();
    match err {
        WorkflowError::PreconditionFailed { line_ids } => assert_eq!(line_ids, vec![amox.clone()]),
        other => panic!("expected PreconditionFailed, got {:?}", other),
    }

    // nothing happened
    assert!(orders.created().is_empty());
    assert_eq!(workflow.get_prescription(&id).unwrap(), before);
    assert!(workflow.decision_log(&id).unwrap().is_empty());

    // the same session can still be completed
    assert!(session.is_open());
    session.apply_manual_mapping(&amox, "A-250").unwrap();
    let outcome = workflow
        .submit_decision(&mut session, DecisionAction::Verify, "")
        .await
        .unwrap();
    assert_eq!(outcome.prescription.status, PrescriptionStatus::Verified);
}

#[tokio::test]
async fn test_unavailable_line_blocks_verify() {
    let workflow = workflow_with(
        Arc::new(FakeCatalog::new()),
        Arc::new(FakeOrders::default()),
        WorkflowConfig::default(),
    );
    let batch = ExtractionBatch {
        lines: vec![extracted("Crocin", "650mg", 0.95), extracted("Unobtainium", "", 0.9)],
        overall_confidence: None,
    };
    let id = pending_review(&workflow, batch).await;
    let lines = workflow.get_lines(&id).unwrap();
    assert_eq!(lines[1].mapping_status(), MappingStatus::Unavailable);

    let mut session = workflow.load_session(&id, "pharm-1").await.unwrap();
    assert!(matches!(
        workflow.submit_decision(&mut session, DecisionAction::Verify, "").await,
        Err(WorkflowError::PreconditionFailed { line_ids }) if line_ids == vec![lines[1].id.clone()]
    ));

    // out of stock: remove the line and verify the rest
    session.remove_line(&lines[1].id).unwrap();
    let outcome = workflow
        .submit_decision(&mut session, DecisionAction::Verify, "")
        .await
        .unwrap();
    assert_eq!(outcome.prescription.status, PrescriptionStatus::Verified);
    assert_eq!(workflow.get_lines(&id).unwrap().len(), 1);
}

#[tokio::test]
async fn test_session_edits_committed_with_decision() {
    let workflow = workflow_with(
        Arc::new(FakeCatalog::new()),
        Arc::new(FakeOrders::default()),
        WorkflowConfig::default(),
    );
    let id = pending_review(&workflow, two_line_batch()).await;
    let mut session = workflow.load_session(&id, "pharm-1").await.unwrap();
    let crocin = session.lines()[0].id.clone();
    let amox = session.lines()[1].id.clone();

    session
        .edit_line(&crocin, VerifiedFields { dosage: Some("500mg".into()), ..Default::default() })
        .unwrap();
    session.apply_manual_mapping(&crocin, "P-500").unwrap();
    session.apply_manual_mapping(&amox, "A-500").unwrap();
    let added = session
        .add_missing_line(NewLine {
            name: "Cetirizine".into(),
            dosage: Some("10mg".into()),
            ..Default::default()
        })
        .unwrap();

    // a manual line must be mapped like any other
    assert_eq!(session.unmapped_line_ids(), vec![added.clone()]);
    session.apply_manual_mapping(&added, "C-10").unwrap();

    let outcome = workflow
        .submit_decision(&mut session, DecisionAction::Verify, "called doctor, dose lowered")
        .await
        .unwrap();

    // manual lines carry no AI confidence
    assert!((outcome.prescription.overall_confidence - 0.675).abs() < 1e-9);
    assert!(outcome
        .prescription
        .pharmacist_notes
        .as_deref()
        .unwrap()
        .contains("pharm-1: called doctor, dose lowered"));

    let lines = workflow.get_lines(&id).unwrap();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0].extracted_dosage, "650mg");
    assert_eq!(lines[0].verified.dosage.as_deref(), Some("500mg"));
    assert_eq!(lines[0].mapped_product_id(), Some("P-500"));
    assert_eq!(lines[2].id, added);
    assert_eq!(lines[2].origin, LineOrigin::Manual);
    assert_eq!(lines[2].confidence, 0.0);
    assert_eq!(lines[2].mapped_product_id(), Some("C-10"));

    let log = workflow.decision_log(&id).unwrap();
    assert!(log[0].record.payload.contains("MapProduct"));
    assert!(log[0].record.payload.contains("Cetirizine"));
}

#[tokio::test]
async fn test_added_line_keeps_refreshed_suggestions() {
    let workflow = workflow_with(
        Arc::new(FakeCatalog::new()),
        Arc::new(FakeOrders::default()),
        WorkflowConfig::default(),
    );
    let id = pending_review(&workflow, two_line_batch()).await;
    let mut session = workflow.load_session(&id, "pharm-1").await.unwrap();
    let added = session
        .add_missing_line(NewLine { name: "Cetirizine".into(), ..Default::default() })
        .unwrap();

    workflow.refresh_suggestions(&mut session).await.unwrap();
    assert_eq!(session.candidates(&added).len(), 1);

    workflow
        .submit_decision(&mut session, DecisionAction::Reject, "duplicate upload")
        .await
        .unwrap();

    let lines = workflow.get_lines(&id).unwrap();
    let stored = lines.iter().find(|l| l.id == added).unwrap();
    assert_eq!(stored.origin, LineOrigin::Manual);
    assert_eq!(stored.suggested_product_ids, vec!["C-10"]);
}

#[tokio::test]
async fn test_terminal_states_are_absorbing() {
    let workflow = workflow_with(
        Arc::new(FakeCatalog::new()),
        Arc::new(FakeOrders::default()),
        WorkflowConfig::default(),
    );
    let id = pending_review(&workflow, two_line_batch()).await;
    let mut session = workflow.load_session(&id, "pharm-1").await.unwrap();

    assert!(matches!(
        workflow.submit_decision(&mut session, DecisionAction::Reject, "  ").await,
        Err(WorkflowError::Validation(_))
    ));
    let outcome = workflow
        .submit_decision(&mut session, DecisionAction::Reject, "forged signature")
        .await
        .unwrap();
    assert_eq!(outcome.prescription.status, PrescriptionStatus::Rejected);
    assert_eq!(outcome.order_id, None);
    assert!(outcome.prescription.invariants_hold());
    let rejected = workflow.get_prescription(&id).unwrap();

    assert!(matches!(
        workflow.ingest_extraction(&id, two_line_batch()),
        Err(WorkflowError::InvalidTransition { from: PrescriptionStatus::Rejected, .. })
    ));
    assert!(matches!(
        workflow.reconcile_all(&id).await,
        Err(WorkflowError::InvalidTransition { .. })
    ));
    assert!(matches!(
        workflow.resubmit(&id),
        Err(WorkflowError::InvalidTransition { .. })
    ));

    let mut late = workflow.load_session(&id, "pharm-2").await.unwrap();
    let line_id = late.lines()[1].id.clone();
    assert!(matches!(
        late.apply_manual_mapping(&line_id, "A-500"),
        Err(WorkflowError::InvalidTransition { .. })
    ));
    assert!(matches!(
        workflow.submit_decision(&mut late, DecisionAction::Verify, "").await,
        Err(WorkflowError::InvalidTransition { .. })
    ));

    assert_eq!(workflow.get_prescription(&id).unwrap(), rejected);

    // notes are still allowed, status stays put
    let noted = workflow
        .append_pharmacist_note(&id, "pharm-2", "customer informed")
        .unwrap();
    assert_eq!(noted.status, PrescriptionStatus::Rejected);
    assert_eq!(noted.version, rejected.version + 1);
}

#[tokio::test]
async fn test_empty_names_never_reach_catalog() {
    let catalog = Arc::new(FakeCatalog::new());
    let workflow = workflow_with(catalog.clone(), Arc::new(FakeOrders::default()), WorkflowConfig::default());
    let batch = ExtractionBatch {
        lines: vec![extracted("", "", 0.9), extracted("Tab. 500mg", "", 0.9)],
        overall_confidence: None,
    };

    let rx = workflow.create_prescription("s3://rx/blank.jpg", Utc::now()).unwrap();
    workflow.ingest_extraction(&rx.id, batch).unwrap();
    let report = workflow.reconcile_all(&rx.id).await.unwrap();

    assert_eq!(report.unavailable, 2);
    assert_eq!(catalog.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_catalog_failure_isolated_to_line() {
    let catalog = Arc::new(FakeCatalog::failing_on("amoxicillin"));
    let workflow = workflow_with(catalog, Arc::new(FakeOrders::default()), WorkflowConfig::default());
    let rx = workflow.create_prescription("s3://rx/2.jpg", Utc::now()).unwrap();
    workflow.ingest_extraction(&rx.id, two_line_batch()).unwrap();

    let report = workflow.reconcile_all(&rx.id).await.unwrap();
    let lines = workflow.get_lines(&rx.id).unwrap();

    assert_eq!(report.prescription.status, PrescriptionStatus::PendingReview);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].line_id, lines[1].id);
    assert_eq!(report.failures[0].error.service(), "catalog");
    assert_eq!(lines[0].mapped_product_id(), Some("P-650"));
    assert_eq!(lines[1].mapping, LineMapping::Pending);
    assert!(lines[1].suggested_product_ids.is_empty());

    // the review session reports the same failure and still opens
    let session = workflow.load_session(&rx.id, "pharm-1").await.unwrap();
    assert_eq!(session.refresh_failures().len(), 1);
    assert!(session.candidates(&lines[1].id).is_empty());
}

#[tokio::test]
async fn test_order_failure_persists_nothing() {
    let orders = Arc::new(FakeOrders::default());
    orders.fail.store(true, Ordering::SeqCst);
    let workflow = workflow_with(Arc::new(FakeCatalog::new()), orders.clone(), WorkflowConfig::default());
    let id = pending_review(&workflow, two_line_batch()).await;
    let before = workflow.get_prescription(&id).unwrap();

    let mut session = workflow.load_session(&id, "pharm-1").await.unwrap();
    let amox = session.lines()[1].id.clone();
    session.apply_manual_mapping(&amox, "A-500").unwrap();

    let err = workflow
        .submit_decision(&mut session, DecisionAction::Verify, "")
        .await
        .unwrap_err();
    assert!(err.is_recoverable());
    assert!(matches!(
        err,
        WorkflowError::DependencyUnavailable(DependencyError::Failed { ref service, .. }) if service == "orders"
    ));

    assert_eq!(workflow.get_prescription(&id).unwrap(), before);
    assert_eq!(workflow.get_lines(&id).unwrap()[1].mapping, LineMapping::Pending);
    assert!(workflow.decision_log(&id).unwrap().is_empty());

    // retry once the order service is back
    orders.fail.store(false, Ordering::SeqCst);
    let outcome = workflow
        .submit_decision(&mut session, DecisionAction::Verify, "")
        .await
        .unwrap();
    assert_eq!(outcome.prescription.status, PrescriptionStatus::Verified);
    assert_eq!(orders.created().len(), 1);
}

#[tokio::test]
async fn test_slow_order_service_times_out() {
    let orders = Arc::new(FakeOrders::slow(Duration::from_millis(500)));
    let config = WorkflowConfig {
        order_timeout_ms: 20,
        ..Default::default()
    };
    let workflow = workflow_with(Arc::new(FakeCatalog::new()), orders.clone(), config);
    let id = pending_review(&workflow, two_line_batch()).await;

    let mut session = workflow.load_session(&id, "pharm-1").await.unwrap();
    let amox = session.lines()[1].id.clone();
    session.apply_manual_mapping(&amox, "A-500").unwrap();

    let err = workflow
        .submit_decision(&mut session, DecisionAction::Verify, "")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::DependencyUnavailable(DependencyError::Timeout { after_ms: 20, .. })
    ));
    assert_eq!(
        workflow.get_prescription(&id).unwrap().status,
        PrescriptionStatus::PendingReview
    );
    assert!(orders.created().is_empty());
}

#[tokio::test]
async fn test_stale_session_is_refused() {
    let orders = Arc::new(FakeOrders::default());
    let workflow = workflow_with(Arc::new(FakeCatalog::new()), orders.clone(), WorkflowConfig::default());
    let id = pending_review(&workflow, two_line_batch()).await;

    let mut first = workflow.load_session(&id, "pharm-1").await.unwrap();
    let mut second = workflow.load_session(&id, "pharm-2").await.unwrap();
    assert_eq!(first.loaded_version(), second.loaded_version());

    let amox = first.lines()[1].id.clone();
    first.apply_manual_mapping(&amox, "A-500").unwrap();
    second.apply_manual_mapping(&amox, "A-250").unwrap();

    // a note lands between load and submit
    workflow
        .append_pharmacist_note(&id, "pharm-3", "customer called")
        .unwrap();

    let err = workflow
        .submit_decision(&mut second, DecisionAction::Verify, "")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::ConcurrentModification { ref prescription_id } if *prescription_id == id));
    assert!(orders.created().is_empty());

    // reload and go again
    let mut fresh = workflow.load_session(&id, "pharm-1").await.unwrap();
    fresh.apply_manual_mapping(&amox, "A-500").unwrap();
    workflow
        .submit_decision(&mut fresh, DecisionAction::Verify, "")
        .await
        .unwrap();

    // the first session is now both stale and behind a terminal status
    assert!(matches!(
        workflow.submit_decision(&mut first, DecisionAction::Verify, "").await,
        Err(WorkflowError::InvalidTransition { .. })
    ));
    assert_eq!(orders.created().len(), 1);
}

#[tokio::test]
async fn test_commit_conflict_cancels_order() {
    let orders = Arc::new(FakeOrders::slow(Duration::from_millis(150)));
    let workflow = workflow_with(Arc::new(FakeCatalog::new()), orders.clone(), WorkflowConfig::default());
    let id = pending_review(&workflow, two_line_batch()).await;

    let mut session = workflow.load_session(&id, "pharm-1").await.unwrap();
    let amox = session.lines()[1].id.clone();
    session.apply_manual_mapping(&amox, "A-500").unwrap();

    // another writer commits while the order is being created
    let (decision, note) = tokio::join!(
        workflow.submit_decision(&mut session, DecisionAction::Verify, ""),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            workflow.append_pharmacist_note(&id, "pharm-2", "insurance pending")
        }
    );
    note.unwrap();

    assert!(matches!(decision, Err(WorkflowError::ConcurrentModification { .. })));
    assert_eq!(orders.created().len(), 1);
    assert_eq!(orders.cancelled(), orders.created());

    let stored = workflow.get_prescription(&id).unwrap();
    assert_eq!(stored.status, PrescriptionStatus::PendingReview);
    assert_eq!(stored.linked_order_id, None);
    assert!(workflow.decision_log(&id).unwrap().is_empty());
}

#[tokio::test]
async fn test_clarification_round_trip() {
    let workflow = workflow_with(
        Arc::new(FakeCatalog::new()),
        Arc::new(FakeOrders::default()),
        WorkflowConfig::default(),
    );
    let id = pending_review(&workflow, two_line_batch()).await;

    let mut session = workflow.load_session(&id, "pharm-1").await.unwrap();
    assert!(matches!(
        workflow
            .submit_decision(&mut session, DecisionAction::RequestClarification, "")
            .await,
        Err(WorkflowError::Validation(_))
    ));
    let outcome = workflow
        .submit_decision(&mut session, DecisionAction::RequestClarification, "which amoxicillin strength?")
        .await
        .unwrap();
    assert_eq!(outcome.prescription.status, PrescriptionStatus::ClarificationNeeded);

    let rx = workflow.resubmit(&id).unwrap();
    assert_eq!(rx.status, PrescriptionStatus::PendingReview);
    assert!(matches!(workflow.resubmit(&id), Err(WorkflowError::InvalidTransition { .. })));

    // a closed session cannot decide again
    assert!(matches!(
        workflow.submit_decision(&mut session, DecisionAction::Reject, "no answer").await,
        Err(WorkflowError::SessionClosed)
    ));

    let mut session = workflow.load_session(&id, "pharm-1").await.unwrap();
    let amox = session.lines()[1].id.clone();
    session.apply_manual_mapping(&amox, "A-500").unwrap();
    let outcome = workflow
        .submit_decision(&mut session, DecisionAction::Verify, "customer confirmed 500mg")
        .await
        .unwrap();
    assert_eq!(outcome.prescription.status, PrescriptionStatus::Verified);

    let notes = outcome.prescription.pharmacist_notes.unwrap();
    assert!(notes.contains("which amoxicillin strength?"));
    assert!(notes.contains("customer confirmed 500mg"));

    let log = workflow.decision_log(&id).unwrap();
    let actions: Vec<&str> = log.iter().map(|e| e.record.action.as_str()).collect();
    assert_eq!(actions, vec!["request_clarification", "verify"]);
    assert_eq!(log[1].prev_hash, log[0].entry_hash);
    assert_eq!(workflow.verify_audit_chain().unwrap(), 2);
}

#[tokio::test]
async fn test_reprocess_replaces_lines() {
    let workflow = workflow_with(
        Arc::new(FakeCatalog::new()),
        Arc::new(FakeOrders::default()),
        WorkflowConfig::default(),
    );
    let id = pending_review(&workflow, two_line_batch()).await;

    let rx = workflow
        .ingest_extraction(
            &id,
            ExtractionBatch {
                lines: vec![extracted("Cetirizine", "10mg", 0.9)],
                overall_confidence: None,
            },
        )
        .unwrap();
    assert_eq!(rx.status, PrescriptionStatus::AiProcessed);
    assert!((rx.overall_confidence - 0.9).abs() < 1e-9);

    let report = workflow.reconcile_all(&id).await.unwrap();
    assert_eq!(report.mapped, 1);
    let lines = workflow.get_lines(&id).unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].mapped_product_id(), Some("C-10"));

    assert!(matches!(
        workflow.ingest_extraction(&id, ExtractionBatch::default()),
        Err(WorkflowError::Validation(_))
    ));
}

#[tokio::test]
async fn test_review_queue_ordering() {
    let workflow = workflow_with(
        Arc::new(FakeCatalog::new()),
        Arc::new(FakeOrders::default()),
        WorkflowConfig::default(),
    );
    let now = Utc::now();

    let mut ids = Vec::new();
    for (hours_ago, confidence) in [(2, 0.9), (30, 0.9), (13, 0.9), (2, 0.3)] {
        let rx = workflow
            .create_prescription("s3://rx/q.jpg", now - ChronoDuration::hours(hours_ago))
            .unwrap();
        workflow
            .ingest_extraction(
                &rx.id,
                ExtractionBatch {
                    lines: vec![extracted("Unobtainium", "", confidence)],
                    overall_confidence: None,
                },
            )
            .unwrap();
        workflow.reconcile_all(&rx.id).await.unwrap();
        ids.push(rx.id);
    }
    // not yet reconciled, so not in the queue
    workflow.create_prescription("s3://rx/new.jpg", now).unwrap();

    let queue = workflow.review_queue(now).unwrap();
    let order: Vec<&str> = queue.iter().map(|e| e.prescription.id.as_str()).collect();

    assert_eq!(order, vec![ids[1].as_str(), ids[2].as_str(), ids[3].as_str(), ids[0].as_str()]);
    assert_eq!(queue[0].priority.tier, PriorityTier::Urgent);
    assert_eq!(queue[1].priority.tier, PriorityTier::High);
    assert_eq!(queue[2].priority.tier, PriorityTier::Normal);

    assert_eq!(workflow.get_priority(&ids[1], now).unwrap().tier, PriorityTier::Urgent);
    assert!(matches!(
        workflow.get_priority("missing", now),
        Err(WorkflowError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_local_catalog_end_to_end() {
    let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
    {
        let db = db.lock().unwrap();
        for product in [
            Product::new("P-650", "Paracetamol 650mg Tablet").with_strength("650mg"),
            Product::new("P-500", "Paracetamol 500mg Tablet").with_strength("500mg"),
            Product::new("M-500", "Metformin 500mg Tablet").with_aliases(&["Glycomet"]),
        ] {
            db.upsert_product(&product).unwrap();
        }
    }
    let catalog = Arc::new(LocalCatalog::new(db.clone(), 10));
    let workflow = PrescriptionWorkflow::new(
        db,
        catalog,
        Arc::new(FakeOrders::default()),
        WorkflowConfig::default(),
    );

    let rx = workflow.create_prescription("s3://rx/local.jpg", Utc::now()).unwrap();
    workflow
        .ingest_extraction(
            &rx.id,
            ExtractionBatch {
                lines: vec![extracted("Dolo 650", "650 mg", 0.92), extracted("Glycomet", "500mg", 0.85)],
                overall_confidence: None,
            },
        )
        .unwrap();
    let report = workflow.reconcile_all(&rx.id).await.unwrap();

    assert_eq!(report.mapped, 2);
    let lines = workflow.get_lines(&rx.id).unwrap();
    assert_eq!(lines[0].mapped_product_id(), Some("P-650"));
    assert_eq!(lines[1].mapped_product_id(), Some("M-500"));
}

#[tokio::test]
async fn test_input_validation() {
    let workflow = workflow_with(
        Arc::new(FakeCatalog::new()),
        Arc::new(FakeOrders::default()),
        WorkflowConfig::default(),
    );

    assert!(matches!(
        workflow.create_prescription("  ", Utc::now()),
        Err(WorkflowError::Validation(_))
    ));
    assert!(matches!(
        workflow.ingest_extraction("missing", two_line_batch()),
        Err(WorkflowError::NotFound(_))
    ));

    let id = pending_review(&workflow, two_line_batch()).await;
    assert!(matches!(
        workflow.load_session(&id, " ").await,
        Err(WorkflowError::Validation(_))
    ));
    assert!(matches!(
        workflow.append_pharmacist_note(&id, "pharm-1", ""),
        Err(WorkflowError::Validation(_))
    ));
}
