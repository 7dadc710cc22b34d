//! Rx Verify Core Library
//!
//! Prescription verification: AI-extracted medicine lines are mapped to
//! catalog products and approved by a pharmacist before an order exists.
//!
//! # Architecture
//!
//! ```text
//! Upload → Extraction (external) → ingest_extraction
//!                                        │
//!                              [STATUS: ai_processed]
//!                                        │
//!                        Reconciler (normalize → search → rank)
//!                                        │
//!                              [STATUS: pending_review]
//!                                        │
//!                           Review queue (priority, confidence)
//!                                        │
//!                         Review session (map, edit, add, remove)
//!                                        │
//!                 ┌──────────────────────┼──────────────────────┐
//!                 │                      │                      │
//!                 ▼                      ▼                      ▼
//!          Verify + Order             Reject          Request clarification
//!                 │                      │                      │
//!                 └──────────────────────┼──────────────────────┘
//!                                        │
//!                          ┌─────────────▼─────────────┐
//!                          │ CAS commit + decision log │
//!                          │ entry = H(prev ‖ record)  │
//!                          └───────────────────────────┘
//! ```
//!
//! # Core Principle
//!
//! **Only a pharmacist verifies.** The reconciler may map a line on its own
//! when the match is unambiguous, but a prescription reaches `verified`
//! only through a reviewer's decision.
//!
//! # Modules
//!
//! - [`db`]: SQLite storage with FTS5 product search and version CAS
//! - [`models`]: Domain types (Prescription, PrescriptionLine, Product, ...)
//! - [`scoring`]: Confidence tiers and review priority
//! - [`reconciler`]: Normalizer, matcher, and line reconciliation
//! - [`workflow`]: Transition table, review sessions, and the engine
//! - [`collaborators`]: Catalog and order service seams
//! - [`audit`]: Hash-chained decision log

pub mod audit;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod models;
pub mod reconciler;
pub mod scoring;
pub mod telemetry;
pub mod workflow;

// Re-export commonly used types
pub use audit::{AuditEntry, AuditError, DecisionRecord};
pub use collaborators::{CatalogSearch, DependencyError, LocalCatalog, OrderService};
pub use config::{ConfigError, ReconcilerConfig, WorkflowConfig};
pub use db::{Database, DbError};
pub use models::{
    DecisionAction, ExtractedLine, ExtractionBatch, LineMapping, LineOrigin, MappingStatus,
    NewLine, Prescription, PrescriptionLine, PrescriptionStatus, Product, ReviewDecision,
    VerifiedFields,
};
pub use reconciler::{Normalizer, ReconciliationResult, Reconciler};
pub use scoring::{classify, priority, ConfidenceScore, ConfidenceTier, PriorityAssessment, PriorityTier};
pub use workflow::{
    DecisionOutcome, PrescriptionWorkflow, QueueEntry, ReconciliationReport, ReviewSession,
    WorkflowError, WorkflowEvent, WorkflowResult,
};
