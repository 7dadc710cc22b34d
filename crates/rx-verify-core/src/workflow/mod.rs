//! Prescription verification workflow.
//!
//! Pipeline: Upload → Extraction → Reconciliation → Pharmacist review → Decision

mod engine;
mod session;
mod transitions;

pub use engine::*;
pub use session::*;
pub use transitions::*;

use std::sync::PoisonError;

use thiserror::Error;

use crate::audit::AuditError;
use crate::collaborators::DependencyError;
use crate::db::DbError;
use crate::models::PrescriptionStatus;

/// Workflow errors.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Lines not mapped to a product: {line_ids:?}")]
    PreconditionFailed { line_ids: Vec<String> },

    #[error("Cannot apply {event} to a prescription in status {from}")]
    InvalidTransition {
        from: PrescriptionStatus,
        event: WorkflowEvent,
    },

    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(#[from] DependencyError),

    #[error("Prescription {prescription_id} was modified concurrently")]
    ConcurrentModification { prescription_id: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Review session is closed")]
    SessionClosed,

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Audit chain error: {0}")]
    Audit(#[from] AuditError),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl WorkflowError {
    /// Errors a caller can fix by correcting input or retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WorkflowError::Validation(_)
                | WorkflowError::PreconditionFailed { .. }
                | WorkflowError::DependencyUnavailable(_)
        )
    }
}

impl<T> From<PoisonError<T>> for WorkflowError {
    fn from(e: PoisonError<T>) -> Self {
        WorkflowError::LockPoisoned(e.to_string())
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
