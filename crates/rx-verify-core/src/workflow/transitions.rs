//! Prescription lifecycle: the transition table, decision guards, and the
//! line edit replay shared by sessions and the engine.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{WorkflowError, WorkflowResult};
use crate::models::{
    DecisionAction, LineEdit, LineMapping, PrescriptionLine, PrescriptionStatus,
};

/// Something that can happen to a prescription.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WorkflowEvent {
    /// Extraction delivered lines (first pass or reprocess)
    ExtractionCompleted,
    /// Every line went through the reconciler
    ReconciliationCompleted,
    Verify,
    Reject,
    RequestClarification,
    /// Customer answered a clarification request
    Resubmitted,
    /// Reviewer line edit; never changes status
    Edit,
}

impl WorkflowEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowEvent::ExtractionCompleted => "extraction_completed",
            WorkflowEvent::ReconciliationCompleted => "reconciliation_completed",
            WorkflowEvent::Verify => "verify",
            WorkflowEvent::Reject => "reject",
            WorkflowEvent::RequestClarification => "request_clarification",
            WorkflowEvent::Resubmitted => "resubmitted",
            WorkflowEvent::Edit => "edit",
        }
    }
}

impl fmt::Display for WorkflowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<DecisionAction> for WorkflowEvent {
    fn from(action: DecisionAction) -> Self {
        match action {
            DecisionAction::Verify => WorkflowEvent::Verify,
            DecisionAction::Reject => WorkflowEvent::Reject,
            DecisionAction::RequestClarification => WorkflowEvent::RequestClarification,
        }
    }
}

impl PrescriptionStatus {
    /// The transition table. `None` means the event is not allowed here.
    pub fn next(self, event: WorkflowEvent) -> Option<PrescriptionStatus> {
        use PrescriptionStatus::*;
        use WorkflowEvent as E;

        match (self, event) {
            (Uploaded | AiProcessed | PendingReview | ClarificationNeeded, E::ExtractionCompleted) => {
                Some(AiProcessed)
            }
            (AiProcessed, E::ReconciliationCompleted) => Some(PendingReview),
            (PendingReview, E::Verify) => Some(Verified),
            (PendingReview, E::Reject) => Some(Rejected),
            (PendingReview, E::RequestClarification) => Some(ClarificationNeeded),
            (ClarificationNeeded, E::Resubmitted) => Some(PendingReview),
            (status, E::Edit) if !status.is_terminal() => Some(status),
            _ => None,
        }
    }
}

/// Target status for `event`, or `InvalidTransition`.
pub fn transition(from: PrescriptionStatus, event: WorkflowEvent) -> WorkflowResult<PrescriptionStatus> {
    from.next(event)
        .ok_or(WorkflowError::InvalidTransition { from, event })
}

/// Lines not yet mapped to a product, in line order.
pub fn unmapped_line_ids(lines: &[PrescriptionLine]) -> Vec<String> {
    lines
        .iter()
        .filter(|l| !l.is_mapped())
        .map(|l| l.id.clone())
        .collect()
}

/// Guards a decision must pass before anything external is called.
pub fn check_decision_guards(
    action: DecisionAction,
    notes: &str,
    lines: &[PrescriptionLine],
) -> WorkflowResult<()> {
    match action {
        DecisionAction::Verify => {
            if lines.is_empty() {
                return Err(WorkflowError::Validation(
                    "cannot verify a prescription without lines".into(),
                ));
            }
            let line_ids = unmapped_line_ids(lines);
            if !line_ids.is_empty() {
                return Err(WorkflowError::PreconditionFailed { line_ids });
            }
        }
        DecisionAction::Reject => {
            if notes.trim().is_empty() {
                return Err(WorkflowError::Validation("rejection requires a reason".into()));
            }
        }
        DecisionAction::RequestClarification => {
            if notes.trim().is_empty() {
                return Err(WorkflowError::Validation(
                    "clarification request requires notes".into(),
                ));
            }
        }
    }
    Ok(())
}

/// Apply one edit to a line set. Returns whether anything changed.
pub fn apply_edit(lines: &mut Vec<PrescriptionLine>, edit: &LineEdit) -> WorkflowResult<bool> {
    match edit {
        LineEdit::MapProduct { line_id, product_id } => {
            if product_id.trim().is_empty() {
                return Err(WorkflowError::Validation("product id is empty".into()));
            }
            let line = find_line(lines, line_id)?;
            if line.mapped_product_id() == Some(product_id.as_str()) {
                return Ok(false);
            }
            line.mapping = LineMapping::Mapped {
                product_id: product_id.clone(),
            };
            Ok(true)
        }
        LineEdit::Edit { line_id, fields } => {
            let line = find_line(lines, line_id)?;
            let before = line.verified.clone();
            line.verified.merge(fields);
            Ok(line.verified != before)
        }
        LineEdit::Add(line) => {
            if lines.iter().any(|l| l.id == line.id) {
                return Err(WorkflowError::Validation(format!(
                    "line {} already exists",
                    line.id
                )));
            }
            lines.push(line.clone());
            Ok(true)
        }
        LineEdit::Remove { line_id } => {
            let index = lines
                .iter()
                .position(|l| &l.id == line_id)
                .ok_or_else(|| WorkflowError::NotFound(format!("line {}", line_id)))?;
            lines.remove(index);
            Ok(true)
        }
    }
}

fn find_line<'a>(
    lines: &'a mut [PrescriptionLine],
    line_id: &str,
) -> WorkflowResult<&'a mut PrescriptionLine> {
    lines
        .iter_mut()
        .find(|l| l.id == line_id)
        .ok_or_else(|| WorkflowError::NotFound(format!("line {}", line_id)))
}
