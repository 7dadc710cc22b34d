//! Review decisions handed from a review session to the state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::prescription::{PrescriptionLine, VerifiedFields};

/// Terminal pharmacist action for one review pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DecisionAction {
    Verify,
    Reject,
    RequestClarification,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionAction::Verify => "verify",
            DecisionAction::Reject => "reject",
            DecisionAction::RequestClarification => "request_clarification",
        }
    }
}

impl fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single reviewer edit, replayable against the loaded line set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum LineEdit {
    /// Pharmacist chose a catalog product
    MapProduct { line_id: String, product_id: String },
    /// Pharmacist corrected name/dosage/instructions
    Edit { line_id: String, fields: VerifiedFields },
    /// Pharmacist added a line the extraction missed
    Add(PrescriptionLine),
    /// Pharmacist removed a spurious line
    Remove { line_id: String },
}

impl LineEdit {
    /// Line this edit targets.
    pub fn line_id(&self) -> &str {
        match self {
            LineEdit::MapProduct { line_id, .. }
            | LineEdit::Edit { line_id, .. }
            | LineEdit::Remove { line_id } => line_id,
            LineEdit::Add(line) => &line.id,
        }
    }
}

/// Decision submitted at the end of a review session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewDecision {
    pub action: DecisionAction,
    /// Rejection reason or clarification request; optional for Verify
    pub notes: String,
    pub line_edits: Vec<LineEdit>,
    /// Pharmacist submitting the decision
    pub reviewer: String,
}

impl ReviewDecision {
    /// Serialize for the audit payload.
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_edit_target() {
        let edit = LineEdit::MapProduct {
            line_id: "line-1".into(),
            product_id: "P-1".into(),
        };
        assert_eq!(edit.line_id(), "line-1");

        let remove = LineEdit::Remove { line_id: "line-2".into() };
        assert_eq!(remove.line_id(), "line-2");
    }

    #[test]
    fn test_canonical_json_deterministic() {
        let decision = ReviewDecision {
            action: DecisionAction::Reject,
            notes: "illegible signature".into(),
            line_edits: vec![],
            reviewer: "pharm-1".into(),
        };
        let first = decision.to_canonical_json().unwrap();
        let second = decision.to_canonical_json().unwrap();
        assert_eq!(first, second);
        assert!(first.contains("Reject"));
    }
}
