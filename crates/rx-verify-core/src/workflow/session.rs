//! A pharmacist's working copy of one prescription.
//!
//! Edits are applied to the session's line set and recorded in order, so
//! the engine can replay them against the lines as they were loaded. A
//! session is closed by a successful decision.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::transitions::{apply_edit, transition, unmapped_line_ids, WorkflowEvent};
use super::{WorkflowError, WorkflowResult};
use crate::collaborators::DependencyError;
use crate::models::{
    DecisionAction, LineEdit, NewLine, Prescription, PrescriptionLine, Product, ReviewDecision,
    VerifiedFields,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

/// A line whose candidate refresh failed; its stored suggestions are kept.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshFailure {
    pub line_id: String,
    pub error: DependencyError,
}

/// Review session over one prescription.
#[derive(Debug, Clone)]
pub struct ReviewSession {
    reviewer: String,
    prescription: Prescription,
    loaded_version: u64,
    base_lines: Vec<PrescriptionLine>,
    lines: Vec<PrescriptionLine>,
    candidates: HashMap<String, Vec<Product>>,
    edits: Vec<LineEdit>,
    refresh_failures: Vec<RefreshFailure>,
    state: SessionState,
}

impl ReviewSession {
    pub(crate) fn open(
        reviewer: &str,
        prescription: Prescription,
        lines: Vec<PrescriptionLine>,
    ) -> Self {
        Self {
            reviewer: reviewer.to_string(),
            loaded_version: prescription.version,
            prescription,
            base_lines: lines.clone(),
            lines,
            candidates: HashMap::new(),
            edits: Vec::new(),
            refresh_failures: Vec::new(),
            state: SessionState::Open,
        }
    }

    pub fn reviewer(&self) -> &str {
        &self.reviewer
    }

    /// Prescription as loaded.
    pub fn prescription(&self) -> &Prescription {
        &self.prescription
    }

    /// Version the session's edits are based on.
    pub fn loaded_version(&self) -> u64 {
        self.loaded_version
    }

    /// Working lines with the session's edits applied.
    pub fn lines(&self) -> &[PrescriptionLine] {
        &self.lines
    }

    pub fn line(&self, line_id: &str) -> Option<&PrescriptionLine> {
        self.lines.iter().find(|l| l.id == line_id)
    }

    pub fn edits(&self) -> &[LineEdit] {
        &self.edits
    }

    /// Catalog candidates for a line, best first. Empty if none were fetched.
    pub fn candidates(&self, line_id: &str) -> &[Product] {
        self.candidates
            .get(line_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Lines whose last candidate refresh failed.
    pub fn refresh_failures(&self) -> &[RefreshFailure] {
        &self.refresh_failures
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Map a line to a catalog product. Mapping to the current product again
    /// changes nothing.
    pub fn apply_manual_mapping(&mut self, line_id: &str, product_id: &str) -> WorkflowResult<()> {
        self.record(LineEdit::MapProduct {
            line_id: line_id.to_string(),
            product_id: product_id.to_string(),
        })
        .map(|_| ())
    }

    /// Merge human corrections into a line. Extracted fields are kept.
    pub fn edit_line(&mut self, line_id: &str, fields: VerifiedFields) -> WorkflowResult<()> {
        self.record(LineEdit::Edit {
            line_id: line_id.to_string(),
            fields,
        })
        .map(|_| ())
    }

    /// Add a line the extraction missed. Returns the new line id.
    pub fn add_missing_line(&mut self, new_line: NewLine) -> WorkflowResult<String> {
        if new_line.name.trim().is_empty() {
            return Err(WorkflowError::Validation("line name is empty".into()));
        }
        let position = self
            .lines
            .iter()
            .map(|l| l.position + 1)
            .max()
            .unwrap_or(0);
        let line = PrescriptionLine::manual(&self.prescription.id, position, &new_line);
        let line_id = line.id.clone();

        self.record(LineEdit::Add(line))?;
        Ok(line_id)
    }

    pub fn remove_line(&mut self, line_id: &str) -> WorkflowResult<()> {
        self.record(LineEdit::Remove {
            line_id: line_id.to_string(),
        })?;
        self.candidates.remove(line_id);
        Ok(())
    }

    /// Lines that would block a Verify decision.
    pub fn unmapped_line_ids(&self) -> Vec<String> {
        unmapped_line_ids(&self.lines)
    }

    /// Decision carrying this session's edit log.
    pub fn build_decision(&self, action: DecisionAction, notes: &str) -> ReviewDecision {
        ReviewDecision {
            action,
            notes: notes.trim().to_string(),
            line_edits: self.edits.clone(),
            reviewer: self.reviewer.clone(),
        }
    }

    pub(crate) fn base_lines(&self) -> &[PrescriptionLine] {
        &self.base_lines
    }

    /// Store fresh candidates and mirror their ids into the line's
    /// suggestions. Suggestions are derived data, so the loaded copy and a
    /// recorded `Add` for the line are updated too.
    pub(crate) fn set_candidates(&mut self, line_id: &str, products: Vec<Product>) {
        let ids: Vec<String> = products.iter().map(|p| p.id.clone()).collect();
        let added = self.edits.iter_mut().filter_map(|edit| match edit {
            LineEdit::Add(line) => Some(line),
            _ => None,
        });
        for line in self
            .base_lines
            .iter_mut()
            .chain(self.lines.iter_mut())
            .chain(added)
            .filter(|l| l.id == line_id)
        {
            line.suggested_product_ids = ids.clone();
        }
        self.candidates.insert(line_id.to_string(), products);
    }

    pub(crate) fn set_refresh_failures(&mut self, failures: Vec<RefreshFailure>) {
        self.refresh_failures = failures;
    }

    pub(crate) fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    fn ensure_editable(&self) -> WorkflowResult<()> {
        if !self.is_open() {
            return Err(WorkflowError::SessionClosed);
        }
        transition(self.prescription.status, WorkflowEvent::Edit).map(|_| ())
    }

    fn record(&mut self, edit: LineEdit) -> WorkflowResult<bool> {
        self.ensure_editable()?;
        let changed = apply_edit(&mut self.lines, &edit)?;
        if changed {
            self.edits.push(edit);
        }
        Ok(changed)
    }
}
