//! Prescription and prescription line models.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scoring::{classify, normalize_confidence, ConfidenceScore};

/// Lifecycle status of a prescription.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PrescriptionStatus {
    /// Image uploaded, no extraction yet
    Uploaded,
    /// Extraction injected lines, reconciliation not yet run
    AiProcessed,
    /// Reconciled, waiting for a pharmacist
    PendingReview,
    /// Approved by a pharmacist and linked to an order (terminal)
    Verified,
    /// Rejected by a pharmacist (terminal)
    Rejected,
    /// Waiting for the customer to clarify or resubmit
    ClarificationNeeded,
}

impl PrescriptionStatus {
    /// Verified and Rejected admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PrescriptionStatus::Verified | PrescriptionStatus::Rejected)
    }

    /// Stable storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PrescriptionStatus::Uploaded => "uploaded",
            PrescriptionStatus::AiProcessed => "ai_processed",
            PrescriptionStatus::PendingReview => "pending_review",
            PrescriptionStatus::Verified => "verified",
            PrescriptionStatus::Rejected => "rejected",
            PrescriptionStatus::ClarificationNeeded => "clarification_needed",
        }
    }
}

impl fmt::Display for PrescriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A prescription uploaded by a customer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prescription {
    /// Unique prescription ID
    pub id: String,
    /// Reference to the uploaded image
    pub image_uri: String,
    /// Upload timestamp (immutable)
    pub uploaded_at: DateTime<Utc>,
    /// Lifecycle status
    pub status: PrescriptionStatus,
    /// Mean confidence of AI-extracted lines, in [0, 1]
    pub overall_confidence: f64,
    /// Free-text notes, written only by reviewers
    pub pharmacist_notes: Option<String>,
    /// Order created on verification; set iff status is Verified
    pub linked_order_id: Option<String>,
    /// Compare-and-set token, bumped on every committed change
    pub version: u64,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Prescription {
    /// Create a freshly uploaded prescription.
    pub fn new(image_uri: impl Into<String>, uploaded_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            image_uri: image_uri.into(),
            uploaded_at,
            status: PrescriptionStatus::Uploaded,
            overall_confidence: 0.0,
            pharmacist_notes: None,
            linked_order_id: None,
            version: 0,
            updated_at: uploaded_at,
        }
    }

    /// Recompute `overall_confidence` from the current line set.
    pub fn recompute_confidence(&mut self, lines: &[PrescriptionLine]) {
        self.overall_confidence = overall_confidence(lines);
    }

    /// Classification of the overall confidence.
    pub fn confidence_score(&self) -> ConfidenceScore {
        classify(self.overall_confidence)
    }

    /// Append a reviewer note, keeping earlier notes.
    pub fn append_note(&mut self, author: &str, note: &str, at: DateTime<Utc>) {
        let entry = format!("[{}] {}: {}", at.to_rfc3339(), author, note.trim());
        self.pharmacist_notes = Some(match self.pharmacist_notes.take() {
            Some(existing) if !existing.is_empty() => format!("{}\n{}", existing, entry),
            _ => entry,
        });
    }

    /// Linked order iff Verified.
    pub fn invariants_hold(&self) -> bool {
        self.linked_order_id.is_some() == (self.status == PrescriptionStatus::Verified)
    }

    /// Touch the updated_at timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Mean confidence of AI-extracted lines; manual lines carry no AI confidence.
pub fn overall_confidence(lines: &[PrescriptionLine]) -> f64 {
    let extracted: Vec<f64> = lines
        .iter()
        .filter(|l| l.origin == LineOrigin::Extracted)
        .map(|l| l.confidence)
        .collect();

    if extracted.is_empty() {
        return 0.0;
    }
    extracted.iter().sum::<f64>() / extracted.len() as f64
}

/// Where a line came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LineOrigin {
    /// Produced by the extraction service
    Extracted,
    /// Added by a pharmacist during review
    Manual,
}

/// Flat view of a line's mapping state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MappingStatus {
    Pending,
    Mapped,
    Unavailable,
}

impl MappingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingStatus::Pending => "pending",
            MappingStatus::Mapped => "mapped",
            MappingStatus::Unavailable => "unavailable",
        }
    }
}

/// Mapping of a line to a catalog product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LineMapping {
    /// No product chosen yet
    Pending,
    /// Resolved to a catalog product
    Mapped { product_id: String },
    /// Catalog has no plausible product
    Unavailable,
}

impl LineMapping {
    pub fn status(&self) -> MappingStatus {
        match self {
            LineMapping::Pending => MappingStatus::Pending,
            LineMapping::Mapped { .. } => MappingStatus::Mapped,
            LineMapping::Unavailable => MappingStatus::Unavailable,
        }
    }

    pub fn product_id(&self) -> Option<&str> {
        match self {
            LineMapping::Mapped { product_id } => Some(product_id),
            _ => None,
        }
    }
}

/// Human corrections stored beside the AI output.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VerifiedFields {
    pub name: Option<String>,
    pub dosage: Option<String>,
    pub frequency: Option<String>,
    pub instructions: Option<String>,
    pub quantity: Option<u32>,
}

impl VerifiedFields {
    /// Overlay the non-empty fields of `other` onto `self`.
    pub fn merge(&mut self, other: &VerifiedFields) {
        fn pick(target: &mut Option<String>, source: &Option<String>) {
            if let Some(value) = source.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                *target = Some(value.to_string());
            }
        }
        pick(&mut self.name, &other.name);
        pick(&mut self.dosage, &other.dosage);
        pick(&mut self.frequency, &other.frequency);
        pick(&mut self.instructions, &other.instructions);
        if other.quantity.is_some() {
            self.quantity = other.quantity;
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &VerifiedFields::default()
    }
}

/// One medicine line on a prescription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrescriptionLine {
    /// Unique line ID
    pub id: String,
    /// Owning prescription
    pub prescription_id: String,
    /// Display order within the prescription
    pub position: u32,
    /// AI-extracted or manually added
    pub origin: LineOrigin,
    /// AI output, never overwritten
    pub extracted_name: String,
    pub extracted_dosage: String,
    pub extracted_frequency: String,
    pub extracted_instructions: String,
    /// Human overrides
    pub verified: VerifiedFields,
    /// Extraction confidence in [0, 1]; 0 for manual lines
    pub confidence: f64,
    /// Product mapping
    pub mapping: LineMapping,
    /// Candidate product IDs, best first
    pub suggested_product_ids: Vec<String>,
}

impl PrescriptionLine {
    /// Build a line from extraction output. Confidence is normalized to [0, 1].
    pub fn from_extraction(prescription_id: &str, position: u32, extracted: &ExtractedLine) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            prescription_id: prescription_id.to_string(),
            position,
            origin: LineOrigin::Extracted,
            extracted_name: extracted.name.clone(),
            extracted_dosage: extracted.dosage.clone(),
            extracted_frequency: extracted.frequency.clone(),
            extracted_instructions: extracted.instructions.clone(),
            verified: VerifiedFields::default(),
            confidence: normalize_confidence(extracted.confidence),
            mapping: LineMapping::Pending,
            suggested_product_ids: Vec::new(),
        }
    }

    /// Build a line added by a reviewer. Manual entries carry no AI confidence.
    pub fn manual(prescription_id: &str, position: u32, fields: &NewLine) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            prescription_id: prescription_id.to_string(),
            position,
            origin: LineOrigin::Manual,
            extracted_name: String::new(),
            extracted_dosage: String::new(),
            extracted_frequency: String::new(),
            extracted_instructions: String::new(),
            verified: VerifiedFields {
                name: Some(fields.name.trim().to_string()),
                dosage: fields.dosage.clone(),
                frequency: fields.frequency.clone(),
                instructions: fields.instructions.clone(),
                quantity: fields.quantity,
            },
            confidence: 0.0,
            mapping: LineMapping::Pending,
            suggested_product_ids: Vec::new(),
        }
    }

    pub fn mapping_status(&self) -> MappingStatus {
        self.mapping.status()
    }

    pub fn mapped_product_id(&self) -> Option<&str> {
        self.mapping.product_id()
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.mapping, LineMapping::Mapped { .. })
    }

    /// Name the catalog is searched with: AI output for extracted lines,
    /// the reviewer's entry for manual lines.
    pub fn search_name(&self) -> &str {
        match self.origin {
            LineOrigin::Extracted => &self.extracted_name,
            LineOrigin::Manual => self.verified.name.as_deref().unwrap_or(""),
        }
    }

    /// Dosage used as a secondary matching signal (verified wins).
    pub fn effective_dosage(&self) -> &str {
        self.verified
            .dosage
            .as_deref()
            .unwrap_or(&self.extracted_dosage)
    }

    /// Frequency shown to the reviewer (verified wins).
    pub fn effective_frequency(&self) -> &str {
        self.verified
            .frequency
            .as_deref()
            .unwrap_or(&self.extracted_frequency)
    }

    /// Name shown to the reviewer (verified wins).
    pub fn display_name(&self) -> &str {
        self.verified.name.as_deref().unwrap_or(&self.extracted_name)
    }

    /// AI confidence tier; `None` for manual lines.
    pub fn confidence_score(&self) -> Option<ConfidenceScore> {
        match self.origin {
            LineOrigin::Extracted => Some(classify(self.confidence)),
            LineOrigin::Manual => None,
        }
    }
}

/// A reviewer-entered line.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewLine {
    pub name: String,
    pub dosage: Option<String>,
    pub frequency: Option<String>,
    pub instructions: Option<String>,
    pub quantity: Option<u32>,
}

/// One line as produced by the extraction service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractedLine {
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    pub instructions: String,
    /// Either [0, 1] or [0, 100]
    pub confidence: f64,
}

/// Everything the extraction service returned for one image.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractionBatch {
    pub lines: Vec<ExtractedLine>,
    pub overall_confidence: Option<f64>,
}
