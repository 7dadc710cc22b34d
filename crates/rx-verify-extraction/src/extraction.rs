//! Prescription line extraction from service output.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use rx_verify_core::{ExtractedLine, ExtractionBatch};

/// Extraction errors.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid response format: {0}")]
    InvalidFormat(String),

    #[error("Extraction service error: {0}")]
    Service(String),
}

pub type ExtractionResult<T> = Result<T, ExtractionError>;

/// Raw output of the extraction service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionOutput {
    pub lines: Vec<RawLine>,
    #[serde(default)]
    pub overall_confidence: Option<f64>,
}

/// One medicine line as the service reported it. Missing fields are empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RawLine {
    pub medicine_name: String,
    pub dosage: String,
    pub frequency: String,
    pub instructions: String,
    /// 0-100 or 0-1; the core normalizes either
    pub confidence: f64,
}

/// Parse service output into structured lines.
pub fn parse_extraction_output(json: &str) -> ExtractionResult<ExtractionOutput> {
    // The service sometimes wraps the object in prose
    let json_start = json.find('{').ok_or_else(|| {
        ExtractionError::InvalidFormat("No JSON object found in response".into())
    })?;
    let json_end = json.rfind('}').ok_or_else(|| {
        ExtractionError::InvalidFormat("No closing brace found in response".into())
    })?;
    if json_end < json_start {
        return Err(ExtractionError::InvalidFormat(
            "Closing brace precedes opening brace".into(),
        ));
    }

    let output: ExtractionOutput = serde_json::from_str(&json[json_start..=json_end])?;
    Ok(output)
}

impl ExtractionOutput {
    /// Convert into the batch the workflow ingests. Lines without a name
    /// are kept; the reconciler marks them unavailable.
    pub fn into_batch(self) -> ExtractionBatch {
        ExtractionBatch {
            lines: self.lines.into_iter().map(RawLine::into_extracted).collect(),
            overall_confidence: self.overall_confidence,
        }
    }
}

impl RawLine {
    pub fn into_extracted(self) -> ExtractedLine {
        ExtractedLine {
            name: self.medicine_name.trim().to_string(),
            dosage: self.dosage.trim().to_string(),
            frequency: self.frequency.trim().to_string(),
            instructions: self.instructions.trim().to_string(),
            confidence: self.confidence,
        }
    }
}

/// Parse service output straight into an ingestible batch.
pub fn parse_extraction_batch(json: &str) -> ExtractionResult<ExtractionBatch> {
    Ok(parse_extraction_output(json)?.into_batch())
}

const FORM_PREFIXES: &[&str] = &["tab", "tab.", "cap", "cap.", "syp", "syp.", "inj", "inj.", "oint", "oint."];

const DOSE_UNITS: &[&str] = &["mg", "mcg", "g", "gm", "ml", "cc", "iu", "units", "%"];

const FREQUENCIES: &[&str] = &[
    "od", "bd", "bid", "tds", "tid", "qid", "qds", "hs", "sos", "prn", "stat", "ac", "pc",
];

/// Deterministic extractor for tests and offline use.
///
/// Reads one medicine per non-empty line of OCR text: the name runs up to
/// the first dosage or frequency token, and whatever follows those is kept
/// as instructions.
pub struct MockExtractor;

impl MockExtractor {
    /// Confidence when name, dosage and frequency were all found.
    pub const COMPLETE: f64 = 90.0;
    /// Name plus one of dosage or frequency.
    pub const PARTIAL: f64 = 60.0;
    /// Name only.
    pub const NAME_ONLY: f64 = 30.0;

    pub fn extract(ocr_text: &str) -> ExtractionOutput {
        let lines: Vec<RawLine> = ocr_text.lines().filter_map(extract_line).collect();

        let overall_confidence = if lines.is_empty() {
            None
        } else {
            Some(lines.iter().map(|l| l.confidence).sum::<f64>() / lines.len() as f64)
        };

        ExtractionOutput {
            lines,
            overall_confidence,
        }
    }
}

fn extract_line(text: &str) -> Option<RawLine> {
    let tokens: Vec<&str> = text.split_whitespace().collect();

    let mut name = Vec::new();
    let mut dosage = String::new();
    let mut frequency = String::new();
    let mut instructions = Vec::new();

    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        let lower = token.to_lowercase();

        if dosage.is_empty() && is_dose(&lower) {
            dosage = lower;
        } else if dosage.is_empty()
            && is_number(&lower)
            && tokens.get(i + 1).is_some_and(|next| DOSE_UNITS.contains(&next.to_lowercase().as_str()))
        {
            dosage = format!("{}{}", lower, tokens[i + 1].to_lowercase());
            i += 1;
        } else if frequency.is_empty() && is_frequency(&lower) {
            frequency = token.to_string();
        } else if dosage.is_empty() && frequency.is_empty() {
            if name.is_empty() && FORM_PREFIXES.contains(&lower.as_str()) {
                // dosage form stays part of the name as written
                name.push(token);
            } else if is_number(&lower) && !name.is_empty() {
                // "Dolo 650": bare strength after the name
                dosage = lower;
            } else {
                name.push(token);
            }
        } else {
            instructions.push(token);
        }
        i += 1;
    }

    let medicine_name = name.join(" ");
    if !medicine_name.chars().any(|c| c.is_alphabetic()) {
        return None;
    }

    let confidence = match (!dosage.is_empty(), !frequency.is_empty()) {
        (true, true) => MockExtractor::COMPLETE,
        (false, false) => MockExtractor::NAME_ONLY,
        _ => MockExtractor::PARTIAL,
    };

    Some(RawLine {
        medicine_name,
        dosage,
        frequency,
        instructions: instructions.join(" "),
        confidence,
    })
}

fn is_number(token: &str) -> bool {
    !token.is_empty() && token.parse::<f64>().is_ok()
}

/// "500mg", "0.5g", "120mg/5ml".
fn is_dose(token: &str) -> bool {
    let end = token
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(token.len());
    if end == 0 || end == token.len() {
        return false;
    }
    let unit: String = token[end..]
        .chars()
        .take_while(|c| c.is_alphabetic() || *c == '%')
        .collect();
    DOSE_UNITS.contains(&unit.as_str())
}

/// Shorthand ("BD") or dose pattern ("1-0-1").
fn is_frequency(token: &str) -> bool {
    let token = token.trim_end_matches('.');
    if FREQUENCIES.contains(&token) {
        return true;
    }
    let parts: Vec<&str> = token.split('-').collect();
    (3..=4).contains(&parts.len())
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '/'))
}
