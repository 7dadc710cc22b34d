//! Medicine name normalizer.
//!
//! Handles:
//! - Name cleaning (dosage-form prefixes, trailing strengths)
//! - Brand expansion (crocin→paracetamol, augmentin→amoxicillin clavulanate)
//! - Strength parsing with unit conversion (mcg→mg, g→mg, cc→ml)
//! - Frequency canonicalization (bd→twice daily, 1-0-1→twice daily)

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Dosage-form words that never identify the medicine itself.
const FORM_WORDS: &[&str] = &[
    "tab", "tab.", "tabs", "tablet", "tablets", "cap", "cap.", "caps", "capsule", "capsules",
    "syp", "syp.", "syrup", "inj", "inj.", "injection", "oint", "oint.", "ointment", "drops",
    "drop", "susp", "susp.", "suspension", "cream", "gel",
];

/// A parsed strength in canonical units.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Strength {
    pub value: f64,
    pub unit: String,
}

impl Strength {
    /// Same unit and value within rounding.
    pub fn agrees_with(&self, other: &Strength) -> Option<bool> {
        if self.unit != other.unit {
            return None;
        }
        let scale = self.value.abs().max(other.value.abs()).max(1e-9);
        Some((self.value - other.value).abs() / scale < 1e-6)
    }
}

/// Normalizer for prescription medicine text.
pub struct Normalizer {
    /// Brand or shorthand → generic name
    aliases: HashMap<String, String>,
    /// Unit → (canonical unit, multiplier)
    unit_conversions: HashMap<String, (String, f64)>,
    /// Prescription shorthand → canonical frequency
    frequencies: HashMap<String, String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    /// Create a normalizer with default mappings.
    pub fn new() -> Self {
        Self {
            aliases: Self::default_aliases(),
            unit_conversions: Self::default_unit_conversions(),
            frequencies: Self::default_frequencies(),
        }
    }

    /// Catalog query for a raw medicine name. Empty if nothing usable remains.
    pub fn search_query(&self, raw: &str) -> String {
        self.expand_alias(&self.clean_name(raw))
    }

    /// Lowercase, drop form prefixes/suffixes and trailing strengths.
    pub fn clean_name(&self, raw: &str) -> String {
        let lower = raw.to_lowercase();
        let mut tokens: Vec<&str> = lower
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| matches!(c, ',' | ';' | ':' | '(' | ')' | '-')))
            .filter(|t| !t.is_empty())
            .collect();

        while tokens.first().is_some_and(|t| FORM_WORDS.contains(t)) {
            tokens.remove(0);
        }

        loop {
            let Some(last) = tokens.last().copied() else { break };
            if FORM_WORDS.contains(&last) || is_strength_token(last) {
                tokens.pop();
            } else if self.is_unit(last)
                && tokens.len() >= 2
                && is_strength_token(tokens[tokens.len() - 2])
            {
                // "500 mg"
                tokens.truncate(tokens.len() - 2);
            } else {
                break;
            }
        }

        tokens.join(" ")
    }

    /// Expand a brand name to its generic.
    ///
    /// The whole name is tried first, then its first word.
    pub fn expand_alias(&self, name: &str) -> String {
        let lower = name.trim().to_lowercase();
        if let Some(generic) = self.aliases.get(&lower) {
            return generic.clone();
        }

        let mut words = lower.splitn(2, ' ');
        match (words.next(), words.next()) {
            (Some(first), Some(rest)) => match self.aliases.get(first) {
                Some(generic) => format!("{} {}", generic, rest),
                None => lower.clone(),
            },
            _ => lower.clone(),
        }
    }

    /// Convert a unit to canonical form with multiplier.
    pub fn convert_unit(&self, unit: &str) -> (String, f64) {
        let lower = unit.to_lowercase();
        self.unit_conversions
            .get(&lower)
            .cloned()
            .unwrap_or((lower, 1.0))
    }

    /// First strength found in `text`, in canonical units.
    ///
    /// Accepts "500mg", "500 mg", "0.5g", "250mg/5ml" (the leading part).
    pub fn parse_strength(&self, text: &str) -> Option<Strength> {
        let lower = text.to_lowercase();
        let tokens: Vec<&str> = lower.split_whitespace().collect();

        for (i, token) in tokens.iter().enumerate() {
            let Some((value, unit)) = split_number_unit(token) else { continue };
            let unit = if unit.is_empty() {
                match tokens.get(i + 1) {
                    Some(next) if self.is_unit(leading_unit(next)) => leading_unit(next),
                    _ => continue,
                }
            } else {
                unit
            };
            if !self.is_unit(unit) {
                continue;
            }
            let (canonical, multiplier) = self.convert_unit(unit);
            return Some(Strength {
                value: value * multiplier,
                unit: canonical,
            });
        }
        None
    }

    /// Canonical frequency; unknown text comes back trimmed and lowercased.
    pub fn canonicalize_frequency(&self, text: &str) -> String {
        let lower = text.trim().trim_end_matches('.').to_lowercase();
        let compact: String = lower.chars().filter(|c| !c.is_whitespace()).collect();
        self.frequencies
            .get(&lower)
            .or_else(|| self.frequencies.get(&compact))
            .cloned()
            .unwrap_or(lower)
    }

    /// Add a custom brand mapping.
    pub fn add_alias(&mut self, alias: &str, generic: &str) {
        self.aliases
            .insert(alias.to_lowercase(), generic.to_lowercase());
    }

    /// Add a custom unit conversion.
    pub fn add_unit_conversion(&mut self, from: &str, to: &str, multiplier: f64) {
        self.unit_conversions
            .insert(from.to_lowercase(), (to.to_lowercase(), multiplier));
    }

    /// Add a custom frequency shorthand.
    pub fn add_frequency(&mut self, shorthand: &str, canonical: &str) {
        self.frequencies
            .insert(shorthand.to_lowercase(), canonical.to_lowercase());
    }

    fn is_unit(&self, token: &str) -> bool {
        !token.is_empty() && self.unit_conversions.contains_key(token)
    }

    fn default_aliases() -> HashMap<String, String> {
        let mut map = HashMap::new();

        // Analgesics / antipyretics
        map.insert("crocin".into(), "paracetamol".into());
        map.insert("calpol".into(), "paracetamol".into());
        map.insert("dolo".into(), "paracetamol".into());
        map.insert("tylenol".into(), "paracetamol".into());
        map.insert("panadol".into(), "paracetamol".into());
        map.insert("acetaminophen".into(), "paracetamol".into());
        map.insert("pcm".into(), "paracetamol".into());
        map.insert("advil".into(), "ibuprofen".into());
        map.insert("brufen".into(), "ibuprofen".into());
        map.insert("motrin".into(), "ibuprofen".into());
        map.insert("combiflam".into(), "ibuprofen paracetamol".into());
        map.insert("voveran".into(), "diclofenac".into());
        map.insert("voltaren".into(), "diclofenac".into());

        // Antibiotics
        map.insert("augmentin".into(), "amoxicillin clavulanate".into());
        map.insert("clavam".into(), "amoxicillin clavulanate".into());
        map.insert("amoxil".into(), "amoxicillin".into());
        map.insert("mox".into(), "amoxicillin".into());
        map.insert("zithromax".into(), "azithromycin".into());
        map.insert("azee".into(), "azithromycin".into());
        map.insert("azithral".into(), "azithromycin".into());
        map.insert("cipro".into(), "ciprofloxacin".into());
        map.insert("ciplox".into(), "ciprofloxacin".into());
        map.insert("flagyl".into(), "metronidazole".into());
        map.insert("metrogyl".into(), "metronidazole".into());
        map.insert("taxim".into(), "cefotaxime".into());
        map.insert("monocef".into(), "ceftriaxone".into());
        map.insert("doxy".into(), "doxycycline".into());

        // Antidiabetics / cardiac
        map.insert("glucophage".into(), "metformin".into());
        map.insert("glycomet".into(), "metformin".into());
        map.insert("lipitor".into(), "atorvastatin".into());
        map.insert("atorva".into(), "atorvastatin".into());
        map.insert("ecosprin".into(), "aspirin".into());
        map.insert("disprin".into(), "aspirin".into());
        map.insert("telma".into(), "telmisartan".into());
        map.insert("amlong".into(), "amlodipine".into());
        map.insert("norvasc".into(), "amlodipine".into());
        map.insert("lasix".into(), "furosemide".into());

        // Respiratory / allergy
        map.insert("zyrtec".into(), "cetirizine".into());
        map.insert("cetzine".into(), "cetirizine".into());
        map.insert("allegra".into(), "fexofenadine".into());
        map.insert("ventolin".into(), "salbutamol".into());
        map.insert("asthalin".into(), "salbutamol".into());
        map.insert("albuterol".into(), "salbutamol".into());
        map.insert("montair".into(), "montelukast".into());
        map.insert("singulair".into(), "montelukast".into());

        // GI
        map.insert("pantocid".into(), "pantoprazole".into());
        map.insert("pan".into(), "pantoprazole".into());
        map.insert("omez".into(), "omeprazole".into());
        map.insert("prilosec".into(), "omeprazole".into());
        map.insert("rantac".into(), "ranitidine".into());
        map.insert("zofran".into(), "ondansetron".into());
        map.insert("emeset".into(), "ondansetron".into());
        map.insert("ondem".into(), "ondansetron".into());
        map.insert("digene".into(), "antacid".into());

        // Thyroid / steroids
        map.insert("thyronorm".into(), "levothyroxine".into());
        map.insert("eltroxin".into(), "levothyroxine".into());
        map.insert("synthroid".into(), "levothyroxine".into());
        map.insert("wysolone".into(), "prednisolone".into());
        map.insert("omnacortil".into(), "prednisolone".into());
        map.insert("dexona".into(), "dexamethasone".into());

        map
    }

    fn default_unit_conversions() -> HashMap<String, (String, f64)> {
        let mut map = HashMap::new();

        // Mass
        map.insert("mg".into(), ("mg".into(), 1.0));
        map.insert("mcg".into(), ("mg".into(), 0.001));
        map.insert("µg".into(), ("mg".into(), 0.001));
        map.insert("ug".into(), ("mg".into(), 0.001));
        map.insert("g".into(), ("mg".into(), 1000.0));
        map.insert("gm".into(), ("mg".into(), 1000.0));

        // Volume
        map.insert("ml".into(), ("ml".into(), 1.0));
        map.insert("cc".into(), ("ml".into(), 1.0));
        map.insert("l".into(), ("ml".into(), 1000.0));

        // Units
        map.insert("iu".into(), ("iu".into(), 1.0));
        map.insert("unit".into(), ("iu".into(), 1.0));
        map.insert("units".into(), ("iu".into(), 1.0));

        // Concentration
        map.insert("%".into(), ("%".into(), 1.0));

        map
    }

    fn default_frequencies() -> HashMap<String, String> {
        let mut map = HashMap::new();

        map.insert("od".into(), "once daily".into());
        map.insert("qd".into(), "once daily".into());
        map.insert("once a day".into(), "once daily".into());
        map.insert("1-0-0".into(), "once daily".into());
        map.insert("0-1-0".into(), "once daily".into());
        map.insert("0-0-1".into(), "once daily".into());

        map.insert("bd".into(), "twice daily".into());
        map.insert("bid".into(), "twice daily".into());
        map.insert("twice a day".into(), "twice daily".into());
        map.insert("1-0-1".into(), "twice daily".into());

        map.insert("tds".into(), "three times daily".into());
        map.insert("tid".into(), "three times daily".into());
        map.insert("1-1-1".into(), "three times daily".into());

        map.insert("qid".into(), "four times daily".into());
        map.insert("qds".into(), "four times daily".into());
        map.insert("1-1-1-1".into(), "four times daily".into());

        map.insert("hs".into(), "at bedtime".into());
        map.insert("sos".into(), "as needed".into());
        map.insert("prn".into(), "as needed".into());
        map.insert("stat".into(), "immediately".into());
        map.insert("ac".into(), "before meals".into());
        map.insert("pc".into(), "after meals".into());

        map
    }
}

/// "500", "500mg", "0.5g" but not "b12" or "mg".
fn is_strength_token(token: &str) -> bool {
    match split_number_unit(token) {
        Some((_, unit)) => unit.is_empty() || unit.chars().all(|c| c.is_alphabetic() || c == '/' || c == '%'),
        None => false,
    }
}

/// Split "500mg" into (500.0, "mg"). The unit part may be empty.
fn split_number_unit(token: &str) -> Option<(f64, &str)> {
    let end = token
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(token.len());
    if end == 0 {
        return None;
    }
    let value: f64 = token[..end].parse().ok()?;
    Some((value, leading_unit(&token[end..])))
}

/// Unit letters up to a separator, so "mg/5ml" yields "mg".
fn leading_unit(text: &str) -> &str {
    let end = text
        .find(|c: char| !(c.is_alphabetic() || c == '%'))
        .unwrap_or(text.len());
    &text[..end]
}
