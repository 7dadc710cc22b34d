//! Product catalog models.

use serde::{Deserialize, Serialize};

/// A product in the pharmacy catalog.
///
/// Owned by the external catalog; the workflow only reads it and refers to
/// it by `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    /// Catalog identifier
    pub id: String,
    /// Display name (e.g., "Paracetamol 500mg Tablet")
    pub name: String,
    /// Labelled strength (e.g., "500mg", "250mg/5ml")
    pub strength: Option<String>,
    /// Manufacturer or marketer
    pub manufacturer: Option<String>,
    /// Unit price
    pub price: f64,
    /// Brand names and spellings used for matching
    pub aliases: Vec<String>,
    /// Whether the product can currently be ordered
    pub active: bool,
}

impl Product {
    /// Create a new product with required fields.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            strength: None,
            manufacturer: None,
            price: 0.0,
            aliases: Vec::new(),
            active: true,
        }
    }

    /// Builder-style strength setter.
    pub fn with_strength(mut self, strength: impl Into<String>) -> Self {
        self.strength = Some(strength.into());
        self
    }

    /// Builder-style alias setter.
    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Check whether a lowercase query equals one of the aliases.
    pub fn has_alias(&self, query: &str) -> bool {
        let query_lower = query.to_lowercase();
        self.aliases.iter().any(|a| a.to_lowercase() == query_lower)
    }

    /// Text used for catalog search display: name plus strength if not already in the name.
    pub fn display_label(&self) -> String {
        match &self.strength {
            Some(s) if !self.name.to_lowercase().contains(&s.to_lowercase()) => {
                format!("{} {}", self.name, s)
            }
            _ => self.name.clone(),
        }
    }
}
