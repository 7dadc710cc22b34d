//! Candidate ranking.
//!
//! Scoring weights:
//! - Name/alias match quality: 80%
//! - Strength agreement with the prescribed dosage: 20%

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use strsim::{jaro_winkler, normalized_levenshtein};

use super::{Normalizer, Strength};
use crate::models::Product;

pub mod weights {
    pub const NAME: f64 = 0.8;
    pub const STRENGTH: f64 = 0.2;
}

/// How a product's strength relates to the prescribed one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StrengthAgreement {
    Match,
    /// Either side has no parseable strength, or units differ
    Unknown,
    Contradicts,
}

impl StrengthAgreement {
    pub fn score(&self) -> f64 {
        match self {
            StrengthAgreement::Match => 1.0,
            StrengthAgreement::Unknown => 0.6,
            StrengthAgreement::Contradicts => 0.2,
        }
    }
}

/// A catalog product with its match scores.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredProduct {
    pub product: Product,
    pub name_score: f64,
    pub strength: StrengthAgreement,
    /// Weighted total used for ranking
    pub score: f64,
}

/// Ranks catalog results against a normalized query.
pub struct Matcher<'a> {
    normalizer: &'a Normalizer,
}

impl<'a> Matcher<'a> {
    pub fn new(normalizer: &'a Normalizer) -> Self {
        Self { normalizer }
    }

    /// Score and sort products, best first. Equal scores keep input order.
    pub fn rank(
        &self,
        query: &str,
        prescribed: Option<&Strength>,
        products: Vec<Product>,
    ) -> Vec<ScoredProduct> {
        let mut scored: Vec<ScoredProduct> = products
            .into_iter()
            .map(|product| self.score_product(product, query, prescribed))
            .collect();

        // sort_by is stable
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored
    }

    fn score_product(
        &self,
        product: Product,
        query: &str,
        prescribed: Option<&Strength>,
    ) -> ScoredProduct {
        let name_score = self.score_name(&product, query);
        let strength = self.strength_agreement(&product, prescribed);

        ScoredProduct {
            score: name_score * weights::NAME + strength.score() * weights::STRENGTH,
            product,
            name_score,
            strength,
        }
    }

    /// Name/alias match quality (0.0 - 1.0).
    pub fn score_name(&self, product: &Product, query: &str) -> f64 {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return 0.0;
        }

        let product_name = name_words(&self.normalizer.clean_name(&product.name));
        if product_name == query {
            return 1.0;
        }

        for alias in &product.aliases {
            let alias_lower = alias.to_lowercase();
            if alias_lower == query || self.normalizer.expand_alias(&alias_lower) == query {
                return 1.0;
            }
        }

        let name_similarity = fuzzy_match(&query, &product_name);
        let alias_similarity = product
            .aliases
            .iter()
            .map(|a| fuzzy_match(&query, &a.to_lowercase()))
            .max_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal))
            .unwrap_or(0.0);

        name_similarity.max(alias_similarity)
    }

    /// Compare the prescribed strength with the product's label strength.
    pub fn strength_agreement(
        &self,
        product: &Product,
        prescribed: Option<&Strength>,
    ) -> StrengthAgreement {
        let Some(prescribed) = prescribed else {
            return StrengthAgreement::Unknown;
        };
        let label = product
            .strength
            .as_deref()
            .and_then(|s| self.normalizer.parse_strength(s))
            .or_else(|| self.normalizer.parse_strength(&product.name));

        match label.and_then(|label| label.agrees_with(prescribed)) {
            Some(true) => StrengthAgreement::Match,
            Some(false) => StrengthAgreement::Contradicts,
            None => StrengthAgreement::Unknown,
        }
    }
}

/// Words of a cleaned product name that start with a letter, so strengths
/// left mid-name ("amoxicillin 125mg/5ml") and separators ("+") drop out.
fn name_words(cleaned: &str) -> String {
    cleaned
        .split_whitespace()
        .filter(|w| w.chars().next().is_some_and(char::is_alphabetic))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Combined fuzzy similarity: Jaro-Winkler favours shared prefixes,
/// Levenshtein overall edit distance.
fn fuzzy_match(a: &str, b: &str) -> f64 {
    jaro_winkler(a, b) * 0.6 + normalized_levenshtein(a, b) * 0.4
}
