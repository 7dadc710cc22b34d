//! Mapping reconciler for prescription lines.
//!
//! Pipeline: Normalization → Catalog search → Ranking → Mapping decision

mod matcher;
mod normalizer;

pub use matcher::*;
pub use normalizer::*;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::collaborators::{call_with_timeout, CatalogSearch, DependencyError};
use crate::config::ReconcilerConfig;
use crate::models::{LineMapping, PrescriptionLine};

/// Service name used in catalog errors.
pub const CATALOG_SERVICE: &str = "catalog";

/// Outcome of reconciling one line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconciliationResult {
    pub line_id: String,
    pub mapping: LineMapping,
    /// Ranked candidates, best first; empty when auto-mapped
    pub suggestions: Vec<ScoredProduct>,
    /// Set when the catalog failed or timed out
    pub error: Option<DependencyError>,
}

impl ReconciliationResult {
    pub fn suggested_ids(&self) -> Vec<String> {
        self.suggestions.iter().map(|s| s.product.id.clone()).collect()
    }

    /// Write the outcome onto a line. Only `mapping` and
    /// `suggested_product_ids` change.
    pub fn apply_to(&self, line: &mut PrescriptionLine) {
        line.mapping = self.mapping.clone();
        line.suggested_product_ids = self.suggested_ids();
    }

    fn unavailable(line_id: &str) -> Self {
        Self {
            line_id: line_id.to_string(),
            mapping: LineMapping::Unavailable,
            suggestions: Vec::new(),
            error: None,
        }
    }
}

/// Maps prescription lines to catalog products.
pub struct Reconciler {
    normalizer: Normalizer,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self::with_normalizer(Normalizer::new(), config)
    }

    pub fn with_normalizer(normalizer: Normalizer, config: ReconcilerConfig) -> Self {
        Self { normalizer, config }
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Reconcile one line against the catalog.
    #[instrument(skip(self, line, catalog), fields(line_id = %line.id))]
    pub async fn reconcile(
        &self,
        line: &PrescriptionLine,
        catalog: &dyn CatalogSearch,
    ) -> ReconciliationResult {
        let ranked = match self.rank_all(line, catalog).await {
            Ok(Some(ranked)) => ranked,
            Ok(None) => {
                debug!("empty search name, marking unavailable");
                return ReconciliationResult::unavailable(&line.id);
            }
            Err(e) => {
                warn!(error = %e, "catalog search failed, leaving line pending");
                return ReconciliationResult {
                    line_id: line.id.clone(),
                    mapping: LineMapping::Pending,
                    suggestions: Vec::new(),
                    error: Some(e),
                };
            }
        };

        let result = self.decide(line, ranked);
        debug!(
            mapping = ?result.mapping.status(),
            suggestions = result.suggestions.len(),
            "line reconciled"
        );
        result
    }

    /// Reconcile every line concurrently. Results come back in input order
    /// and one line's failure never affects another.
    pub async fn reconcile_lines(
        &self,
        lines: &[PrescriptionLine],
        catalog: &dyn CatalogSearch,
    ) -> Vec<ReconciliationResult> {
        join_all(lines.iter().map(|line| self.reconcile(line, catalog))).await
    }

    /// Ranked catalog candidates for a line, trimmed to `max_suggestions`.
    ///
    /// `Ok(None)` means the line has no searchable name and the catalog was
    /// not called.
    pub async fn candidates(
        &self,
        line: &PrescriptionLine,
        catalog: &dyn CatalogSearch,
    ) -> Result<Option<Vec<ScoredProduct>>, DependencyError> {
        let ranked = self.rank_all(line, catalog).await?;
        Ok(ranked.map(|mut ranked| {
            ranked.truncate(self.config.max_suggestions);
            ranked
        }))
    }

    /// Every catalog result for the line, ranked.
    async fn rank_all(
        &self,
        line: &PrescriptionLine,
        catalog: &dyn CatalogSearch,
    ) -> Result<Option<Vec<ScoredProduct>>, DependencyError> {
        let raw = line.search_name().trim();
        let query = self.normalizer.search_query(raw);
        if query.is_empty() {
            return Ok(None);
        }

        let timeout = self.config.search_timeout();
        let mut used_query = query.clone();
        let mut products =
            call_with_timeout(CATALOG_SERVICE, timeout, catalog.search(&query)).await?;

        if products.is_empty() {
            let cleaned = self.normalizer.clean_name(raw);
            if !cleaned.is_empty() && cleaned != query {
                debug!(query = %query, fallback = %cleaned, "no results, retrying with raw name");
                products =
                    call_with_timeout(CATALOG_SERVICE, timeout, catalog.search(&cleaned)).await?;
                used_query = cleaned;
            }
        }

        let prescribed = self
            .normalizer
            .parse_strength(line.effective_dosage())
            .or_else(|| self.normalizer.parse_strength(line.search_name()));

        let ranked = Matcher::new(&self.normalizer).rank(&used_query, prescribed.as_ref(), products);
        Ok(Some(ranked))
    }

    /// Strong candidates are counted over the full ranking; only the stored
    /// suggestions are trimmed.
    fn decide(&self, line: &PrescriptionLine, mut ranked: Vec<ScoredProduct>) -> ReconciliationResult {
        if ranked.is_empty() {
            return ReconciliationResult::unavailable(&line.id);
        }

        let mut strong = ranked.iter().filter(|s| {
            s.name_score >= self.config.name_match_threshold
                && s.strength != StrengthAgreement::Contradicts
        });
        let single_strong = match (strong.next(), strong.next()) {
            (Some(only), None) => Some(only.product.id.clone()),
            _ => None,
        };

        match single_strong {
            Some(product_id) if line.confidence >= self.config.auto_map_confidence => {
                ReconciliationResult {
                    line_id: line.id.clone(),
                    mapping: LineMapping::Mapped { product_id },
                    suggestions: Vec::new(),
                    error: None,
                }
            }
            _ => {
                ranked.truncate(self.config.max_suggestions);
                ReconciliationResult {
                    line_id: line.id.clone(),
                    mapping: LineMapping::Pending,
                    suggestions: ranked,
                    error: None,
                }
            }
        }
    }
}
