//! Ground-truth assertions against the reference dataset

use std::sync::Arc;

use crate::reference::{ReferenceRow, ReferenceStore, Region};

/// Ground string used when the region has no reference row
pub const NO_GROUND_TRUTH: &str = "No ground truth for region";

/// Ground truth for one KPI output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KpiAssertion {
    pub ground: String,
    pub row: Option<ReferenceRow>,
}

impl KpiAssertion {
    pub fn is_match(&self) -> bool {
        self.row.is_some()
    }
}

/// Looks up reference figures for KPI outputs
#[derive(Debug, Clone)]
pub struct AssertionEngine {
    store: Arc<ReferenceStore>,
}

impl AssertionEngine {
    pub fn new(store: Arc<ReferenceStore>) -> Self {
        Self { store }
    }

    /// Build the ground truth for `region`.
    ///
    /// The lookup is an exact, case-sensitive match on the region code. A
    /// missing region yields [`NO_GROUND_TRUTH`] and no row.
    pub fn assert_kpi_with_output(&self, region: &str, output: &str) -> KpiAssertion {
        match self.store.get(region) {
            Some(row) => {
                tracing::debug!(region, output_len = output.len(), "Reference row matched");
                KpiAssertion {
                    ground: row.ground_truth(),
                    row: Some(row.clone()),
                }
            }
            None => {
                tracing::debug!(region, "No reference row for region");
                KpiAssertion {
                    ground: NO_GROUND_TRUTH.to_string(),
                    row: None,
                }
            }
        }
    }
}

/// Detect a region mentioned in the query or the KPI output.
///
/// Codes are tried in [`Region::ALL`] order and the first one whose lowercase
/// form occurs anywhere in either text wins. This is plain substring matching,
/// so `in` also matches inside ordinary words.
pub fn detect_region(query: &str, output: &str) -> Option<Region> {
    let query = query.to_lowercase();
    let output = output.to_lowercase();

    Region::ALL.into_iter().find(|region| {
        let code = region.code().to_lowercase();
        query.contains(&code) || output.contains(&code)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> AssertionEngine {
        AssertionEngine::new(Arc::new(ReferenceStore::builtin()))
    }

    #[test]
    fn test_known_region() {
        let assertion = engine().assert_kpi_with_output("NY", "anything");
        assert_eq!(assertion.ground, "Sales=120000, Growth=5.2");
        assert_eq!(assertion.row.unwrap().region, "NY");
    }

    #[test]
    fn test_unknown_region() {
        let assertion = engine().assert_kpi_with_output("MARS", "anything");
        assert_eq!(assertion.ground, NO_GROUND_TRUTH);
        assert!(!assertion.is_match());
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        assert!(!engine().assert_kpi_with_output("ny", "").is_match());
    }

    #[test]
    fn test_list_order_wins_over_text_order() {
        assert_eq!(detect_region("compare US and UK", ""), Some(Region::UK));
        assert_eq!(detect_region("US revenue", "vs UK"), Some(Region::UK));
    }

    #[test]
    fn test_detects_in_output() {
        assert_eq!(detect_region("sales please", "APAC grew 8.9%"), Some(Region::APAC));
    }

    #[test]
    fn test_injection_text_is_just_text() {
        assert_eq!(
            detect_region("NY'; DROP TABLE sales; --", ""),
            Some(Region::NY)
        );
    }

    #[test]
    fn test_substring_false_positive() {
        // "pricing" contains "in"
        assert_eq!(detect_region("pricing", ""), Some(Region::IN));
    }

    #[test]
    fn test_no_region() {
        assert_eq!(detect_region("", ""), None);
        assert_eq!(detect_region("hello", "world"), None);
    }
}
