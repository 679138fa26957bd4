//! Reference KPI dataset used as ground truth
//!
//! The dataset is a JSON record of two parallel maps keyed by region code:
//!
//! ```json
//! {"sales": {"NY": 120000}, "growth": {"NY": 5.2}}
//! ```
//!
//! Figures are kept as [`serde_json::Number`] so they render exactly as
//! written in the source data.

use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{EvalFlowError, Result};

/// Region codes understood by region detection, in detection priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Region {
    NY,
    CA,
    UK,
    IN,
    US,
    EU,
    APAC,
    LATAM,
}

impl Region {
    /// All regions in detection priority order
    pub const ALL: [Region; 8] = [
        Region::NY,
        Region::CA,
        Region::UK,
        Region::IN,
        Region::US,
        Region::EU,
        Region::APAC,
        Region::LATAM,
    ];

    /// The region code
    pub fn code(&self) -> &'static str {
        match self {
            Region::NY => "NY",
            Region::CA => "CA",
            Region::UK => "UK",
            Region::IN => "IN",
            Region::US => "US",
            Region::EU => "EU",
            Region::APAC => "APAC",
            Region::LATAM => "LATAM",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Region {
    type Err = EvalFlowError;

    fn from_str(s: &str) -> Result<Self> {
        Region::ALL
            .iter()
            .copied()
            .find(|r| r.code() == s)
            .ok_or_else(|| EvalFlowError::Reference(format!("Unknown region code: {}", s)))
    }
}

/// One row of reference figures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRow {
    /// Region code (free-form; only [`Region`] codes take part in detection)
    pub region: String,
    pub sales: Number,
    pub growth: Option<Number>,
}

impl ReferenceRow {
    /// Ground-truth description, e.g. `Sales=120000, Growth=5.2`
    pub fn ground_truth(&self) -> String {
        let growth = self
            .growth
            .as_ref()
            .map(|g| g.to_string())
            .unwrap_or_else(|| "None".to_string());
        format!("Sales={}, Growth={}", self.sales, growth)
    }
}

#[derive(Debug, Deserialize)]
struct ReferenceData {
    sales: BTreeMap<String, Number>,
    #[serde(default)]
    growth: BTreeMap<String, Option<Number>>,
}

const DEFAULT_DATASET: &str = r#"{
  "sales": {
    "NY": 120000,
    "CA": 98000,
    "UK": 87000,
    "IN": 143000,
    "US": 450000,
    "EU": 310000,
    "APAC": 275000,
    "LATAM": 64000
  },
  "growth": {
    "NY": 5.2,
    "CA": 3.1,
    "UK": -1.4,
    "IN": 12.5,
    "US": 4.3,
    "EU": 2.7,
    "APAC": 8.9,
    "LATAM": 6.1
  }
}"#;

/// Read-only table of reference rows keyed by region code
#[derive(Debug, Clone, Default)]
pub struct ReferenceStore {
    rows: BTreeMap<String, ReferenceRow>,
}

impl ReferenceStore {
    /// Store backed by the bundled sample dataset
    pub fn builtin() -> Self {
        // The bundled dataset is a compile-time constant known to parse.
        Self::from_json(DEFAULT_DATASET).unwrap_or_default()
    }

    /// Parse a `{"sales": {..}, "growth": {..}}` document.
    ///
    /// Regions missing from `growth` get a `None` growth figure.
    pub fn from_json(json: &str) -> Result<Self> {
        let data: ReferenceData = serde_json::from_str(json)
            .map_err(|e| EvalFlowError::Reference(format!("Invalid reference dataset: {}", e)))?;

        let rows = data
            .sales
            .into_iter()
            .map(|(region, sales)| {
                let growth = data.growth.get(&region).cloned().flatten();
                let row = ReferenceRow {
                    region: region.clone(),
                    sales,
                    growth,
                };
                (region, row)
            })
            .collect();

        Ok(Self { rows })
    }

    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            EvalFlowError::Reference(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let store = Self::from_json(&json)?;
        tracing::info!(path = %path.display(), rows = store.len(), "Loaded reference dataset");
        Ok(store)
    }

    /// Exact, case-sensitive lookup
    pub fn get(&self, region: &str) -> Option<&ReferenceRow> {
        self.rows.get(region)
    }

    /// Rows ordered by region code
    pub fn rows(&self) -> impl Iterator<Item = &ReferenceRow> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
