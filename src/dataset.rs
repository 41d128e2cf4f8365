//! Dataset Accessor
//!
//! Loads the static NDVI table once at startup and derives the allow-list of
//! (state, month, year) values the rest of the pipeline validates against.

use crate::error::{GreenIndexError, Result};
use chrono::Month;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// One row of the NDVI table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdviRecord {
    pub state: String,
    pub month: String,
    pub year: i32,
    pub ndvi_value: f64,
    pub temperature: f64,
    pub rainfall: f64,
    pub soilmoisture: f64,
}

impl NdviRecord {
    /// Lower-cased, trimmed (state, month, year) key.
    pub fn key(&self) -> (String, String, i32) {
        (normalize_key(&self.state), normalize_key(&self.month), self.year)
    }

    fn normalized(mut self) -> Self {
        self.state = normalize_key(&self.state);
        self.month = normalize_key(&self.month);
        self
    }
}

/// Trim and lower-case a state or month value.
pub fn normalize_key(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Calendar position of a month name ("may", "May", "jan"), if it is one.
pub fn month_number(month: &str) -> Option<u32> {
    month.trim().parse::<Month>().ok().map(|m| m.number_from_month())
}

/// Distinct values present in the dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllowList {
    pub states: Vec<String>,
    pub months: Vec<String>,
    pub years: Vec<i32>,
}

impl AllowList {
    pub fn from_records(records: &[NdviRecord]) -> Self {
        let states = records
            .iter()
            .map(|r| normalize_key(&r.state))
            .unique()
            .sorted()
            .collect();

        let months = records
            .iter()
            .map(|r| normalize_key(&r.month))
            .unique()
            .sorted_by_key(|m| (month_number(m).unwrap_or(u32::MAX), m.clone()))
            .collect();

        let years = records.iter().map(|r| r.year).unique().sorted().collect();

        Self {
            states,
            months,
            years,
        }
    }

    pub fn contains_state(&self, state: &str) -> bool {
        let state = normalize_key(state);
        self.states.iter().any(|s| *s == state)
    }

    pub fn contains_month(&self, month: &str) -> bool {
        let month = normalize_key(month);
        self.months.iter().any(|m| *m == month)
    }

    pub fn contains_year(&self, year: i32) -> bool {
        self.years.contains(&year)
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Earliest and latest month covered by the dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coverage {
    pub first: (i32, String),
    pub last: (i32, String),
}

impl fmt::Display for Coverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} - {} {}",
            title_case(&self.first.1),
            self.first.0,
            title_case(&self.last.1),
            self.last.0
        )
    }
}

/// Capitalise each word ("andhra pradesh" -> "Andhra Pradesh").
pub fn title_case(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .join(" ")
}

/// The loaded NDVI table. Read-only for the lifetime of the process.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    records: Vec<NdviRecord>,
}

impl Dataset {
    /// Build a dataset from in-memory records, enforcing one record per key.
    pub fn from_records(records: Vec<NdviRecord>) -> Result<Self> {
        let records: Vec<NdviRecord> = records.into_iter().map(NdviRecord::normalized).collect();

        let mut seen = HashSet::new();
        for record in &records {
            if !seen.insert(record.key()) {
                return Err(GreenIndexError::Dataset(format!(
                    "duplicate record for {}, {} {}",
                    record.state, record.month, record.year
                )));
            }
        }

        Ok(Self { records })
    }

    /// Load from a `.json` array or a `.csv` file with a header row.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        let records: Vec<NdviRecord> = match extension.as_str() {
            "csv" => {
                let mut reader = csv::Reader::from_path(path)?;
                reader
                    .deserialize()
                    .collect::<std::result::Result<Vec<NdviRecord>, csv::Error>>()?
            }
            "json" | "" => {
                let content = std::fs::read_to_string(path)?;
                serde_json::from_str(&content)?
            }
            other => {
                return Err(GreenIndexError::Dataset(format!(
                    "unsupported dataset format '.{}' for {}",
                    other,
                    path.display()
                )))
            }
        };

        debug!("Read {} raw rows from {}", records.len(), path.display());
        let dataset = Self::from_records(records)?;
        info!(
            "Loaded NDVI dataset from {} ({} records)",
            path.display(),
            dataset.len()
        );
        Ok(dataset)
    }

    pub fn records(&self) -> &[NdviRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Recomputed on every call; the table is small.
    pub fn allow_list(&self) -> AllowList {
        AllowList::from_records(&self.records)
    }

    pub fn coverage(&self) -> Option<Coverage> {
        let ordered = || {
            self.records
                .iter()
                .map(|r| (r.year, month_number(&r.month).unwrap_or(0), r.month.clone()))
        };
        let first = ordered().min()?;
        let last = ordered().max()?;
        Some(Coverage {
            first: (first.0, first.2),
            last: (last.0, last.2),
        })
    }
}
