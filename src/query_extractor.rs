//! Query Extractor
//!
//! Turns free text ("NDVI for AP in May 2025") into validated
//! (state, month, year) filter triples using a hosted language model. The
//! model only proposes values; everything it returns is normalised and checked
//! against the dataset's allow-list before it can reach a lookup.

use crate::dataset::{month_number, normalize_key, AllowList};
use crate::error::{GreenIndexError, Result};
use crate::extraction::extract_json_array;
use crate::llm::{CompletionRequest, LanguageModel};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A (state, month, year) filter proposed by the model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterTriple {
    pub state: String,
    pub month: String,
    pub year: i32,
}

impl FilterTriple {
    pub fn new(state: impl Into<String>, month: impl Into<String>, year: i32) -> Self {
        Self {
            state: state.into(),
            month: month.into(),
            year,
        }
    }

    /// Read one entry of the model's array. Missing keys become "" / 0 and
    /// are caught by validation; `year` may be a number or a numeric string.
    /// Years that are fractional or out of `i32` range also become 0.
    pub fn from_value(value: &Value) -> Result<Self> {
        if !value.is_object() {
            return Err(GreenIndexError::extraction(
                "filter entry is not an object",
                value.to_string(),
            ));
        }

        let text = |key: &str| value.get(key).and_then(Value::as_str).unwrap_or("").to_string();
        let year = value.get("year").and_then(parse_year).unwrap_or(0);

        Ok(Self::new(text("state"), text("month"), year))
    }
}

/// Exact integer year, never truncated or wrapped.
fn parse_year(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => {
            if let Some(year) = n.as_i64() {
                return i32::try_from(year).ok();
            }
            let year = n.as_f64()?;
            let in_range = year >= f64::from(i32::MIN) && year <= f64::from(i32::MAX);
            (year.fract() == 0.0 && in_range).then_some(year as i32)
        }
        Value::String(s) => s.trim().parse::<i32>().ok(),
        _ => None,
    }
}

impl fmt::Display for FilterTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {} {}", self.state, self.month, self.year)
    }
}

/// What happens to a triple that fails allow-list validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationPolicy {
    /// Drop the triple, warn, and keep the rest of the batch.
    #[default]
    SkipAndWarn,
    /// Fail the whole extraction on the first invalid triple.
    AbortBatch,
}

impl FromStr for ValidationPolicy {
    type Err = GreenIndexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "skip" | "skip-and-warn" | "warn" => Ok(ValidationPolicy::SkipAndWarn),
            "abort" | "abort-batch" | "strict" => Ok(ValidationPolicy::AbortBatch),
            other => Err(GreenIndexError::Config(format!(
                "unknown validation policy '{}' (expected 'skip' or 'abort')",
                other
            ))),
        }
    }
}

/// A triple dropped under `ValidationPolicy::SkipAndWarn`.
#[derive(Debug)]
pub struct RejectedTriple {
    pub triple: FilterTriple,
    pub reason: GreenIndexError,
}

#[derive(Debug, Default)]
pub struct ExtractionReport {
    /// Validated triples in the model's order.
    pub triples: Vec<FilterTriple>,
    pub rejected: Vec<RejectedTriple>,
    /// Array elements that were not filter objects at all.
    pub malformed: Vec<GreenIndexError>,
}

lazy_static! {
    /// Common abbreviations, keyed by `normalize_state` output.
    static ref STATE_ALIASES: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("a and n", "andaman and nicobar");
        m.insert("a and n islands", "andaman and nicobar");
        m.insert("andaman", "andaman and nicobar");
        m.insert("andaman and nicobar islands", "andaman and nicobar");
        m.insert("ap", "andhra pradesh");
        m.insert("ar", "arunachal pradesh");
        m.insert("hp", "himachal pradesh");
        m.insert("j and k", "jammu and kashmir");
        m.insert("mp", "madhya pradesh");
        m.insert("orissa", "odisha");
        m.insert("tn", "tamil nadu");
        m.insert("uk", "uttarakhand");
        m.insert("up", "uttar pradesh");
        m.insert("wb", "west bengal");
        m
    };
}

/// Lower-case, collapse whitespace, and spell out `&`.
pub fn normalize_state(raw: &str) -> String {
    raw.to_lowercase()
        .replace('&', " and ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn compact(value: &str) -> String {
    value.chars().filter(|c| c.is_alphanumeric()).collect()
}

/// Map a model-supplied state onto its allow-list spelling when one exists.
/// Unknown values come back normalised and fail validation later.
pub fn canonical_state(raw: &str, allow: &AllowList) -> String {
    let normalized = normalize_state(raw);

    let by_normal: HashMap<String, &String> = allow
        .states
        .iter()
        .map(|s| (normalize_state(s), s))
        .collect();

    if let Some(state) = by_normal.get(&normalized) {
        return (*state).clone();
    }

    if let Some(target) = STATE_ALIASES.get(normalized.as_str()) {
        if let Some(state) = by_normal.get(*target) {
            return (*state).clone();
        }
    }

    // "andhrapradesh" vs "andhra pradesh"
    let squeezed = compact(&normalized);
    if let Some(state) = allow.states.iter().find(|s| compact(&normalize_state(s)) == squeezed) {
        return state.clone();
    }

    normalized
}

/// Map "May", "jun", "JUNE" onto the allow-list spelling of that month.
pub fn canonical_month(raw: &str, allow: &AllowList) -> String {
    let normalized = normalize_key(raw);
    if allow.contains_month(&normalized) {
        return normalized;
    }
    if let Some(number) = month_number(&normalized) {
        if let Some(month) = allow.months.iter().find(|m| month_number(m) == Some(number)) {
            return month.clone();
        }
    }
    normalized
}

pub struct QueryExtractor {
    model: Arc<dyn LanguageModel>,
    model_name: String,
    policy: ValidationPolicy,
}

impl QueryExtractor {
    pub fn new(model: Arc<dyn LanguageModel>, model_name: impl Into<String>) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            policy: ValidationPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ValidationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ValidationPolicy {
        self.policy
    }

    /// Validated triples for `user_text`, in the model's order.
    pub async fn extract(&self, user_text: &str, allow: &AllowList) -> Result<Vec<FilterTriple>> {
        Ok(self.extract_with_report(user_text, allow).await?.triples)
    }

    /// Like `extract`, but also returns the triples dropped by validation.
    pub async fn extract_with_report(
        &self,
        user_text: &str,
        allow: &AllowList,
    ) -> Result<ExtractionReport> {
        let json_output = self.model.supports_json_output();
        let prompt = build_extraction_prompt(user_text, allow, json_output);

        let mut request = CompletionRequest::new(&self.model_name, prompt);
        if json_output {
            request = request.with_json_output();
        }

        let response = self.model.complete(&request).await?;
        debug!("Extractor raw response: {}", response);

        let items = extract_json_array(&response)?;
        let mut report = ExtractionReport::default();

        for item in &items {
            let proposed = match FilterTriple::from_value(item) {
                Ok(proposed) => proposed,
                Err(e) => match self.policy {
                    ValidationPolicy::AbortBatch => return Err(e),
                    ValidationPolicy::SkipAndWarn => {
                        warn!("Skipping model output entry {}: {}", item, e);
                        report.malformed.push(e);
                        continue;
                    }
                },
            };
            let triple = FilterTriple {
                state: canonical_state(&proposed.state, allow),
                month: canonical_month(&proposed.month, allow),
                year: proposed.year,
            };

            match validate(&triple, allow) {
                Ok(()) => report.triples.push(triple),
                Err(reason) => match self.policy {
                    ValidationPolicy::AbortBatch => return Err(reason),
                    ValidationPolicy::SkipAndWarn => {
                        warn!("Skipping filter {}: {}{}", triple, reason, suggestion(&triple, allow));
                        report.rejected.push(RejectedTriple { triple, reason });
                    }
                },
            }
        }

        info!(
            "Extracted {} filter(s) from query ({} rejected, {} malformed)",
            report.triples.len(),
            report.rejected.len(),
            report.malformed.len()
        );
        Ok(report)
    }
}

/// Check each field of a triple against the allow-list.
pub fn validate(triple: &FilterTriple, allow: &AllowList) -> Result<()> {
    if !allow.contains_state(&triple.state) {
        return Err(GreenIndexError::Validation {
            field: "state".to_string(),
            value: triple.state.clone(),
            allowed: allow.states.clone(),
        });
    }
    if !allow.contains_month(&triple.month) {
        return Err(GreenIndexError::Validation {
            field: "month".to_string(),
            value: triple.month.clone(),
            allowed: allow.months.clone(),
        });
    }
    if !allow.contains_year(triple.year) {
        return Err(GreenIndexError::Validation {
            field: "year".to_string(),
            value: triple.year.to_string(),
            allowed: allow.years.iter().map(|y| y.to_string()).collect(),
        });
    }
    Ok(())
}

fn suggestion(triple: &FilterTriple, allow: &AllowList) -> String {
    allow
        .states
        .iter()
        .map(|s| (strsim::jaro_winkler(s, &triple.state), s))
        .filter(|(score, _)| *score > 0.85)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .filter(|(_, s)| **s != triple.state)
        .map(|(_, s)| format!(" (did you mean '{}'?)", s))
        .unwrap_or_default()
}

/// Instruction embedding the allow-list; asks for a JSON array of filters.
pub fn build_extraction_prompt(user_text: &str, allow: &AllowList, json_output: bool) -> String {
    let example_state = allow.states.first().map(String::as_str).unwrap_or("andhra pradesh");
    let example_month = allow.months.first().map(String::as_str).unwrap_or("may");
    let example_year = allow.years.first().copied().unwrap_or(2025);
    let years: Vec<String> = allow.years.iter().map(|y| y.to_string()).collect();

    let example = format!(
        r#"{{"state": "{}", "month": "{}", "year": {}}}"#,
        example_state, example_month, example_year
    );
    let format_hint = if json_output {
        format!(
            "Return ONLY a JSON object of the form:\n{{\"filters\": [\n  {}\n]}}",
            example
        )
    } else {
        format!("Return ONLY a JSON list like:\n[\n  {}\n]", example)
    };

    format!(
        r#"You are a data assistant for an NDVI (vegetation index) dataset.
Extract every (state, month, year) combination the user asks about.
Only use values from the lists below. Do NOT guess.

Valid states: {}
Valid months: {}
Valid years: {}

User query: "{}"

{}
One object per combination, in the order they are mentioned. If nothing matches, return an empty list."#,
        allow.states.join(", "),
        allow.months.join(", "),
        years.join(", "),
        user_text.trim(),
        format_hint
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;

    fn allow_list() -> AllowList {
        AllowList {
            states: vec![
                "andaman and nicobar".to_string(),
                "andhra pradesh".to_string(),
                "kerala".to_string(),
            ],
            months: vec!["january".to_string(), "may".to_string(), "june".to_string()],
            years: vec![2025],
        }
    }

    fn extractor(model: Arc<ScriptedModel>) -> QueryExtractor {
        QueryExtractor::new(model, "llama3-70b-8192")
    }

    #[test]
    fn test_year_from_number_or_string() {
        let value = serde_json::json!({"state": "kerala", "month": "may", "year": "2025"});
        assert_eq!(FilterTriple::from_value(&value).unwrap().year, 2025);

        let missing = serde_json::json!({"state": "kerala"});
        let triple = FilterTriple::from_value(&missing).unwrap();
        assert_eq!((triple.month.as_str(), triple.year), ("", 0));

        assert!(FilterTriple::from_value(&serde_json::json!("kerala")).is_err());
    }

    #[test]
    fn test_year_is_never_truncated() {
        let year_of = |year: serde_json::Value| {
            FilterTriple::from_value(&serde_json::json!({"state": "kerala", "month": "may", "year": year}))
                .unwrap()
                .year
        };
        assert_eq!(year_of(serde_json::json!(4294969321i64)), 0);
        assert_eq!(year_of(serde_json::json!(2025.9)), 0);
        assert_eq!(year_of(serde_json::json!(2025.0)), 2025);
        assert_eq!(year_of(serde_json::json!(-3e12)), 0);
        assert_eq!(year_of(serde_json::json!("2025.5")), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_years_fail_validation() {
        let model = Arc::new(ScriptedModel::new(vec![
            r#"[{"state":"kerala","month":"may","year":4294969321},{"state":"kerala","month":"may","year":2025.9}]"#,
        ]));
        let report = extractor(model)
            .extract_with_report("q", &allow_list())
            .await
            .unwrap();

        assert!(report.triples.is_empty());
        assert_eq!(report.rejected.len(), 2);
        assert!(report.rejected.iter().all(|r| matches!(
            &r.reason,
            GreenIndexError::Validation { field, value, .. } if field == "year" && value == "0"
        )));
    }

    #[tokio::test]
    async fn test_malformed_entry_skipped_under_skip_and_warn() {
        let model = Arc::new(ScriptedModel::new(vec![
            r#"[{"state":"kerala","month":"may","year":2025}, "nothing else", {"state":"AP","month":"june","year":2025}]"#,
        ]));
        let report = extractor(model)
            .extract_with_report("q", &allow_list())
            .await
            .unwrap();

        assert_eq!(
            report.triples,
            vec![
                FilterTriple::new("kerala", "may", 2025),
                FilterTriple::new("andhra pradesh", "june", 2025),
            ]
        );
        assert!(report.rejected.is_empty());
        assert_eq!(report.malformed.len(), 1);
        assert!(matches!(&report.malformed[0], GreenIndexError::Extraction { raw, .. } if raw == "\"nothing else\""));
    }

    #[tokio::test]
    async fn test_malformed_entry_aborts_under_abort_batch() {
        let model = Arc::new(ScriptedModel::new(vec![
            r#"[{"state":"kerala","month":"may","year":2025}, "nothing else"]"#,
        ]));
        let result = extractor(model)
            .with_policy(ValidationPolicy::AbortBatch)
            .extract("q", &allow_list())
            .await;
        assert!(matches!(result, Err(GreenIndexError::Extraction { .. })));
    }

    #[test]
    fn test_canonical_state_aliases() {
        let allow = allow_list();
        assert_eq!(canonical_state("A&N", &allow), "andaman and nicobar");
        assert_eq!(canonical_state("AP", &allow), "andhra pradesh");
        assert_eq!(canonical_state("andhrapradesh", &allow), "andhra pradesh");
        assert_eq!(canonical_state("  Kerala ", &allow), "kerala");
        // alias target missing from the dataset stays unresolved
        assert_eq!(canonical_state("UP", &allow), "up");
    }

    #[test]
    fn test_canonical_month() {
        let allow = allow_list();
        assert_eq!(canonical_month("May", &allow), "may");
        assert_eq!(canonical_month("jan", &allow), "january");
        assert_eq!(canonical_month("Smarch", &allow), "smarch");
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("abort".parse::<ValidationPolicy>().unwrap(), ValidationPolicy::AbortBatch);
        assert_eq!("Skip".parse::<ValidationPolicy>().unwrap(), ValidationPolicy::SkipAndWarn);
        assert!("sometimes".parse::<ValidationPolicy>().is_err());
    }

    #[test]
    fn test_prompt_embeds_allow_list() {
        let prompt = build_extraction_prompt("NDVI for AP in May 2025", &allow_list(), false);
        assert!(prompt.contains("Valid states: andaman and nicobar, andhra pradesh, kerala"));
        assert!(prompt.contains("Valid months: january, may, june"));
        assert!(prompt.contains("User query: \"NDVI for AP in May 2025\""));
        assert!(prompt.contains("Return ONLY a JSON list"));

        let json_prompt = build_extraction_prompt("x", &allow_list(), true);
        assert!(json_prompt.contains("{\"filters\": ["));
    }

    #[tokio::test]
    async fn test_extract_preserves_model_order() {
        let model = Arc::new(ScriptedModel::new(vec![
            r#"[{"state":"Kerala","month":"June","year":2025},{"state":"AP","month":"May","year":2025},{"state":"kerala","month":"january","year":2025}]"#,
        ]));
        let triples = extractor(model.clone())
            .extract("kerala june, AP may, kerala jan", &allow_list())
            .await
            .unwrap();

        assert_eq!(
            triples,
            vec![
                FilterTriple::new("kerala", "june", 2025),
                FilterTriple::new("andhra pradesh", "may", 2025),
                FilterTriple::new("kerala", "january", 2025),
            ]
        );
        assert_eq!(model.call_count(), 1);
        assert_eq!(model.requests()[0].model, "llama3-70b-8192");
        assert!(!model.requests()[0].json_output);
    }

    #[tokio::test]
    async fn test_extract_zero_matches_is_not_an_error() {
        let model = Arc::new(ScriptedModel::new(vec!["[]"]));
        let triples = extractor(model).extract("NDVI on Mars", &allow_list()).await.unwrap();
        assert!(triples.is_empty());
    }

    #[tokio::test]
    async fn test_abort_batch_on_invalid_state() {
        let model = Arc::new(ScriptedModel::new(vec![
            r#"[{"state":"kerala","month":"may","year":2025},{"state":"atlantis","month":"may","year":2025},{"state":"kerala","month":"june","year":2025}]"#,
        ]));
        let result = extractor(model)
            .with_policy(ValidationPolicy::AbortBatch)
            .extract("q", &allow_list())
            .await;

        match result {
            Err(GreenIndexError::Validation { field, value, allowed }) => {
                assert_eq!(field, "state");
                assert_eq!(value, "atlantis");
                assert_eq!(allowed, allow_list().states);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_skip_and_warn_keeps_valid_triples() {
        let model = Arc::new(ScriptedModel::new(vec![
            r#"[{"state":"kerala","month":"may","year":2025},{"state":"atlantis","month":"may","year":2025},{"state":"kerala","month":"may","year":1999}]"#,
        ]));
        let report = extractor(model)
            .extract_with_report("q", &allow_list())
            .await
            .unwrap();

        assert_eq!(report.triples, vec![FilterTriple::new("kerala", "may", 2025)]);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(report.rejected[0].triple.state, "atlantis");
        assert!(matches!(
            &report.rejected[1].reason,
            GreenIndexError::Validation { field, .. } if field == "year"
        ));
    }

    #[tokio::test]
    async fn test_no_structured_output() {
        let model = Arc::new(ScriptedModel::new(vec!["Data not available"]));
        let result = extractor(model).extract("q", &allow_list()).await;
        assert!(matches!(result, Err(GreenIndexError::Extraction { raw, .. }) if raw == "Data not available"));
    }

    #[tokio::test]
    async fn test_requests_json_output_when_supported() {
        let model = Arc::new(
            ScriptedModel::new(vec![r#"{"filters":[{"state":"kerala","month":"may","year":2025}]}"#])
                .with_json_output(),
        );
        let triples = extractor(model.clone()).extract("kerala may", &allow_list()).await.unwrap();
        assert_eq!(triples.len(), 1);
        assert!(model.requests()[0].json_output);
    }

    #[tokio::test]
    async fn test_model_failure_propagates() {
        let model = Arc::new(ScriptedModel::failing("timeout"));
        let result = extractor(model).extract("q", &allow_list()).await;
        assert!(matches!(result, Err(GreenIndexError::Llm(_))));
    }
}
