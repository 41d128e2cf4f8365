//! NDVI Assistant
//!
//! Runs one user action at a time against an explicit `Session`:
//! 1. Query: text -> filter triples -> record lookup -> optional image -> data entries
//! 2. Follow-up: question + session context -> answer -> QA entry
//!
//! Sub-steps are awaited in sequence; results land in the session in the
//! order the model listed them.

use crate::analyzer::FollowupAnalyzer;
use crate::config::Config;
use crate::dataset::Dataset;
use crate::error::{GreenIndexError, Result};
use crate::image_fetch::{ImageFetcher, ImageProvider, NoImages};
use crate::llm::{LanguageModel, LlmClient};
use crate::lookup::find;
use crate::query_extractor::{FilterTriple, QueryExtractor, RejectedTriple};
use crate::session::Session;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of one query action.
#[derive(Debug, Default)]
pub struct QueryReport {
    /// Triples the extractor accepted, in order.
    pub triples: Vec<FilterTriple>,
    /// Data entries appended to the session.
    pub appended: usize,
    /// Valid triples with no matching record (`LookupMiss`).
    pub misses: Vec<GreenIndexError>,
    /// Triples dropped by allow-list validation.
    pub rejected: Vec<RejectedTriple>,
    /// Model output entries that were not filter objects.
    pub malformed: Vec<GreenIndexError>,
    /// Image enrichment failures (`ImageFetch`); entries were still appended.
    pub image_failures: Vec<GreenIndexError>,
}

impl QueryReport {
    /// Short user-facing warnings for everything that did not produce a
    /// complete entry.
    pub fn warnings(&self) -> Vec<String> {
        self.rejected
            .iter()
            .map(|r| format!("Ignored {}: {}", r.triple, r.reason))
            .chain(self.malformed.iter().map(|e| format!("Ignored model output: {}", e)))
            .chain(self.misses.iter().map(|e| e.to_string()))
            .chain(self.image_failures.iter().map(|e| e.to_string()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.appended == 0
    }
}

pub struct NdviAssistant {
    dataset: Arc<Dataset>,
    extractor: QueryExtractor,
    analyzer: FollowupAnalyzer,
    images: Arc<dyn ImageProvider>,
}

impl NdviAssistant {
    pub fn new(
        dataset: Arc<Dataset>,
        extractor: QueryExtractor,
        analyzer: FollowupAnalyzer,
        images: Arc<dyn ImageProvider>,
    ) -> Self {
        Self {
            dataset,
            extractor,
            analyzer,
            images,
        }
    }

    /// Wire the hosted model, image service and validation policy from
    /// `config`.
    pub fn from_config(config: &Config, dataset: Arc<Dataset>) -> Result<Self> {
        let mut client = LlmClient::new(
            config.require_api_key()?.to_string(),
            config.llm_base_url.clone(),
            config.timeout,
        )?;
        if !config.json_mode {
            client = client.without_json_mode();
        }
        let model: Arc<dyn LanguageModel> = Arc::new(client);

        let images: Arc<dyn ImageProvider> = if config.images_enabled {
            Arc::new(ImageFetcher::new(&config.image_api_url, config.timeout)?)
        } else {
            Arc::new(NoImages)
        };

        let extractor = QueryExtractor::new(Arc::clone(&model), config.query_model.clone())
            .with_policy(config.validation_policy);
        let analyzer = FollowupAnalyzer::new(model, config.analysis_model.clone());

        Ok(Self::new(dataset, extractor, analyzer, images))
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Run a natural-language query and append one data entry per matched
    /// triple.
    pub async fn run_query(&self, session: &mut Session, text: &str) -> Result<QueryReport> {
        let text = text.trim();
        if text.is_empty() {
            return Err(GreenIndexError::EmptyInput("Enter a valid query.".to_string()));
        }
        info!("Query: {}", text);

        let allow = self.dataset.allow_list();
        let extraction = self.extractor.extract_with_report(text, &allow).await?;

        let mut report = QueryReport {
            triples: extraction.triples.clone(),
            rejected: extraction.rejected,
            malformed: extraction.malformed,
            ..QueryReport::default()
        };

        for triple in &extraction.triples {
            let Some(record) = find(triple, self.dataset.records()) else {
                warn!("No data for {}", triple);
                report.misses.push(GreenIndexError::LookupMiss {
                    state: triple.state.clone(),
                    month: triple.month.clone(),
                    year: triple.year,
                });
                continue;
            };

            let image = match self.images.try_fetch_image(triple).await {
                Ok(image) => image,
                Err(e) => {
                    warn!("No image for {}: {}", triple, e);
                    report.image_failures.push(e);
                    None
                }
            };

            session.append_data(record.clone(), image);
            report.appended += 1;
        }

        info!(
            "Query appended {} entr{} ({} miss(es), {} rejected)",
            report.appended,
            if report.appended == 1 { "y" } else { "ies" },
            report.misses.len(),
            report.rejected.len()
        );
        Ok(report)
    }

    /// Answer a follow-up over the session's data entries and record the
    /// exchange.
    pub async fn ask_followup(&self, session: &mut Session, question: &str) -> Result<String> {
        let question = question.trim();
        if question.is_empty() {
            return Err(GreenIndexError::EmptyInput("Enter a question.".to_string()));
        }

        let context = session.context_text();
        let answer = self.analyzer.analyze(question, &context).await?;
        session.append_qa(question, answer.clone());
        Ok(answer)
    }
}
