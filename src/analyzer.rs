use crate::error::{GreenIndexError, Result};
use crate::llm::{CompletionRequest, LanguageModel};
use std::sync::Arc;
use tracing::info;

/// Returned without a model call when there is nothing to analyse.
pub const NO_DATA_MESSAGE: &str = "No data available. Please run a query first.";

const ANALYSIS_TEMPERATURE: f32 = 0.5;

/// Answers free-text follow-up questions over accumulated query results.
pub struct FollowupAnalyzer {
    model: Arc<dyn LanguageModel>,
    model_name: String,
}

impl FollowupAnalyzer {
    pub fn new(model: Arc<dyn LanguageModel>, model_name: impl Into<String>) -> Self {
        Self {
            model,
            model_name: model_name.into(),
        }
    }

    pub async fn analyze(&self, question: &str, context: &str) -> Result<String> {
        if context.trim().is_empty() {
            info!("Follow-up asked with no data in context");
            return Ok(NO_DATA_MESSAGE.to_string());
        }

        let request = CompletionRequest::new(&self.model_name, build_analysis_prompt(question, context))
            .with_temperature(ANALYSIS_TEMPERATURE);

        let answer = self
            .model
            .complete(&request)
            .await
            .map_err(|e| GreenIndexError::Analyzer(e.to_string()))?;

        Ok(answer.trim().to_string())
    }
}

pub fn build_analysis_prompt(question: &str, context: &str) -> String {
    format!(
        r#"You are an NDVI analysis assistant.
Use ONLY the following context:

{}

User question: {}

Write a clear, short analytical answer (3-5 sentences)."#,
        context.trim_end(),
        question.trim()
    )
}
