use thiserror::Error;

#[derive(Error, Debug)]
pub enum GreenIndexError {
    #[error("Extraction error: {message}")]
    Extraction {
        message: String,
        /// Raw model response, kept for diagnostics.
        raw: String,
    },

    #[error("Validation error: {field} '{value}' is not one of [{}]", .allowed.join(", "))]
    Validation {
        field: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("No data for {state}, {month} {year}")]
    LookupMiss {
        state: String,
        month: String,
        year: i32,
    },

    #[error("Image fetch failed: {0}")]
    ImageFetch(String),

    #[error("Analyzer error: {0}")]
    Analyzer(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl GreenIndexError {
    pub fn extraction(message: impl Into<String>, raw: impl Into<String>) -> Self {
        GreenIndexError::Extraction {
            message: message.into(),
            raw: raw.into(),
        }
    }

    /// Errors that end the current user action. Lookup misses and image
    /// failures are reported but never abort a query.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            GreenIndexError::LookupMiss { .. } | GreenIndexError::ImageFetch(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GreenIndexError>;
