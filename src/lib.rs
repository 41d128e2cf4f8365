pub mod analyzer;
pub mod assistant;
pub mod config;
pub mod dataset;
pub mod error;
pub mod extraction;
pub mod image_fetch;
pub mod llm;
pub mod lookup;
pub mod query_extractor;
pub mod session;
pub mod worker;

// Scripted model and stub HTTP server, shared by unit and integration tests
pub mod testing;

pub use assistant::{NdviAssistant, QueryReport};
pub use config::Config;
pub use dataset::{AllowList, Dataset, NdviRecord};
pub use error::{GreenIndexError, Result};
pub use query_extractor::{FilterTriple, QueryExtractor, ValidationPolicy};
pub use session::{HistoryEntry, Session};
pub use worker::{SessionHandle, SessionWorker};
