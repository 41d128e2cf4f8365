//! Session Worker
//!
//! Each user action is enqueued as one unit of work. A single tokio task owns
//! the `Session` and processes requests strictly in arrival order, so history
//! is only ever mutated from that task.

use crate::assistant::{NdviAssistant, QueryReport};
use crate::error::{GreenIndexError, Result};
use crate::session::{HistoryEntry, Session};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

const REQUEST_QUEUE_DEPTH: usize = 8;

/// Result of a queued query: the report plus the entries it appended.
#[derive(Debug)]
pub struct QueryOutcome {
    pub report: QueryReport,
    pub entries: Vec<HistoryEntry>,
}

/// Request sent from the interactive surface to the worker.
#[derive(Debug)]
pub enum WorkerRequest {
    Query {
        text: String,
        reply: oneshot::Sender<Result<QueryOutcome>>,
    },
    Followup {
        question: String,
        reply: oneshot::Sender<Result<String>>,
    },
    /// Copy of the full history.
    Snapshot {
        reply: oneshot::Sender<Vec<HistoryEntry>>,
    },
    Shutdown,
}

/// Cloneable front door to one session's worker.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    request_tx: mpsc::Sender<WorkerRequest>,
}

pub struct SessionWorker;

impl SessionWorker {
    /// Start a worker owning a fresh session.
    pub fn spawn(assistant: Arc<NdviAssistant>) -> (SessionHandle, JoinHandle<()>) {
        let session = Session::new();
        let session_id = session.id();
        let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);

        let handle = tokio::spawn(worker_loop(assistant, session, request_rx));
        info!("Session {} started", session_id);

        (
            SessionHandle {
                session_id,
                request_tx,
            },
            handle,
        )
    }
}

async fn worker_loop(
    assistant: Arc<NdviAssistant>,
    mut session: Session,
    mut request_rx: mpsc::Receiver<WorkerRequest>,
) {
    while let Some(request) = request_rx.recv().await {
        match request {
            WorkerRequest::Query { text, reply } => {
                let before = session.len();
                let outcome = assistant
                    .run_query(&mut session, &text)
                    .await
                    .map(|report| QueryOutcome {
                        report,
                        entries: session.entries()[before..].to_vec(),
                    });
                let _ = reply.send(outcome);
            }
            WorkerRequest::Followup { question, reply } => {
                let answer = assistant.ask_followup(&mut session, &question).await;
                let _ = reply.send(answer);
            }
            WorkerRequest::Snapshot { reply } => {
                let _ = reply.send(session.entries().to_vec());
            }
            WorkerRequest::Shutdown => break,
        }
    }
    debug!("Session {} ended with {} entries", session.id(), session.len());
}

fn stopped() -> GreenIndexError {
    GreenIndexError::Worker("session worker stopped".to_string())
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    async fn send(&self, request: WorkerRequest) -> Result<()> {
        self.request_tx.send(request).await.map_err(|_| stopped())
    }

    pub async fn query(&self, text: impl Into<String>) -> Result<QueryOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(WorkerRequest::Query {
            text: text.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| stopped())?
    }

    pub async fn followup(&self, question: impl Into<String>) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.send(WorkerRequest::Followup {
            question: question.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| stopped())?
    }

    pub async fn history(&self) -> Result<Vec<HistoryEntry>> {
        let (reply, rx) = oneshot::channel();
        self.send(WorkerRequest::Snapshot { reply }).await?;
        rx.await.map_err(|_| stopped())
    }

    /// Ask the worker to stop; queued requests ahead of this one still run.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(WorkerRequest::Shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::FollowupAnalyzer;
    use crate::dataset::{Dataset, NdviRecord};
    use crate::image_fetch::NoImages;
    use crate::query_extractor::QueryExtractor;
    use crate::testing::ScriptedModel;

    fn assistant(model: Arc<ScriptedModel>) -> Arc<NdviAssistant> {
        let dataset = Dataset::from_records(vec![NdviRecord {
            state: "kerala".to_string(),
            month: "may".to_string(),
            year: 2025,
            ndvi_value: 0.71,
            temperature: 29.0,
            rainfall: 40.0,
            soilmoisture: 22.0,
        }])
        .unwrap();

        Arc::new(NdviAssistant::new(
            Arc::new(dataset),
            QueryExtractor::new(model.clone(), "q"),
            FollowupAnalyzer::new(model, "a"),
            Arc::new(NoImages),
        ))
    }

    #[tokio::test]
    async fn test_requests_processed_in_order() {
        let model = Arc::new(ScriptedModel::new(vec![
            r#"[{"state":"kerala","month":"may","year":2025}]"#,
            "Kerala was lush in May.",
        ]));
        let (handle, join) = SessionWorker::spawn(assistant(model));

        let outcome = handle.query("kerala may").await.unwrap();
        assert_eq!(outcome.report.appended, 1);
        assert_eq!(outcome.entries.len(), 1);

        let answer = handle.followup("How green?").await.unwrap();
        assert_eq!(answer, "Kerala was lush in May.");

        let history = handle.history().await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].as_data().is_some());
        assert_eq!(history[1].as_qa().unwrap().question, "How green?");

        handle.shutdown().await.unwrap();
        join.await.unwrap();
        assert!(matches!(handle.history().await, Err(GreenIndexError::Worker(_))));
    }

    #[tokio::test]
    async fn test_failed_action_keeps_worker_alive() {
        let model = Arc::new(ScriptedModel::new(vec!["no json here"]));
        let (handle, _join) = SessionWorker::spawn(assistant(model));

        assert!(matches!(handle.query("q").await, Err(GreenIndexError::Extraction { .. })));
        assert!(matches!(handle.query(" ").await, Err(GreenIndexError::EmptyInput(_))));
        assert!(handle.history().await.unwrap().is_empty());
    }
}
