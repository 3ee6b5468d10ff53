//! Background query tasks
//!
//! Interactive mode answers questions in spawned tasks so input keeps
//! flowing. [`QueryTasks`] owns those tasks so leaving chat can wait for
//! them instead of letting the runtime cancel them mid-answer.

use tokio::task::JoinSet;

use super::{Assistant, QueryOutcome, RecordedQuestion};

/// Questions being answered in the background
#[derive(Default)]
pub struct QueryTasks {
    tasks: JoinSet<QueryOutcome>,
}

impl QueryTasks {
    /// No tasks
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer a typed question in the background
    pub fn ask(&mut self, assistant: &Assistant, text: String) {
        let assistant = assistant.clone();
        self.tasks
            .spawn(async move { assistant.submit_text(&text).await });
    }

    /// Answer an admitted recording in the background
    pub fn process(&mut self, assistant: &Assistant, question: RecordedQuestion) {
        let assistant = assistant.clone();
        self.tasks
            .spawn(async move { assistant.process_recording(question).await });
    }

    /// Tasks still running or not yet collected
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Outcome of the next task to finish; `None` when there are no tasks
    ///
    /// Cancel safe, so it can be raced in `tokio::select!`.
    pub async fn next_finished(&mut self) -> Option<QueryOutcome> {
        let finished = self.tasks.join_next().await?;
        Some(finished.unwrap_or_else(|e| {
            tracing::error!(error = %e, "query task failed");
            QueryOutcome::Failed
        }))
    }

    /// Wait for every task, then for their answers to finish playing
    pub async fn finish(&mut self, assistant: &Assistant) -> Vec<QueryOutcome> {
        if !self.is_empty() {
            tracing::debug!(pending = self.len(), "waiting for in-flight questions");
        }

        let mut outcomes = Vec::with_capacity(self.len());
        while let Some(outcome) = self.next_finished().await {
            outcomes.push(outcome);
        }

        assistant.speech().wait_until_idle().await;
        outcomes
    }
}
