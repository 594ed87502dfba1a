//! Sequential, failure-isolated application of a batch of proposed actions.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::actions::{ActionApplier, ActionResult, ProposedAction};
use crate::labels::LabelLocks;
use crate::mailbox::Mailbox;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("Missing or invalid actions")]
    InvalidActions,
    #[error("invalid action at index {index}: {reason}")]
    InvalidAction { index: usize, reason: String },
}

/// One element of a request batch. Elements that do not decode stay in place so
/// they are reported in order alongside the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEntry {
    Action(ProposedAction),
    Invalid { email_id: String, error: BatchError },
}

impl BatchEntry {
    fn decode(index: usize, item: Value) -> Self {
        // Best effort, so the failed result can still name the message.
        let email_id = item
            .get("emailId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let reason = if item.is_object() {
            match serde_json::from_value(item) {
                Ok(action) => return BatchEntry::Action(action),
                Err(err) => err.to_string(),
            }
        } else {
            "expected an object".to_string()
        };

        BatchEntry::Invalid {
            email_id,
            error: BatchError::InvalidAction { index, reason },
        }
    }

    fn action(&self) -> Result<&ProposedAction, ActionResult> {
        match self {
            BatchEntry::Action(action) => Ok(action),
            BatchEntry::Invalid { email_id, error } => {
                Err(ActionResult::failed(email_id, None, error))
            }
        }
    }
}

/// Checks that the `actions` field of a request body is an array. The only fatal
/// error; each element is decoded on its own.
pub fn parse_batch(actions: Option<Value>) -> Result<Vec<BatchEntry>, BatchError> {
    let Some(Value::Array(items)) = actions else {
        return Err(BatchError::InvalidActions);
    };

    Ok(items
        .into_iter()
        .enumerate()
        .map(|(index, item)| BatchEntry::decode(index, item))
        .collect())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[ActionResult]) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
        }
    }
}

pub struct BatchOrchestrator<'a, M: Mailbox + ?Sized> {
    applier: ActionApplier<'a, M>,
}

impl<'a, M: Mailbox + ?Sized> BatchOrchestrator<'a, M> {
    pub fn new(mailbox: &'a M) -> Self {
        Self {
            applier: ActionApplier::new(mailbox),
        }
    }

    pub fn with_locks(self, locks: &'a LabelLocks) -> Self {
        Self {
            applier: self.applier.with_locks(locks),
        }
    }

    /// Applies each action in order. A failing action is recorded and the loop continues.
    pub async fn apply_batch(&self, actions: &[ProposedAction]) -> Vec<ActionResult> {
        self.run(actions.len(), actions.iter().map(Ok)).await
    }

    /// Like [`apply_batch`](Self::apply_batch) for a parsed request body. An element
    /// that did not decode yields one failed result in its position.
    pub async fn apply_entries(&self, entries: &[BatchEntry]) -> Vec<ActionResult> {
        self.run(entries.len(), entries.iter().map(BatchEntry::action))
            .await
    }

    async fn run<'b>(
        &self,
        len: usize,
        actions: impl Iterator<Item = Result<&'b ProposedAction, ActionResult>>,
    ) -> Vec<ActionResult> {
        let batch_id = Uuid::new_v4();
        let span = info_span!("apply_batch", %batch_id, actions = len);

        async move {
            let mut results = Vec::with_capacity(len);
            for action in actions {
                match action {
                    Ok(action) => results.extend(self.applier.apply(action).await),
                    Err(rejected) => {
                        warn!(
                            email_id = %rejected.email_id,
                            error = rejected.error.as_deref().unwrap_or_default(),
                            "skipping action that could not be decoded"
                        );
                        results.push(rejected);
                    }
                }
            }

            let summary = BatchSummary::from_results(&results);
            info!(
                total = summary.total,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "applied action batch"
            );
            results
        }
        .instrument(span)
        .await
    }
}
