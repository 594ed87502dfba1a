use std::sync::OnceLock;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use ts_rs::TS;

use crate::gmail::GmailClientError;
use crate::labels::{ARCHIVED_COLOR, ARCHIVED_LABEL, LabelError, LabelLocks, LabelResolver};
use crate::mailbox::Mailbox;

/// One message's worth of proposed changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct ProposedAction {
    pub email_id: String,
    #[ts(optional)]
    pub labels: Option<Vec<LabelRequest>>,
    #[ts(optional)]
    pub should_archive: Option<bool>,
    #[ts(optional)]
    pub draft_reply: Option<String>,
    /// Display only; never applied to the mailbox.
    #[ts(optional)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(default)]
#[ts(export)]
pub struct LabelRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub priority: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum ActionKind {
    Labels,
    Archive,
    DraftReply,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ActionResult {
    pub email_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub action: Option<ActionKind>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub label_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub labels: Option<Vec<LabelRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub archived_label_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub draft_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub error: Option<String>,
}

impl ActionResult {
    fn succeeded(email_id: &str, action: ActionKind) -> Self {
        Self {
            email_id: email_id.to_string(),
            action: Some(action),
            success: true,
            label_ids: None,
            labels: None,
            archived_label_id: None,
            draft_id: None,
            error: None,
        }
    }

    pub fn failed(email_id: &str, action: Option<ActionKind>, error: impl ToString) -> Self {
        Self {
            email_id: email_id.to_string(),
            action,
            success: false,
            label_ids: None,
            labels: None,
            archived_label_id: None,
            draft_id: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("missing emailId")]
    MissingEmailId,
    #[error("Original message headers not found")]
    HeadersNotFound,
    #[error(transparent)]
    Label(#[from] LabelError),
    #[error(transparent)]
    Remote(#[from] GmailClientError),
}

/// Applies proposed actions to one mailbox. Each step (labels, archive, draft reply)
/// is guarded on its own, so a failing step never prevents the later ones.
pub struct ActionApplier<'a, M: Mailbox + ?Sized> {
    mailbox: &'a M,
    locks: Option<&'a LabelLocks>,
}

impl<'a, M: Mailbox + ?Sized> ActionApplier<'a, M> {
    pub fn new(mailbox: &'a M) -> Self {
        Self {
            mailbox,
            locks: None,
        }
    }

    pub fn with_locks(mut self, locks: &'a LabelLocks) -> Self {
        self.locks = Some(locks);
        self
    }

    fn resolver(&self) -> LabelResolver<'a, M> {
        let resolver = LabelResolver::new(self.mailbox);
        match self.locks {
            Some(locks) => resolver.with_locks(locks),
            None => resolver,
        }
    }

    /// Returns one result per step that ran, in the order labels, archive, draft reply.
    pub async fn apply(&self, action: &ProposedAction) -> Vec<ActionResult> {
        let email_id = action.email_id.as_str();
        if email_id.is_empty() {
            warn!("skipping action without emailId");
            return vec![ActionResult::failed(
                email_id,
                None,
                ActionError::MissingEmailId,
            )];
        }

        let mut results = Vec::with_capacity(3);

        if let Some(requests) = &action.labels {
            let result = match self.apply_labels(email_id, requests).await {
                Ok(label_ids) => ActionResult {
                    label_ids: Some(label_ids),
                    labels: Some(requests.clone()),
                    ..ActionResult::succeeded(email_id, ActionKind::Labels)
                },
                Err(err) => {
                    warn!(email_id, error = %err, "failed to apply labels");
                    ActionResult::failed(email_id, Some(ActionKind::Labels), err)
                }
            };
            results.push(result);
        }

        if action.should_archive == Some(true) {
            let result = match self.archive(email_id).await {
                Ok(archived_label_id) => ActionResult {
                    archived_label_id: Some(archived_label_id),
                    ..ActionResult::succeeded(email_id, ActionKind::Archive)
                },
                Err(err) => {
                    warn!(email_id, error = %err, "failed to archive");
                    ActionResult::failed(email_id, Some(ActionKind::Archive), err)
                }
            };
            results.push(result);
        }

        if let Some(body) = action.draft_reply.as_deref().filter(|b| !b.is_empty()) {
            let result = match self.create_reply_draft(email_id, body).await {
                Ok(draft_id) => ActionResult {
                    draft_id: Some(draft_id),
                    ..ActionResult::succeeded(email_id, ActionKind::DraftReply)
                },
                Err(err) => {
                    warn!(email_id, error = %err, "failed to create draft reply");
                    ActionResult::failed(email_id, Some(ActionKind::DraftReply), err)
                }
            };
            results.push(result);
        }

        results
    }

    async fn apply_labels(
        &self,
        email_id: &str,
        requests: &[LabelRequest],
    ) -> Result<Vec<String>, ActionError> {
        let resolver = self.resolver();
        let mut label_ids: Vec<String> = Vec::new();
        let mut push = |id: String| {
            if !label_ids.contains(&id) {
                label_ids.push(id);
            }
        };

        for request in requests {
            match resolver
                .resolve_topic_label(&request.name, request.color.as_deref())
                .await
            {
                Ok(id) => push(id),
                Err(err) => {
                    warn!(email_id, label = %request.name, error = %err, "skipping unresolved label");
                }
            }

            if let Some(priority) = request.priority {
                match resolver.resolve_priority_label(priority).await {
                    Ok(id) => push(id),
                    Err(err) => {
                        warn!(email_id, priority, error = %err, "skipping unresolved priority label");
                    }
                }
            }
        }

        if label_ids.is_empty() {
            debug!(email_id, "no labels resolved; nothing to apply");
            return Ok(label_ids);
        }

        self.mailbox
            .add_labels(email_id, label_ids.clone())
            .await?;
        info!(email_id, count = label_ids.len(), "applied labels");
        Ok(label_ids)
    }

    /// Tags the message `Archived`. The message stays in the inbox.
    async fn archive(&self, email_id: &str) -> Result<String, ActionError> {
        let label_id = self
            .resolver()
            .resolve_topic_label(ARCHIVED_LABEL, Some(ARCHIVED_COLOR))
            .await?;
        self.mailbox
            .add_labels(email_id, vec![label_id.clone()])
            .await?;
        info!(email_id, label_id = %label_id, "archived message");
        Ok(label_id)
    }

    async fn create_reply_draft(&self, email_id: &str, body: &str) -> Result<String, ActionError> {
        let message = self.mailbox.get_message(email_id).await?;
        if message.headers().is_none() {
            return Err(ActionError::HeadersNotFound);
        }

        let subject = message.header_or_empty("Subject");
        let from = message.header_or_empty("From");
        let raw = encode_draft(&reply_recipient(&from), &subject, body);

        let draft = self.mailbox.create_draft(raw).await?;
        // Repeated calls create additional drafts; nothing deduplicates them.
        info!(email_id, draft_id = %draft.id, idempotent = false, "created draft reply");
        Ok(draft.id)
    }
}

fn address_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<(.+?)>").expect("address pattern compiles"))
}

/// The first `<address>` in a `From` header, or the whole header when there is none.
pub fn reply_recipient(from: &str) -> String {
    address_pattern()
        .captures(from)
        .and_then(|caps| caps.get(1))
        .map_or(from, |m| m.as_str())
        .to_string()
}

/// The RFC 822 text of a plain-text reply.
pub fn build_reply(to: &str, subject: &str, body: &str) -> String {
    format!(
        "To: {to}\r\nSubject: Re: {subject}\r\nContent-Type: text/plain; charset=UTF-8\r\n\r\n{body}"
    )
}

/// [`build_reply`] encoded as unpadded base64url, as the drafts endpoint expects.
pub fn encode_draft(to: &str, subject: &str, body: &str) -> String {
    URL_SAFE_NO_PAD.encode(build_reply(to, subject, body))
}
