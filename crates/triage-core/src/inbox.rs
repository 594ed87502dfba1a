//! Read-only views of the mailbox for the web UI: the inbox list and message previews.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use futures::{StreamExt, TryStreamExt, stream};
use tracing::{debug, warn};

use crate::api::{EmailContent, EmailLabel, EmailSummary};
use crate::content::extract_message;
use crate::gmail::GmailClientError;
use crate::gmail::types::{Label, Message};
use crate::labels::{display_name, effective_priority, priority_from_label_name};
use crate::mailbox::Mailbox;

pub const DEFAULT_MAX_RESULTS: u32 = 10;

/// Color shown for user labels created without one.
pub const FALLBACK_LABEL_COLOR: &str = "#818181";

const UNREAD_LABEL_ID: &str = "UNREAD";

/// Message details fetched at once while building the inbox list.
const FETCH_CONCURRENCY: usize = 8;

/// Lists the newest `max_results` messages with decoded labels and priority, in list order.
pub async fn list_email_summaries<M: Mailbox + ?Sized>(
    mailbox: &M,
    max_results: u32,
) -> Result<Vec<EmailSummary>, GmailClientError> {
    let ids = mailbox.list_message_ids(max_results).await?;
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let labels = mailbox.list_labels().await?;
    let labels_by_id: HashMap<&str, &Label> =
        labels.iter().map(|l| (l.id.as_str(), l)).collect();

    let messages: Vec<Message> = stream::iter(ids)
        .map(|id| async move { mailbox.get_message(&id).await })
        .buffered(FETCH_CONCURRENCY)
        .try_collect()
        .await?;

    debug!(count = messages.len(), "fetched inbox messages");
    Ok(messages
        .iter()
        .map(|message| summarize(message, &labels_by_id))
        .collect())
}

/// Builds one inbox row. Only user labels are shown; `P<n>` labels become the priority.
pub fn summarize(message: &Message, labels_by_id: &HashMap<&str, &Label>) -> EmailSummary {
    let mut priorities = Vec::new();
    let mut topics = Vec::new();

    for label in message
        .label_ids
        .iter()
        .filter_map(|id| labels_by_id.get(id.as_str()))
        .filter(|label| label.is_user())
    {
        match priority_from_label_name(&label.name) {
            Some(priority) => priorities.push(priority),
            None => topics.push(*label),
        }
    }

    let priority = effective_priority(priorities);
    let labels: Vec<EmailLabel> = topics
        .into_iter()
        .map(|label| EmailLabel {
            name: display_name(&label.name).to_string(),
            color: label
                .background_color()
                .unwrap_or(FALLBACK_LABEL_COLOR)
                .to_string(),
            priority,
        })
        .collect();

    EmailSummary {
        id: message.id.clone(),
        snippet: message.snippet.clone(),
        subject: message.header_or_empty("Subject"),
        from: message.header_or_empty("From"),
        date: message.header_or_empty("Date"),
        read: !message.label_ids.iter().any(|id| id == UNREAD_LABEL_ID),
        labels: (!labels.is_empty()).then_some(labels),
        priority,
        received_at: parse_internal_date(message.internal_date.as_deref()),
    }
}

fn parse_internal_date(internal_date: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = internal_date?;
    match raw.parse::<i64>() {
        Ok(ms) => Utc.timestamp_millis_opt(ms).single(),
        Err(err) => {
            warn!(value = %raw, error = %err, "failed to parse internalDate");
            None
        }
    }
}

pub async fn get_email_content<M: Mailbox + ?Sized>(
    mailbox: &M,
    message_id: &str,
) -> Result<EmailContent, GmailClientError> {
    let message = mailbox.get_message(message_id).await?;
    let content = extract_message(&message);
    Ok(EmailContent {
        subject: message.header_or_empty("Subject"),
        from: message.header_or_empty("From"),
        to: message.header_or_empty("To"),
        date: message.header_or_empty("Date"),
        html: content.html,
        text: content.text,
    })
}
