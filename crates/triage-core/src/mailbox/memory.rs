use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use reqwest::StatusCode;

use super::Mailbox;
use crate::gmail::GmailClientError;
use crate::gmail::types::{
    Draft, Header, LABEL_TYPE_SYSTEM, LABEL_TYPE_USER, Label, Message, MessageId, MessagePart,
    NewLabel,
};

const SYSTEM_LABELS: [&str; 8] = [
    "INBOX", "SENT", "DRAFT", "SPAM", "TRASH", "IMPORTANT", "STARRED", "UNREAD",
];

#[derive(Default)]
struct State {
    labels: Vec<Label>,
    messages: Vec<Message>,
    drafts: Vec<(String, String)>,
    failing_messages: HashSet<String>,
    failing_modifies: HashSet<String>,
    failing_label_names: HashSet<String>,
}

/// A mailbox held entirely in memory with Gmail's observable semantics:
/// label names are unique, label updates are set-additive, unknown ids are 404s.
#[derive(Default)]
pub struct InMemoryMailbox {
    state: Mutex<State>,
    next_id: AtomicUsize,
    list_label_calls: AtomicUsize,
    create_label_calls: AtomicUsize,
}

impl InMemoryMailbox {
    /// A mailbox seeded with Gmail's reserved system labels.
    pub fn new() -> Self {
        let mailbox = Self::default();
        {
            let mut state = mailbox.lock();
            for name in SYSTEM_LABELS {
                state.labels.push(Label {
                    id: name.to_string(),
                    name: name.to_string(),
                    label_type: Some(LABEL_TYPE_SYSTEM.to_string()),
                    message_list_visibility: None,
                    label_list_visibility: None,
                    color: None,
                });
            }
        }
        mailbox
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic while holding the lock only happens inside a failing test.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{prefix}{n}")
    }

    pub fn insert_label(&self, label: Label) {
        self.lock().labels.push(label);
    }

    /// Adds a message with the given headers and a single plain-text body.
    pub fn insert_message(&self, id: &str, headers: &[(&str, &str)], label_ids: &[&str]) {
        let payload = MessagePart {
            part_id: None,
            mime_type: Some("text/plain".to_string()),
            filename: None,
            headers: headers
                .iter()
                .map(|(name, value)| Header {
                    name: name.to_string(),
                    value: value.to_string(),
                })
                .collect(),
            body: None,
            parts: vec![],
        };
        self.insert_raw_message(Message {
            id: id.to_string(),
            thread_id: Some(format!("thread-{id}")),
            label_ids: label_ids.iter().map(|l| l.to_string()).collect(),
            snippet: None,
            history_id: None,
            internal_date: None,
            payload: Some(payload),
            size_estimate: None,
            raw: None,
        });
    }

    pub fn insert_raw_message(&self, message: Message) {
        self.lock().messages.push(message);
    }

    /// Subsequent `get_message` calls for `id` fail with a 500.
    pub fn fail_get_message(&self, id: &str) {
        self.lock().failing_messages.insert(id.to_string());
    }

    /// Subsequent label updates on `id` fail with a 500.
    pub fn fail_modify(&self, id: &str) {
        self.lock().failing_modifies.insert(id.to_string());
    }

    /// Subsequent creations of a label named `name` fail with a 500.
    pub fn fail_label_create(&self, name: &str) {
        self.lock().failing_label_names.insert(name.to_string());
    }

    pub fn labels(&self) -> Vec<Label> {
        self.lock().labels.clone()
    }

    pub fn labels_named(&self, name: &str) -> Vec<Label> {
        self.lock()
            .labels
            .iter()
            .filter(|l| l.name == name)
            .cloned()
            .collect()
    }

    pub fn message_label_ids(&self, id: &str) -> Vec<String> {
        self.lock()
            .messages
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.label_ids.clone())
            .unwrap_or_default()
    }

    /// Created drafts as `(draft_id, raw)` pairs, oldest first.
    pub fn drafts(&self) -> Vec<(String, String)> {
        self.lock().drafts.clone()
    }

    pub fn list_label_calls(&self) -> usize {
        self.list_label_calls.load(Ordering::SeqCst)
    }

    pub fn create_label_calls(&self) -> usize {
        self.create_label_calls.load(Ordering::SeqCst)
    }
}

fn api_error(status: StatusCode, message: &str) -> GmailClientError {
    GmailClientError::Api {
        status,
        message: message.to_string(),
    }
}

fn not_found() -> GmailClientError {
    api_error(StatusCode::NOT_FOUND, "Requested entity was not found.")
}

#[async_trait]
impl Mailbox for InMemoryMailbox {
    fn label_scope(&self) -> String {
        format!("memory:{:p}", self)
    }

    async fn list_labels(&self) -> Result<Vec<Label>, GmailClientError> {
        self.list_label_calls.fetch_add(1, Ordering::SeqCst);
        let labels = self.labels();
        // Give concurrently polled resolutions a chance to interleave, as a network call would.
        tokio::task::yield_now().await;
        Ok(labels)
    }

    async fn create_label(&self, label: &NewLabel) -> Result<Label, GmailClientError> {
        self.create_label_calls.fetch_add(1, Ordering::SeqCst);
        let id = self.next("Label_");
        let mut state = self.lock();
        if state.failing_label_names.contains(&label.name) {
            return Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Backend Error",
            ));
        }
        if state.labels.iter().any(|l| l.name == label.name) {
            return Err(api_error(
                StatusCode::CONFLICT,
                "Label name exists or conflicts",
            ));
        }
        let created = Label {
            id,
            name: label.name.clone(),
            label_type: Some(LABEL_TYPE_USER.to_string()),
            message_list_visibility: Some(label.message_list_visibility.clone()),
            label_list_visibility: Some(label.label_list_visibility.clone()),
            color: Some(label.color.clone()),
        };
        state.labels.push(created.clone());
        Ok(created)
    }

    async fn get_message(&self, message_id: &str) -> Result<Message, GmailClientError> {
        let state = self.lock();
        if state.failing_messages.contains(message_id) {
            return Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Backend Error",
            ));
        }
        state
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
            .ok_or_else(not_found)
    }

    async fn list_message_ids(&self, max_results: u32) -> Result<Vec<String>, GmailClientError> {
        let state = self.lock();
        Ok(state
            .messages
            .iter()
            .rev()
            .take(max_results as usize)
            .map(|m| m.id.clone())
            .collect())
    }

    async fn add_labels(
        &self,
        message_id: &str,
        label_ids: Vec<String>,
    ) -> Result<(), GmailClientError> {
        let mut state = self.lock();
        if state.failing_modifies.contains(message_id) {
            return Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Backend Error",
            ));
        }
        let unknown = {
            let known: HashSet<&str> = state.labels.iter().map(|l| l.id.as_str()).collect();
            label_ids
                .iter()
                .find(|id| !known.contains(id.as_str()))
                .cloned()
        };
        if let Some(unknown) = unknown {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                &format!("Invalid label: {unknown}"),
            ));
        }
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(not_found)?;
        for id in label_ids {
            if !message.label_ids.contains(&id) {
                message.label_ids.push(id);
            }
        }
        Ok(())
    }

    async fn create_draft(&self, raw: String) -> Result<Draft, GmailClientError> {
        let id = self.next("r");
        let message_id = self.next("draft-msg-");
        self.lock().drafts.push((id.clone(), raw));
        Ok(Draft {
            id,
            message: Some(MessageId {
                id: message_id,
                thread_id: None,
            }),
        })
    }
}
