//! The remote operations the reconciliation engine performs against a mailbox.
//!
//! [`GmailClient`] is the production implementation; [`memory::InMemoryMailbox`]
//! keeps the same semantics in process for tests and local tooling.

pub mod memory;

use async_trait::async_trait;

use crate::gmail::types::{Draft, Label, Message, NewLabel};
use crate::gmail::{GmailClient, GmailClientError};

pub use memory::InMemoryMailbox;

#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Identifies the label namespace this mailbox writes to. Two handles on the
    /// same account return the same value.
    fn label_scope(&self) -> String;

    async fn list_labels(&self) -> Result<Vec<Label>, GmailClientError>;

    async fn create_label(&self, label: &NewLabel) -> Result<Label, GmailClientError>;

    async fn get_message(&self, message_id: &str) -> Result<Message, GmailClientError>;

    /// Returns at most `max_results` message ids, newest first.
    async fn list_message_ids(&self, max_results: u32) -> Result<Vec<String>, GmailClientError>;

    /// Additive label update; never removes labels already on the message.
    async fn add_labels(
        &self,
        message_id: &str,
        label_ids: Vec<String>,
    ) -> Result<(), GmailClientError>;

    /// Creates a draft from a base64url-encoded RFC 822 message.
    async fn create_draft(&self, raw: String) -> Result<Draft, GmailClientError>;
}

#[async_trait]
impl Mailbox for GmailClient {
    fn label_scope(&self) -> String {
        self.account_key()
    }

    async fn list_labels(&self) -> Result<Vec<Label>, GmailClientError> {
        Ok(GmailClient::list_labels(self).await?.labels)
    }

    async fn create_label(&self, label: &NewLabel) -> Result<Label, GmailClientError> {
        GmailClient::create_label(self, label).await
    }

    async fn get_message(&self, message_id: &str) -> Result<Message, GmailClientError> {
        GmailClient::get_message(self, message_id).await
    }

    async fn list_message_ids(&self, max_results: u32) -> Result<Vec<String>, GmailClientError> {
        let response = self.list_messages(None, None, Some(max_results)).await?;
        Ok(response.messages.into_iter().map(|m| m.id).collect())
    }

    async fn add_labels(
        &self,
        message_id: &str,
        label_ids: Vec<String>,
    ) -> Result<(), GmailClientError> {
        self.modify_message(message_id, label_ids, Vec::new())
            .await
            .map(|_| ())
    }

    async fn create_draft(&self, raw: String) -> Result<Draft, GmailClientError> {
        GmailClient::create_draft(self, raw).await
    }
}
