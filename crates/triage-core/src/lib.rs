pub mod actions;
pub mod api;
pub mod batch;
pub mod config;
pub mod content;
pub mod gmail;
pub mod inbox;
pub mod labels;
pub mod mailbox;
pub mod telemetry;

pub use actions::{ActionApplier, ActionError, ActionKind, ActionResult, LabelRequest, ProposedAction};
pub use api::{
    ApplyActionsResponse, EmailContent, EmailLabel, EmailListResponse, EmailSummary,
    ErrorResponse,
};
pub use batch::{BatchEntry, BatchError, BatchOrchestrator, BatchSummary, parse_batch};
pub use config::Config;
pub use content::{BodyPart, ExtractedContent};
pub use gmail::{GmailClient, GmailClientError};
pub use labels::{LabelError, LabelLockGuard, LabelLocks, LabelResolver};
pub use mailbox::{InMemoryMailbox, Mailbox};
pub use telemetry::{TelemetryError, TelemetryGuard, init_logging, init_telemetry};
