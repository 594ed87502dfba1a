//! API types for web UI communication.

pub mod types;

pub use types::{
    ApplyActionsResponse, EmailContent, EmailLabel, EmailListResponse, EmailSummary,
    ErrorResponse,
};
