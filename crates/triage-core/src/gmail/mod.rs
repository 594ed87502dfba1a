pub mod client;
pub mod types;

pub use client::{DEFAULT_API_BASE, GmailClient, GmailClientError};
pub use types::*;
