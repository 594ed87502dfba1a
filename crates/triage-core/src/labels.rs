//! Label taxonomy resolution.
//!
//! Topic labels (`github`, `newsletters`) and priority labels (`P0`..`Pn`) share
//! Gmail's single user-label namespace. Resolution is a two-phase remote operation:
//! list the user labels and reuse an exact name match, otherwise create the label.
//! Gmail has no atomic create-if-absent, so two processes resolving the same new name
//! at once can still both create it; [`LabelLocks`] only collapses races inside one
//! process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use regex::Regex;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::gmail::GmailClientError;
use crate::gmail::types::NewLabel;
use crate::mailbox::Mailbox;

/// Gmail system label names that user labels must not shadow.
pub const RESERVED_LABEL_NAMES: [&str; 8] = [
    "INBOX", "SENT", "DRAFT", "SPAM", "TRASH", "IMPORTANT", "STARRED", "UNREAD",
];
pub const RESERVED_PREFIX: &str = "Custom_";

pub const DEFAULT_LABEL_COLOR: &str = "#fad165";
pub const LABEL_TEXT_COLOR: &str = "#000000";

pub const ARCHIVED_LABEL: &str = "Archived";
pub const ARCHIVED_COLOR: &str = "#818181";

/// Priority shown for messages without any `P<n>` label; sorts after every real priority.
pub const NO_PRIORITY: u32 = 999;

/// Background colors for `P0`..`P5`.
const PRIORITY_COLORS: [&str; 6] = [
    "#fad165", // Yellow 1
    "#fb4c2f", // Red 1
    "#43d692", // Green 2
    "#4a86e8", // Blue 1
    "#a479e2", // Purple 1
    "#ffad47", // Orange 1
];

#[derive(Debug, Error)]
pub enum LabelError {
    #[error("label name must not be empty")]
    EmptyName,
    #[error("label {name}: {source}")]
    Remote {
        name: String,
        #[source]
        source: GmailClientError,
    },
}

/// Rewrites names that collide with a reserved system label into the `Custom_` namespace.
pub fn namespaced_name(name: &str) -> String {
    let upper = name.to_uppercase();
    if RESERVED_LABEL_NAMES.contains(&upper.as_str()) {
        format!("{RESERVED_PREFIX}{name}")
    } else {
        name.to_string()
    }
}

/// Strips the `Custom_` namespace for display.
pub fn display_name(name: &str) -> &str {
    name.strip_prefix(RESERVED_PREFIX).unwrap_or(name)
}

pub fn priority_label_name(priority: i64) -> String {
    format!("P{priority}")
}

pub fn priority_color(priority: i64) -> &'static str {
    usize::try_from(priority)
        .ok()
        .and_then(|idx| PRIORITY_COLORS.get(idx))
        .copied()
        .unwrap_or(DEFAULT_LABEL_COLOR)
}

fn priority_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^P(\d+)$").expect("priority pattern compiles"))
}

/// Parses `P<n>` label names. Anything else, including overflowing numbers, is `None`.
pub fn priority_from_label_name(name: &str) -> Option<u32> {
    priority_pattern()
        .captures(name)
        .and_then(|caps| caps.get(1))
        .and_then(|n| n.as_str().parse().ok())
}

/// Lowest (most urgent) priority among the given values, or [`NO_PRIORITY`].
pub fn effective_priority(priorities: impl IntoIterator<Item = u32>) -> u32 {
    priorities.into_iter().min().unwrap_or(NO_PRIORITY)
}

type LockKey = (String, String);

#[derive(Debug)]
struct LockEntry {
    lock: Arc<AsyncMutex<()>>,
    /// Guards holding or waiting on `lock`. The entry is removed when this reaches zero.
    users: usize,
}

/// Process-local locks serializing lookup-then-create for the same label in the
/// same mailbox. Keys are `(mailbox scope, final name)`, so different mailboxes
/// never wait on each other, and an entry lives only while someone holds or
/// awaits it.
#[derive(Debug, Default)]
pub struct LabelLocks {
    locks: Mutex<HashMap<LockKey, LockEntry>>,
}

impl LabelLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<LockKey, LockEntry>> {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn acquire(&self, scope: &str, final_name: &str) -> LabelLockGuard<'_> {
        let key = (scope.to_string(), final_name.to_string());
        let lock = {
            let mut locks = self.map();
            let entry = locks.entry(key.clone()).or_insert_with(|| LockEntry {
                lock: Arc::new(AsyncMutex::new(())),
                users: 0,
            });
            entry.users += 1;
            entry.lock.clone()
        };

        // Registered before waiting so a cancelled wait still releases its slot.
        let mut guard = LabelLockGuard {
            locks: self,
            key,
            held: None,
        };
        guard.held = Some(lock.lock_owned().await);
        guard
    }

    /// Number of `(scope, name)` pairs currently held or awaited.
    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, key: &LockKey) {
        let mut locks = self.map();
        if let Some(entry) = locks.get_mut(key) {
            entry.users = entry.users.saturating_sub(1);
            if entry.users == 0 {
                locks.remove(key);
            }
        }
    }
}

/// Exclusive use of one label name in one mailbox until dropped.
pub struct LabelLockGuard<'a> {
    locks: &'a LabelLocks,
    key: LockKey,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for LabelLockGuard<'_> {
    fn drop(&mut self) {
        // Unlock before deregistering so a newcomer never gets a second mutex
        // while this one is still held.
        drop(self.held.take());
        self.locks.release(&self.key);
    }
}

pub struct LabelResolver<'a, M: Mailbox + ?Sized> {
    mailbox: &'a M,
    locks: Option<&'a LabelLocks>,
}

impl<'a, M: Mailbox + ?Sized> LabelResolver<'a, M> {
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

    /// Returns the id of the user label called `name` (namespaced if reserved),
    /// creating it with `color` (or the default color) when absent.
    pub async fn resolve_topic_label(
        &self,
        name: &str,
        color: Option<&str>,
    ) -> Result<String, LabelError> {
        if name.trim().is_empty() {
            return Err(LabelError::EmptyName);
        }
        let final_name = namespaced_name(name);
        let background = color
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_LABEL_COLOR);
        self.lookup_or_create(&final_name, background).await
    }

    /// Returns the id of the `P<priority>` label, creating it with the palette color.
    pub async fn resolve_priority_label(&self, priority: i64) -> Result<String, LabelError> {
        let name = priority_label_name(priority);
        self.lookup_or_create(&name, priority_color(priority)).await
    }

    async fn lookup_or_create(
        &self,
        final_name: &str,
        background: &str,
    ) -> Result<String, LabelError> {
        let _guard = match self.locks {
            Some(locks) => Some(locks.acquire(&self.mailbox.label_scope(), final_name).await),
            None => None,
        };

        let remote = |source| LabelError::Remote {
            name: final_name.to_string(),
            source,
        };

        let labels = self.mailbox.list_labels().await.map_err(remote)?;
        if let Some(existing) = labels
            .into_iter()
            .find(|label| label.name == final_name && label.is_user())
        {
            debug!(label = %final_name, label_id = %existing.id, "reusing existing label");
            return Ok(existing.id);
        }

        let created = self
            .mailbox
            .create_label(&NewLabel::visible(final_name, background, LABEL_TEXT_COLOR))
            .await
            .map_err(remote)?;

        info!(label = %final_name, label_id = %created.id, "created label");
        Ok(created.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::types::{LABEL_TYPE_USER, Label, LabelColor};
    use std::time::Duration;
    use crate::mailbox::InMemoryMailbox;

    fn user_label(id: &str, name: &str) -> Label {
        Label {
            id: id.into(),
            name: name.into(),
            label_type: Some(LABEL_TYPE_USER.into()),
            message_list_visibility: None,
            label_list_visibility: None,
            color: None,
        }
    }

    #[test]
    fn reserved_names_are_namespaced_case_insensitively() {
        for name in ["INBOX", "inbox", "Sent", "draft", "SPAM", "Trash", "important", "Starred", "unread"] {
            assert_eq!(namespaced_name(name), format!("Custom_{name}"));
        }
        assert_eq!(namespaced_name("github"), "github");
        assert_eq!(namespaced_name("Inboxes"), "Inboxes");
    }

    #[test]
    fn display_name_strips_namespace() {
        assert_eq!(display_name("Custom_INBOX"), "INBOX");
        assert_eq!(display_name("github"), "github");
    }

    #[test]
    fn priority_palette_and_fallback() {
        let expected = ["#fad165", "#fb4c2f", "#43d692", "#4a86e8", "#a479e2", "#ffad47"];
        for (n, color) in expected.iter().enumerate() {
            assert_eq!(priority_color(n as i64), *color);
        }
        assert_eq!(priority_color(6), DEFAULT_LABEL_COLOR);
        assert_eq!(priority_color(42), DEFAULT_LABEL_COLOR);
        assert_eq!(priority_color(-1), DEFAULT_LABEL_COLOR);
    }

    #[test]
    fn parses_priority_label_names() {
        assert_eq!(priority_from_label_name("P0"), Some(0));
        assert_eq!(priority_from_label_name("P12"), Some(12));
        assert_eq!(priority_from_label_name("P"), None);
        assert_eq!(priority_from_label_name("p1"), None);
        assert_eq!(priority_from_label_name("P1x"), None);
        assert_eq!(priority_from_label_name("XP1"), None);
        assert_eq!(priority_from_label_name("P99999999999999999999"), None);
    }

    #[test]
    fn effective_priority_is_minimum_or_sentinel() {
        assert_eq!(effective_priority([3, 1, 2]), 1);
        assert_eq!(effective_priority([]), NO_PRIORITY);
    }

    #[tokio::test]
    async fn resolving_twice_creates_once() {
        let mailbox = InMemoryMailbox::new();
        let resolver = LabelResolver::new(&mailbox);

        let first = resolver
            .resolve_topic_label("github", Some("#4a86e8"))
            .await
            .expect("first resolve");
        let second = resolver
            .resolve_topic_label("github", Some("#fb4c2f"))
            .await
            .expect("second resolve");

        assert_eq!(first, second);
        assert_eq!(mailbox.create_label_calls(), 1);
        let stored = mailbox.labels_named("github");
        assert_eq!(stored.len(), 1);
        // An existing label keeps the color it was created with.
        assert_eq!(stored[0].background_color(), Some("#4a86e8"));
    }

    #[tokio::test]
    async fn reserved_name_is_stored_with_prefix() {
        let mailbox = InMemoryMailbox::new();
        let resolver = LabelResolver::new(&mailbox);

        let id = resolver
            .resolve_topic_label("Important", None)
            .await
            .expect("resolve");

        assert_ne!(id, "IMPORTANT");
        let stored = mailbox.labels_named("Custom_Important");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, id);
        assert_eq!(stored[0].background_color(), Some(DEFAULT_LABEL_COLOR));
    }

    #[tokio::test]
    async fn existing_user_label_is_reused_without_creation() {
        let mailbox = InMemoryMailbox::new();
        mailbox.insert_label(user_label("Label_existing", "Custom_inbox"));
        let resolver = LabelResolver::new(&mailbox);

        let id = resolver
            .resolve_topic_label("inbox", Some("#000000"))
            .await
            .expect("resolve");

        assert_eq!(id, "Label_existing");
        assert_eq!(mailbox.create_label_calls(), 0);
    }

    #[tokio::test]
    async fn priority_labels_use_palette_and_fallback_color() {
        let mailbox = InMemoryMailbox::new();
        let resolver = LabelResolver::new(&mailbox);

        let p3 = resolver.resolve_priority_label(3).await.expect("P3");
        let p9 = resolver.resolve_priority_label(9).await.expect("P9");

        let stored_p3 = mailbox.labels_named("P3");
        assert_eq!(stored_p3[0].id, p3);
        assert_eq!(
            stored_p3[0].color,
            Some(LabelColor {
                background_color: Some("#4a86e8".into()),
                text_color: Some("#000000".into()),
            })
        );
        let stored_p9 = mailbox.labels_named("P9");
        assert_eq!(stored_p9[0].id, p9);
        assert_eq!(stored_p9[0].background_color(), Some(DEFAULT_LABEL_COLOR));

        let again = resolver.resolve_priority_label(3).await.expect("P3 again");
        assert_eq!(again, p3);
        assert_eq!(mailbox.create_label_calls(), 2);
    }

    #[tokio::test]
    async fn empty_name_is_rejected_before_io() {
        let mailbox = InMemoryMailbox::new();
        let resolver = LabelResolver::new(&mailbox);

        let err = resolver
            .resolve_topic_label("  ", None)
            .await
            .expect_err("empty name");

        assert!(matches!(err, LabelError::EmptyName));
        assert_eq!(mailbox.list_label_calls(), 0);
    }

    #[tokio::test]
    async fn remote_errors_propagate() {
        let mailbox = InMemoryMailbox::new();
        mailbox.fail_label_create("github");
        let resolver = LabelResolver::new(&mailbox);

        let err = resolver
            .resolve_topic_label("github", None)
            .await
            .expect_err("create fails");

        match err {
            LabelError::Remote { name, .. } => assert_eq!(name, "github"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_resolution_without_locks_can_race() {
        let mailbox = InMemoryMailbox::new();
        let resolver = LabelResolver::new(&mailbox);

        let (a, b) = tokio::join!(
            resolver.resolve_topic_label("github", None),
            resolver.resolve_topic_label("github", None),
        );

        // Both lookups miss, so both try to create; the remote rejects the second.
        assert_eq!(mailbox.create_label_calls(), 2);
        assert!(a.is_ok() != b.is_ok());
        assert_eq!(mailbox.labels_named("github").len(), 1);
    }

    #[tokio::test]
    async fn label_locks_collapse_concurrent_resolution() {
        let mailbox = InMemoryMailbox::new();
        let locks = LabelLocks::new();
        let resolver = LabelResolver::new(&mailbox).with_locks(&locks);

        let (a, b) = tokio::join!(
            resolver.resolve_topic_label("github", None),
            resolver.resolve_topic_label("github", None),
        );

        assert_eq!(a.expect("first"), b.expect("second"));
        assert_eq!(mailbox.create_label_calls(), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn label_locks_are_scoped_per_mailbox() {
        let locks = LabelLocks::new();
        let held = locks.acquire("alice", "github").await;

        let other = tokio::time::timeout(Duration::from_millis(100), locks.acquire("bob", "github"))
            .await
            .expect("another mailbox does not wait");
        assert_eq!(locks.len(), 2);
        drop(other);

        let same = tokio::time::timeout(Duration::from_millis(50), locks.acquire("alice", "github"));
        assert!(same.await.is_err(), "same mailbox and name must wait");
        // The abandoned wait gave its slot back.
        assert_eq!(locks.len(), 1);

        drop(held);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn label_locks_forget_names_after_resolution() {
        let locks = LabelLocks::new();
        let alice = InMemoryMailbox::new();
        let bob = InMemoryMailbox::new();
        assert_ne!(alice.label_scope(), bob.label_scope());

        let alice_resolver = LabelResolver::new(&alice).with_locks(&locks);
        let bob_resolver = LabelResolver::new(&bob).with_locks(&locks);
        for n in 0..20 {
            let name = format!("topic-{n}");
            let (a, b) = tokio::join!(
                alice_resolver.resolve_topic_label(&name, None),
                bob_resolver.resolve_topic_label(&name, None),
            );
            assert_ne!(a.expect("alice"), String::new());
            assert_ne!(b.expect("bob"), String::new());
        }
        alice_resolver.resolve_priority_label(1).await.expect("P1");

        assert!(locks.is_empty());
        assert_eq!(alice.create_label_calls(), 21);
        assert_eq!(bob.create_label_calls(), 20);
    }
}
