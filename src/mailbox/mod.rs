//! Remote mailbox abstraction.
//!
//! A `Mailbox` knows how to open sessions; a `MailboxSession` is one
//! authenticated, stateful connection. Sessions are blocking and are never
//! shared: every worker opens its own and releases it through
//! [`SessionGuard`].

pub mod imap;

use std::fmt;
use std::ops::{Deref, DerefMut};

use serde::Serialize;
use tracing::warn;

use crate::error::MailboxError;

pub use imap::ImapMailbox;

/// Sender and subject filter for the one-off search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCriteria {
    pub sender: String,
    pub subject: String,
}

impl SearchCriteria {
    pub fn new(sender: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            subject: subject.into(),
        }
    }
}

/// Session-scoped message handle (an IMAP sequence number).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opens authenticated sessions against one mailbox.
///
/// Implementations capture host, port and credentials at construction and
/// must not retry internally.
pub trait Mailbox: Send + Sync {
    fn connect(&self) -> Result<Box<dyn MailboxSession>, MailboxError>;
}

/// One open mailbox session.
pub trait MailboxSession: Send {
    /// Identifiers of messages matching `criteria`; empty when nothing matches.
    fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<MessageId>, MailboxError>;

    /// Raw RFC 822 bytes of one message.
    fn fetch(&mut self, id: &MessageId) -> Result<Vec<u8>, MailboxError>;

    /// Release the session. Called once, by [`SessionGuard`].
    fn close(&mut self) -> Result<(), MailboxError>;
}

/// Owns a session for the duration of a scope and closes it on every exit
/// path. Close failures are logged, never returned.
pub struct SessionGuard {
    session: Box<dyn MailboxSession>,
}

impl SessionGuard {
    pub fn open(mailbox: &dyn Mailbox) -> Result<Self, MailboxError> {
        Ok(Self {
            session: mailbox.connect()?,
        })
    }
}

impl Deref for SessionGuard {
    type Target = dyn MailboxSession;

    fn deref(&self) -> &Self::Target {
        &*self.session
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Err(e) = self.session.close() {
            warn!(error = %e, "Failed to close mailbox session");
        }
    }
}
