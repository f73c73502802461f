//! Remote execution / file-transfer channel to the edge device.
//!
//! `RemoteTransport` opens channels, `RemoteChannel` is one live, authenticated
//! connection. Implementations need not support concurrent use of a channel;
//! `RemoteSessionManager` serializes every operation.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::retry::{RetryClass, Retryable};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("connect failed: {0}")]
    Connect(String),

    /// The channel itself is unusable. The session must be rebuilt.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The command ran and exited non-zero. The channel is still fine.
    #[error("remote command failed (exit {exit_code}): {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    #[error("local i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote operation timed out after {0:?}")]
    Timeout(Duration),
}

impl RemoteError {
    /// Whether the session should be discarded and reconnected on next use.
    pub fn breaks_session(&self) -> bool {
        matches!(self, RemoteError::Connect(_) | RemoteError::Transport(_) | RemoteError::Timeout(_))
    }
}

impl Retryable for RemoteError {
    fn retry_class(&self) -> Option<RetryClass> {
        if self.breaks_session() {
            Some(RetryClass::Transient)
        } else {
            None
        }
    }

    fn timed_out(after: Duration) -> Self {
        RemoteError::Timeout(after)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait RemoteChannel: Send {
    /// Cheap local liveness check (no round trip).
    fn is_alive(&self) -> bool;

    async fn run(&mut self, command: &str) -> Result<CommandOutput, RemoteError>;

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<(), RemoteError>;

    async fn download(&mut self, remote: &str, local: &Path) -> Result<(), RemoteError>;

    async fn close(&mut self);
}

#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RemoteChannel>, RemoteError>;

    /// Human readable destination for logs.
    fn describe(&self) -> String;
}

/// Single-quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// `pkill -f` pattern that does not match the shell running pkill itself.
pub fn pkill_pattern(needle: &str) -> String {
    let mut chars = needle.chars();
    match chars.next() {
        Some(first) => format!("[{}]{}", first, chars.as_str()),
        None => String::new(),
    }
}
