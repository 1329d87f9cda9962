//! Error taxonomy for the channel, config and net subsystems.
//!
//! Mirrors the original C runtime's return-code conventions, but lets
//! `thiserror` generate the `Display`/`Error` boilerplate and `?` do the
//! propagation instead of out-parameters.

use thiserror::Error;

use crate::message::Message;

/// Errors a channel endpoint can report back to a net.
///
/// `ReadUninitialisedNoDefault` and a dismissed write are *not* modeled here
/// — per the read/write contract those are ordinary outcomes, not failures,
/// so `Channel::read` returns `Option<Message>` and `Channel::write` returns
/// `Result<WriteOutcome, ChannelError>`.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("write attempted on channel after END was signalled")]
    WriteAfterEnd(Message),

    #[error("channel reported READY but the FIFO was empty")]
    ReadyButEmpty,

    #[error("channel reported READY but the FIFO was full")]
    ReadyButFull(Message),

    #[error("no target output configured for this write")]
    NoTarget,
}

/// Errors from the dot-path configuration lookup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("path '{0}' does not exist in the configuration document")]
    None(String),

    #[error("path '{0}' exists but does not hold the requested type")]
    BadType(String),

    #[error("path '{0}' resolved to a document, not a value")]
    NoValue(String),
}

/// Error returned by a net's `init` hook; a net that errors here skips
/// straight to `terminate` without ever entering its step loop.
#[derive(Debug, Error)]
#[error("net initialisation failed: {0}")]
pub struct InitError(pub String);

impl InitError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Deadline miss reported by a temporal firewall. Logged, not fatal.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("temporal firewall missed its deadline by {overrun_ns} ns")]
pub struct DeadlineMiss {
    pub overrun_ns: u64,
}
