// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use thiserror::Error;

/// Crate-wide result alias; all fallible core operations return this.
pub type Result<T> = std::result::Result<T, SlskError>;

/// Every failure the core can surface, one variant per distinguishable kind.
///
/// The lowest layer that can classify a failure attaches the kind; upper
/// layers add operation context through the variant payloads. `Timeout`,
/// `Cancelled` and `UserOffline` are never reclassified on the way up.
#[derive(Debug, Error)]
pub enum SlskError {
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("token {0} is already in use")]
    DuplicateToken(i32),

    #[error("a transfer of {filename} with {username} is already active or queued")]
    DuplicateTransfer { username: String, filename: String },

    #[error("no such transfer: {0}")]
    TransferNotFound(String),

    #[error("{0} timed out")]
    Timeout(String),

    #[error("{0} was cancelled")]
    Cancelled(String),

    #[error("could not establish a connection to {username}: {reason}")]
    ConnectionFailed { username: String, reason: String },

    #[error("user {0} is offline")]
    UserOffline(String),

    #[error("could not resolve an endpoint for {username}: {reason}")]
    UserEndpointLookupFailed { username: String, reason: String },

    #[error("user {0} is not known to the server")]
    UserNotFound(String),

    #[error("transfer rejected by peer: {0}")]
    TransferRejected(String),

    #[error("login rejected: {0}")]
    LoginRejected(String),

    #[error("kicked from the server: {0}")]
    Kicked(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Payload-free tags for [`SlskError`] variants, used by callers that branch
/// on the kind of failure (and by tests asserting classification).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidState,
    InvalidArgument,
    DuplicateToken,
    DuplicateTransfer,
    TransferNotFound,
    Timeout,
    Cancelled,
    ConnectionFailed,
    UserOffline,
    UserEndpointLookupFailed,
    UserNotFound,
    TransferRejected,
    LoginRejected,
    Kicked,
    ProtocolError,
    Io,
}

impl SlskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SlskError::InvalidState(_) => ErrorKind::InvalidState,
            SlskError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            SlskError::DuplicateToken(_) => ErrorKind::DuplicateToken,
            SlskError::DuplicateTransfer { .. } => ErrorKind::DuplicateTransfer,
            SlskError::TransferNotFound(_) => ErrorKind::TransferNotFound,
            SlskError::Timeout(_) => ErrorKind::Timeout,
            SlskError::Cancelled(_) => ErrorKind::Cancelled,
            SlskError::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            SlskError::UserOffline(_) => ErrorKind::UserOffline,
            SlskError::UserEndpointLookupFailed { .. } => {
                ErrorKind::UserEndpointLookupFailed
            },
            SlskError::UserNotFound(_) => ErrorKind::UserNotFound,
            SlskError::TransferRejected(_) => ErrorKind::TransferRejected,
            SlskError::LoginRejected(_) => ErrorKind::LoginRejected,
            SlskError::Kicked(_) => ErrorKind::Kicked,
            SlskError::Protocol(_) => ErrorKind::ProtocolError,
            SlskError::Io(_) => ErrorKind::Io,
        }
    }

    /// Shorthand used at every suspension point that can time out.
    pub fn timeout(what: impl Into<String>) -> Self {
        SlskError::Timeout(what.into())
    }

    /// Shorthand used at every suspension point that can be cancelled.
    pub fn cancelled(what: impl Into<String>) -> Self {
        SlskError::Cancelled(what.into())
    }

    pub fn protocol(what: impl Into<String>) -> Self {
        SlskError::Protocol(what.into())
    }

    pub fn is_terminal_timeout(&self) -> bool {
        matches!(self, SlskError::Timeout(_))
    }

    pub fn is_terminal_cancel(&self) -> bool {
        matches!(self, SlskError::Cancelled(_))
    }
}
