//! Error taxonomy shared by the store, the sweep and the command layer.

use crate::ids::{RoleId, UserId};
use crate::platform::PlatformError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A record already exists for this (subject, role) pair.
    #[error("role {role} is already tracked for user {subject}")]
    DuplicateAssignment { subject: UserId, role: RoleId },

    #[error("role {role} is not tracked for user {subject}")]
    NotFound { subject: UserId, role: RoleId },

    /// Platform API or network failure. Retryable.
    #[error("platform error: {0}")]
    TransientExternalFailure(#[from] PlatformError),

    /// The caller lacks the permission the command requires.
    #[error("missing permission: {0}")]
    PermissionDenied(&'static str),

    #[error("storage error: {0}")]
    StorageFailure(#[from] rusqlite::Error),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
