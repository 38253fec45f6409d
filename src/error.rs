// SPDX-License-Identifier: GPL-3.0-only
//! Error taxonomy for the core runtime (spec.md §7).

use serde::Serialize;
use std::fmt;

/// Codes a [`crate::provider::Provider`] call or callback may report.
///
/// Mirrors `ProviderResult.code` from spec.md §6.2 exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProviderErrorCode {
    NotSupported,
    InvalidArgument,
    Busy,
    BadState,
    PlatformConstraint,
    TransientFailure,
    ProviderFailed,
    ShuttingDown,
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotSupported => "not supported",
            Self::InvalidArgument => "invalid argument",
            Self::Busy => "busy",
            Self::BadState => "bad state",
            Self::PlatformConstraint => "platform constraint",
            Self::TransientFailure => "transient failure",
            Self::ProviderFailed => "provider failed",
            Self::ShuttingDown => "shutting down",
        };
        write!(f, "{s}")
    }
}

impl std::error::Error for ProviderErrorCode {}

/// Core-facing error taxonomy (spec.md §7): the full provider taxonomy plus
/// arbitration-specific and queue/shutdown errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandError {
    NotSupported,
    InvalidArgument,
    Busy,
    BadState,
    PlatformConstraint,
    TransientFailure,
    ProviderFailed,
    ShuttingDown,
    /// A rig member is armed and the command requires going through the rig.
    RigAuthoritative,
    /// A requested profile does not fit the device's capability union.
    ProfileIncompatible,
    /// The command queue was at capacity at the time of submission.
    QueueFull,
    /// `shutdown()` has already been accepted; no new commands are admitted.
    Shutdown,
}

impl From<ProviderErrorCode> for CommandError {
    fn from(code: ProviderErrorCode) -> Self {
        match code {
            ProviderErrorCode::NotSupported => Self::NotSupported,
            ProviderErrorCode::InvalidArgument => Self::InvalidArgument,
            ProviderErrorCode::Busy => Self::Busy,
            ProviderErrorCode::BadState => Self::BadState,
            ProviderErrorCode::PlatformConstraint => Self::PlatformConstraint,
            ProviderErrorCode::TransientFailure => Self::TransientFailure,
            ProviderErrorCode::ProviderFailed => Self::ProviderFailed,
            ProviderErrorCode::ShuttingDown => Self::ShuttingDown,
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotSupported => "not supported",
            Self::InvalidArgument => "invalid argument",
            Self::Busy => "busy",
            Self::BadState => "bad state",
            Self::PlatformConstraint => "platform constraint",
            Self::TransientFailure => "transient failure",
            Self::ProviderFailed => "provider failed",
            Self::ShuttingDown => "shutting down",
            Self::RigAuthoritative => "rig is authoritative over this device",
            Self::ProfileIncompatible => "profile incompatible with device capabilities",
            Self::QueueFull => "command queue full",
            Self::Shutdown => "core is shutting down, command rejected",
        };
        write!(f, "{s}")
    }
}

impl std::error::Error for CommandError {}

/// Result alias for command handling.
pub type CommandResult<T> = Result<T, CommandError>;
