// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Caller-facing error taxonomy.
//!
//! Every failure that crosses the command boundary is classified into one of
//! the [`ErrorKind`] buckets at the point it arises and carried upward as a
//! [`CommandError`]. Crate-local error enums (git, storage, subprocess)
//! convert into this type at their crate boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a command failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    StateTransition,
    Git,
    Subprocess,
    Io,
    Internal,
}

crate::simple_display! {
    ErrorKind {
        Validation => "validation",
        NotFound => "not_found",
        Conflict => "conflict",
        StateTransition => "state_transition",
        Git => "git",
        Subprocess => "subprocess",
        Io => "io",
        Internal => "internal",
    }
}

/// A classified, human-readable command failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct CommandError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CommandError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn state_transition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StateTransition, message)
    }

    pub fn git(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Git, message)
    }

    pub fn subprocess(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Subprocess, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<std::io::Error> for CommandError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}
