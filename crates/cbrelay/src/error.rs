// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types returned by cbrelay setup and registration operations.
//!
//! Failures raised by user handlers during dispatch are never returned as
//! an [`Error`]; they are handed to the [`ExceptionBarrier`](crate::ExceptionBarrier)
//! as a [`HandlerFailure`](crate::HandlerFailure).

use crate::boundary::NativeCall;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Identity table or build configuration problem.
    Configuration,
    /// Caller passed an absent or unusable argument.
    InvalidArgument,
    /// A native register/unregister call reported failure.
    NativeCallFailure,
}

/// Errors returned by cbrelay operations.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Payload type has no entry in the identity table.
    UnknownIdentity(&'static str),
    /// Identity table is malformed (unknown group, duplicate identity, ...).
    InvalidIdentityTable(String),
    /// Identity table file not found at specified path.
    ConfigFileNotFound(String),
    /// Payload size does not fit the native `int` returned by the size query.
    PayloadTooLarge(usize),
    /// Every receiver-omitted thunk is leased by a live dispatcher.
    ReceiverSlotsExhausted,
    /// Shared library or one of its symbols could not be loaded.
    Library(String),

    // ========================================================================
    // Argument Errors
    // ========================================================================
    /// No handler was supplied, now or previously.
    MissingHandler,

    // ========================================================================
    // Native Boundary Errors
    // ========================================================================
    /// A native registration call failed.
    NativeCall {
        /// Which entry was called.
        call: NativeCall,
        /// Failure detail reported by the boundary.
        reason: String,
    },

    /// I/O error with underlying cause.
    IoError(std::io::Error),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingHandler => ErrorKind::InvalidArgument,
            Error::NativeCall { .. } => ErrorKind::NativeCallFailure,
            _ => ErrorKind::Configuration,
        }
    }

    pub(crate) fn native(call: NativeCall, reason: impl Into<String>) -> Self {
        Error::NativeCall {
            call,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UnknownIdentity(ty) => write!(f, "No callback identity registered for {}", ty),
            Error::InvalidIdentityTable(msg) => write!(f, "Invalid identity table: {}", msg),
            Error::ConfigFileNotFound(path) => write!(f, "Config file not found: {}", path),
            Error::PayloadTooLarge(size) => {
                write!(f, "Payload size {} exceeds the native size query range", size)
            }
            Error::ReceiverSlotsExhausted => write!(
                f,
                "All {} receiver-omitted dispatch slots are in use",
                crate::abi::RECEIVER_OMITTED_SLOTS
            ),
            Error::Library(msg) => write!(f, "Native library error: {}", msg),
            Error::MissingHandler => write!(
                f,
                "Handler must be supplied at construction or with this call"
            ),
            Error::NativeCall { call, reason } => write!(f, "{} failed: {}", call, reason),
            Error::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e)
    }
}

/// Convenient alias for results using the crate `Error` type.
pub type Result<T> = core::result::Result<T, Error>;
