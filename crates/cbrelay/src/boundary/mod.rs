// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The native registration boundary.
//!
//! Dispatchers never call the native library directly; they go through a
//! [`NativeBoundary`], which exposes the four registration entry points:
//!
//! ```text
//! register_callback(record, identity)      unregister_callback(record)
//! register_call_result(record, handle)     unregister_call_result(record, handle)
//! ```
//!
//! Every address handed over stays valid and unchanged until the matching
//! unregistration returns.
//!
//! # Implementations
//!
//! - [`LoopbackBoundary`]: in-process simulation of the native library
//!   (call log, failure injection, delivery through the dispatch tables).
//! - `DylibBoundary` (feature `dylib`): entry points resolved from a shared
//!   library at runtime.

mod loopback;
#[cfg(feature = "dylib")]
mod dylib;

pub use loopback::{BoundaryCall, LoopbackBoundary};
#[cfg(feature = "dylib")]
pub use dylib::{BoundarySymbols, DylibBoundary};

use std::rc::Rc;

use crate::error::Result;
use crate::identity::Identity;
use crate::record::RecordAddress;

/// Handle of an outstanding asynchronous native call (`uint64` on the wire).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ApiCall(u64);

impl ApiCall {
    /// Sentinel meaning "no call".
    pub const INVALID: ApiCall = ApiCall(0);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl std::fmt::Display for ApiCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The four native registration entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeCall {
    RegisterCallback,
    UnregisterCallback,
    RegisterCallResult,
    UnregisterCallResult,
}

impl std::fmt::Display for NativeCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NativeCall::RegisterCallback => "register_callback",
            NativeCall::UnregisterCallback => "unregister_callback",
            NativeCall::RegisterCallResult => "register_call_result",
            NativeCall::UnregisterCallResult => "unregister_call_result",
        };
        f.write_str(name)
    }
}

/// Registration entry points of the native library.
///
/// Implementations report failure synchronously; dispatchers surface it to
/// their caller as [`Error::NativeCall`](crate::Error::NativeCall).
pub trait NativeBoundary {
    /// Start routing callbacks with `identity` to `record`.
    fn register_callback(&self, record: RecordAddress, identity: Identity) -> Result<()>;

    /// Stop routing callbacks to `record`.
    fn unregister_callback(&self, record: RecordAddress) -> Result<()>;

    /// Route the completion of `call` to `record`.
    fn register_call_result(&self, record: RecordAddress, call: ApiCall) -> Result<()>;

    /// Drop the pending completion route of `call` to `record`.
    fn unregister_call_result(&self, record: RecordAddress, call: ApiCall) -> Result<()>;
}

impl<B: NativeBoundary + ?Sized> NativeBoundary for Rc<B> {
    fn register_callback(&self, record: RecordAddress, identity: Identity) -> Result<()> {
        (**self).register_callback(record, identity)
    }

    fn unregister_callback(&self, record: RecordAddress) -> Result<()> {
        (**self).unregister_callback(record)
    }

    fn register_call_result(&self, record: RecordAddress, call: ApiCall) -> Result<()> {
        (**self).register_call_result(record, call)
    }

    fn unregister_call_result(&self, record: RecordAddress, call: ApiCall) -> Result<()> {
        (**self).unregister_call_result(record, call)
    }
}
