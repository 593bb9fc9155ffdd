// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # cbrelay - native callback dispatch for Rust handlers
//!
//! Lets a callback-driven C++ library (one that keeps raw pointers to objects
//! derived from a callback base class and calls their virtual `Run` methods)
//! deliver into typed Rust closures. cbrelay hand-assembles the dispatch
//! table the library expects, keeps it and the registration record at a
//! fixed address for the whole registration, and decodes every delivery
//! into the payload type before calling the handler.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::rc::Rc;
//! use cbrelay::{
//!     native_payload, Identity, IdentityTable, LoopbackBoundary, PersistentDispatcher, Result,
//! };
//!
//! #[repr(C)]
//! #[derive(Clone, Copy, Debug)]
//! struct Ping { value: i32 }
//! native_payload!(Ping);
//!
//! fn main() -> Result<()> {
//!     let native = Rc::new(LoopbackBoundary::host());
//!     let table = IdentityTable::new().with::<Ping>(Identity::new(42));
//!
//!     let _ping = PersistentDispatcher::<Ping>::create(native.clone(), &table, |p| {
//!         println!("ping {}", p.value);
//!     })?;
//!
//!     // What the native pump does for each queued callback.
//!     native.deliver(Identity::new(42), &42i32.to_ne_bytes());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                         Application handlers                        |
//! |          FnMut(T)                          FnMut(T, bool)           |
//! +---------------------------------------------------------------------+
//! |   PersistentDispatcher<T>           OneShotDispatcher<T>            |
//! |   decode + ExceptionBarrier         handle correlation              |
//! +---------------------------------------------------------------------+
//! |   Anchor = RegistrationRecord + route    DispatchTable (3 slots)    |
//! +---------------------------------------------------------------------+
//! |   NativeBoundary: Loopback | Dylib (register / unregister)          |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`PersistentDispatcher`] | Repeated callbacks for one payload type |
//! | [`OneShotDispatcher`] | Completion of one asynchronous call |
//! | [`IdentityTable`] | Payload type to native identity lookup |
//! | [`AbiConfig`] | Receiver convention and runner slot order |
//! | [`NativeBoundary`] | The four native registration calls |
//! | [`ExceptionBarrier`] | Policy for panics raised by handlers |
//!
//! ## Features
//!
//! - `identity-loaders` (default): YAML identity tables.
//! - `dylib`: [`DylibBoundary`] resolving the registration calls at runtime.
//! - `receiver-omitted`, `slots-completion-first`, `slots-callback-first`:
//!   override the host dispatch-table layout.

/// Dispatch table layouts and native entry points.
pub mod abi;
/// Exception barrier policies.
pub mod barrier;
/// Native registration boundary.
pub mod boundary;
/// Typed dispatchers.
pub mod dispatch;
/// Error types.
pub mod error;
/// Payload type to identity resolution.
pub mod identity;
/// Payload contract and plain-data helpers.
pub mod payload;
/// Address-stable registration records.
pub mod record;

pub use abi::{AbiConfig, DispatchTable, EntryPoints, Receiver, Slot, SlotOrder};
pub use barrier::{
    process_barrier, reset_process_barrier, set_process_barrier, DispatchSite, ExceptionBarrier,
    HandlerFailure, LogBarrier,
};
pub use boundary::{ApiCall, BoundaryCall, LoopbackBoundary, NativeBoundary, NativeCall};
#[cfg(feature = "dylib")]
pub use boundary::{BoundarySymbols, DylibBoundary};
pub use dispatch::{
    CallResultHandler, CallbackHandler, DispatcherOptions, OneShotDispatcher, PersistentDispatcher,
};
pub use error::{Error, ErrorKind, Result};
#[cfg(feature = "identity-loaders")]
pub use identity::YamlLoader;
pub use identity::{Identity, IdentityResolver, IdentityTable, PayloadType};
pub use payload::Payload;
pub use record::{RecordAddress, RegistrationRecord};
