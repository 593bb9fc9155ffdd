// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed dispatchers bridging native invocations to Rust handlers.
//!
//! # Architecture
//!
//! ```text
//! native pump
//!     v  this / thunk N
//! DispatchTable slot (abi::entry)
//!     v
//! Anchor { record, target, hooks }      StableBox, never moves
//!     v  type-erased hook
//! Rc<Shared<T>> -> decode -> shield(handler)
//! ```
//!
//! - [`PersistentDispatcher`]: repeated callbacks for one identity.
//! - [`OneShotDispatcher`]: one completion of one asynchronous call.
//!
//! Dispatchers own their anchor and table exclusively. Dropping a
//! dispatcher unregisters it first; if the native side refuses, the
//! allocations are leaked rather than freed under a live registration.

mod oneshot;
mod persistent;

pub use oneshot::{CallResultHandler, OneShotDispatcher};
pub use persistent::{CallbackHandler, PersistentDispatcher};

use std::cell::Cell;
use std::mem::ManuallyDrop;
use std::os::raw::c_int;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::Arc;

use crate::abi::entry::{self, ThunkLease};
use crate::abi::{AbiConfig, DispatchTable};
use crate::barrier::ExceptionBarrier;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::payload::Payload;
use crate::record::{
    Anchor, RecordAddress, RegistrationRecord, RunCallResultHook, RunCallbackHook, StableBox,
};

/// Construction options shared by both dispatcher kinds.
#[derive(Clone, Default)]
pub struct DispatcherOptions {
    abi: AbiConfig,
    game_server: bool,
    barrier: Option<Arc<dyn ExceptionBarrier>>,
}

impl DispatcherOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch table layout (defaults to [`AbiConfig::HOST`]).
    #[must_use]
    pub fn abi(mut self, abi: AbiConfig) -> Self {
        self.abi = abi;
        self
    }

    /// Register on the game-server pipe.
    #[must_use]
    pub fn game_server(mut self, game_server: bool) -> Self {
        self.game_server = game_server;
        self
    }

    /// Dispatcher-specific exception barrier instead of the process one.
    #[must_use]
    pub fn barrier(mut self, barrier: Arc<dyn ExceptionBarrier>) -> Self {
        self.barrier = Some(barrier);
        self
    }
}

impl std::fmt::Debug for DispatcherOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherOptions")
            .field("abi", &self.abi)
            .field("game_server", &self.game_server)
            .field("custom_barrier", &self.barrier.is_some())
            .finish()
    }
}

/// Anchor, table and thunk lease of one dispatcher.
pub(crate) struct Binding {
    // Drop order: the lease goes before the anchor it points at.
    lease: Option<ThunkLease>,
    table: StableBox<DispatchTable>,
    anchor: StableBox<Anchor>,
    abi: AbiConfig,
}

impl Binding {
    pub(crate) fn new(
        abi: AbiConfig,
        identity: Identity,
        payload_size: usize,
        target: *const (),
        run_callback: RunCallbackHook,
        run_call_result: RunCallResultHook,
    ) -> Result<Self> {
        let size = c_int::try_from(payload_size).map_err(|_| Error::PayloadTooLarge(payload_size))?;
        let anchor = StableBox::new(Anchor::new(
            identity,
            size,
            target,
            run_callback,
            run_call_result,
        ));
        let bound = entry::bind(abi.receiver, anchor.as_ptr())?;
        let table = StableBox::new(DispatchTable::build(&bound.entry, abi));
        // SAFETY: anchor was just allocated and is not yet shared.
        unsafe { Anchor::set_dispatch_table(anchor.as_ptr(), table.as_ptr()) };

        Ok(Self {
            lease: bound.lease,
            table,
            anchor,
            abi,
        })
    }

    pub(crate) fn record(&self) -> RecordAddress {
        let anchor = self.anchor.as_ptr().cast::<RegistrationRecord>();
        // SAFETY: StableBox pointers are never null.
        RecordAddress::new(unsafe { NonNull::new_unchecked(anchor) })
    }

    pub(crate) fn abi(&self) -> AbiConfig {
        self.abi
    }

    pub(crate) fn flags(&self) -> u8 {
        // SAFETY: the anchor lives as long as self.
        unsafe { self.record().flags() }
    }

    pub(crate) fn set_game_server_flag(&self) {
        // SAFETY: the anchor lives as long as self.
        unsafe {
            self.record()
                .update_flags(RegistrationRecord::FLAG_GAME_SERVER, 0);
        }
    }

    /// Keep every allocation (and the thunk lease) alive forever.
    fn leak(self) {
        let Binding {
            lease,
            table,
            anchor,
            ..
        } = self;
        std::mem::forget(lease);
        table.leak();
        anchor.leak();
    }
}

/// Finish a dispatcher's binding after its final unregistration attempt.
///
/// Frees the binding when `unregistered` is true. Otherwise the native side
/// may still call through the record, so the binding and one strong count
/// of `shared` are leaked.
///
/// # Safety
///
/// Must be called at most once per binding; it is unusable afterwards.
pub(crate) unsafe fn release_binding<S>(
    binding: &mut ManuallyDrop<Binding>,
    shared: &Rc<S>,
    unregistered: bool,
) {
    if unregistered {
        ManuallyDrop::drop(binding);
    } else {
        let binding = ManuallyDrop::take(binding);
        log::error!(
            "[dispatch] unregistration of {} failed; leaking its record",
            binding.record()
        );
        binding.leak();
        std::mem::forget(Rc::clone(shared));
    }
}

/// Recover a strong reference from an anchor target.
///
/// Dispatch holds its own count so that a handler dropping its dispatcher
/// cannot free the state still in use.
///
/// # Safety
///
/// `target` must come from `Rc::as_ptr` of a live `Rc<S>`.
pub(crate) unsafe fn retain<S>(target: *const ()) -> Rc<S> {
    let ptr = target.cast::<S>();
    Rc::increment_strong_count(ptr);
    Rc::from_raw(ptr)
}

/// View the native payload block.
///
/// # Safety
///
/// A non-null `param` must point at `T::SIZE` readable bytes for `'a`.
pub(crate) unsafe fn payload_bytes<'a, T: Payload>(param: *const u8) -> Option<&'a [u8]> {
    if param.is_null() {
        log::warn!("[dispatch] null payload delivered for {}", T::TYPE_NAME);
        None
    } else {
        Some(std::slice::from_raw_parts(param, T::SIZE))
    }
}

/// Current handler of a dispatcher.
///
/// The handler is taken out for the duration of its own call so that it
/// can replace itself; [`HandlerSlot::restore`] keeps such a replacement.
pub(crate) struct HandlerSlot<H: ?Sized> {
    current: Cell<Option<Box<H>>>,
}

impl<H: ?Sized> HandlerSlot<H> {
    pub(crate) fn new(handler: Option<Box<H>>) -> Self {
        Self {
            current: Cell::new(handler),
        }
    }

    pub(crate) fn replace(&self, handler: Option<Box<H>>) -> Option<Box<H>> {
        self.current.replace(handler)
    }

    pub(crate) fn take(&self) -> Option<Box<H>> {
        self.current.take()
    }

    /// Put back a handler taken for dispatch unless a newer one was installed.
    pub(crate) fn restore(&self, handler: Box<H>) {
        match self.current.take() {
            Some(newer) => self.current.set(Some(newer)),
            None => self.current.set(Some(handler)),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_set(&self) -> bool {
        let handler = self.current.take();
        let set = handler.is_some();
        self.current.set(handler);
        set
    }
}
