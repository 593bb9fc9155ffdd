// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Completion of one asynchronous native call.
//!
//! ```text
//!         set(call)                  matching completion / cancel()
//! Idle -------------> Pending(call) --------------------------------> Idle
//!                      |      ^
//!                      +------+ set(call')  (unregisters call first)
//! ```
//!
//! The native library drops its registration before delivering, so a
//! completion only has to forget the handle. A handler that calls
//! [`OneShotDispatcher::set`] for a follow-up call keeps that new handle.

use std::cell::Cell;
use std::mem::ManuallyDrop;
use std::rc::Rc;
use std::sync::Arc;

use super::{payload_bytes, release_binding, retain, Binding, DispatcherOptions, HandlerSlot};
use crate::abi::AbiConfig;
use crate::barrier::{shield, DispatchContext, DispatchSite, ExceptionBarrier};
use crate::boundary::{ApiCall, NativeBoundary};
use crate::error::{Error, Result};
use crate::identity::{Identity, IdentityResolver, PayloadType};
use crate::payload::Payload;
use crate::record::RecordAddress;

/// Handler receiving the decoded result and the native I/O failure flag.
pub type CallResultHandler<T> = Box<dyn FnMut(T, bool)>;

struct Shared<T: Payload> {
    identity: Identity,
    barrier: Option<Arc<dyn ExceptionBarrier>>,
    handler: HandlerSlot<dyn FnMut(T, bool)>,
    has_handler: Cell<bool>,
    call: Cell<ApiCall>,
}

impl<T: Payload> Shared<T> {
    fn invoke(&self, bytes: &[u8], failed: bool, site: DispatchSite) {
        let Some(mut handler) = self.handler.take() else {
            log::debug!("[oneshot] {} completed without handler", T::TYPE_NAME);
            return;
        };
        let ctx = DispatchContext {
            payload_type: T::TYPE_NAME,
            identity: self.identity,
            site,
        };
        shield(self.barrier.as_ref(), ctx, || handler(T::decode(bytes), failed));
        self.handler.restore(handler);
    }
}

// Forced completion: the native side has already dropped the registration.
unsafe fn run_callback_hook<T: Payload>(target: *const (), param: *const u8) {
    let shared = retain::<Shared<T>>(target);
    shared.call.set(ApiCall::INVALID);
    if let Some(bytes) = payload_bytes::<T>(param) {
        shared.invoke(bytes, false, DispatchSite::RunCallback);
    }
}

unsafe fn run_call_result_hook<T: Payload>(
    target: *const (),
    param: *const u8,
    failed: bool,
    call: ApiCall,
) {
    let shared = retain::<Shared<T>>(target);
    let pending = shared.call.get();
    if call != pending {
        log::debug!(
            "[oneshot] {} ignoring completion of {} (waiting for {})",
            T::TYPE_NAME,
            call,
            pending
        );
        return;
    }
    if let Some(bytes) = payload_bytes::<T>(param) {
        shared.invoke(bytes, failed, DispatchSite::RunCallResult);
    }
    // Keep a handle the handler assigned for a follow-up call.
    if shared.call.get() == call {
        shared.call.set(ApiCall::INVALID);
    }
}

/// Result of one asynchronous call returning payload type `T`.
///
/// Neither `Send` nor `Sync`: every call, including delivery, happens on the
/// thread that drives the native pump.
pub struct OneShotDispatcher<T: Payload> {
    boundary: Rc<dyn NativeBoundary>,
    shared: Rc<Shared<T>>,
    binding: ManuallyDrop<Binding>,
    released: bool,
}

impl<T: Payload> OneShotDispatcher<T> {
    /// Build an idle dispatcher, optionally with its handler.
    pub fn new(
        boundary: Rc<dyn NativeBoundary>,
        resolver: &dyn IdentityResolver,
        options: DispatcherOptions,
        handler: Option<CallResultHandler<T>>,
    ) -> Result<Self> {
        let identity = resolver.identity_of(PayloadType::of::<T>())?;
        let shared = Rc::new(Shared {
            identity,
            barrier: options.barrier,
            has_handler: Cell::new(handler.is_some()),
            handler: HandlerSlot::new(handler),
            call: Cell::new(ApiCall::INVALID),
        });
        let binding = Binding::new(
            options.abi,
            identity,
            T::SIZE,
            Rc::as_ptr(&shared).cast::<()>(),
            run_callback_hook::<T>,
            run_call_result_hook::<T>,
        )?;
        if options.game_server {
            binding.set_game_server_flag();
        }

        let dispatcher = Self {
            boundary,
            shared,
            binding: ManuallyDrop::new(binding),
            released: false,
        };
        log::trace!(
            "[oneshot] {} bound at {} ({})",
            T::TYPE_NAME,
            dispatcher.record_address(),
            options.abi
        );
        Ok(dispatcher)
    }

    /// Build an idle dispatcher with `handler`.
    pub fn create<F>(
        boundary: Rc<dyn NativeBoundary>,
        resolver: &dyn IdentityResolver,
        handler: F,
    ) -> Result<Self>
    where
        F: FnMut(T, bool) + 'static,
    {
        Self::new(
            boundary,
            resolver,
            DispatcherOptions::default(),
            Some(Box::new(handler)),
        )
    }

    /// Wait for `call`, replacing the handler if one is given.
    ///
    /// A pending call is unregistered first. [`ApiCall::INVALID`] leaves the
    /// dispatcher idle. On native failure the previous pending call is
    /// restored and the handler is left unchanged.
    pub fn set(&mut self, call: ApiCall, handler: Option<CallResultHandler<T>>) -> Result<()> {
        if handler.is_none() && !self.shared.has_handler.get() {
            return Err(Error::MissingHandler);
        }

        let record = self.record_address();
        let previous = self.shared.call.get();
        if previous.is_valid() {
            self.boundary.unregister_call_result(record, previous)?;
            self.shared.call.set(ApiCall::INVALID);
        }

        if call.is_valid() {
            if let Err(err) = self.boundary.register_call_result(record, call) {
                log::warn!("[oneshot] {} wait for {} failed: {}", T::TYPE_NAME, call, err);
                if previous.is_valid() {
                    match self.boundary.register_call_result(record, previous) {
                        Ok(()) => self.shared.call.set(previous),
                        Err(restore) => log::error!(
                            "[oneshot] {} could not restore wait for {}: {}",
                            T::TYPE_NAME,
                            previous,
                            restore
                        ),
                    }
                }
                return Err(err);
            }
        }

        if let Some(handler) = handler {
            self.shared.handler.replace(Some(handler));
            self.shared.has_handler.set(true);
        }
        self.shared.call.set(call);
        log::debug!(
            "[oneshot] {} at {} waiting for {}",
            T::TYPE_NAME,
            record,
            call
        );
        Ok(())
    }

    /// [`set`](Self::set) with a new handler.
    pub fn set_with<F>(&mut self, call: ApiCall, handler: F) -> Result<()>
    where
        F: FnMut(T, bool) + 'static,
    {
        self.set(call, Some(Box::new(handler)))
    }

    /// True while a call is pending.
    pub fn is_active(&self) -> bool {
        self.shared.call.get().is_valid()
    }

    /// Pending call, or [`ApiCall::INVALID`].
    pub fn handle(&self) -> ApiCall {
        self.shared.call.get()
    }

    /// Stop waiting. No native call when idle.
    pub fn cancel(&mut self) -> Result<()> {
        let call = self.shared.call.get();
        if !call.is_valid() {
            return Ok(());
        }
        self.boundary
            .unregister_call_result(self.record_address(), call)?;
        self.shared.call.set(ApiCall::INVALID);
        log::debug!("[oneshot] {} cancelled {}", T::TYPE_NAME, call);
        Ok(())
    }

    /// Route the result through the game-server pipe.
    pub fn set_game_server_flag(&mut self) {
        self.binding.set_game_server_flag();
    }

    /// Address handed to the native library.
    pub fn record_address(&self) -> RecordAddress {
        self.binding.record()
    }

    pub fn identity(&self) -> Identity {
        self.shared.identity
    }

    pub fn abi(&self) -> AbiConfig {
        self.binding.abi()
    }

    /// Current record flags as seen by the native library.
    pub fn record_flags(&self) -> u8 {
        self.binding.flags()
    }

    /// Cancel and free, reporting a native unregistration failure.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let result = self.cancel();
        // SAFETY: guarded by `released`; the binding is not touched again.
        unsafe { release_binding(&mut self.binding, &self.shared, result.is_ok()) };
        result
    }
}

impl<T: Payload> Drop for OneShotDispatcher<T> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            log::error!("[oneshot] {} teardown failed: {}", T::TYPE_NAME, err);
        }
    }
}

impl<T: Payload> std::fmt::Debug for OneShotDispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneShotDispatcher")
            .field("payload", &T::TYPE_NAME)
            .field("identity", &self.shared.identity)
            .field("call", &self.shared.call.get())
            .finish()
    }
}
