// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Long-lived callback registration.
//!
//! ```text
//!               register(h)                 register(h') = unregister + register
//! Unregistered ------------> Registered ----------------------------------+
//!      ^                        |  ^                                      |
//!      +------ unregister() ----+  +--------------------------------------+
//! ```

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

/// Handler receiving each delivered payload.
pub type CallbackHandler<T> = Box<dyn FnMut(T)>;

struct Shared<T: Payload> {
    identity: Identity,
    barrier: Option<Arc<dyn ExceptionBarrier>>,
    handler: HandlerSlot<dyn FnMut(T)>,
}

impl<T: Payload> Shared<T> {
    /// # Safety
    ///
    /// A non-null `param` must point at `T::SIZE` readable bytes.
    unsafe fn dispatch(&self, param: *const u8, site: DispatchSite) {
        let Some(bytes) = payload_bytes::<T>(param) else {
            return;
        };
        let Some(mut handler) = self.handler.take() else {
            log::debug!("[persistent] {} delivered without handler", T::TYPE_NAME);
            return;
        };
        let ctx = DispatchContext {
            payload_type: T::TYPE_NAME,
            identity: self.identity,
            site,
        };
        shield(self.barrier.as_ref(), ctx, || handler(T::decode(bytes)));
        self.handler.restore(handler);
    }
}

unsafe fn run_callback_hook<T: Payload>(target: *const (), param: *const u8) {
    let shared = retain::<Shared<T>>(target);
    shared.dispatch(param, DispatchSite::RunCallback);
}

// Not expected from the native side; treated as a plain callback.
unsafe fn run_call_result_hook<T: Payload>(
    target: *const (),
    param: *const u8,
    _failed: bool,
    _call: ApiCall,
) {
    let shared = retain::<Shared<T>>(target);
    shared.dispatch(param, DispatchSite::RunCallResult);
}

/// Repeated callbacks of payload type `T`.
///
/// Neither `Send` nor `Sync`: every call, including delivery, happens on the
/// thread that drives the native pump.
pub struct PersistentDispatcher<T: Payload> {
    boundary: Rc<dyn NativeBoundary>,
    shared: Rc<Shared<T>>,
    binding: ManuallyDrop<Binding>,
    game_server: bool,
    registered: bool,
    released: bool,
}

impl<T: Payload> PersistentDispatcher<T> {
    /// Build an unregistered dispatcher.
    pub fn new(
        boundary: Rc<dyn NativeBoundary>,
        resolver: &dyn IdentityResolver,
        options: DispatcherOptions,
    ) -> Result<Self> {
        let identity = resolver.identity_of(PayloadType::of::<T>())?;
        let shared = Rc::new(Shared {
            identity,
            barrier: options.barrier,
            handler: HandlerSlot::new(None),
        });
        let binding = Binding::new(
            options.abi,
            identity,
            T::SIZE,
            Rc::as_ptr(&shared).cast::<()>(),
            run_callback_hook::<T>,
            run_call_result_hook::<T>,
        )?;

        let dispatcher = Self {
            boundary,
            shared,
            binding: ManuallyDrop::new(binding),
            game_server: options.game_server,
            registered: false,
            released: false,
        };
        if dispatcher.game_server {
            dispatcher.binding.set_game_server_flag();
        }
        log::trace!(
            "[persistent] {} bound at {} ({})",
            T::TYPE_NAME,
            dispatcher.record_address(),
            options.abi
        );
        Ok(dispatcher)
    }

    /// Build and register `handler` on the client pipe.
    pub fn create<F>(
        boundary: Rc<dyn NativeBoundary>,
        resolver: &dyn IdentityResolver,
        handler: F,
    ) -> Result<Self>
    where
        F: FnMut(T) + 'static,
    {
        let mut dispatcher = Self::new(boundary, resolver, DispatcherOptions::default())?;
        dispatcher.register(handler)?;
        Ok(dispatcher)
    }

    /// Build and register `handler` on the game-server pipe.
    pub fn create_game_server<F>(
        boundary: Rc<dyn NativeBoundary>,
        resolver: &dyn IdentityResolver,
        handler: F,
    ) -> Result<Self>
    where
        F: FnMut(T) + 'static,
    {
        let options = DispatcherOptions::default().game_server(true);
        let mut dispatcher = Self::new(boundary, resolver, options)?;
        dispatcher.register(handler)?;
        Ok(dispatcher)
    }

    /// Register `handler`, replacing any current registration.
    pub fn register<F>(&mut self, handler: F) -> Result<()>
    where
        F: FnMut(T) + 'static,
    {
        self.register_handler(Some(Box::new(handler)))
    }

    /// Register `handler`, replacing any current registration.
    ///
    /// On native failure the previous handler and registration are restored.
    pub fn register_handler(&mut self, handler: Option<CallbackHandler<T>>) -> Result<()> {
        let handler = handler.ok_or(Error::MissingHandler)?;

        let was_registered = self.registered;
        if was_registered {
            self.unregister()?;
        }
        if self.game_server {
            self.binding.set_game_server_flag();
        }

        let previous = self.shared.handler.replace(Some(handler));
        let record = self.record_address();
        match self.boundary.register_callback(record, self.identity()) {
            Ok(()) => {
                self.registered = true;
                log::debug!(
                    "[persistent] {} registered at {} identity {}",
                    T::TYPE_NAME,
                    record,
                    self.identity()
                );
                Ok(())
            }
            Err(err) => {
                log::warn!("[persistent] {} registration failed: {}", T::TYPE_NAME, err);
                self.shared.handler.replace(previous);
                if was_registered {
                    match self.boundary.register_callback(record, self.identity()) {
                        Ok(()) => self.registered = true,
                        Err(restore) => log::error!(
                            "[persistent] {} could not restore previous registration: {}",
                            T::TYPE_NAME,
                            restore
                        ),
                    }
                }
                Err(err)
            }
        }
    }

    /// Stop receiving callbacks. No native call when already unregistered.
    pub fn unregister(&mut self) -> Result<()> {
        if !self.registered {
            return Ok(());
        }
        self.boundary.unregister_callback(self.record_address())?;
        self.registered = false;
        log::debug!(
            "[persistent] {} unregistered from {}",
            T::TYPE_NAME,
            self.record_address()
        );
        Ok(())
    }

    /// Route future registrations to the game-server pipe.
    pub fn set_game_server_flag(&mut self) {
        self.game_server = true;
        self.binding.set_game_server_flag();
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn is_game_server(&self) -> bool {
        self.game_server
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

    /// Unregister and free, reporting a native unregistration failure.
    ///
    /// On failure the record is leaked so the native side never sees a
    /// dangling address.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let result = self.unregister();
        log::trace!("[persistent] {} released ({:?})", T::TYPE_NAME, result.is_ok());
        // SAFETY: guarded by `released`; the binding is not touched again.
        unsafe { release_binding(&mut self.binding, &self.shared, result.is_ok()) };
        result
    }
}

impl<T: Payload> Drop for PersistentDispatcher<T> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            log::error!("[persistent] {} teardown failed: {}", T::TYPE_NAME, err);
        }
    }
}

impl<T: Payload> std::fmt::Debug for PersistentDispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("PersistentDispatcher");
        s.field("payload", &T::TYPE_NAME)
            .field("identity", &self.shared.identity)
            .field("registered", &self.registered)
            .field("game_server", &self.game_server);
        if !self.released {
            s.field("record", &self.binding.record());
        }
        s.finish()
    }
}
