// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Address-stable registration records.
//!
//! The native library keeps the raw address of every registered object and
//! calls through it until it is unregistered. The object it sees is a
//! [`RegistrationRecord`] laid out like the C++ callback base class:
//!
//! ```text
//! offset 0   vtable pointer  -> DispatchTable
//!            flags: u8       (REGISTERED set by native, GAME_SERVER by us)
//!            identity: i32
//! ```
//!
//! Each record is the first field of an [`Anchor`], a heap allocation that
//! also carries the type-erased route back into the owning dispatcher. The
//! allocation is made once per dispatcher and never moves.

use std::os::raw::{c_int, c_void};
use std::ptr::NonNull;

use crate::abi::DispatchTable;
use crate::boundary::ApiCall;
use crate::identity::Identity;

/// Native view of a registered callback object.
#[repr(C)]
#[derive(Debug)]
pub struct RegistrationRecord {
    vtable: *const DispatchTable,
    flags: u8,
    identity: c_int,
}

impl RegistrationRecord {
    /// Set by the native library while the record is registered.
    pub const FLAG_REGISTERED: u8 = 0x01;
    /// Route to the game-server callback pipe instead of the client pipe.
    pub const FLAG_GAME_SERVER: u8 = 0x02;

    pub(crate) fn new(identity: Identity) -> Self {
        Self {
            vtable: std::ptr::null(),
            flags: 0,
            identity: identity.raw(),
        }
    }

    pub fn dispatch_table(&self) -> *const DispatchTable {
        self.vtable
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn identity(&self) -> Identity {
        Identity::new(self.identity)
    }

    pub fn is_game_server(&self) -> bool {
        self.flags & Self::FLAG_GAME_SERVER != 0
    }
}

/// Raw address of a registration record, as handed to the native library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordAddress(NonNull<RegistrationRecord>);

impl RecordAddress {
    pub(crate) fn new(ptr: NonNull<RegistrationRecord>) -> Self {
        Self(ptr)
    }

    pub fn as_ptr(self) -> *mut RegistrationRecord {
        self.0.as_ptr()
    }

    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    /// Read the record flags.
    ///
    /// # Safety
    ///
    /// The owning dispatcher must still be alive.
    pub unsafe fn flags(self) -> u8 {
        (*self.as_ptr()).flags
    }

    /// Set or clear flag bits, as the native library does on registration.
    ///
    /// # Safety
    ///
    /// The owning dispatcher must still be alive.
    pub unsafe fn update_flags(self, set: u8, clear: u8) {
        let flags = std::ptr::addr_of_mut!((*self.as_ptr()).flags);
        *flags = (*flags | set) & !clear;
    }
}

impl std::fmt::Display for RecordAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.addr())
    }
}

/// Heap allocation with a fixed address, released on drop.
///
/// Holds the allocation as a raw pointer so that the native side and the
/// dispatch path can keep aliasing it while the owner moves around.
pub(crate) struct StableBox<T> {
    ptr: NonNull<T>,
}

impl<T> StableBox<T> {
    pub(crate) fn new(value: T) -> Self {
        let raw = Box::into_raw(Box::new(value));
        // SAFETY: Box::into_raw never returns null.
        Self {
            ptr: unsafe { NonNull::new_unchecked(raw) },
        }
    }

    pub(crate) fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// Give up ownership without freeing; the address stays valid forever.
    pub(crate) fn leak(self) -> NonNull<T> {
        let ptr = self.ptr;
        std::mem::forget(self);
        ptr
    }
}

impl<T> Drop for StableBox<T> {
    fn drop(&mut self) {
        // SAFETY: ptr came from Box::into_raw and is released exactly once.
        unsafe { drop(Box::from_raw(self.ptr.as_ptr())) }
    }
}

/// Type-erased runner installed by a dispatcher.
pub(crate) type RunCallbackHook = unsafe fn(target: *const (), param: *const u8);
/// Type-erased call-result runner installed by a dispatcher.
pub(crate) type RunCallResultHook =
    unsafe fn(target: *const (), param: *const u8, failed: bool, call: ApiCall);

/// Record plus the route back into its dispatcher.
///
/// `record` must stay the first field: receiver-first entry points get the
/// record address and cast it back to the anchor.
#[repr(C)]
pub(crate) struct Anchor {
    pub(crate) record: RegistrationRecord,
    target: *const (),
    run_callback: RunCallbackHook,
    run_call_result: RunCallResultHook,
    payload_size: c_int,
}

impl Anchor {
    pub(crate) fn new(
        identity: Identity,
        payload_size: c_int,
        target: *const (),
        run_callback: RunCallbackHook,
        run_call_result: RunCallResultHook,
    ) -> Self {
        Self {
            record: RegistrationRecord::new(identity),
            target,
            run_callback,
            run_call_result,
            payload_size,
        }
    }

    /// # Safety
    ///
    /// `anchor` must point at a live anchor.
    pub(crate) unsafe fn set_dispatch_table(anchor: *mut Anchor, table: *const DispatchTable) {
        std::ptr::addr_of_mut!((*anchor).record.vtable).write(table);
    }

    /// # Safety
    ///
    /// `anchor` must point at a live anchor.
    pub(crate) unsafe fn run_callback(anchor: *const Anchor, param: *mut c_void) {
        let (target, hook) = ((*anchor).target, (*anchor).run_callback);
        hook(target, param.cast::<u8>());
    }

    /// # Safety
    ///
    /// `anchor` must point at a live anchor.
    pub(crate) unsafe fn run_call_result(
        anchor: *const Anchor,
        param: *mut c_void,
        failed: bool,
        call: u64,
    ) {
        let (target, hook) = ((*anchor).target, (*anchor).run_call_result);
        hook(target, param.cast::<u8>(), failed, ApiCall::new(call));
    }

    /// # Safety
    ///
    /// `anchor` must point at a live anchor.
    pub(crate) unsafe fn payload_size(anchor: *const Anchor) -> c_int {
        (*anchor).payload_size
    }
}
