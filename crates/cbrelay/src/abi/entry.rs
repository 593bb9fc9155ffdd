// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Native entry points referenced from dispatch tables.
//!
//! Receiver-first entry points are shared by every dispatcher: the receiver
//! argument is the record address, which is also the anchor address.
//!
//! Receiver-omitted entry points have nothing to route by, so each
//! dispatcher leases one monomorphised thunk out of a fixed pool. Thunk `N`
//! reads the anchor pointer parked in static slot `N`.

use std::os::raw::{c_int, c_void};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use super::{EntryPoints, Receiver};
use crate::error::{Error, Result};
use crate::record::{Anchor, RegistrationRecord};

/// Number of receiver-omitted dispatchers that can be alive at once.
pub const RECEIVER_OMITTED_SLOTS: usize = 32;

macro_rules! receiver_first_entry_points {
    ($abi:tt) => {
        /// `virtual void Run(void *pvParam)`
        pub type ReceiverRunCallbackFn =
            unsafe extern $abi fn(this: *mut RegistrationRecord, param: *mut c_void);
        /// `virtual void Run(void *pvParam, bool bIOFailure, uint64 hSteamAPICall)`
        pub type ReceiverRunCallResultFn = unsafe extern $abi fn(
            this: *mut RegistrationRecord,
            param: *mut c_void,
            failed: bool,
            call: u64,
        );
        /// `virtual int GetCallbackSizeBytes()`
        pub type ReceiverGetSizeFn = unsafe extern $abi fn(this: *mut RegistrationRecord) -> c_int;

        unsafe extern $abi fn receiver_run_callback(
            this: *mut RegistrationRecord,
            param: *mut c_void,
        ) {
            if this.is_null() {
                log::warn!("[abi] run_callback invoked without receiver");
                return;
            }
            Anchor::run_callback(this.cast::<Anchor>(), param);
        }

        unsafe extern $abi fn receiver_run_call_result(
            this: *mut RegistrationRecord,
            param: *mut c_void,
            failed: bool,
            call: u64,
        ) {
            if this.is_null() {
                log::warn!("[abi] run_call_result invoked without receiver");
                return;
            }
            Anchor::run_call_result(this.cast::<Anchor>(), param, failed, call);
        }

        unsafe extern $abi fn receiver_get_size(this: *mut RegistrationRecord) -> c_int {
            if this.is_null() {
                return 0;
            }
            Anchor::payload_size(this.cast::<Anchor>())
        }
    };
}

// MSVC member functions on x86 pass `this` in ECX.
#[cfg(all(windows, target_arch = "x86"))]
receiver_first_entry_points!("thiscall");
#[cfg(not(all(windows, target_arch = "x86")))]
receiver_first_entry_points!("C");

/// Receiver-omitted `Run(void *pvParam)`.
pub type OmittedRunCallbackFn = unsafe extern "system" fn(param: *mut c_void);
/// Receiver-omitted `Run(void *pvParam, bool bIOFailure, uint64 hSteamAPICall)`.
pub type OmittedRunCallResultFn =
    unsafe extern "system" fn(param: *mut c_void, failed: bool, call: u64);
/// Receiver-omitted `GetCallbackSizeBytes()`.
pub type OmittedGetSizeFn = unsafe extern "system" fn() -> c_int;

static OMITTED_ANCHORS: [AtomicPtr<Anchor>; RECEIVER_OMITTED_SLOTS] =
    [const { AtomicPtr::new(ptr::null_mut()) }; RECEIVER_OMITTED_SLOTS];

fn omitted_anchor(slot: usize) -> *mut Anchor {
    OMITTED_ANCHORS[slot].load(Ordering::Acquire)
}

unsafe extern "system" fn omitted_run_callback<const N: usize>(param: *mut c_void) {
    let anchor = omitted_anchor(N);
    if anchor.is_null() {
        log::warn!("[abi] run_callback on released thunk {}", N);
        return;
    }
    Anchor::run_callback(anchor, param);
}

unsafe extern "system" fn omitted_run_call_result<const N: usize>(
    param: *mut c_void,
    failed: bool,
    call: u64,
) {
    let anchor = omitted_anchor(N);
    if anchor.is_null() {
        log::warn!("[abi] run_call_result on released thunk {}", N);
        return;
    }
    Anchor::run_call_result(anchor, param, failed, call);
}

unsafe extern "system" fn omitted_get_size<const N: usize>() -> c_int {
    let anchor = omitted_anchor(N);
    if anchor.is_null() {
        return 0;
    }
    Anchor::payload_size(anchor)
}

macro_rules! omitted_thunks {
    ($($n:literal)*) => {
        const OMITTED_RUN_CALLBACK: [OmittedRunCallbackFn; RECEIVER_OMITTED_SLOTS] =
            [$(omitted_run_callback::<$n> as OmittedRunCallbackFn),*];
        const OMITTED_RUN_CALL_RESULT: [OmittedRunCallResultFn; RECEIVER_OMITTED_SLOTS] =
            [$(omitted_run_call_result::<$n> as OmittedRunCallResultFn),*];
        const OMITTED_GET_SIZE: [OmittedGetSizeFn; RECEIVER_OMITTED_SLOTS] =
            [$(omitted_get_size::<$n> as OmittedGetSizeFn),*];
    };
}

omitted_thunks!(
    0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15
    16 17 18 19 20 21 22 23 24 25 26 27 28 29 30 31
);

/// Entry points bound to one anchor, plus the thunk lease they hold.
pub(crate) struct BoundEntryPoints {
    pub(crate) entry: EntryPoints,
    pub(crate) lease: Option<ThunkLease>,
}

/// Exclusive use of one receiver-omitted thunk; released on drop.
#[derive(Debug)]
pub(crate) struct ThunkLease {
    slot: usize,
}

impl ThunkLease {
    fn acquire(anchor: *mut Anchor) -> Result<Self> {
        for (slot, cell) in OMITTED_ANCHORS.iter().enumerate() {
            if cell
                .compare_exchange(ptr::null_mut(), anchor, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                log::trace!("[abi] leased receiver-omitted thunk {}", slot);
                return Ok(Self { slot });
            }
        }
        Err(Error::ReceiverSlotsExhausted)
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot
    }
}

impl Drop for ThunkLease {
    fn drop(&mut self) {
        OMITTED_ANCHORS[self.slot].store(ptr::null_mut(), Ordering::Release);
        log::trace!("[abi] released receiver-omitted thunk {}", self.slot);
    }
}

/// Entry point addresses routing to `anchor` under `receiver`.
pub(crate) fn bind(receiver: Receiver, anchor: *mut Anchor) -> Result<BoundEntryPoints> {
    match receiver {
        Receiver::First => Ok(BoundEntryPoints {
            entry: EntryPoints {
                run_callback: receiver_run_callback as ReceiverRunCallbackFn as *const c_void,
                run_call_result: receiver_run_call_result as ReceiverRunCallResultFn
                    as *const c_void,
                get_size: receiver_get_size as ReceiverGetSizeFn as *const c_void,
            },
            lease: None,
        }),
        Receiver::Omitted => {
            let lease = ThunkLease::acquire(anchor)?;
            let slot = lease.slot();
            Ok(BoundEntryPoints {
                entry: EntryPoints {
                    run_callback: OMITTED_RUN_CALLBACK[slot] as *const c_void,
                    run_call_result: OMITTED_RUN_CALL_RESULT[slot] as *const c_void,
                    get_size: OMITTED_GET_SIZE[slot] as *const c_void,
                },
                lease: Some(lease),
            })
        }
    }
}
