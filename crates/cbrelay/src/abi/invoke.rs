// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Native-side calls through a registered dispatch table.
//!
//! These do what the native library does during its pump: load the vtable
//! pointer from the record, pick the slot for the compiled layout and call
//! it with the matching signature. Simulated boundaries use them to drive
//! dispatchers exactly the way the real library would.

use std::os::raw::c_void;

use super::entry::{
    OmittedGetSizeFn, OmittedRunCallResultFn, OmittedRunCallbackFn, ReceiverGetSizeFn,
    ReceiverRunCallResultFn, ReceiverRunCallbackFn,
};
use super::{AbiConfig, Receiver, Slot};
use crate::record::RecordAddress;

unsafe fn slot_address(record: RecordAddress, config: AbiConfig, slot: Slot) -> *const c_void {
    let table = (*record.as_ptr()).dispatch_table();
    (*table).entry(config, slot)
}

/// Call the `run_callback` slot.
///
/// # Safety
///
/// `record` must belong to a live dispatcher built with `config`, and
/// `param` must point at a payload block of the dispatcher's size.
pub unsafe fn run_callback(config: AbiConfig, record: RecordAddress, param: *mut c_void) {
    let address = slot_address(record, config, Slot::RunCallback);
    match config.receiver {
        Receiver::First => {
            let f: ReceiverRunCallbackFn = std::mem::transmute(address);
            f(record.as_ptr(), param);
        }
        Receiver::Omitted => {
            let f: OmittedRunCallbackFn = std::mem::transmute(address);
            f(param);
        }
    }
}

/// Call the `run_call_result` slot.
///
/// # Safety
///
/// Same contract as [`run_callback`].
pub unsafe fn run_call_result(
    config: AbiConfig,
    record: RecordAddress,
    param: *mut c_void,
    failed: bool,
    call: u64,
) {
    let address = slot_address(record, config, Slot::RunCallResult);
    match config.receiver {
        Receiver::First => {
            let f: ReceiverRunCallResultFn = std::mem::transmute(address);
            f(record.as_ptr(), param, failed, call);
        }
        Receiver::Omitted => {
            let f: OmittedRunCallResultFn = std::mem::transmute(address);
            f(param, failed, call);
        }
    }
}

/// Call the `get_callback_size_bytes` slot.
///
/// # Safety
///
/// `record` must belong to a live dispatcher built with `config`.
pub unsafe fn callback_size_bytes(config: AbiConfig, record: RecordAddress) -> i32 {
    let address = slot_address(record, config, Slot::GetSize);
    match config.receiver {
        Receiver::First => {
            let f: ReceiverGetSizeFn = std::mem::transmute(address);
            f(record.as_ptr())
        }
        Receiver::Omitted => {
            let f: OmittedGetSizeFn = std::mem::transmute(address);
            f()
        }
    }
}
