// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process stand-in for the native library.
//!
//! Keeps the registrations the native side would keep, logs every boundary
//! call in order, and delivers payloads by calling through the registered
//! dispatch tables exactly as a native pump would: size query first, then
//! the runner slot selected by the configured [`AbiConfig`].
//!
//! Only addresses that are currently registered are ever called through,
//! which keeps delivery sound under the boundary contract (a record stays
//! valid until its unregistration returns). Completions taken off the
//! pending list stay in flight until their record is run, and unregistering
//! one drops it from the delivery in progress.

use std::cell::RefCell;
use std::collections::HashMap;
use std::os::raw::c_void;

use super::{ApiCall, NativeBoundary, NativeCall};
use crate::abi::{invoke, AbiConfig};
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::record::{RecordAddress, RegistrationRecord};

/// One call received through the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryCall {
    RegisterCallback {
        record: RecordAddress,
        identity: Identity,
    },
    UnregisterCallback {
        record: RecordAddress,
    },
    RegisterCallResult {
        record: RecordAddress,
        call: ApiCall,
    },
    UnregisterCallResult {
        record: RecordAddress,
        call: ApiCall,
    },
}

impl BoundaryCall {
    pub fn kind(&self) -> NativeCall {
        match self {
            BoundaryCall::RegisterCallback { .. } => NativeCall::RegisterCallback,
            BoundaryCall::UnregisterCallback { .. } => NativeCall::UnregisterCallback,
            BoundaryCall::RegisterCallResult { .. } => NativeCall::RegisterCallResult,
            BoundaryCall::UnregisterCallResult { .. } => NativeCall::UnregisterCallResult,
        }
    }

    pub fn record(&self) -> RecordAddress {
        match *self {
            BoundaryCall::RegisterCallback { record, .. }
            | BoundaryCall::UnregisterCallback { record }
            | BoundaryCall::RegisterCallResult { record, .. }
            | BoundaryCall::UnregisterCallResult { record, .. } => record,
        }
    }
}

#[derive(Debug, Default)]
struct LoopbackState {
    calls: Vec<BoundaryCall>,
    callbacks: Vec<(RecordAddress, Identity)>,
    call_results: Vec<(ApiCall, RecordAddress)>,
    in_flight: Vec<(ApiCall, RecordAddress)>,
    failures: HashMap<NativeCall, String>,
}

impl LoopbackState {
    fn check_failure(&mut self, kind: NativeCall) -> Result<()> {
        match self.failures.remove(&kind) {
            Some(reason) => {
                log::debug!("[loopback] injected {} failure: {}", kind, reason);
                Err(Error::native(kind, reason))
            }
            None => Ok(()),
        }
    }

    fn drop_in_flight(&mut self, keep: impl Fn(&(ApiCall, RecordAddress)) -> bool) -> bool {
        let before = self.in_flight.len();
        self.in_flight.retain(keep);
        self.in_flight.len() != before
    }
}

/// Simulated native library.
///
/// ```ignore
/// let native = Rc::new(LoopbackBoundary::host());
/// let mut ping = PersistentDispatcher::<Ping>::create(native.clone(), &table, |p| { .. })?;
/// native.deliver(Identity::new(42), &bytes);
/// ```
#[derive(Debug)]
pub struct LoopbackBoundary {
    abi: AbiConfig,
    state: RefCell<LoopbackState>,
}

impl Default for LoopbackBoundary {
    fn default() -> Self {
        Self::host()
    }
}

impl LoopbackBoundary {
    /// Deliver through tables laid out as `abi`.
    ///
    /// Must match the configuration the dispatchers were built with.
    pub fn new(abi: AbiConfig) -> Self {
        Self {
            abi,
            state: RefCell::new(LoopbackState::default()),
        }
    }

    /// Deliver through tables laid out as [`AbiConfig::HOST`].
    pub fn host() -> Self {
        Self::new(AbiConfig::HOST)
    }

    pub fn abi(&self) -> AbiConfig {
        self.abi
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Every boundary call received so far, in order.
    pub fn calls(&self) -> Vec<BoundaryCall> {
        self.state.borrow().calls.clone()
    }

    /// Number of received calls of `kind`.
    pub fn count(&self, kind: NativeCall) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|call| call.kind() == kind)
            .count()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    /// Make the next call of `kind` fail with `reason`.
    pub fn fail_next(&self, kind: NativeCall, reason: impl Into<String>) {
        self.state.borrow_mut().failures.insert(kind, reason.into());
    }

    pub fn is_callback_registered(&self, record: RecordAddress) -> bool {
        self.state
            .borrow()
            .callbacks
            .iter()
            .any(|(registered, _)| *registered == record)
    }

    /// Current callback registrations, in registration order.
    pub fn registered_callbacks(&self) -> Vec<(RecordAddress, Identity)> {
        self.state.borrow().callbacks.clone()
    }

    /// Call results awaiting completion, in registration order.
    pub fn pending_call_results(&self) -> Vec<(ApiCall, RecordAddress)> {
        self.state.borrow().call_results.clone()
    }

    fn is_registered(&self, record: RecordAddress) -> bool {
        let state = self.state.borrow();
        state.callbacks.iter().any(|(r, _)| *r == record)
            || state.call_results.iter().any(|(_, r)| *r == record)
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Deliver a callback to every client-side record registered for `identity`.
    ///
    /// Returns the number of records the payload reached.
    pub fn deliver(&self, identity: Identity, bytes: &[u8]) -> usize {
        self.deliver_to(identity, bytes, false)
    }

    /// Deliver a callback to every game-server record registered for `identity`.
    pub fn deliver_game_server(&self, identity: Identity, bytes: &[u8]) -> usize {
        self.deliver_to(identity, bytes, true)
    }

    fn deliver_to(&self, identity: Identity, bytes: &[u8], game_server: bool) -> usize {
        // Snapshot first: handlers may register or unregister while we deliver.
        let targets: Vec<RecordAddress> = {
            let state = self.state.borrow();
            state
                .callbacks
                .iter()
                .filter(|(record, registered)| {
                    // SAFETY: registered records are alive.
                    let flags = unsafe { record.flags() };
                    let server = flags & RegistrationRecord::FLAG_GAME_SERVER != 0;
                    *registered == identity && server == game_server
                })
                .map(|(record, _)| *record)
                .collect()
        };

        let mut delivered = 0;
        for record in targets {
            if !self.is_callback_registered(record) {
                log::trace!("[loopback] {} unregistered during delivery", record);
                continue;
            }
            if !self.size_matches(record, bytes.len()) {
                continue;
            }
            // SAFETY: record is registered, bytes match its payload size.
            unsafe { invoke::run_callback(self.abi, record, payload_ptr(bytes)) };
            delivered += 1;
        }
        log::trace!(
            "[loopback] identity {} delivered to {} record(s)",
            identity,
            delivered
        );
        delivered
    }

    /// Complete `call`: drop its registrations, then run their call-result slot.
    ///
    /// Returns the number of records the completion reached.
    pub fn complete_call(&self, call: ApiCall, bytes: &[u8], failed: bool) -> usize {
        let targets = self.take_call_results(call);
        let mut delivered = 0;
        for record in targets {
            if !self.claim_in_flight(call, record) || !self.size_matches(record, bytes.len()) {
                continue;
            }
            // SAFETY: still in flight, so the owner has not unregistered it;
            // bytes match its payload size.
            unsafe {
                invoke::run_call_result(self.abi, record, payload_ptr(bytes), failed, call.raw())
            };
            delivered += 1;
        }
        delivered
    }

    /// Complete `call` through the generic callback slot instead.
    ///
    /// The native library does this when it delivers a result without a
    /// correlated completion.
    pub fn complete_call_as_callback(&self, call: ApiCall, bytes: &[u8]) -> usize {
        let targets = self.take_call_results(call);
        let mut delivered = 0;
        for record in targets {
            if !self.claim_in_flight(call, record) || !self.size_matches(record, bytes.len()) {
                continue;
            }
            // SAFETY: as in complete_call.
            unsafe { invoke::run_callback(self.abi, record, payload_ptr(bytes)) };
            delivered += 1;
        }
        delivered
    }

    /// Run the call-result slot of a registered record with an arbitrary handle.
    ///
    /// Registrations are left untouched. Returns `false` if `record` is not
    /// registered or the payload size does not match.
    pub fn invoke_call_result(
        &self,
        record: RecordAddress,
        call: ApiCall,
        bytes: &[u8],
        failed: bool,
    ) -> bool {
        if !self.is_registered(record) {
            log::warn!("[loopback] {} is not registered", record);
            return false;
        }
        if !self.size_matches(record, bytes.len()) {
            return false;
        }
        // SAFETY: record is registered, bytes match its payload size.
        unsafe {
            invoke::run_call_result(self.abi, record, payload_ptr(bytes), failed, call.raw())
        };
        true
    }

    /// Ask a registered record for its payload size.
    pub fn query_size(&self, record: RecordAddress) -> Option<i32> {
        if !self.is_registered(record) {
            return None;
        }
        // SAFETY: record is registered.
        Some(unsafe { invoke::callback_size_bytes(self.abi, record) })
    }

    fn take_call_results(&self, call: ApiCall) -> Vec<RecordAddress> {
        let targets: Vec<RecordAddress> = {
            let mut state = self.state.borrow_mut();
            let mut taken = Vec::new();
            state.call_results.retain(|(pending, record)| {
                if *pending == call {
                    taken.push(*record);
                    false
                } else {
                    true
                }
            });
            state
                .in_flight
                .extend(taken.iter().map(|record| (call, *record)));
            taken
        };
        for record in &targets {
            // SAFETY: the owner only frees a record after unregistering it.
            unsafe { record.update_flags(0, RegistrationRecord::FLAG_REGISTERED) };
        }
        if targets.is_empty() {
            log::debug!("[loopback] no registration for call {}", call);
        }
        targets
    }

    /// Take `record` off the in-flight list; false if it was unregistered
    /// while an earlier record of the same completion ran.
    fn claim_in_flight(&self, call: ApiCall, record: RecordAddress) -> bool {
        let mut state = self.state.borrow_mut();
        let Some(index) = state
            .in_flight
            .iter()
            .position(|entry| *entry == (call, record))
        else {
            log::trace!("[loopback] {} unregistered during completion of {}", record, call);
            return false;
        };
        state.in_flight.remove(index);
        true
    }

    fn size_matches(&self, record: RecordAddress, len: usize) -> bool {
        // SAFETY: callers only pass registered (live) records.
        let size = unsafe { invoke::callback_size_bytes(self.abi, record) };
        if usize::try_from(size).ok() == Some(len) {
            true
        } else {
            log::warn!(
                "[loopback] {} expects {} payload bytes, got {}",
                record,
                size,
                len
            );
            false
        }
    }
}

fn payload_ptr(bytes: &[u8]) -> *mut c_void {
    bytes.as_ptr().cast::<c_void>().cast_mut()
}

impl NativeBoundary for LoopbackBoundary {
    fn register_callback(&self, record: RecordAddress, identity: Identity) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state
            .calls
            .push(BoundaryCall::RegisterCallback { record, identity });
        state.check_failure(NativeCall::RegisterCallback)?;

        if !state.callbacks.iter().any(|(r, _)| *r == record) {
            state.callbacks.push((record, identity));
        }
        // SAFETY: the caller keeps the record alive while registered.
        unsafe { record.update_flags(RegistrationRecord::FLAG_REGISTERED, 0) };
        log::debug!(
            "[loopback] register_callback {} identity {}",
            record,
            identity
        );
        Ok(())
    }

    fn unregister_callback(&self, record: RecordAddress) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(BoundaryCall::UnregisterCallback { record });
        state.check_failure(NativeCall::UnregisterCallback)?;

        let in_flight = state.drop_in_flight(|(_, r)| *r != record);
        let before = state.callbacks.len();
        state.callbacks.retain(|(r, _)| *r != record);
        if state.callbacks.len() == before {
            if in_flight {
                log::debug!("[loopback] unregister_callback {}: dropped in flight", record);
                return Ok(());
            }
            log::debug!("[loopback] unregister_callback {}: not registered", record);
            return Ok(());
        }
        // SAFETY: still valid until this call returns.
        unsafe { record.update_flags(0, RegistrationRecord::FLAG_REGISTERED) };
        log::debug!("[loopback] unregister_callback {}", record);
        Ok(())
    }

    fn register_call_result(&self, record: RecordAddress, call: ApiCall) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state
            .calls
            .push(BoundaryCall::RegisterCallResult { record, call });
        state.check_failure(NativeCall::RegisterCallResult)?;

        state.call_results.push((call, record));
        // SAFETY: the caller keeps the record alive while registered.
        unsafe { record.update_flags(RegistrationRecord::FLAG_REGISTERED, 0) };
        log::debug!("[loopback] register_call_result {} call {}", record, call);
        Ok(())
    }

    fn unregister_call_result(&self, record: RecordAddress, call: ApiCall) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state
            .calls
            .push(BoundaryCall::UnregisterCallResult { record, call });
        state.check_failure(NativeCall::UnregisterCallResult)?;

        let before = state.call_results.len();
        state
            .call_results
            .retain(|(pending, r)| !(*pending == call && *r == record));
        if state.call_results.len() == before {
            if state.drop_in_flight(|entry| *entry != (call, record)) {
                log::debug!(
                    "[loopback] unregister_call_result {} call {}: dropped in flight",
                    record,
                    call
                );
                return Ok(());
            }
            log::debug!(
                "[loopback] unregister_call_result {} call {}: not pending",
                record,
                call
            );
            return Ok(());
        }
        // SAFETY: still valid until this call returns.
        unsafe { record.update_flags(0, RegistrationRecord::FLAG_REGISTERED) };
        log::debug!("[loopback] unregister_call_result {} call {}", record, call);
        Ok(())
    }
}
