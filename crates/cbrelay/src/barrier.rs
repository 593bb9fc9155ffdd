// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Exception barrier between user handlers and the native call frame.
//!
//! A panic unwinding out of an entry point would cross a C++ frame that
//! cannot unwind it, so every decode step and handler call runs under
//! [`shield`]. Caught panics are turned into a [`HandlerFailure`] and handed
//! to an [`ExceptionBarrier`] policy; the entry point then returns normally.
//!
//! The policy is resolved per dispatch: a dispatcher-specific barrier set
//! through [`DispatcherOptions::barrier`](crate::DispatcherOptions::barrier)
//! wins, otherwise the process-wide barrier is used. The process barrier
//! defaults to [`LogBarrier`] and can be swapped at any time with
//! [`set_process_barrier`].

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;

use crate::identity::Identity;

/// Entry point during which a handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchSite {
    /// Generic callback delivery.
    RunCallback,
    /// Correlated call-result delivery.
    RunCallResult,
}

/// A panic absorbed at the barrier.
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    pub payload_type: &'static str,
    pub identity: Identity,
    pub site: DispatchSite,
    pub message: String,
}

impl std::fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "handler for {} (identity {}) panicked in {:?}: {}",
            self.payload_type, self.identity, self.site, self.message
        )
    }
}

/// Policy receiving panics caught inside handlers.
pub trait ExceptionBarrier: Send + Sync {
    /// Report `failure`. Must not assume it runs outside the native pump.
    fn absorb(&self, failure: &HandlerFailure);
}

/// Default policy: report through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogBarrier;

impl ExceptionBarrier for LogBarrier {
    fn absorb(&self, failure: &HandlerFailure) {
        log::error!("[barrier] {}", failure);
    }
}

fn process_slot() -> &'static ArcSwap<Arc<dyn ExceptionBarrier>> {
    static SLOT: OnceLock<ArcSwap<Arc<dyn ExceptionBarrier>>> = OnceLock::new();
    SLOT.get_or_init(|| {
        let default: Arc<dyn ExceptionBarrier> = Arc::new(LogBarrier);
        ArcSwap::from_pointee(default)
    })
}

/// Current process-wide barrier.
pub fn process_barrier() -> Arc<dyn ExceptionBarrier> {
    let guard = process_slot().load();
    Arc::clone(&**guard)
}

/// Replace the process-wide barrier.
///
/// Affects every dispatcher without its own barrier, including ones
/// already registered.
pub fn set_process_barrier(barrier: Arc<dyn ExceptionBarrier>) {
    process_slot().store(Arc::new(barrier));
}

/// Restore the default [`LogBarrier`].
pub fn reset_process_barrier() {
    set_process_barrier(Arc::new(LogBarrier));
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// What a shielded dispatch is delivering, for failure reports.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DispatchContext {
    pub(crate) payload_type: &'static str,
    pub(crate) identity: Identity,
    pub(crate) site: DispatchSite,
}

/// Run `f`, absorbing any panic into `barrier` (or the process barrier).
///
/// Returns `None` if `f` panicked.
pub(crate) fn shield<R>(
    barrier: Option<&Arc<dyn ExceptionBarrier>>,
    ctx: DispatchContext,
    f: impl FnOnce() -> R,
) -> Option<R> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            let failure = HandlerFailure {
                payload_type: ctx.payload_type,
                identity: ctx.identity,
                site: ctx.site,
                message: panic_message(payload.as_ref()),
            };
            let policy = barrier.cloned().unwrap_or_else(process_barrier);
            if catch_unwind(AssertUnwindSafe(|| policy.absorb(&failure))).is_err() {
                log::error!("[barrier] exception barrier panicked while reporting: {}", failure);
            }
            None
        }
    }
}
