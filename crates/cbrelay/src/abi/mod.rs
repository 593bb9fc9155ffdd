// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hand-assembled native dispatch tables.
//!
//! The native library calls registered objects through a C++ virtual table
//! with three entries: run a callback, run a call result, report the payload
//! size. Its exact shape depends on the compiler that built the library:
//!
//! ```text
//!              CompletionFirst (MSVC)      CallbackFirst (Itanium)
//! slot 0       run_call_result             run_callback
//! slot 1       run_callback                run_call_result
//! slot 2       get_callback_size_bytes     get_callback_size_bytes
//! ```
//!
//! Independently, entry points either receive the object address as a
//! leading argument ([`Receiver::First`]) or receive only the payload
//! ([`Receiver::Omitted`]). Both axes are fixed by [`AbiConfig`] when a
//! dispatcher is built; nothing is probed at runtime.

pub(crate) mod entry;
pub mod invoke;

pub use entry::RECEIVER_OMITTED_SLOTS;

use std::os::raw::c_void;

/// Whether entry points receive the object address before their arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Receiver {
    /// `fn(this, ...)` (`thiscall` on 32-bit Windows, `C` elsewhere).
    First,
    /// `fn(...)` with no receiver (`stdcall` on 32-bit Windows).
    Omitted,
}

/// Order of the two runner slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotOrder {
    /// `run_call_result` precedes `run_callback` (MSVC overload ordering).
    CompletionFirst,
    /// `run_callback` precedes `run_call_result` (declaration order).
    CallbackFirst,
}

/// One of the three dispatch table entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    RunCallback,
    RunCallResult,
    GetSize,
}

impl Slot {
    pub fn name(self) -> &'static str {
        match self {
            Slot::RunCallback => "run_callback",
            Slot::RunCallResult => "run_call_result",
            Slot::GetSize => "get_callback_size_bytes",
        }
    }
}

/// Dispatch table layout selected at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AbiConfig {
    pub receiver: Receiver,
    pub slot_order: SlotOrder,
}

impl AbiConfig {
    /// Layout for the current compilation target and Cargo features.
    pub const HOST: AbiConfig = AbiConfig {
        receiver: if cfg!(feature = "receiver-omitted") {
            Receiver::Omitted
        } else {
            Receiver::First
        },
        slot_order: if cfg!(feature = "slots-completion-first") {
            SlotOrder::CompletionFirst
        } else if cfg!(feature = "slots-callback-first") {
            SlotOrder::CallbackFirst
        } else if cfg!(windows) {
            SlotOrder::CompletionFirst
        } else {
            SlotOrder::CallbackFirst
        },
    };

    /// Every legal layout.
    pub const ALL: [AbiConfig; 4] = [
        AbiConfig::new(Receiver::First, SlotOrder::CompletionFirst),
        AbiConfig::new(Receiver::First, SlotOrder::CallbackFirst),
        AbiConfig::new(Receiver::Omitted, SlotOrder::CompletionFirst),
        AbiConfig::new(Receiver::Omitted, SlotOrder::CallbackFirst),
    ];

    pub const fn new(receiver: Receiver, slot_order: SlotOrder) -> Self {
        Self {
            receiver,
            slot_order,
        }
    }

    /// Slot kinds in table order.
    pub const fn layout(self) -> [Slot; DispatchTable::SLOTS] {
        match self.slot_order {
            SlotOrder::CompletionFirst => [Slot::RunCallResult, Slot::RunCallback, Slot::GetSize],
            SlotOrder::CallbackFirst => [Slot::RunCallback, Slot::RunCallResult, Slot::GetSize],
        }
    }

    /// Table index of `slot`.
    pub const fn index_of(self, slot: Slot) -> usize {
        match (slot, self.slot_order) {
            (Slot::GetSize, _) => 2,
            (Slot::RunCallResult, SlotOrder::CompletionFirst)
            | (Slot::RunCallback, SlotOrder::CallbackFirst) => 0,
            _ => 1,
        }
    }
}

impl Default for AbiConfig {
    fn default() -> Self {
        Self::HOST
    }
}

impl std::fmt::Display for AbiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let receiver = match self.receiver {
            Receiver::First => "receiver-first",
            Receiver::Omitted => "receiver-omitted",
        };
        let order = match self.slot_order {
            SlotOrder::CompletionFirst => "completion-first",
            SlotOrder::CallbackFirst => "callback-first",
        };
        write!(f, "{}/{}", receiver, order)
    }
}

/// Addresses of a dispatcher's three entry points.
#[derive(Debug, Clone, Copy)]
pub struct EntryPoints {
    pub run_callback: *const c_void,
    pub run_call_result: *const c_void,
    pub get_size: *const c_void,
}

impl EntryPoints {
    fn address(&self, slot: Slot) -> *const c_void {
        match slot {
            Slot::RunCallback => self.run_callback,
            Slot::RunCallResult => self.run_call_result,
            Slot::GetSize => self.get_size,
        }
    }
}

/// Native virtual table: exactly three machine addresses.
///
/// Written once by [`DispatchTable::build`] and never mutated. The owning
/// dispatcher keeps it at a fixed heap address for as long as any
/// registration record points at it.
#[repr(C)]
#[derive(Debug)]
pub struct DispatchTable {
    slots: [*const c_void; DispatchTable::SLOTS],
}

impl DispatchTable {
    pub const SLOTS: usize = 3;

    /// Lay out `entry` in the order `config` prescribes.
    pub fn build(entry: &EntryPoints, config: AbiConfig) -> Self {
        let layout = config.layout();
        Self {
            slots: [
                entry.address(layout[0]),
                entry.address(layout[1]),
                entry.address(layout[2]),
            ],
        }
    }

    /// Raw slot contents in table order.
    pub fn slots(&self) -> &[*const c_void; DispatchTable::SLOTS] {
        &self.slots
    }

    /// Address stored for `slot` under `config`.
    pub fn entry(&self, config: AbiConfig, slot: Slot) -> *const c_void {
        self.slots[config.index_of(slot)]
    }
}
