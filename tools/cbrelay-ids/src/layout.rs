// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dispatch table layout report.

use std::fmt::Write as _;

use cbrelay::{AbiConfig, Receiver, Slot};

/// Native signature of each slot, as declared by the callback base class.
fn signature(slot: Slot) -> &'static str {
    match slot {
        Slot::RunCallback => "void Run(void *pvParam)",
        Slot::RunCallResult => "void Run(void *pvParam, bool bIOFailure, uint64 hSteamAPICall)",
        Slot::GetSize => "int GetCallbackSizeBytes()",
    }
}

fn convention(receiver: Receiver) -> &'static str {
    match receiver {
        Receiver::First if cfg!(all(windows, target_arch = "x86")) => "thiscall, this = record",
        Receiver::First => "C, this = record",
        Receiver::Omitted => "system, one leased thunk per dispatcher",
    }
}

/// Human-readable description of one layout.
pub fn describe(config: AbiConfig) -> String {
    let mut out = String::new();
    let host = if config == AbiConfig::HOST { " (host)" } else { "" };
    let _ = writeln!(out, "{}{}", config, host);
    let _ = writeln!(out, "  convention: {}", convention(config.receiver));
    for (index, slot) in config.layout().iter().enumerate() {
        let _ = writeln!(
            out,
            "  [{}] {:<24} {}",
            index,
            slot.name(),
            signature(*slot)
        );
    }
    out
}
