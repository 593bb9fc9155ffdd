// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receiver-omitted thunk pool exhaustion.
//!
//! Kept in its own test binary: the pool is process-wide, so exhausting it
//! would starve receiver-omitted dispatchers in concurrently running tests.

use std::rc::Rc;

use cbrelay::abi::RECEIVER_OMITTED_SLOTS;
use cbrelay::{
    native_payload, AbiConfig, DispatcherOptions, Error, ErrorKind, Identity, IdentityTable,
    LoopbackBoundary, PersistentDispatcher, Receiver, SlotOrder,
};

#[repr(C)]
#[derive(Clone, Copy, Debug)]
struct Tick {
    frame: u32,
}

native_payload!(Tick);

#[test]
fn test_pool_exhaustion_and_reuse() {
    let config = AbiConfig::new(Receiver::Omitted, SlotOrder::CompletionFirst);
    let native = Rc::new(LoopbackBoundary::new(config));
    let table = IdentityTable::new().with::<Tick>(Identity::new(7));
    let options = DispatcherOptions::new().abi(config);

    let mut live = Vec::new();
    for _ in 0..RECEIVER_OMITTED_SLOTS {
        live.push(
            PersistentDispatcher::<Tick>::new(native.clone(), &table, options.clone())
                .expect("pool has room"),
        );
    }

    let err = PersistentDispatcher::<Tick>::new(native.clone(), &table, options.clone())
        .unwrap_err();
    assert!(matches!(err, Error::ReceiverSlotsExhausted));
    assert_eq!(err.kind(), ErrorKind::Configuration);

    live.pop();
    let mut reused = PersistentDispatcher::<Tick>::new(native.clone(), &table, options).unwrap();
    let frames = Rc::new(std::cell::Cell::new(0));
    let sink = frames.clone();
    reused.register(move |t: Tick| sink.set(t.frame)).unwrap();
    assert_eq!(native.deliver(Identity::new(7), &99u32.to_ne_bytes()), 1);
    assert_eq!(frames.get(), 99);

    // Receiver-first dispatchers never touch the pool.
    let first = DispatcherOptions::new().abi(AbiConfig::new(Receiver::First, SlotOrder::CallbackFirst));
    assert!(PersistentDispatcher::<Tick>::new(native.clone(), &table, first).is_ok());
}
