// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure

//! Persistent dispatcher behaviour against the loopback boundary.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use cbrelay::payload::encode_plain;
use cbrelay::{
    native_payload, ApiCall, BoundaryCall, DispatchSite, DispatcherOptions, Error,
    ExceptionBarrier, HandlerFailure, Identity, IdentityTable, LoopbackBoundary, NativeCall,
    PersistentDispatcher, RegistrationRecord,
};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
struct Ping {
    value: i32,
}

native_payload!(Ping);

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
struct PersonaChange {
    steam_id: u64,
    flags: i32,
    _reserved: i32,
}

native_payload!(PersonaChange, "PersonaStateChange");

const PING: Identity = Identity::new(42);
const PERSONA: Identity = Identity::new(304);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn setup() -> (Rc<LoopbackBoundary>, IdentityTable) {
    init_logging();
    let native = Rc::new(LoopbackBoundary::host());
    let table = IdentityTable::new()
        .with::<Ping>(PING)
        .with_name("PersonaStateChange", PERSONA);
    (native, table)
}

fn ping(value: i32) -> Vec<u8> {
    unsafe { encode_plain(&Ping { value }) }
}

#[derive(Default)]
struct Collect(Mutex<Vec<HandlerFailure>>);

impl ExceptionBarrier for Collect {
    fn absorb(&self, failure: &HandlerFailure) {
        self.0.lock().unwrap().push(failure.clone());
    }
}

#[test]
fn test_ping_scenario() {
    let (native, table) = setup();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();

    let ping_handler = PersistentDispatcher::<Ping>::create(native.clone(), &table, move |p| {
        sink.borrow_mut().push(p.value)
    })
    .unwrap();

    assert_eq!(
        native.calls(),
        vec![BoundaryCall::RegisterCallback {
            record: ping_handler.record_address(),
            identity: PING,
        }]
    );
    assert_eq!(native.query_size(ping_handler.record_address()), Some(4));

    assert_eq!(native.deliver(PING, &ping(42)), 1);
    assert_eq!(*seen.borrow(), vec![42]);

    let record = ping_handler.record_address();
    drop(ping_handler);
    assert_eq!(
        native.calls().last(),
        Some(&BoundaryCall::UnregisterCallback { record })
    );
    assert!(native.registered_callbacks().is_empty());
}

#[test]
fn test_drop_never_registered_issues_no_call() {
    let (native, table) = setup();
    let dispatcher =
        PersistentDispatcher::<Ping>::new(native.clone(), &table, DispatcherOptions::new())
            .unwrap();
    assert!(!dispatcher.is_registered());
    drop(dispatcher);
    assert!(native.calls().is_empty());
}

#[test]
fn test_reregister_unregisters_first() {
    let (native, table) = setup();
    let seen = Rc::new(RefCell::new(Vec::new()));

    let mut dispatcher =
        PersistentDispatcher::<Ping>::new(native.clone(), &table, DispatcherOptions::new())
            .unwrap();
    let f_sink = seen.clone();
    dispatcher
        .register(move |p: Ping| f_sink.borrow_mut().push(("f", p.value)))
        .unwrap();
    let g_sink = seen.clone();
    dispatcher
        .register(move |p: Ping| g_sink.borrow_mut().push(("g", p.value)))
        .unwrap();

    let kinds: Vec<_> = native.calls().iter().map(BoundaryCall::kind).collect();
    assert_eq!(
        kinds,
        vec![
            NativeCall::RegisterCallback,
            NativeCall::UnregisterCallback,
            NativeCall::RegisterCallback,
        ]
    );

    native.deliver(PING, &ping(3));
    assert_eq!(*seen.borrow(), vec![("g", 3)]);
}

#[test]
fn test_unregister_is_idempotent() {
    let (native, table) = setup();
    let mut dispatcher = PersistentDispatcher::<Ping>::create(native.clone(), &table, |_| {}).unwrap();
    dispatcher.unregister().unwrap();
    dispatcher.unregister().unwrap();
    assert_eq!(native.count(NativeCall::UnregisterCallback), 1);

    drop(dispatcher);
    assert_eq!(native.count(NativeCall::UnregisterCallback), 1);
}

#[test]
fn test_unregistered_dispatcher_receives_nothing() {
    let (native, table) = setup();
    let hits = Rc::new(Cell::new(0));
    let counter = hits.clone();
    let mut dispatcher = PersistentDispatcher::<Ping>::create(native.clone(), &table, move |_| {
        counter.set(counter.get() + 1)
    })
    .unwrap();

    dispatcher.unregister().unwrap();
    assert_eq!(native.deliver(PING, &ping(1)), 0);
    assert_eq!(hits.get(), 0);
}

#[test]
fn test_round_trip_decodes_payload() {
    let (native, table) = setup();
    let seen = Rc::new(RefCell::new(None));
    let sink = seen.clone();
    let _dispatcher =
        PersistentDispatcher::<PersonaChange>::create(native.clone(), &table, move |p| {
            *sink.borrow_mut() = Some(p)
        })
        .unwrap();

    let sent = PersonaChange {
        steam_id: 76_561_198_000_000_001,
        flags: 0x41,
        _reserved: 0,
    };
    let bytes = unsafe { encode_plain(&sent) };
    assert_eq!(native.deliver(PERSONA, &bytes), 1);
    assert_eq!(*seen.borrow(), Some(sent));
}

#[test]
fn test_wrong_payload_size_is_not_delivered() {
    let (native, table) = setup();
    let hits = Rc::new(Cell::new(0));
    let counter = hits.clone();
    let _dispatcher = PersistentDispatcher::<Ping>::create(native.clone(), &table, move |_| {
        counter.set(counter.get() + 1)
    })
    .unwrap();

    assert_eq!(native.deliver(PING, &[0u8; 8]), 0);
    assert_eq!(hits.get(), 0);
}

#[test]
fn test_panicking_handler_is_absorbed() {
    let (native, table) = setup();
    let collect = Arc::new(Collect::default());
    let options = DispatcherOptions::new().barrier(collect.clone());

    let hits = Rc::new(Cell::new(0));
    let counter = hits.clone();
    let mut dispatcher = PersistentDispatcher::<Ping>::new(native.clone(), &table, options).unwrap();
    dispatcher
        .register(move |p: Ping| {
            counter.set(counter.get() + 1);
            if p.value < 0 {
                panic!("negative ping {}", p.value);
            }
        })
        .unwrap();

    assert_eq!(native.deliver(PING, &ping(-1)), 1);
    assert_eq!(native.deliver(PING, &ping(1)), 1);

    assert_eq!(hits.get(), 2);
    let failures = collect.0.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].payload_type, "Ping");
    assert_eq!(failures[0].identity, PING);
    assert_eq!(failures[0].site, DispatchSite::RunCallback);
    assert_eq!(failures[0].message, "negative ping -1");
}

#[test]
fn test_failed_register_restores_previous_registration() {
    let (native, table) = setup();
    let seen = Rc::new(RefCell::new(Vec::new()));

    let f_sink = seen.clone();
    let mut dispatcher = PersistentDispatcher::<Ping>::create(native.clone(), &table, move |p| {
        f_sink.borrow_mut().push(("f", p.value))
    })
    .unwrap();

    native.fail_next(NativeCall::RegisterCallback, "callback pipe closed");
    let g_sink = seen.clone();
    let err = dispatcher
        .register(move |p: Ping| g_sink.borrow_mut().push(("g", p.value)))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::NativeCall {
            call: NativeCall::RegisterCallback,
            ..
        }
    ));

    assert!(dispatcher.is_registered());
    assert!(native.is_callback_registered(dispatcher.record_address()));
    native.deliver(PING, &ping(9));
    assert_eq!(*seen.borrow(), vec![("f", 9)]);
}

#[test]
fn test_failed_first_register_stays_unregistered() {
    let (native, table) = setup();
    let mut dispatcher =
        PersistentDispatcher::<Ping>::new(native.clone(), &table, DispatcherOptions::new())
            .unwrap();

    native.fail_next(NativeCall::RegisterCallback, "not initialised");
    assert!(dispatcher.register(|_| {}).is_err());
    assert!(!dispatcher.is_registered());

    drop(dispatcher);
    assert_eq!(native.count(NativeCall::UnregisterCallback), 0);
}

#[test]
fn test_handler_replacing_itself_is_preserved() {
    let (native, table) = setup();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let dispatcher: Rc<RefCell<Option<PersistentDispatcher<Ping>>>> = Rc::new(RefCell::new(None));

    let mut inner =
        PersistentDispatcher::<Ping>::new(native.clone(), &table, DispatcherOptions::new())
            .unwrap();
    let slot = dispatcher.clone();
    let first_sink = seen.clone();
    inner
        .register(move |p: Ping| {
            first_sink.borrow_mut().push(("first", p.value));
            let next_sink = first_sink.clone();
            if let Some(d) = slot.borrow_mut().as_mut() {
                d.register(move |p: Ping| next_sink.borrow_mut().push(("second", p.value)))
                    .unwrap();
            }
        })
        .unwrap();
    *dispatcher.borrow_mut() = Some(inner);

    native.deliver(PING, &ping(1));
    native.deliver(PING, &ping(2));
    assert_eq!(*seen.borrow(), vec![("first", 1), ("second", 2)]);

    // Break the cycle through the handler.
    dispatcher.borrow_mut().take();
}

#[test]
fn test_dispatcher_dropped_inside_handler() {
    let (native, table) = setup();
    let holder: Rc<RefCell<Option<PersistentDispatcher<Ping>>>> = Rc::new(RefCell::new(None));
    let hits = Rc::new(Cell::new(0));

    let slot = holder.clone();
    let counter = hits.clone();
    let dispatcher = PersistentDispatcher::<Ping>::create(native.clone(), &table, move |_| {
        counter.set(counter.get() + 1);
        let own = slot.borrow_mut().take();
        drop(own);
    })
    .unwrap();
    let record = dispatcher.record_address();
    *holder.borrow_mut() = Some(dispatcher);

    assert_eq!(native.deliver(PING, &ping(1)), 1);
    assert_eq!(hits.get(), 1);
    assert!(!native.is_callback_registered(record));
    assert_eq!(native.deliver(PING, &ping(2)), 0);
}

#[test]
fn test_game_server_routing() {
    let (native, table) = setup();
    let client_hits = Rc::new(Cell::new(0));
    let server_hits = Rc::new(Cell::new(0));

    let c = client_hits.clone();
    let _client = PersistentDispatcher::<Ping>::create(native.clone(), &table, move |_| {
        c.set(c.get() + 1)
    })
    .unwrap();
    let s = server_hits.clone();
    let server = PersistentDispatcher::<Ping>::create_game_server(native.clone(), &table, move |_| {
        s.set(s.get() + 1)
    })
    .unwrap();
    assert_ne!(server.record_flags() & RegistrationRecord::FLAG_GAME_SERVER, 0);

    assert_eq!(native.deliver(PING, &ping(1)), 1);
    assert_eq!(native.deliver_game_server(PING, &ping(1)), 1);
    assert_eq!(native.deliver_game_server(PING, &ping(1)), 1);
    assert_eq!(client_hits.get(), 1);
    assert_eq!(server_hits.get(), 2);
}

#[test]
fn test_set_game_server_flag_applies_to_next_registration() {
    let (native, table) = setup();
    let mut dispatcher = PersistentDispatcher::<Ping>::create(native.clone(), &table, |_| {}).unwrap();
    assert!(!dispatcher.is_game_server());

    dispatcher.set_game_server_flag();
    dispatcher.register(|_| {}).unwrap();
    assert_eq!(native.deliver(PING, &ping(1)), 0);
    assert_eq!(native.deliver_game_server(PING, &ping(1)), 1);
}

#[test]
fn test_call_result_slot_behaves_like_callback() {
    let (native, table) = setup();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let dispatcher = PersistentDispatcher::<Ping>::create(native.clone(), &table, move |p| {
        sink.borrow_mut().push(p.value)
    })
    .unwrap();

    assert!(native.invoke_call_result(dispatcher.record_address(), ApiCall::new(5), &ping(6), true));
    assert_eq!(*seen.borrow(), vec![6]);
}

#[test]
fn test_close_reports_unregister_failure() {
    let (native, table) = setup();
    let dispatcher = PersistentDispatcher::<Ping>::create(native.clone(), &table, |_| {}).unwrap();
    let record = dispatcher.record_address();

    native.fail_next(NativeCall::UnregisterCallback, "shutting down");
    assert!(dispatcher.close().is_err());

    // The record was leaked, so the registration is still safe to call.
    assert!(native.is_callback_registered(record));
    assert_eq!(native.deliver(PING, &ping(1)), 1);
    assert_eq!(native.count(NativeCall::UnregisterCallback), 1);
}

#[test]
fn test_close_after_unregister() {
    let (native, table) = setup();
    let dispatcher = PersistentDispatcher::<Ping>::create(native.clone(), &table, |_| {}).unwrap();
    dispatcher.close().unwrap();
    assert_eq!(native.count(NativeCall::UnregisterCallback), 1);
    assert!(native.registered_callbacks().is_empty());
}
