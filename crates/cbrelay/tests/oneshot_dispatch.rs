// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure

//! One-shot (call-result) dispatcher behaviour against the loopback boundary.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use cbrelay::payload::encode_plain;
use cbrelay::{
    native_payload, ApiCall, BoundaryCall, DispatchSite, DispatcherOptions, Error,
    ExceptionBarrier, HandlerFailure, Identity, IdentityTable, LoopbackBoundary, NativeCall,
    OneShotDispatcher, RegistrationRecord,
};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
struct LobbyCreated {
    result: i32,
    _pad: i32,
    lobby: u64,
}

native_payload!(LobbyCreated);

const LOBBY_CREATED: Identity = Identity::new(513);

fn setup() -> (Rc<LoopbackBoundary>, IdentityTable) {
    let _ = env_logger::builder().is_test(true).try_init();
    let native = Rc::new(LoopbackBoundary::host());
    let table = IdentityTable::new().with::<LobbyCreated>(LOBBY_CREATED);
    (native, table)
}

fn created(lobby: u64) -> Vec<u8> {
    unsafe {
        encode_plain(&LobbyCreated {
            result: 1,
            _pad: 0,
            lobby,
        })
    }
}

type Seen = Rc<RefCell<Vec<(u64, bool)>>>;

fn recording(
    native: &Rc<LoopbackBoundary>,
    table: &IdentityTable,
) -> (OneShotDispatcher<LobbyCreated>, Seen) {
    let seen: Seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let dispatcher = OneShotDispatcher::<LobbyCreated>::create(native.clone(), table, move |r, failed| {
        sink.borrow_mut().push((r.lobby, failed))
    })
    .unwrap();
    (dispatcher, seen)
}

#[test]
fn test_reassign_scenario() {
    let (native, table) = setup();
    let (mut result, seen) = recording(&native, &table);
    let record = result.record_address();

    result.set(ApiCall::new(7), None).unwrap();
    assert!(result.is_active());
    result.set(ApiCall::new(9), None).unwrap();

    assert_eq!(
        native.calls(),
        vec![
            BoundaryCall::RegisterCallResult {
                record,
                call: ApiCall::new(7)
            },
            BoundaryCall::UnregisterCallResult {
                record,
                call: ApiCall::new(7)
            },
            BoundaryCall::RegisterCallResult {
                record,
                call: ApiCall::new(9)
            },
        ]
    );

    // A stale completion for 7 reaching the record is ignored.
    assert!(native.invoke_call_result(record, ApiCall::new(7), &created(70), false));
    assert!(seen.borrow().is_empty());
    assert_eq!(result.handle(), ApiCall::new(9));

    assert_eq!(native.complete_call(ApiCall::new(9), &created(90), false), 1);
    assert_eq!(*seen.borrow(), vec![(90, false)]);
    assert!(!result.is_active());
}

#[test]
fn test_mismatched_handle_leaves_state() {
    let (native, table) = setup();
    let (mut result, seen) = recording(&native, &table);
    result.set(ApiCall::new(100), None).unwrap();
    native.clear_calls();

    assert!(native.invoke_call_result(result.record_address(), ApiCall::new(101), &created(1), true));
    assert!(seen.borrow().is_empty());
    assert!(result.is_active());
    assert_eq!(result.handle(), ApiCall::new(100));
    assert!(native.calls().is_empty());
}

#[test]
fn test_cancel_twice_issues_one_unregister() {
    let (native, table) = setup();
    let (mut result, _seen) = recording(&native, &table);
    result.set(ApiCall::new(5), None).unwrap();

    result.cancel().unwrap();
    result.cancel().unwrap();
    assert!(!result.is_active());
    assert_eq!(native.count(NativeCall::UnregisterCallResult), 1);

    drop(result);
    assert_eq!(native.count(NativeCall::UnregisterCallResult), 1);
}

#[test]
fn test_drop_pending_cancels() {
    let (native, table) = setup();
    let (mut result, _seen) = recording(&native, &table);
    result.set(ApiCall::new(12), None).unwrap();
    drop(result);
    assert_eq!(native.count(NativeCall::UnregisterCallResult), 1);
    assert!(native.pending_call_results().is_empty());
}

#[test]
fn test_failure_flag_is_forwarded() {
    let (native, table) = setup();
    let (mut result, seen) = recording(&native, &table);
    result.set(ApiCall::new(3), None).unwrap();
    native.complete_call(ApiCall::new(3), &created(0), true);
    assert_eq!(*seen.borrow(), vec![(0, true)]);
}

#[test]
fn test_handler_follow_up_call_is_preserved() {
    let (native, table) = setup();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let holder: Rc<RefCell<Option<OneShotDispatcher<LobbyCreated>>>> = Rc::new(RefCell::new(None));

    let slot = holder.clone();
    let sink = seen.clone();
    let mut result = OneShotDispatcher::<LobbyCreated>::create(native.clone(), &table, move |r, _| {
        sink.borrow_mut().push(r.lobby);
        if r.lobby == 1 {
            if let Some(d) = slot.borrow_mut().as_mut() {
                d.set(ApiCall::new(22), None).unwrap();
            }
        }
    })
    .unwrap();
    result.set(ApiCall::new(21), None).unwrap();
    *holder.borrow_mut() = Some(result);

    native.complete_call(ApiCall::new(21), &created(1), false);
    {
        let guard = holder.borrow();
        let result = guard.as_ref().unwrap();
        assert!(result.is_active());
        assert_eq!(result.handle(), ApiCall::new(22));
    }

    native.complete_call(ApiCall::new(22), &created(2), false);
    assert_eq!(*seen.borrow(), vec![1, 2]);
    assert!(!holder.borrow().as_ref().unwrap().is_active());

    holder.borrow_mut().take();
}

#[test]
fn test_cancel_inside_own_completion() {
    let (native, table) = setup();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let holder: Rc<RefCell<Option<OneShotDispatcher<LobbyCreated>>>> = Rc::new(RefCell::new(None));

    let slot = holder.clone();
    let sink = seen.clone();
    let mut result = OneShotDispatcher::<LobbyCreated>::create(native.clone(), &table, move |r, _| {
        sink.borrow_mut().push(r.lobby);
        if let Some(d) = slot.borrow_mut().as_mut() {
            d.cancel().unwrap();
            assert!(!d.is_active());
        }
    })
    .unwrap();
    result.set(ApiCall::new(31), None).unwrap();
    *holder.borrow_mut() = Some(result);
    native.clear_calls();

    assert_eq!(native.complete_call(ApiCall::new(31), &created(5), false), 1);
    assert_eq!(*seen.borrow(), vec![5]);
    assert_eq!(native.count(NativeCall::UnregisterCallResult), 1);
    {
        let guard = holder.borrow();
        let result = guard.as_ref().unwrap();
        assert!(!result.is_active());
        assert_eq!(result.handle(), ApiCall::INVALID);
    }

    // Idle: a repeated completion reaches nobody and dropping issues nothing.
    assert_eq!(native.complete_call(ApiCall::new(31), &created(6), false), 0);
    holder.borrow_mut().take();
    assert_eq!(native.count(NativeCall::UnregisterCallResult), 1);
    assert_eq!(*seen.borrow(), vec![5]);
}

fn sibling_dropped_by_first_handler(forced: bool) {
    let (native, table) = setup();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let holder: Rc<RefCell<Option<OneShotDispatcher<LobbyCreated>>>> = Rc::new(RefCell::new(None));

    let slot = holder.clone();
    let sink = seen.clone();
    let mut first = OneShotDispatcher::<LobbyCreated>::create(native.clone(), &table, move |r, _| {
        sink.borrow_mut().push(("first", r.lobby));
        slot.borrow_mut().take();
    })
    .unwrap();
    let sink = seen.clone();
    let mut second = OneShotDispatcher::<LobbyCreated>::create(native.clone(), &table, move |r, _| {
        sink.borrow_mut().push(("second", r.lobby));
    })
    .unwrap();

    first.set(ApiCall::new(7), None).unwrap();
    second.set(ApiCall::new(7), None).unwrap();
    let second_record = second.record_address();
    *holder.borrow_mut() = Some(second);
    assert_eq!(native.pending_call_results().len(), 2);

    let delivered = if forced {
        native.complete_call_as_callback(ApiCall::new(7), &created(9))
    } else {
        native.complete_call(ApiCall::new(7), &created(9), false)
    };

    assert_eq!(delivered, 1);
    assert_eq!(*seen.borrow(), vec![("first", 9)]);
    assert!(holder.borrow().is_none());
    assert!(native.pending_call_results().is_empty());
    assert!(native.calls().contains(&BoundaryCall::UnregisterCallResult {
        record: second_record,
        call: ApiCall::new(7),
    }));
    assert!(!first.is_active());
}

#[test]
fn test_completion_skips_dispatcher_dropped_by_earlier_handler() {
    sibling_dropped_by_first_handler(false);
}

#[test]
fn test_forced_completion_skips_dispatcher_dropped_by_earlier_handler() {
    sibling_dropped_by_first_handler(true);
}

#[test]
fn test_handler_replaced_during_completion() {
    let (native, table) = setup();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let holder: Rc<RefCell<Option<OneShotDispatcher<LobbyCreated>>>> = Rc::new(RefCell::new(None));

    let slot = holder.clone();
    let sink = seen.clone();
    let mut result = OneShotDispatcher::<LobbyCreated>::create(native.clone(), &table, move |r, _| {
        sink.borrow_mut().push(("first", r.lobby));
        let next = sink.clone();
        if let Some(d) = slot.borrow_mut().as_mut() {
            d.set_with(ApiCall::new(31), move |r: LobbyCreated, _| {
                next.borrow_mut().push(("second", r.lobby))
            })
            .unwrap();
        }
    })
    .unwrap();
    result.set(ApiCall::new(30), None).unwrap();
    *holder.borrow_mut() = Some(result);

    native.complete_call(ApiCall::new(30), &created(1), false);
    native.complete_call(ApiCall::new(31), &created(2), false);
    assert_eq!(*seen.borrow(), vec![("first", 1), ("second", 2)]);

    holder.borrow_mut().take();
}

#[test]
fn test_forced_completion_through_callback_slot() {
    let (native, table) = setup();
    let (mut result, seen) = recording(&native, &table);
    result.set(ApiCall::new(40), None).unwrap();

    assert_eq!(native.complete_call_as_callback(ApiCall::new(40), &created(4)), 1);
    assert!(!result.is_active());
    assert_eq!(*seen.borrow(), vec![(4, false)]);
}

#[test]
fn test_set_requires_some_handler() {
    let (native, table) = setup();
    let mut result = OneShotDispatcher::<LobbyCreated>::new(
        native.clone(),
        &table,
        DispatcherOptions::new(),
        None,
    )
    .unwrap();
    let err = result.set(ApiCall::new(1), None).unwrap_err();
    assert!(matches!(err, Error::MissingHandler));
    assert_eq!(err.kind(), cbrelay::ErrorKind::InvalidArgument);

    let hits = Rc::new(Cell::new(0));
    let counter = hits.clone();
    result
        .set_with(ApiCall::new(1), move |_, _| counter.set(counter.get() + 1))
        .unwrap();
    native.complete_call(ApiCall::new(1), &created(0), false);
    assert_eq!(hits.get(), 1);

    // The stored handler carries over to later calls.
    result.set(ApiCall::new(2), None).unwrap();
    native.complete_call(ApiCall::new(2), &created(0), false);
    assert_eq!(hits.get(), 2);
}

#[test]
fn test_sentinel_cancels_pending_call() {
    let (native, table) = setup();
    let (mut result, _seen) = recording(&native, &table);
    result.set(ApiCall::new(8), None).unwrap();
    result.set(ApiCall::INVALID, None).unwrap();

    assert!(!result.is_active());
    assert_eq!(native.count(NativeCall::UnregisterCallResult), 1);
    assert_eq!(native.count(NativeCall::RegisterCallResult), 1);
}

#[test]
fn test_failed_cancel_keeps_pending() {
    let (native, table) = setup();
    let (mut result, _seen) = recording(&native, &table);
    result.set(ApiCall::new(8), None).unwrap();

    native.fail_next(NativeCall::UnregisterCallResult, "busy");
    assert!(result.cancel().is_err());
    assert!(result.is_active());
    result.cancel().unwrap();
    assert!(!result.is_active());
}

#[test]
fn test_panicking_handler_is_absorbed() {
    #[derive(Default)]
    struct Collect(Mutex<Vec<HandlerFailure>>);

    impl ExceptionBarrier for Collect {
        fn absorb(&self, failure: &HandlerFailure) {
            self.0.lock().unwrap().push(failure.clone());
        }
    }

    let (native, table) = setup();
    let collect = Arc::new(Collect::default());
    let mut result = OneShotDispatcher::<LobbyCreated>::new(
        native.clone(),
        &table,
        DispatcherOptions::new().barrier(collect.clone()),
        Some(Box::new(|_, _| panic!("lobby handler failed"))),
    )
    .unwrap();
    result.set(ApiCall::new(50), None).unwrap();

    assert_eq!(native.complete_call(ApiCall::new(50), &created(5), false), 1);
    assert!(!result.is_active());

    let failures = collect.0.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].site, DispatchSite::RunCallResult);
    assert_eq!(failures[0].identity, LOBBY_CREATED);
    assert_eq!(failures[0].message, "lobby handler failed");
}

#[test]
fn test_game_server_option_sets_flag() {
    let (native, table) = setup();
    let mut result = OneShotDispatcher::<LobbyCreated>::new(
        native.clone(),
        &table,
        DispatcherOptions::new().game_server(true),
        Some(Box::new(|_, _| {})),
    )
    .unwrap();
    assert_eq!(result.record_flags(), RegistrationRecord::FLAG_GAME_SERVER);

    result.set(ApiCall::new(60), None).unwrap();
    assert_eq!(
        result.record_flags(),
        RegistrationRecord::FLAG_GAME_SERVER | RegistrationRecord::FLAG_REGISTERED
    );
}

#[test]
fn test_size_query() {
    let (native, table) = setup();
    let (mut result, _seen) = recording(&native, &table);
    result.set(ApiCall::new(70), None).unwrap();
    assert_eq!(
        native.query_size(result.record_address()),
        Some(std::mem::size_of::<LobbyCreated>() as i32)
    );
}
