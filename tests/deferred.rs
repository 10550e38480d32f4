use ripple::{
    AsyncError, Completer, Deferred, ErrorHandler, Message, Outcome, Runtime, StackTrace,
    StateError, Zone, ZoneSpecification, ZoneValues,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn recording_zone() -> (Zone, Rc<RefCell<Vec<String>>>) {
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = errors.clone();
    let zone = Zone::current().fork(
        ZoneSpecification::new().on_handle_uncaught_error(move |_, _, failure| {
            sink.borrow_mut().push(failure.error.to_string())
        }),
        ZoneValues::new(),
    );
    (zone, errors)
}

#[test]
fn test_value_settles_asynchronously() {
    let mut rt = Runtime::new();
    let deferred = Deferred::value(7);

    assert!(
        !deferred.is_settled(),
        "A value deferred should not settle before the loop runs"
    );

    rt.run();

    assert!(
        matches!(deferred.peek(), Some(Ok(7))),
        "The deferred should hold its value after the loop ran"
    );
}

#[test]
fn test_then_and_map_chain() {
    let mut rt = Runtime::new();

    let result = rt.block_on(Deferred::value(2).then(|v| Ok(v * 3)).map(|v| v + 1));

    assert_eq!(result.unwrap(), 7, "Continuations should apply in order");
}

#[test]
fn test_and_then_waits_for_returned_deferred() {
    let mut rt = Runtime::new();

    let result = rt.block_on(Deferred::value(1).and_then(|v| Deferred::value(v + 10)));

    assert_eq!(result.unwrap(), 11);
}

#[test]
fn test_listener_on_settled_deferred_runs_later() {
    let mut rt = Runtime::new();
    let deferred = Deferred::value(1);
    rt.run();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = seen.clone();
    deferred.on_settled(move |result| seen_clone.borrow_mut().push(result.unwrap()));

    assert!(
        seen.borrow().is_empty(),
        "A listener must never run inside the registration call"
    );

    rt.run();
    assert_eq!(*seen.borrow(), vec![1]);
}

#[test]
fn test_listeners_fire_in_registration_order() {
    let mut rt = Runtime::new();
    let completer = Completer::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    for name in ["a", "b", "c"] {
        let order = order.clone();
        completer
            .deferred()
            .on_settled(move |_: Result<u8, _>| order.borrow_mut().push(name));
    }

    completer.complete(0).unwrap();
    rt.run();

    assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
}

#[test]
fn test_nested_continuations_run_depth_first() {
    let mut rt = Runtime::new();
    let completer = Completer::new();
    let order = Rc::new(RefCell::new(Vec::new()));
    let deferred = completer.deferred();

    let o1 = order.clone();
    let o2 = order.clone();
    let o3 = order.clone();
    deferred
        .map(move |v: i32| {
            o1.borrow_mut().push("first");
            v
        })
        .on_settled(move |_| o2.borrow_mut().push("first.child"));
    deferred.on_settled(move |_| o3.borrow_mut().push("second"));

    completer.complete(1).unwrap();
    rt.run();

    assert_eq!(
        *order.borrow(),
        vec!["first", "first.child", "second"],
        "A chained deferred should propagate before the next sibling listener"
    );
}

#[test]
fn test_catch_error_recovers() {
    let mut rt = Runtime::new();

    let recovered = Deferred::<i32>::error(Message("boom".into()))
        .catch_error(ErrorHandler::recover(|_| -1), None);

    assert_eq!(rt.block_on(recovered).unwrap(), -1);
}

#[test]
fn test_catch_error_test_rejects_error() {
    let mut rt = Runtime::new();

    let test: Box<dyn Fn(&AsyncError) -> bool> = Box::new(|error| error.is::<StateError>());
    let untouched = Deferred::<i32>::error(Message("boom".into()))
        .catch_error(ErrorHandler::recover(|_| -1), Some(test));

    let failure = rt.block_on(untouched).unwrap_err();
    assert_eq!(
        failure.error.to_string(),
        "boom",
        "An error rejected by the test should pass through"
    );
}

#[test]
fn test_rethrown_error_keeps_original_trace() {
    let mut rt = Runtime::new();
    let error = AsyncError::msg("again");
    let trace = StackTrace::capture();

    let rethrown = Deferred::<i32>::error_with_trace(error.clone(), trace.clone())
        .catch_error(ErrorHandler::unary(Err), None);

    let failure = rt.block_on(rethrown).unwrap_err();
    assert!(failure.error.ptr_eq(&error), "The same error object should come out");
    assert!(
        failure.trace.same_as(&trace),
        "Rethrowing the same error should keep its trace"
    );
}

#[test]
fn test_new_error_from_handler_gets_new_trace() {
    let mut rt = Runtime::new();
    let trace = StackTrace::capture();

    let replaced = Deferred::<i32>::error_with_trace(AsyncError::msg("first"), trace.clone())
        .catch_error(ErrorHandler::unary(|_| Err(AsyncError::msg("second"))), None);

    let failure = rt.block_on(replaced).unwrap_err();
    assert_eq!(failure.error.to_string(), "second");
    assert!(!failure.trace.same_as(&trace), "A new error should get a new trace");
}

#[test]
fn test_finally_keeps_value() {
    let mut rt = Runtime::new();
    let ran = Rc::new(Cell::new(false));
    let ran_clone = ran.clone();

    let result = rt.block_on(Deferred::value("kept").finally_do(move || {
        ran_clone.set(true);
        Ok(Outcome::Ready(()))
    }));

    assert_eq!(result.unwrap(), "kept");
    assert!(ran.get(), "The finally action should have run");
}

#[test]
fn test_finally_failure_wins() {
    let mut rt = Runtime::new();

    let result = rt.block_on(
        Deferred::value(1).finally_do(|| Err(AsyncError::msg("cleanup failed"))),
    );

    assert_eq!(result.unwrap_err().error.to_string(), "cleanup failed");
}

#[test]
fn test_sync_passes_through_chained_deferred() {
    let mut rt = Runtime::new();
    let inner = Deferred::value(5);

    let outer = Deferred::sync(|| Ok(Outcome::Chain(inner.clone())));

    assert_eq!(rt.block_on(outer).unwrap(), 5);
}

#[test]
fn test_microtask_runs_computation_later() {
    let mut rt = Runtime::new();
    let ran = Rc::new(Cell::new(false));
    let ran_clone = ran.clone();

    let deferred = Deferred::microtask(move || {
        ran_clone.set(true);
        Ok(Outcome::Ready(3))
    });

    assert!(!ran.get(), "The computation should wait for a microtask");
    assert_eq!(rt.block_on(deferred).unwrap(), 3);
}

#[test]
fn test_chaining_to_itself_fails() {
    let mut rt = Runtime::new();
    let completer = Completer::<i32>::new();
    let deferred = completer.deferred();

    completer
        .complete_with(Outcome::Chain(deferred.clone()))
        .unwrap();

    let failure = rt.block_on(deferred).unwrap_err();
    assert_eq!(
        failure.error.downcast_ref::<StateError>(),
        Some(&StateError::ChainedToItself)
    );
}

#[test]
fn test_unhandled_error_reported_to_zone() {
    let mut rt = Runtime::new();
    let (zone, errors) = recording_zone();

    zone.run(|| {
        Deferred::<i32>::error(Message("lost".into()));
    });
    rt.run();

    assert_eq!(*errors.borrow(), vec!["lost".to_string()]);
}

#[test]
fn test_handled_error_not_reported() {
    let mut rt = Runtime::new();
    let (zone, errors) = recording_zone();

    zone.run(|| {
        Deferred::<i32>::error(Message("caught".into()))
            .catch_error(ErrorHandler::recover(|_| 0), None);
    });
    rt.run();

    assert!(
        errors.borrow().is_empty(),
        "An error with a listener should not be reported"
    );
}

#[test]
fn test_error_does_not_cross_error_zones() {
    let mut rt = Runtime::new();
    let (zone, errors) = recording_zone();
    let observed = Rc::new(Cell::new(false));

    let failing = zone.run(|| Deferred::<i32>::error(Message("inner".into())));
    let observed_clone = observed.clone();
    failing.on_settled(move |_| observed_clone.set(true));
    rt.run();

    assert!(
        !observed.get(),
        "A listener in another error zone must not see the error"
    );
    assert_eq!(*errors.borrow(), vec!["inner".to_string()]);
}

#[test]
fn test_continuation_runs_in_registration_zone() {
    let mut rt = Runtime::new();
    let zone = Zone::current().fork(
        ZoneSpecification::new(),
        ZoneValues::new().with("name", "inner".to_string()),
    );
    let completer = Completer::new();

    let seen = zone.run(|| {
        completer
            .deferred()
            .map(|_: ()| Zone::current().get::<String>("name"))
    });
    completer.complete(()).unwrap();

    assert_eq!(rt.block_on(seen).unwrap(), Some("inner".to_string()));
}

#[test]
fn test_await_inside_spawned_task() {
    let mut rt = Runtime::new();

    let total = ripple::spawn(async {
        let a = Deferred::value(20).await.map_err(|f| f.error)?;
        let b = Deferred::value(22).await.map_err(|f| f.error)?;
        Ok::<_, AsyncError>(a + b)
    });

    assert_eq!(rt.block_on(total).unwrap(), 42);
}

fn countdown(n: u32) -> Deferred<u32> {
    if n == 0 {
        return Deferred::value(0);
    }
    Deferred::value(n).and_then(|n| countdown(n - 1))
}

#[test]
fn test_long_settled_chain_does_not_overflow() {
    let mut rt = Runtime::new();
    let completer = Completer::<u64>::new();
    let mut deferred = completer.deferred();

    for _ in 0..100_000 {
        deferred = deferred.map(|v| v + 1);
    }
    completer.complete(0).unwrap();

    assert_eq!(rt.block_on(deferred).unwrap(), 100_000);
}

#[test]
fn test_abandoned_chain_drops_without_overflow() {
    let completer = Completer::<u64>::new();
    let mut deferred = completer.deferred();

    for _ in 0..100_000 {
        deferred = deferred.map(|v| v + 1);
    }

    drop(deferred);
    drop(completer);
}

#[test]
fn test_abandoned_chain_keeps_reachable_links() {
    let mut rt = Runtime::new();
    let completer = Completer::<u64>::new();
    let middle = completer.deferred().map(|v| v + 1);
    let seen = Rc::new(Cell::new(0));
    let seen_clone = seen.clone();

    let mut tail = middle.map(|v| v * 10);
    for _ in 0..1_000 {
        tail = tail.map(|v| v);
    }
    tail.on_settled(move |result| seen_clone.set(result.unwrap()));
    drop(tail);

    completer.complete(4).unwrap();
    drop(completer);
    rt.run();

    assert_eq!(seen.get(), 50, "Links still referenced by listeners should fire");
    assert_eq!(middle.peek().unwrap().unwrap(), 5);
}

#[test]
fn test_deeply_nested_chain_outcomes_settle() {
    let mut rt = Runtime::new();

    let result = rt.block_on(countdown(10_000));

    assert_eq!(result.unwrap(), 0, "Every nested deferred should hand its result outward");
}

#[test]
fn test_completer_error_stays_in_its_error_zone() {
    let mut rt = Runtime::new();
    let (zone_a, errors) = recording_zone();
    let caught = Rc::new(Cell::new(false));

    let completer = zone_a.run(Completer::<i32>::new);
    let listener_zone = Zone::root().fork(ZoneSpecification::new(), ZoneValues::new());
    let caught_clone = caught.clone();
    let recovered = listener_zone.run(|| {
        completer.deferred().catch_error(
            ErrorHandler::recover(move |_| {
                caught_clone.set(true);
                0
            }),
            None,
        )
    });

    zone_a.run(|| completer.complete_error(Message("x".into()), None).unwrap());
    rt.run();

    assert!(!caught.get(), "A handler outside the error zone must not catch the error");
    assert_eq!(*errors.borrow(), vec!["x".to_string()]);
    assert!(recovered.peek().is_none(), "The handler's deferred never settles");
}

#[test]
fn test_error_zone_follows_deferred_creation() {
    let mut rt = Runtime::new();
    let (zone_b, errors) = recording_zone();
    let caught = Rc::new(Cell::new(false));

    let completer = Completer::<i32>::new();
    let caught_clone = caught.clone();
    let recovered = completer.deferred().catch_error(
        ErrorHandler::recover(move |_| {
            caught_clone.set(true);
            7
        }),
        None,
    );

    zone_b.run(|| completer.complete_error(Message("y".into()), None).unwrap());

    assert_eq!(rt.block_on(recovered).unwrap(), 7);
    assert!(caught.get(), "The completing zone does not change where the error belongs");
    assert!(errors.borrow().is_empty());
}
