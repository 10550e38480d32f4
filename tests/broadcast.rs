use ripple::{Message, Runtime, Stream, StreamController, Subscriber};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[test]
fn test_every_listener_sees_every_event() {
    let mut rt = Runtime::new();
    let controller = StreamController::broadcast();

    let first = controller.stream().to_list().unwrap();
    let second = controller.stream().to_list().unwrap();
    controller.add(1).unwrap();
    controller.add(2).unwrap();
    controller.close().unwrap();

    assert_eq!(rt.block_on(first).unwrap(), vec![1, 2]);
    assert_eq!(rt.block_on(second).unwrap(), vec![1, 2]);
}

#[test]
fn test_events_without_listeners_are_dropped() {
    let mut rt = Runtime::new();
    let controller = StreamController::broadcast();

    controller.add(1).unwrap();
    let late = controller.stream().to_list().unwrap();
    controller.add(2).unwrap();
    controller.close().unwrap();

    assert_eq!(
        rt.block_on(late).unwrap(),
        vec![2],
        "A broadcast stream does not buffer for future listeners"
    );
}

#[test]
fn test_listen_after_close_gets_done() {
    let mut rt = Runtime::new();
    let controller = StreamController::<i32>::broadcast();
    controller.close().unwrap();

    let done = Rc::new(Cell::new(false));
    let done_clone = done.clone();
    controller
        .stream()
        .listen_with(Subscriber::new().on_done(move || done_clone.set(true)))
        .unwrap();
    rt.run();

    assert!(done.get());
    assert!(controller.done().is_settled(), "Closed with no listeners settles done");
}

#[test]
fn test_listen_and_cancel_callbacks_track_first_and_last() {
    let mut rt = Runtime::new();
    let calls = Rc::new(RefCell::new(Vec::new()));
    let (listen, cancel) = (calls.clone(), calls.clone());
    let controller = StreamController::<i32>::builder()
        .broadcast(true)
        .on_listen(move || listen.borrow_mut().push("listen"))
        .on_cancel(move || {
            cancel.borrow_mut().push("cancel");
            None
        })
        .build();

    let a = controller.stream().listen(|_| {}).unwrap();
    let b = controller.stream().listen(|_| {}).unwrap();
    a.cancel();
    assert_eq!(*calls.borrow(), vec!["listen"], "One listener is still there");

    b.cancel();
    rt.run();
    assert_eq!(*calls.borrow(), vec!["listen", "cancel"]);
    assert!(!controller.has_listener());
}

#[test]
fn test_pausing_one_listener_does_not_affect_others() {
    let mut rt = Runtime::new();
    let controller = StreamController::broadcast();
    let (fast, slow) = (Rc::new(RefCell::new(Vec::new())), Rc::new(RefCell::new(Vec::new())));

    let fast_clone = fast.clone();
    controller
        .stream()
        .listen(move |value: i32| fast_clone.borrow_mut().push(value))
        .unwrap();
    let slow_clone = slow.clone();
    let paused = controller
        .stream()
        .listen(move |value: i32| slow_clone.borrow_mut().push(value))
        .unwrap();

    paused.pause();
    controller.add(1).unwrap();
    controller.add(2).unwrap();
    rt.run();

    assert_eq!(*fast.borrow(), vec![1, 2]);
    assert!(slow.borrow().is_empty());
    assert!(!controller.is_paused(), "A broadcast controller never reports paused");

    paused.resume();
    rt.run();
    assert_eq!(*slow.borrow(), vec![1, 2], "The paused listener catches up");
}

#[test]
fn test_sync_broadcast_delivers_inline() {
    let controller = StreamController::builder().broadcast(true).sync(true).build();
    let seen = Rc::new(RefCell::new(Vec::new()));

    for name in ["a", "b"] {
        let seen = seen.clone();
        controller
            .stream()
            .listen(move |value: i32| seen.borrow_mut().push(format!("{name}{value}")))
            .unwrap();
    }
    controller.add(1).unwrap();

    assert_eq!(*seen.borrow(), vec!["a1", "b1"]);
}

#[test]
fn test_done_waits_for_close() {
    let mut rt = Runtime::new();
    let controller = StreamController::<i32>::broadcast();

    let subscription = controller.stream().listen(|_| {}).unwrap();
    subscription.cancel();
    rt.run();
    assert!(
        !controller.done().is_settled(),
        "Losing every listener does not settle done before close"
    );

    controller.close().unwrap();
    rt.run();
    assert!(controller.done().is_settled());
}

#[test]
fn test_error_without_listeners_is_uncaught() {
    let mut rt = Runtime::new();
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = errors.clone();
    let zone = ripple::Zone::current().fork(
        ripple::ZoneSpecification::new().on_handle_uncaught_error(move |_, _, failure| {
            sink.borrow_mut().push(failure.error.to_string())
        }),
        ripple::ZoneValues::new(),
    );

    let controller = zone.run(StreamController::<i32>::broadcast);
    controller.add_error(Message("nobody".into()), None).unwrap();
    rt.run();

    assert_eq!(*errors.borrow(), vec!["nobody".to_string()]);
}

#[test]
fn test_derived_streams_stay_broadcast() {
    let controller = StreamController::<i32>::broadcast();
    let stream = controller.stream();

    assert!(stream.is_broadcast());
    assert!(stream.map(|v| v * 2).filter(|v| *v > 0).is_broadcast());
    assert!(Stream::<i32>::empty().is_broadcast());
    assert!(!Stream::from_iter(vec![1]).is_broadcast());
}
