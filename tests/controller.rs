use ripple::{
    AsyncError, Deferred, EventSink, Message, Runtime, Stream, StreamController, Subscriber,
    UsageError, Zone, ZoneSpecification, ZoneValues,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

type Log = Rc<RefCell<Vec<String>>>;

fn recording_subscriber(log: &Log) -> Subscriber<i32> {
    let (data, error, done) = (log.clone(), log.clone(), log.clone());
    Subscriber::new()
        .on_data(move |value: i32| data.borrow_mut().push(format!("data {value}")))
        .on_error(move |err: AsyncError| error.borrow_mut().push(format!("error {err}")))
        .on_done(move || done.borrow_mut().push("done".to_string()))
}

#[test]
fn test_async_controller_delivers_in_order() {
    let mut rt = Runtime::new();
    let controller = StreamController::new();
    let log: Log = Rc::default();

    controller.stream().listen_with(recording_subscriber(&log)).unwrap();
    controller.add(1).unwrap();
    controller.add_error(Message("oops".into()), None).unwrap();
    controller.add(2).unwrap();
    controller.close().unwrap();

    assert!(log.borrow().is_empty(), "An async controller never delivers inline");

    rt.run();
    assert_eq!(
        *log.borrow(),
        vec!["data 1", "error oops", "data 2", "done"],
        "Events should arrive in the order they were added"
    );
}

#[test]
fn test_sync_controller_delivers_inline() {
    let controller = StreamController::sync();
    let log: Log = Rc::default();

    controller.stream().listen_with(recording_subscriber(&log)).unwrap();
    controller.add(7).unwrap();

    assert_eq!(*log.borrow(), vec!["data 7"], "A sync controller delivers inside add");
}

#[test]
fn test_events_before_listen_are_buffered() {
    let mut rt = Runtime::new();
    let controller = StreamController::new();
    let log: Log = Rc::default();

    controller.add(1).unwrap();
    controller.add(2).unwrap();
    controller.close().unwrap();
    assert!(controller.is_paused(), "Without a listener the controller counts as paused");

    controller.stream().listen_with(recording_subscriber(&log)).unwrap();
    rt.run();

    assert_eq!(*log.borrow(), vec!["data 1", "data 2", "done"]);
}

#[test]
fn test_add_after_close_is_refused() {
    let controller = StreamController::<i32>::new();

    controller.close().unwrap();

    assert_eq!(controller.add(1), Err(UsageError::Closed));
    assert_eq!(
        controller.add_error(Message("late".into()), None),
        Err(UsageError::Closed)
    );
    assert!(controller.is_closed());
}

#[test]
fn test_close_twice_returns_same_done() {
    let mut rt = Runtime::new();
    let controller = StreamController::<i32>::new();
    controller.stream().listen(|_| {}).unwrap();

    let first = controller.close().unwrap();
    let second = controller.close().unwrap();
    rt.run();

    assert!(first.is_settled() && second.is_settled());
}

#[test]
fn test_single_subscription_rejects_second_listener() {
    let controller = StreamController::<i32>::new();
    let stream = controller.stream();

    stream.listen(|_| {}).unwrap();

    assert_eq!(
        stream.listen(|_| {}).err(),
        Some(UsageError::AlreadyListened),
        "A single-subscription stream accepts one listener"
    );
}

#[test]
fn test_listen_after_cancel_is_refused() {
    let mut rt = Runtime::new();
    let controller = StreamController::<i32>::new();
    let stream = controller.stream();

    let subscription = stream.listen(|_| {}).unwrap();
    subscription.cancel();
    rt.run();

    assert_eq!(stream.listen(|_| {}).err(), Some(UsageError::AlreadyListened));
}

#[test]
fn test_listen_after_done_gets_done_only() {
    let mut rt = Runtime::new();
    let stream = Stream::from_iter(vec![1, 2]);
    stream.to_list().unwrap();
    rt.run();

    let log: Log = Rc::default();
    stream.listen_with(recording_subscriber(&log)).unwrap();
    rt.run();

    assert_eq!(*log.borrow(), vec!["done"]);
}

#[test]
fn test_lifecycle_callbacks() {
    let mut rt = Runtime::new();
    let calls: Log = Rc::default();
    let (listen, pause, resume, cancel) = (calls.clone(), calls.clone(), calls.clone(), calls.clone());
    let controller = StreamController::<i32>::builder()
        .on_listen(move || listen.borrow_mut().push("listen".into()))
        .on_pause(move || pause.borrow_mut().push("pause".into()))
        .on_resume(move || resume.borrow_mut().push("resume".into()))
        .on_cancel(move || {
            cancel.borrow_mut().push("cancel".into());
            None
        })
        .build();

    let subscription = controller.stream().listen(|_| {}).unwrap();
    assert!(controller.has_listener());

    subscription.pause();
    subscription.pause();
    assert!(controller.is_paused());
    subscription.resume();
    subscription.resume();
    subscription.cancel();
    rt.run();

    assert_eq!(
        *calls.borrow(),
        vec!["listen", "pause", "resume", "cancel"],
        "Nested pauses should reach the controller once"
    );
    assert!(!controller.has_listener());
    assert!(controller.done().is_settled(), "Canceling the only listener settles done");
}

#[test]
fn test_paused_subscription_holds_events() {
    let mut rt = Runtime::new();
    let controller = StreamController::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = seen.clone();

    let subscription = controller
        .stream()
        .listen(move |value: i32| seen_clone.borrow_mut().push(value))
        .unwrap();
    subscription.pause();
    controller.add(1).unwrap();
    controller.add(2).unwrap();
    rt.run();

    assert!(seen.borrow().is_empty(), "Nothing is delivered while paused");

    subscription.resume();
    rt.run();
    assert_eq!(*seen.borrow(), vec![1, 2]);
}

#[test]
fn test_pause_until_resumes_on_signal() {
    let mut rt = Runtime::new();
    let controller = StreamController::new();
    let seen = Rc::new(Cell::new(0));
    let seen_clone = seen.clone();
    let signal = ripple::Completer::new();

    let subscription = controller
        .stream()
        .listen(move |value: i32| seen_clone.set(value))
        .unwrap();
    subscription.pause_until(&signal.deferred());
    controller.add(5).unwrap();
    rt.run();
    assert_eq!(seen.get(), 0);

    signal.complete(()).unwrap();
    rt.run();
    assert_eq!(seen.get(), 5);
}

#[test]
fn test_cancel_waits_for_cancel_callback() {
    let mut rt = Runtime::new();
    let cleanup = ripple::Completer::new();
    let cleanup_deferred = cleanup.deferred();
    let controller = StreamController::<i32>::builder()
        .on_cancel(move || Some(cleanup_deferred.clone()))
        .build();

    let subscription = controller.stream().listen(|_| {}).unwrap();
    let canceled = subscription.cancel();
    rt.run();

    assert!(!canceled.is_settled(), "cancel should wait for the cleanup");
    assert!(subscription.is_canceled());

    cleanup.complete(()).unwrap();
    rt.run();
    assert!(canceled.is_settled());
}

#[test]
fn test_cancel_on_error_stops_delivery() {
    let mut rt = Runtime::new();
    let controller = StreamController::new();
    let log: Log = Rc::default();

    controller
        .stream()
        .listen_with(recording_subscriber(&log).cancel_on_error(true))
        .unwrap();
    controller.add(1).unwrap();
    controller.add_error(Message("stop".into()), None).unwrap();
    controller.add(2).unwrap();
    rt.run();

    assert_eq!(*log.borrow(), vec!["data 1", "error stop"]);
}

#[test]
fn test_error_without_handler_goes_to_zone() {
    let mut rt = Runtime::new();
    let errors: Log = Rc::default();
    let sink = errors.clone();
    let zone = Zone::current().fork(
        ZoneSpecification::new().on_handle_uncaught_error(move |_, _, failure| {
            sink.borrow_mut().push(failure.error.to_string())
        }),
        ZoneValues::new(),
    );
    let controller = StreamController::<i32>::new();

    zone.run(|| controller.stream().listen(|_| {}).unwrap());
    controller.add_error(Message("unhandled".into()), None).unwrap();
    rt.run();

    assert_eq!(*errors.borrow(), vec!["unhandled".to_string()]);
}

#[test]
fn test_handlers_run_in_listen_zone() {
    let mut rt = Runtime::new();
    let zone = Zone::current().fork(
        ZoneSpecification::new(),
        ZoneValues::new().with("listener", "inner"),
    );
    let controller = StreamController::new();
    let seen = Rc::new(RefCell::new(None));
    let seen_clone = seen.clone();

    zone.run(|| {
        controller
            .stream()
            .listen(move |_: i32| *seen_clone.borrow_mut() = Zone::current().get::<&str>("listener"))
            .unwrap()
    });
    controller.add(1).unwrap();
    rt.run();

    assert_eq!(*seen.borrow(), Some("inner"));
}

#[test]
fn test_replacing_data_handler() {
    let mut rt = Runtime::new();
    let controller = StreamController::new();
    let seen = Rc::new(RefCell::new(Vec::new()));

    let first = seen.clone();
    let subscription = controller
        .stream()
        .listen(move |value: i32| first.borrow_mut().push(("first", value)))
        .unwrap();
    controller.add(1).unwrap();
    rt.run();

    let second = seen.clone();
    subscription.on_data(move |value| second.borrow_mut().push(("second", value)));
    controller.add(2).unwrap();
    rt.run();

    assert_eq!(*seen.borrow(), vec![("first", 1), ("second", 2)]);
}

#[test]
fn test_add_stream_forwards_and_blocks_writes() {
    let mut rt = Runtime::new();
    let controller = StreamController::new();
    let collected = controller.stream().to_list().unwrap();

    let finished = controller
        .add_stream(&Stream::from_iter(vec![1, 2, 3]), false)
        .unwrap();
    assert_eq!(controller.add(0), Err(UsageError::AddingStream));
    assert_eq!(controller.close().err(), Some(UsageError::AddingStream));

    rt.block_on(finished).unwrap();
    controller.add(4).unwrap();
    controller.close().unwrap();

    assert_eq!(rt.block_on(collected).unwrap(), vec![1, 2, 3, 4]);
}

#[test]
fn test_sink_exposes_event_side() {
    let mut rt = Runtime::new();
    let controller = StreamController::new();
    let collected = controller.stream().to_list().unwrap();
    let sink = controller.sink();

    sink.add(1).unwrap();
    EventSink::add_error(&sink, AsyncError::msg("ignored"), None).unwrap();
    sink.close().unwrap();

    let failure = rt.block_on(collected).unwrap_err();
    assert_eq!(failure.error.to_string(), "ignored");
    rt.block_on(sink.done()).unwrap();
}

#[test]
fn test_from_deferred_emits_outcome() {
    let mut rt = Runtime::new();

    let values = Stream::from_deferred(&Deferred::value(3)).to_list().unwrap();
    let error = Deferred::<i32>::error(Message("failed".into()))
        .as_stream()
        .to_list()
        .unwrap();

    assert_eq!(rt.block_on(values).unwrap(), vec![3]);
    assert_eq!(rt.block_on(error).unwrap_err().error.to_string(), "failed");
}

#[test]
fn test_from_deferreds_in_settlement_order() {
    let mut rt = Runtime::new();
    let (slow, fast) = (ripple::Completer::new(), ripple::Completer::new());

    let collected = Stream::from_deferreds(vec![slow.deferred(), fast.deferred()])
        .to_list()
        .unwrap();
    fast.complete("fast").unwrap();
    rt.run();
    slow.complete("slow").unwrap();

    assert_eq!(rt.block_on(collected).unwrap(), vec!["fast", "slow"]);
}
