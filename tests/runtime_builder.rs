use ripple::time::sleep;
use ripple::{
    AsyncError, Deferred, Message, RuntimeBuilder, StackTrace, UncaughtErrorPolicy, yield_now,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

#[test]
fn test_builder_creation() {
    let rt = RuntimeBuilder::new().build();
    drop(rt);
}

#[test]
fn test_builder_immediate_result() {
    let mut rt = RuntimeBuilder::new().build();
    let value = 42;

    let result = rt.block_on(async { value });

    assert_eq!(result, 42, "Future should return correct value");
}

#[test]
fn test_builder_multiple_instances() {
    let mut rt1 = RuntimeBuilder::new().build();
    let mut rt2 = RuntimeBuilder::new().build();

    let result1 = rt1.block_on(async { 10 });
    let result2 = rt2.block_on(async { 20 });

    assert_eq!(result1, 10);
    assert_eq!(result2, 20);
}

#[test]
fn test_builder_with_async_function() {
    let mut rt = RuntimeBuilder::new().build();
    let counter = Rc::new(Cell::new(0));

    async fn increment_counter(counter: Rc<Cell<i32>>) -> i32 {
        yield_now().await;
        counter.set(counter.get() + 1);
        counter.get()
    }

    let result = rt.block_on(increment_counter(counter.clone()));

    assert_eq!(result, 1, "Counter should be incremented");
    assert_eq!(counter.get(), 1, "Shared counter should be 1");
}

#[test]
fn test_spawn_multiple_tasks() {
    let mut rt = RuntimeBuilder::new().build();
    let counter = Rc::new(Cell::new(0));

    for _ in 0..5 {
        let counter_clone = counter.clone();
        rt.spawn(async move {
            counter_clone.set(counter_clone.get() + 1);
            Ok::<_, AsyncError>(())
        });
    }

    rt.block_on(async {});

    assert_eq!(counter.get(), 5, "All 5 tasks should have run");
}

#[test]
fn test_block_on_returns_before_later_timers() {
    let mut rt = RuntimeBuilder::new().build();
    let fired = Rc::new(Cell::new(false));
    let fired_clone = fired.clone();

    sleep(Duration::from_millis(20)).map(move |()| fired_clone.set(true));
    rt.block_on(Deferred::value(())).unwrap();

    assert!(!fired.get(), "A later timer should stay armed after block_on");

    rt.run();
    assert!(fired.get(), "run should drive the remaining timer");
}

#[test]
fn test_yield_now_lets_queued_microtasks_run() {
    let mut rt = RuntimeBuilder::new().build();
    let order = Rc::new(RefCell::new(Vec::new()));

    let o1 = order.clone();
    let o2 = order.clone();
    rt.block_on(async move {
        ripple::Zone::current().schedule_microtask(move || o1.borrow_mut().push("microtask"));
        yield_now().await;
        o2.borrow_mut().push("after yield");
    });

    assert_eq!(*order.borrow(), vec!["microtask", "after yield"]);
}

#[test]
fn test_max_idle_sleep_does_not_change_timer_deadlines() {
    let mut rt = RuntimeBuilder::new()
        .max_idle_sleep(Duration::from_millis(1))
        .build();

    let start = Instant::now();
    rt.block_on(sleep(Duration::from_millis(15))).unwrap();

    assert!(start.elapsed() >= Duration::from_millis(15));
}

#[test]
fn test_disabled_traces_are_empty() {
    let mut rt = RuntimeBuilder::new().capture_traces(false).build();

    let failure = rt
        .block_on(async { Deferred::<u8>::error(Message("no trace".into())).await })
        .unwrap_err();

    assert!(
        failure.trace.is_empty(),
        "No trace should be recorded when capture is disabled"
    );
    assert!(StackTrace::empty().same_as(&failure.trace));
}

#[test]
fn test_log_policy_keeps_running() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let mut rt = RuntimeBuilder::new()
        .uncaught_errors(UncaughtErrorPolicy::Log)
        .build();
    let after = Rc::new(Cell::new(false));
    let after_clone = after.clone();

    Deferred::<u8>::error(Message("ignored".into()));
    sleep(Duration::from_millis(1)).map(move |()| after_clone.set(true));
    rt.run();

    assert!(after.get(), "The loop should continue after logging the error");
}

#[test]
#[should_panic(expected = "uncaught asynchronous error: boom")]
fn test_panic_policy_panics_on_unhandled_error() {
    let mut rt = RuntimeBuilder::new()
        .uncaught_errors(UncaughtErrorPolicy::Panic)
        .build();

    Deferred::<u8>::error(Message("boom".into()));
    rt.run();
}

#[test]
#[should_panic(expected = "the event loop is idle but the future is still pending")]
fn test_block_on_panics_when_nothing_can_wake_the_future() {
    let mut rt = RuntimeBuilder::new().build();
    let never = ripple::Completer::<u8>::new();

    let _ = rt.block_on(never.deferred());
}
