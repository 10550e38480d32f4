use ripple::time::sleep;
use ripple::{Runtime, Timer, Zone};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

#[test]
fn test_sleep_basic() {
    let mut rt = Runtime::new();

    let start = Instant::now();
    rt.block_on(async {
        sleep(Duration::from_millis(50)).await.unwrap();
    });
    let elapsed = start.elapsed();

    assert!(
        elapsed >= Duration::from_millis(50),
        "Sleep should wait at least the specified duration"
    );
}

#[test]
fn test_sleep_zero_duration() {
    let mut rt = Runtime::new();

    let start = Instant::now();
    rt.block_on(sleep(Duration::ZERO)).unwrap();
    let elapsed = start.elapsed();

    assert!(
        elapsed < Duration::from_millis(10),
        "Zero duration sleep should be fast"
    );
}

#[test]
fn test_sleep_in_function() {
    let mut rt = Runtime::new();
    let start = Instant::now();

    rt.block_on(async {
        sleep_and_record(start).await;
    });
}

async fn sleep_and_record(start: Instant) {
    let elapsed_before = start.elapsed();
    sleep(Duration::from_millis(30)).await.unwrap();
    let elapsed_after = start.elapsed();

    assert!(elapsed_after - elapsed_before >= Duration::from_millis(30));
}

#[test]
fn test_timers_fire_in_deadline_order() {
    let mut rt = Runtime::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    for (delay, name) in [(30, "slow"), (10, "fast"), (20, "medium")] {
        let order = order.clone();
        Zone::current().create_timer(Duration::from_millis(delay), move || {
            order.borrow_mut().push(name)
        });
    }
    rt.run();

    assert_eq!(*order.borrow(), vec!["fast", "medium", "slow"]);
}

#[test]
fn test_microtasks_run_before_timers() {
    let mut rt = Runtime::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    let o1 = order.clone();
    Zone::current().create_timer(Duration::ZERO, move || o1.borrow_mut().push("timer"));
    let o2 = order.clone();
    Zone::current().schedule_microtask(move || o2.borrow_mut().push("microtask"));
    rt.run();

    assert_eq!(
        *order.borrow(),
        vec!["microtask", "timer"],
        "Microtasks always win over expired timers"
    );
}

#[test]
fn test_microtasks_from_timer_run_before_next_timer() {
    let mut rt = Runtime::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    let o1 = order.clone();
    Zone::current().create_timer(Duration::ZERO, move || {
        o1.borrow_mut().push("timer 1");
        let o = o1.clone();
        Zone::current().schedule_microtask(move || o.borrow_mut().push("microtask"));
    });
    let o2 = order.clone();
    Zone::current().create_timer(Duration::ZERO, move || o2.borrow_mut().push("timer 2"));
    rt.run();

    assert_eq!(*order.borrow(), vec!["timer 1", "microtask", "timer 2"]);
}

#[test]
fn test_canceled_timer_never_fires() {
    let mut rt = Runtime::new();
    let fired = Rc::new(Cell::new(false));
    let fired_clone = fired.clone();

    let timer = Zone::current().create_timer(Duration::from_millis(5), move || {
        fired_clone.set(true)
    });
    assert!(timer.is_active());

    timer.cancel();
    rt.run();

    assert!(!fired.get(), "A canceled timer must not fire");
    assert!(!timer.is_active());
}

#[test]
fn test_periodic_timer_ticks_until_canceled() {
    let mut rt = Runtime::new();
    let ticks = Rc::new(RefCell::new(Vec::new()));
    let ticks_clone = ticks.clone();

    let timer = Zone::current().create_periodic_timer(Duration::from_millis(5), move |timer: &Timer| {
        ticks_clone.borrow_mut().push(timer.tick());
        if ticks_clone.borrow().len() == 3 {
            timer.cancel();
        }
    });
    rt.run();

    let ticks = ticks.borrow();
    assert_eq!(ticks.len(), 3, "The timer should stop after being canceled");
    assert!(
        ticks.windows(2).all(|pair| pair[0] < pair[1]),
        "Ticks should strictly increase"
    );
    assert!(timer.is_periodic());
    assert!(!timer.is_active());
}

#[test]
fn test_one_shot_tick_after_firing() {
    let mut rt = Runtime::new();

    let timer = Zone::current().create_timer(Duration::from_millis(1), || {});
    assert_eq!(timer.tick(), 0);
    rt.run();

    assert_eq!(timer.tick(), 1, "A fired one-shot timer reports one tick");
    assert!(!timer.is_active());
}
