use ripple::time::sleep;
use ripple::{Deferred, Message, Runtime, first_of, wait_all};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

fn after(ms: u64, value: i32) -> Deferred<i32> {
    sleep(Duration::from_millis(ms)).map(move |()| value)
}

#[test]
fn test_wait_all_keeps_input_order() {
    let mut rt = Runtime::new();

    let all = wait_all(vec![after(20, 1), Deferred::value(2), after(5, 3)], false, None);

    assert_eq!(
        rt.block_on(all).unwrap(),
        vec![1, 2, 3],
        "Values should come back in input order, not completion order"
    );
}

#[test]
fn test_wait_all_empty_input() {
    let mut rt = Runtime::new();

    let all = wait_all(Vec::<Deferred<i32>>::new(), false, None);

    assert!(rt.block_on(all).unwrap().is_empty());
}

#[test]
fn test_wait_all_eager_error_and_cleanup() {
    let mut rt = Runtime::new();
    let cleaned = Rc::new(RefCell::new(Vec::new()));
    let cleaned_clone = cleaned.clone();

    let all = wait_all(
        vec![
            Deferred::value(1),
            Deferred::error(Message("bad".into())),
            after(10, 3),
        ],
        true,
        Some(Rc::new(move |value: i32| cleaned_clone.borrow_mut().push(value))),
    );

    let failure = rt.block_on(all).unwrap_err();
    assert_eq!(failure.error.to_string(), "bad");

    rt.run();
    assert_eq!(
        *cleaned.borrow(),
        vec![1, 3],
        "Values collected before and after the error should be cleaned up"
    );
}

#[test]
fn test_wait_all_lazy_error_waits_for_everything() {
    let mut rt = Runtime::new();
    let slow = after(15, 3);

    let all = wait_all(
        vec![Deferred::error(Message("first".into())), slow.clone()],
        false,
        None,
    );

    let failure = rt.block_on(all).unwrap_err();
    assert_eq!(failure.error.to_string(), "first");
    assert!(
        slow.is_settled(),
        "Without eager errors the result should wait for every input"
    );
}

#[test]
fn test_first_of_takes_earliest() {
    let mut rt = Runtime::new();

    let winner = first_of(vec![after(30, 1), after(5, 2)]);

    assert_eq!(rt.block_on(winner).unwrap(), 2);
    rt.run();
}

#[test]
fn test_first_of_error_wins_if_first() {
    let mut rt = Runtime::new();

    let winner = first_of(vec![after(20, 1), Deferred::error(Message("early".into()))]);

    assert_eq!(rt.block_on(winner).unwrap_err().error.to_string(), "early");
    rt.run();
}
