use ripple::{
    EventSink, HandlerTransformer, Message, Runtime, Stream, StreamController, StreamTransformer,
    UsageError,
};
use std::cell::Cell;
use std::rc::Rc;

fn doubling() -> HandlerTransformer<i32, i32> {
    HandlerTransformer::new(|value: i32, sink: &dyn EventSink<i32>| {
        let _ = sink.add(value);
        let _ = sink.add(value);
    })
}

#[test]
fn test_handler_transformer_rewrites_data() {
    let mut rt = Runtime::new();

    let result = Stream::from_iter(vec![1, 2]).transform(&doubling()).to_list().unwrap();

    assert_eq!(rt.block_on(result).unwrap(), vec![1, 1, 2, 2]);
}

#[test]
fn test_errors_pass_through_by_default() {
    let mut rt = Runtime::new();

    let result = Stream::<i32>::error(Message("passed".into()))
        .transform(&doubling())
        .to_list()
        .unwrap();

    assert_eq!(rt.block_on(result).unwrap_err().error.to_string(), "passed");
}

#[test]
fn test_error_and_done_handlers() {
    let mut rt = Runtime::new();
    let transformer = doubling()
        .on_error(|failure, sink: &dyn EventSink<i32>| {
            let _ = sink.add(failure.error.to_string().len() as i32);
        })
        .on_done(|sink: &dyn EventSink<i32>| {
            let _ = sink.add(0);
            let _ = sink.close();
        });

    let controller = StreamController::new();
    controller.add(5).unwrap();
    controller.add_error(Message("four".into()), None).unwrap();
    controller.close().unwrap();

    let result = controller.stream().transform(&transformer).to_list().unwrap();

    assert_eq!(rt.block_on(result).unwrap(), vec![5, 5, 4, 0]);
}

#[test]
fn test_closure_transformer() {
    let mut rt = Runtime::new();
    let evens = |stream: Stream<i32>| stream.filter(|v| v % 2 == 0);

    let result = Stream::from_iter(1..=6).transform(&evens).to_list().unwrap();

    assert_eq!(rt.block_on(result).unwrap(), vec![2, 4, 6]);
}

#[test]
fn test_bound_stream_is_single_subscription() {
    let stream = Stream::from_iter(vec![1]).transform(&doubling());

    stream.listen(|_| {}).unwrap();

    assert_eq!(
        stream.listen(|_| {}).err(),
        Some(UsageError::AlreadyListened),
        "The upstream refuses a second listener"
    );
}

#[test]
fn test_canceling_transformed_stream_cancels_source() {
    let mut rt = Runtime::new();
    let canceled = Rc::new(Cell::new(false));
    let canceled_clone = canceled.clone();
    let controller = StreamController::<i32>::builder()
        .on_cancel(move || {
            canceled_clone.set(true);
            None
        })
        .build();

    let subscription = controller.stream().transform(&doubling()).listen(|_| {}).unwrap();
    rt.block_on(subscription.cancel()).unwrap();

    assert!(canceled.get());
}

#[test]
fn test_transformer_binds_by_trait() {
    let mut rt = Runtime::new();

    let bound = doubling().bind(Stream::value(3));

    assert_eq!(rt.block_on(bound.length().unwrap()).unwrap(), 2);
}

#[test]
fn test_pipe_into_controller() {
    let mut rt = Runtime::new();
    let target = StreamController::new();
    let collected = target.stream().to_list().unwrap();

    let piped = Stream::from_iter(vec!["a", "b"]).pipe(&target).unwrap();

    rt.block_on(piped).unwrap();
    assert!(target.is_closed(), "pipe closes the consumer when the source is done");
    assert_eq!(rt.block_on(collected).unwrap(), vec!["a", "b"]);
}

#[test]
fn test_pipe_into_closed_controller_is_refused() {
    let target = StreamController::<i32>::new();
    target.close().unwrap();

    assert_eq!(
        Stream::from_iter(vec![1]).pipe(&target).err(),
        Some(UsageError::Closed)
    );
}

#[test]
fn test_pipe_into_sink() {
    let mut rt = Runtime::new();
    let target = StreamController::new();
    let collected = target.stream().to_list().unwrap();

    Stream::from_iter(vec![1, 2, 3]).pipe(&target.sink()).unwrap();

    assert_eq!(rt.block_on(collected).unwrap(), vec![1, 2, 3]);
}

#[test]
fn test_data_handler_closing_early_ends_stream() {
    let mut rt = Runtime::new();
    let first_only = HandlerTransformer::new(|value: i32, sink: &dyn EventSink<i32>| {
        if sink.add(value).is_ok() {
            let _ = sink.close();
        }
    });

    let controller = StreamController::new();
    controller.add(1).unwrap();
    controller.add(2).unwrap();
    controller.add_error(Message("late".into()), None).unwrap();
    controller.close().unwrap();

    let result = controller.stream().transform(&first_only).to_list().unwrap();

    assert_eq!(
        rt.block_on(result).unwrap(),
        vec![1],
        "Events after the handler closed the sink should be dropped"
    );
}
