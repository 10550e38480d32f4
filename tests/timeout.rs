use ripple::time::sleep;
use ripple::{Completer, Outcome, Runtime, TimeoutError, spawn};
use std::time::Duration;

#[test]
fn test_timeout_completes_before_deadline() {
    let mut rt = Runtime::new();

    let result = rt.block_on(async {
        let handle = spawn(async {
            sleep(Duration::from_millis(10)).await.map_err(|f| f.error)?;
            Ok(123)
        });
        handle.timeout(Duration::from_millis(50)).await
    });

    assert!(
        matches!(result, Ok(v) if v == 123),
        "Timeout should return Ok(123)"
    );
    rt.run();
}

#[test]
fn test_timeout_expires() {
    let mut rt = Runtime::new();

    let result = rt.block_on(async {
        let handle = spawn(async {
            sleep(Duration::from_millis(100)).await.map_err(|f| f.error)?;
            Ok(456)
        });
        handle.timeout(Duration::from_millis(20)).await
    });

    let failure = result.expect_err("Timeout should return an error when deadline is exceeded");
    assert_eq!(
        failure.error.downcast_ref::<TimeoutError>(),
        Some(&TimeoutError {
            duration: Duration::from_millis(20)
        })
    );
    rt.run();
}

#[test]
fn test_timeout_with_fallback() {
    let mut rt = Runtime::new();
    let never = Completer::<&str>::new();

    let result = rt.block_on(
        never
            .deferred()
            .timeout_with(Duration::from_millis(5), || Ok(Outcome::Ready("fallback"))),
    );

    assert_eq!(result.unwrap(), "fallback");
}

#[test]
fn test_late_result_is_discarded() {
    let mut rt = Runtime::new();
    let slow = Completer::new();

    let limited = slow.deferred().timeout(Duration::from_millis(5));
    assert!(rt.block_on(limited.clone()).is_err());

    slow.complete(1).unwrap();
    rt.run();

    assert!(
        limited.peek().is_some_and(|result| result.is_err()),
        "The timeout result should not change afterwards"
    );
}
