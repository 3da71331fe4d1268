use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use callguard::{clock, debounce, CircuitBreaker, Context, ContextError, Error};
use tokio::time;

/// Stands in for a flaky payment API.
#[derive(Clone, Default)]
struct PaymentApi {
    healthy: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl PaymentApi {
    async fn charge(self, ctx: Context) -> Result<String, &'static str> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ctx.run(time::sleep(Duration::from_millis(300)))
            .await
            .map_err(|_| "payment API timed out")?;
        if self.healthy.load(Ordering::SeqCst) {
            Ok("payment processed".to_string())
        } else {
            Err("payment API down")
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("callguard=debug")
        .with_test_writer()
        .try_init();
}

/// Bursts of triggers are debounced into single breaker-guarded calls; once the breaker opens,
/// the debounced call fails fast until the reset timeout has passed.
#[tokio::test(start_paused = true)]
async fn debounced_triggers_behind_circuit_breaker() {
    init_tracing();
    let mut frozen = clock::freeze();
    let api = PaymentApi::default();
    let circuit_breaker = CircuitBreaker::new(2, Duration::from_secs(5));

    let debounced = {
        let api = api.clone();
        debounce(
            move |ctx| {
                let circuit_breaker = circuit_breaker.clone();
                let api = api.clone();
                async move { circuit_breaker.call(ctx, |ctx| api.charge(ctx)).await }
            },
            Duration::from_secs(1),
        )
    };

    let burst = || {
        let debounced = &debounced;
        async move {
            for _ in 0..4 {
                let _ = debounced.call(Context::background());
                time::sleep(Duration::from_millis(200)).await;
            }
            debounced.call_and_wait(Context::background()).await
        }
    };

    assert_eq!(Err(Error::Inner("payment API down")), burst().await);
    assert_eq!(Err(Error::Inner("payment API down")), burst().await);
    assert_eq!(2, api.calls.load(Ordering::SeqCst));

    // Open circuit, the API is not called.
    assert_eq!(Err(Error::Rejected), burst().await);
    assert_eq!(2, api.calls.load(Ordering::SeqCst));

    api.healthy.store(true, Ordering::SeqCst);
    frozen.advance(Duration::from_secs(6));
    assert_eq!(Ok("payment processed".to_string()), burst().await);
    assert_eq!(3, api.calls.load(Ordering::SeqCst));
}

/// A request timeout shorter than the API latency surfaces as a cancellation and still counts as
/// a failure.
#[tokio::test(start_paused = true)]
async fn request_timeout_counts_as_failure() {
    init_tracing();
    let _frozen = clock::freeze();
    let api = PaymentApi::default();
    api.healthy.store(true, Ordering::SeqCst);
    let circuit_breaker = CircuitBreaker::new(1, Duration::from_secs(5));

    let ctx = Context::background().with_timeout(Duration::from_millis(100));
    let res = circuit_breaker.call(ctx, |ctx| api.clone().charge(ctx)).await;
    assert_eq!(Err(Error::Cancelled(ContextError::DeadlineExceeded)), res);
    assert_eq!(1, api.calls.load(Ordering::SeqCst));

    let ctx = Context::background().with_timeout(Duration::from_secs(1));
    let res = circuit_breaker.call(ctx, |ctx| api.clone().charge(ctx)).await;
    assert_eq!(Err(Error::Rejected), res);
}
