use crate::error::{RemoteError, RemoteResult};
use std::future::Future;
use tidemark_resilience::{CircuitBreaker, CircuitError, RetryPolicy, retry};

/// Runs a remote call through the call-site breaker, retrying transient
/// failures inside a single breaker admission.
pub(crate) async fn guarded_call<T, F, Fut>(
    breaker: &CircuitBreaker,
    policy: &RetryPolicy,
    operation: &'static str,
    call: F,
) -> Result<T, CircuitError<RemoteError>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RemoteResult<T>>,
{
    breaker
        .call(move || async move { retry::execute(operation, policy, call).await.into_result() })
        .await
}
