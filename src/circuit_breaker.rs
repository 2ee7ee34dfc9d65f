use failsafe::{backoff, failure_policy, Config, StateMachine};
use std::time::Duration;

/// Breaker type guarding the completion backend.
pub type BackendBreaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>;

/// Number of consecutive backend failures that opens the breaker.
pub const FAILURE_THRESHOLD: u32 = 5;

/// Creates the circuit breaker for completion requests.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// While OPEN, requests fail fast; each affected table records an error
/// verdict instead of waiting on a backend that is known to be down.
pub fn create_backend_circuit_breaker() -> BackendBreaker {
    let backoff_strategy = backoff::exponential(Duration::from_secs(10), Duration::from_secs(60));

    let failure_policy = failure_policy::consecutive_failures(FAILURE_THRESHOLD, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use failsafe::futures::CircuitBreaker;
    use failsafe::Error;

    #[tokio::test]
    async fn test_circuit_breaker_opens_after_failures() {
        let cb = create_backend_circuit_breaker();

        for _ in 0..FAILURE_THRESHOLD {
            let result = cb.call(async { Err::<(), &str>("simulated error") }).await;
            assert!(result.is_err());
        }

        let result = cb.call(async { Ok::<(), &str>(()) }).await;

        match result {
            Err(Error::Rejected) => {}
            _ => panic!("Expected circuit to be open and reject requests"),
        }
    }

    #[tokio::test]
    async fn test_circuit_breaker_allows_success() {
        let cb = create_backend_circuit_breaker();

        let result = cb.call(async { Ok::<i32, &str>(42) }).await;

        assert_eq!(result.unwrap(), 42);
    }
}
