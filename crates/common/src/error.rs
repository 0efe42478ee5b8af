use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::PositionStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Exchange API error: {0}")]
    Exchange(String),

    #[error("Market data unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The venue explicitly refused the order. Nothing was traded.
    #[error("Order rejected: {reason}")]
    OrderRejected { reason: String },

    /// The venue answered but did not report a fill.
    #[error("Order not confirmed: {0}")]
    OrderUnconfirmed(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Invalid position transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: Option<PositionStatus>,
        to: Option<PositionStatus>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True when an order may or may not have been executed. Such errors must
    /// never be treated as success, nor retried blindly as a fresh order.
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. } | Error::Http(_) | Error::OrderUnconfirmed(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Run a gateway call under a deadline. An elapsed deadline becomes
/// `Error::Timeout`, which callers treat as an unknown outcome.
pub async fn with_timeout<T, F>(operation: &'static str, after: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout { operation, after }),
    }
}

/// Run `op` up to `attempts` times, sleeping `backoff(n)` after the n-th
/// failure. The last error is returned once the attempts run out.
pub async fn with_retry<T, F, Fut, B>(
    operation: &'static str,
    attempts: u32,
    backoff: B,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    B: Fn(u32) -> Duration,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!(operation, attempt, attempts, error = %e, "Retrying");
                tokio::time::sleep(backoff(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguity_classification() {
        assert!(Error::Timeout {
            operation: "order",
            after: Duration::from_secs(1)
        }
        .is_ambiguous());
        assert!(Error::Http("connection reset".into()).is_ambiguous());
        assert!(Error::OrderUnconfirmed("status new".into()).is_ambiguous());
        assert!(!Error::OrderRejected {
            reason: "insufficient balance".into()
        }
        .is_ambiguous());
        assert!(!Error::Unavailable("no ticker".into()).is_ambiguous());
    }

    #[tokio::test]
    async fn with_timeout_maps_elapsed_deadline() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, Error>(1)
        };
        let err = with_timeout("price", Duration::from_millis(10), slow)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { operation: "price", .. }));

        let fast = async { Ok::<_, Error>(7) };
        assert_eq!(
            with_timeout("price", Duration::from_secs(1), fast).await.unwrap(),
            7
        );
    }

    #[tokio::test]
    async fn with_retry_stops_at_first_success() {
        let mut calls = 0;
        let value = with_retry("write", 5, |_| Duration::from_millis(1), || {
            calls += 1;
            let n = calls;
            async move {
                if n < 3 {
                    Err(Error::Other("busy".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn with_retry_gives_up_with_the_last_error() {
        let mut calls = 0u32;
        let err = with_retry("write", 2, |_| Duration::from_millis(1), || {
            calls += 1;
            let n = calls;
            async move { Err::<(), _>(Error::Other(format!("failure {n}"))) }
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "failure 2");
        assert_eq!(calls, 2);
    }
}
