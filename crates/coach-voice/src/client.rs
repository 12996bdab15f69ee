//! Shared call contract for the transcription, response, and synthesis adapters.
//!
//! Every backend call runs under a timeout, is retried at most once on
//! network failures or timeouts, and stops as soon as its cancellation token
//! fires. A cancelled call yields nothing at all.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Failure reported by a backend adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("service error: {0}")]
    Service(String),
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Timeout | ClientError::Network(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_connect() || err.is_request() || err.is_body() {
            ClientError::Network(err.to_string())
        } else {
            ClientError::Service(err.to_string())
        }
    }
}

/// Timeout and retry policy for one kind of call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub retry_backoff: Duration,
    pub max_retries: u32,
}

impl CallPolicy {
    pub fn new(timeout: Duration, retry_backoff: Duration) -> Self {
        Self {
            timeout,
            retry_backoff,
            max_retries: 1,
        }
    }
}

fn default_transcription_ms() -> u64 {
    15_000
}

fn default_response_ms() -> u64 {
    30_000
}

fn default_synthesis_ms() -> u64 {
    60_000
}

fn default_backoff_ms() -> u64 {
    500
}

/// Per-client timeouts. Response and synthesis run longer than transcription.
/// For synthesis the limit applies to the first chunk and to every gap between
/// chunks, so a long reply can stream for as long as it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTimeouts {
    #[serde(default = "default_transcription_ms")]
    pub transcription_ms: u64,
    #[serde(default = "default_response_ms")]
    pub response_ms: u64,
    #[serde(default = "default_synthesis_ms")]
    pub synthesis_ms: u64,
    #[serde(default = "default_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            transcription_ms: default_transcription_ms(),
            response_ms: default_response_ms(),
            synthesis_ms: default_synthesis_ms(),
            retry_backoff_ms: default_backoff_ms(),
        }
    }
}

impl ClientTimeouts {
    pub fn transcription(&self) -> CallPolicy {
        self.policy(self.transcription_ms)
    }

    pub fn response(&self) -> CallPolicy {
        self.policy(self.response_ms)
    }

    pub fn synthesis(&self) -> CallPolicy {
        self.policy(self.synthesis_ms)
    }

    fn policy(&self, timeout_ms: u64) -> CallPolicy {
        CallPolicy::new(
            Duration::from_millis(timeout_ms),
            Duration::from_millis(self.retry_backoff_ms),
        )
    }
}

/// Run `attempt` under `policy`.
///
/// Returns `None` when `cancel` fired before a result was produced; the
/// caller must then deliver nothing.
pub async fn call_with_retry<T, F, Fut>(
    policy: &CallPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut attempt: F,
) -> Option<Result<T, ClientError>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let limit = policy.timeout;
    retry_while(policy, cancel, label, || true, || {
        let call = attempt();
        async move {
            tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(ClientError::Timeout))
        }
    })
    .await
}

/// Like [`call_with_retry`], except that `attempt` enforces its own time
/// limits and a retryable failure is only retried while `may_retry` holds.
pub async fn retry_while<T, F, Fut, R>(
    policy: &CallPolicy,
    cancel: &CancellationToken,
    label: &str,
    may_retry: R,
    mut attempt: F,
) -> Option<Result<T, ClientError>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
    R: Fn() -> bool,
{
    let mut tries = 0u32;
    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            res = attempt() => res,
        };

        match outcome {
            Err(err) if err.is_retryable() && tries < policy.max_retries && may_retry() => {
                tries += 1;
                warn!("{} failed ({}), retrying in {:?}", label, err, policy.retry_backoff);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(policy.retry_backoff) => {}
                }
            }
            other => {
                if cancel.is_cancelled() {
                    debug!("{} finished after cancellation, dropping result", label);
                    return None;
                }
                return Some(other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy() -> CallPolicy {
        CallPolicy::new(Duration::from_millis(100), Duration::from_millis(10))
    }

    #[tokio::test(start_paused = true)]
    async fn network_failure_retries_once_then_surfaces() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let c = Arc::clone(&calls);
        let out: Option<Result<(), ClientError>> = call_with_retry(&policy(), &cancel, "test", || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::Network("reset".into()))
            }
        })
        .await;
        assert_eq!(out, Some(Err(ClientError::Network("reset".into()))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn service_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let c = Arc::clone(&calls);
        let out: Option<Result<(), ClientError>> = call_with_retry(&policy(), &cancel, "test", || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::Service("500".into()))
            }
        })
        .await;
        assert_eq!(out, Some(Err(ClientError::Service("500".into()))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out_and_recovers_on_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let c = Arc::clone(&calls);
        let out = call_with_retry(&policy(), &cancel, "test", || {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok::<_, ClientError>("done")
            }
        })
        .await;
        assert_eq!(out, Some(Ok("done")));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_call_yields_nothing() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let out = call_with_retry(&policy(), &cancel, "test", || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, ClientError>(1)
        })
        .await;
        assert!(out.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_is_skipped_when_not_allowed() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let c = Arc::clone(&calls);
        let out: Option<Result<(), ClientError>> =
            retry_while(&policy(), &cancel, "test", || false, || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(ClientError::Timeout)
                }
            })
            .await;
        assert_eq!(out, Some(Err(ClientError::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timeouts_order() {
        let t = ClientTimeouts::default();
        assert!(t.response().timeout > t.transcription().timeout);
        assert!(t.synthesis().timeout > t.transcription().timeout);
    }
}
