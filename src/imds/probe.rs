//! # Instance identity probe.
//!
//! Blocks until the metadata service yields a non-empty instance id or the
//! attempt budget runs out. Early in boot the service is routinely
//! unreachable while networking comes up, so failures are silent retries;
//! only every Nth attempt logs a warning to keep boot logs readable.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::InitError;
use crate::imds::{Imds, INSTANCE_ID_ENDPOINT};

/// Attempt budget and pacing for the identity probe.
///
/// Defaults give the service ten minutes to come up: 600 attempts at 1 s
/// intervals, warning every 10th attempt. Tests shrink these.
#[derive(Clone, Copy, Debug)]
pub struct ProbePolicy {
    /// Maximum number of lookup attempts before giving up.
    pub max_attempts: u32,
    /// Sleep between attempts.
    pub interval: Duration,
    /// Log a warning every this many failed attempts.
    pub log_every: u32,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 600,
            interval: Duration::from_secs(1),
            log_every: 10,
        }
    }
}

/// Polls the metadata service until it returns a non-empty instance id.
///
/// Returns [`InitError::IdentityUnavailable`] when the budget is exhausted
/// or the token is cancelled (service manager shutdown during early boot).
pub async fn acquire_instance_id(
    imds: &dyn Imds,
    policy: &ProbePolicy,
    cancel: &CancellationToken,
) -> Result<String, InitError> {
    let mut last_failure = String::from("no attempt made");

    for attempt in 0..policy.max_attempts {
        match imds.get_property(INSTANCE_ID_ENDPOINT).await {
            Ok((id, 200)) if !id.trim().is_empty() => return Ok(id.trim().to_string()),
            Ok((_, 200)) => {
                last_failure = "an empty instance ID was returned".into();
            }
            Ok((_, status)) => {
                last_failure = format!("status {status} from instance-id endpoint");
            }
            Err(e) => {
                last_failure = e.to_string();
            }
        }

        if attempt % policy.log_every.max(1) == 0 {
            tracing::warn!(
                attempt,
                max_attempts = policy.max_attempts,
                interval_secs = policy.interval.as_secs(),
                last_failure = %last_failure,
                "unable to get instance ID - metadata service may not be available yet"
            );
        }

        tokio::select! {
            _ = tokio::time::sleep(policy.interval) => {}
            _ = cancel.cancelled() => {
                return Err(InitError::IdentityUnavailable {
                    attempts: attempt + 1,
                    reason: "probe cancelled".into(),
                });
            }
        }
    }

    Err(InitError::IdentityUnavailable {
        attempts: policy.max_attempts,
        reason: last_failure,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imds::ImdsError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyImds {
        calls: AtomicU32,
        succeed_after: u32,
    }

    #[async_trait]
    impl Imds for FlakyImds {
        async fn get_property(&self, _endpoint: &str) -> Result<(String, u16), ImdsError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.succeed_after {
                Err(ImdsError::Transport {
                    endpoint: INSTANCE_ID_ENDPOINT.into(),
                    reason: "connection refused".into(),
                })
            } else {
                Ok(("i-00000000000000001\n".into(), 200))
            }
        }
    }

    fn fast_policy(max_attempts: u32) -> ProbePolicy {
        ProbePolicy {
            max_attempts,
            interval: Duration::from_millis(1),
            log_every: 10,
        }
    }

    #[tokio::test]
    async fn returns_trimmed_id_once_available() {
        let imds = FlakyImds {
            calls: AtomicU32::new(0),
            succeed_after: 3,
        };
        let id = acquire_instance_id(&imds, &fast_policy(10), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(id, "i-00000000000000001");
        assert_eq!(imds.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn exhausts_budget_when_service_never_answers() {
        let imds = FlakyImds {
            calls: AtomicU32::new(0),
            succeed_after: u32::MAX,
        };
        let err = acquire_instance_id(&imds, &fast_policy(5), &CancellationToken::new())
            .await
            .unwrap_err();
        match &err {
            InitError::IdentityUnavailable { attempts, .. } => assert_eq!(*attempts, 5),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.exit_code(), 75);
        assert_eq!(imds.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn empty_id_keeps_retrying() {
        struct EmptyImds;
        #[async_trait]
        impl Imds for EmptyImds {
            async fn get_property(&self, _: &str) -> Result<(String, u16), ImdsError> {
                Ok((String::new(), 200))
            }
        }
        let err = acquire_instance_id(&EmptyImds, &fast_policy(3), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, InitError::IdentityUnavailable { .. }));
    }

    #[tokio::test]
    async fn cancellation_stops_the_probe() {
        let imds = FlakyImds {
            calls: AtomicU32::new(0),
            succeed_after: u32::MAX,
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let policy = ProbePolicy {
            max_attempts: 1000,
            interval: Duration::from_secs(60),
            log_every: 10,
        };
        let err = acquire_instance_id(&imds, &policy, &cancel).await.unwrap_err();
        assert!(matches!(err, InitError::IdentityUnavailable { .. }));
        assert_eq!(imds.calls.load(Ordering::SeqCst), 1);
    }
}
