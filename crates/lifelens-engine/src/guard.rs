use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::ProviderError;

pub(crate) const POLL_SLICE: Duration = Duration::from_millis(25);

/// Shared cancellation flag. Cloning hands out another handle to the same flag.
///
/// A token may also carry a deadline; provider calls made under it never wait
/// past that instant.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            cancelled: Arc::default(),
            deadline: Some(deadline),
        }
    }

    /// `timeout`, shortened to what is left before the deadline.
    pub fn cap(&self, timeout: Duration) -> Duration {
        match self.deadline {
            Some(deadline) => timeout.min(deadline.saturating_duration_since(Instant::now())),
            None => timeout,
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Runs `job` on a worker thread and waits at most `timeout` for it.
///
/// The wait is capped by the token's deadline; once that has passed the job is
/// not started at all. On timeout or cancellation the worker is abandoned: it
/// keeps running until its own I/O returns, and whatever it sends afterwards is
/// dropped with the channel.
pub fn run_with_timeout<T, F>(
    provider: &str,
    timeout: Duration,
    cancel: &CancelToken,
    job: F,
) -> Result<T, ProviderError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ProviderError> + Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(ProviderError::Cancelled {
            provider: provider.to_string(),
        });
    }
    let timeout = cancel.cap(timeout);
    if timeout.is_zero() {
        return Err(ProviderError::Timeout {
            provider: provider.to_string(),
            timeout,
        });
    }

    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("lifelens-{provider}"))
        .spawn(move || {
            let _ = tx.send(job());
        })
        .map_err(|err| ProviderError::unavailable(provider, format!("worker spawn failed: {err}")))?;

    let started = Instant::now();
    loop {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled {
                provider: provider.to_string(),
            });
        }
        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return Err(ProviderError::Timeout {
                provider: provider.to_string(),
                timeout,
            });
        }
        let wait = (timeout - elapsed).min(POLL_SLICE);
        match rx.recv_timeout(wait) {
            Ok(outcome) => return outcome,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(ProviderError::Transport {
                    provider: provider.to_string(),
                    message: "worker exited without a result".to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::error::ProviderError;

    use super::{run_with_timeout, CancelToken};

    #[test]
    fn returns_job_result_when_fast() {
        let cancel = CancelToken::new();
        let value = run_with_timeout("fast", Duration::from_secs(2), &cancel, || Ok(7));
        assert_eq!(value, Ok(7));
    }

    #[test]
    fn slow_job_times_out_without_waiting_for_it() {
        let cancel = CancelToken::new();
        let started = Instant::now();
        let outcome: Result<(), ProviderError> =
            run_with_timeout("slow", Duration::from_millis(50), &cancel, || {
                thread::sleep(Duration::from_millis(800));
                Ok(())
            });
        assert!(outcome.is_err_and(|err| err.is_timeout()));
        assert!(started.elapsed() < Duration::from_millis(600));
    }

    #[test]
    fn cancelled_token_short_circuits() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = run_with_timeout("never", Duration::from_secs(1), &cancel, || Ok(1));
        assert_eq!(
            outcome,
            Err(ProviderError::Cancelled {
                provider: "never".to_string()
            })
        );
    }

    #[test]
    fn cancellation_mid_flight_abandons_worker() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(40));
            trigger.cancel();
        });
        let started = Instant::now();
        let outcome: Result<(), ProviderError> =
            run_with_timeout("stuck", Duration::from_secs(5), &cancel, || {
                thread::sleep(Duration::from_secs(2));
                Ok(())
            });
        assert!(matches!(outcome, Err(ProviderError::Cancelled { .. })));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn deadline_caps_the_per_call_timeout() {
        let cancel = CancelToken::with_deadline(Instant::now() + Duration::from_millis(60));
        assert!(cancel.cap(Duration::from_secs(30)) <= Duration::from_millis(60));
        let started = Instant::now();
        let outcome: Result<(), ProviderError> =
            run_with_timeout("hung", Duration::from_secs(30), &cancel, || {
                thread::sleep(Duration::from_secs(2));
                Ok(())
            });
        assert!(outcome.is_err_and(|err| err.is_timeout()));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn passed_deadline_skips_the_job() {
        let cancel = CancelToken::with_deadline(Instant::now());
        let started = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&started);
        let outcome = run_with_timeout("late", Duration::from_secs(5), &cancel, move || {
            flag.store(true, Ordering::SeqCst);
            Ok(1)
        });
        assert!(outcome.is_err_and(|err| err.is_timeout()));
        thread::sleep(Duration::from_millis(20));
        assert!(!started.load(Ordering::SeqCst));
    }

    #[test]
    fn panicking_job_reports_transport_failure() {
        let cancel = CancelToken::new();
        let outcome: Result<(), ProviderError> =
            run_with_timeout("boom", Duration::from_secs(1), &cancel, || panic!("boom"));
        assert!(matches!(outcome, Err(ProviderError::Transport { .. })));
    }
}
