use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::ClientSettings;
use crate::models::job::JobHandle;
use crate::models::status::{CompletedJob, PollOutcome, PollResponse};
use crate::services::retry::{Clock, FaultKind, RetryPolicy, RetryState, TokioClock};

/// Polls a job's status URL until it completes, fails, or runs out of budget.
pub struct StatusPoller<C = TokioClock> {
    http: Client,
    api_key: String,
    settings: ClientSettings,
    policy: RetryPolicy,
    clock: C,
}

/// Result of feeding one poll outcome into the state machine.
#[derive(Debug)]
enum Step {
    Done(Result<CompletedJob, PollError>),
    Wait(Duration),
}

impl StatusPoller<TokioClock> {
    pub fn new(http: Client, api_key: String, settings: ClientSettings) -> Self {
        Self::with_clock(http, api_key, settings, TokioClock)
    }
}

impl<C: Clock> StatusPoller<C> {
    pub fn with_clock(http: Client, api_key: String, settings: ClientSettings, clock: C) -> Self {
        let policy = RetryPolicy::escalating(
            settings.polling_timeout_attempts,
            settings.polling_interval,
            settings.max_consecutive_errors,
        );
        Self {
            http,
            api_key,
            settings,
            policy,
            clock,
        }
    }

    /// Poll the handle's target until a terminal outcome.
    pub async fn poll(&self, handle: &JobHandle) -> Result<CompletedJob, PollError> {
        self.poll_url(&handle.polling_url).await
    }

    pub async fn poll_url(&self, polling_url: &str) -> Result<CompletedJob, PollError> {
        let mut state = RetryState::new();

        while state.has_attempts_left(&self.policy) {
            let outcome = self.query(polling_url).await;
            let delay = match self.transition(outcome, &mut state, self.clock.now()) {
                Step::Done(result) => return result,
                Step::Wait(delay) => delay,
            };

            state.advance();
            if !state.has_attempts_left(&self.policy) {
                break;
            }
            self.clock.sleep(delay).await;
        }

        warn!(attempts = state.attempt, "Polling budget exhausted");
        Err(PollError::TimedOut {
            attempts: state.attempt,
        })
    }

    /// Issue a single status query.
    pub async fn query(&self, polling_url: &str) -> PollOutcome {
        let response = match self
            .http
            .get(polling_url)
            .header("x-key", &self.api_key)
            .timeout(self.settings.poll_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return PollOutcome::TransportError(FaultKind::from_reqwest(&err), err.to_string()),
        };

        let status = response.status();
        if !status.is_success() {
            return PollOutcome::TransportError(
                FaultKind::Status(status.as_u16()),
                format!("HTTP {status} while polling status"),
            );
        }

        match response.json::<PollResponse>().await {
            Ok(body) => PollOutcome::from(body),
            Err(err) => PollOutcome::TransportError(
                FaultKind::from_reqwest(&err),
                format!("undecodable status body: {err}"),
            ),
        }
    }

    fn transition(&self, outcome: PollOutcome, state: &mut RetryState, now: Instant) -> Step {
        let max = self.settings.polling_timeout_attempts;

        match outcome {
            PollOutcome::Completed(job) => {
                state.record_success();
                info!(
                    attempt = state.attempt + 1,
                    request_id = job.request_id.as_deref().unwrap_or("-"),
                    "Generation completed"
                );
                Step::Done(Ok(job))
            }
            PollOutcome::Failed(reason) => {
                warn!(attempt = state.attempt + 1, reason = %reason, "Remote service failed the job");
                Step::Done(Err(PollError::RemoteFailure { reason }))
            }
            PollOutcome::Pending | PollOutcome::Processing => {
                state.record_success();
                debug!(attempt = state.attempt + 1, max, "Job still processing");
                Step::Wait(self.settings.polling_interval)
            }
            PollOutcome::Unrecognized(status) => {
                state.record_success();
                warn!(attempt = state.attempt + 1, status = %status, "Unrecognized job status, still waiting");
                Step::Wait(self.settings.polling_interval)
            }
            PollOutcome::ContentModerated => {
                state.record_success();
                let window = state.record_moderation_check(now);
                let elapsed = now.saturating_duration_since(window.started_at);

                if elapsed >= self.settings.moderation_timeout
                    || window.checks >= self.settings.moderation_max_attempts
                {
                    warn!(
                        elapsed_ms = elapsed.as_millis() as u64,
                        checks = window.checks,
                        "Content moderation did not resolve in time"
                    );
                    return Step::Done(Err(PollError::ModerationTimedOut {
                        elapsed,
                        checks: window.checks,
                    }));
                }

                if window.checks == 1 {
                    info!("Content moderation in progress");
                } else if window.checks % 10 == 0 {
                    info!(
                        checks = window.checks,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Still moderating"
                    );
                }

                let remaining = self.settings.moderation_timeout - elapsed;
                Step::Wait(self.settings.moderation_interval.min(remaining))
            }
            PollOutcome::TransportError(fault, reason) => {
                let streak = state.record_fault();
                metrics::counter!("flux_poll_transport_errors_total", "fault" => fault.as_str())
                    .increment(1);

                if self.policy.should_abandon(streak) {
                    warn!(consecutive_errors = streak, error = %reason, "Too many consecutive errors, giving up");
                    return Step::Done(Err(PollError::Unreachable {
                        consecutive_errors: streak,
                        last_error: reason,
                    }));
                }

                let delay = self.policy.delay_for(fault, streak);
                if self.policy.is_escalated(streak) {
                    warn!(
                        consecutive_errors = streak,
                        fault = fault.as_str(),
                        delay_ms = delay.as_millis() as u64,
                        "Too many consecutive errors, increasing delay"
                    );
                } else {
                    warn!(
                        attempt = state.attempt + 1,
                        fault = fault.as_str(),
                        error = %reason,
                        "Status query failed"
                    );
                }
                Step::Wait(delay)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("Generation failed: {reason}")]
    RemoteFailure { reason: String },

    #[error("Generation timeout exceeded after {attempts} attempts")]
    TimedOut { attempts: u32 },

    #[error("Content moderation timeout after {:.1}s ({checks} checks)", .elapsed.as_secs_f64())]
    ModerationTimedOut { elapsed: Duration, checks: u32 },

    #[error("Status endpoint unreachable after {consecutive_errors} consecutive errors: {last_error}")]
    Unreachable {
        consecutive_errors: u32,
        last_error: String,
    },
}

impl PollError {
    /// Failures caused by the service being slow or unreachable, as opposed
    /// to the job itself being rejected.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TimedOut { .. } | Self::Unreachable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::status::JobResult;
    use crate::services::retry::ManualClock;

    fn settings() -> ClientSettings {
        ClientSettings {
            polling_interval: Duration::from_secs(5),
            polling_timeout_attempts: 50,
            max_consecutive_errors: 3,
            moderation_timeout: Duration::from_secs(10),
            moderation_max_attempts: 100,
            moderation_interval: Duration::from_secs(3),
            ..ClientSettings::default()
        }
    }

    fn poller(settings: ClientSettings) -> (StatusPoller<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let poller = StatusPoller::with_clock(Client::new(), "key".to_string(), settings, clock.clone());
        (poller, clock)
    }

    /// Drive the state machine over scripted outcomes, sleeping on the manual clock.
    fn drive(
        poller: &StatusPoller<ManualClock>,
        clock: &ManualClock,
        outcomes: impl IntoIterator<Item = PollOutcome>,
    ) -> (Option<Result<CompletedJob, PollError>>, RetryState) {
        let mut state = RetryState::new();
        for outcome in outcomes {
            match poller.transition(outcome, &mut state, clock.now()) {
                Step::Done(result) => return (Some(result), state),
                Step::Wait(delay) => {
                    state.advance();
                    clock.advance(delay);
                }
            }
        }
        (None, state)
    }

    fn timeout() -> PollOutcome {
        PollOutcome::TransportError(FaultKind::Timeout, "timed out".to_string())
    }

    #[test]
    fn test_processing_then_ready() {
        let (poller, clock) = poller(settings());
        let ready = CompletedJob {
            request_id: Some("job-1".to_string()),
            result: Some(JobResult {
                sample: Some("https://cdn.example/a.jpg".to_string()),
            }),
        };
        let (result, state) = drive(
            &poller,
            &clock,
            [PollOutcome::Pending, PollOutcome::Processing, PollOutcome::Completed(ready.clone())],
        );
        assert_eq!(result.unwrap().unwrap(), ready);
        assert_eq!(state.attempt, 2);
        assert_eq!(clock.elapsed(), Duration::from_secs(10));
    }

    #[test]
    fn test_failed_is_terminal_with_reason() {
        let (poller, clock) = poller(settings());
        let (result, _) = drive(&poller, &clock, [PollOutcome::Failed("nsfw input".to_string())]);
        match result.unwrap() {
            Err(PollError::RemoteFailure { reason }) => assert_eq!(reason, "nsfw input"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_success_resets_error_streak() {
        let (poller, clock) = poller(settings());
        let (result, state) = drive(&poller, &clock, [timeout(), timeout(), PollOutcome::Processing]);
        assert!(result.is_none());
        assert_eq!(state.consecutive_errors, 0);
    }

    #[test]
    fn test_escalates_then_abandons() {
        let (poller, _) = poller(settings());
        let mut state = RetryState::new();
        let mut delays = Vec::new();
        let now = Instant::now();

        let abandoned = loop {
            match poller.transition(timeout(), &mut state, now) {
                Step::Wait(delay) => delays.push(delay),
                Step::Done(result) => break result,
            }
        };

        // Threshold 3: two normal waits, three escalated, abandon at six.
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(5),
                Duration::from_secs(5),
                Duration::from_secs(30),
                Duration::from_secs(30),
                Duration::from_secs(30),
            ]
        );
        assert!(matches!(
            abandoned,
            Err(PollError::Unreachable { consecutive_errors: 6, .. })
        ));
    }

    #[test]
    fn test_connection_errors_wait_longer() {
        let (poller, _) = poller(settings());
        let mut state = RetryState::new();
        let connect = || PollOutcome::TransportError(FaultKind::Connect, "refused".to_string());
        let now = Instant::now();

        let first = poller.transition(connect(), &mut state, now);
        assert!(matches!(first, Step::Wait(d) if d == Duration::from_secs(10)));
        poller.transition(connect(), &mut state, now);
        let third = poller.transition(connect(), &mut state, now);
        assert!(matches!(third, Step::Wait(d) if d == Duration::from_secs(60)));
    }

    #[test]
    fn test_moderation_bounded_by_wall_clock() {
        let (poller, clock) = poller(settings());
        let (result, state) = drive(&poller, &clock, std::iter::repeat(PollOutcome::ContentModerated).take(100));

        match result.unwrap() {
            Err(PollError::ModerationTimedOut { elapsed, checks }) => {
                assert_eq!(elapsed, Duration::from_secs(10));
                // Sleeps of 3, 3, 3, then the clamped 1.
                assert_eq!(checks, 5);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(clock.elapsed() <= Duration::from_secs(10));
        assert_eq!(state.moderation.map(|w| w.checks), Some(5));
    }

    #[test]
    fn test_moderation_bounded_by_checks() {
        let (poller, clock) = poller(ClientSettings {
            moderation_timeout: Duration::from_secs(3600),
            moderation_max_attempts: 4,
            ..settings()
        });
        let (result, _) = drive(&poller, &clock, std::iter::repeat(PollOutcome::ContentModerated).take(100));
        assert!(matches!(
            result.unwrap(),
            Err(PollError::ModerationTimedOut { checks: 4, .. })
        ));
    }

    #[test]
    fn test_unrecognized_status_keeps_waiting() {
        let (poller, clock) = poller(settings());
        let (result, state) = drive(
            &poller,
            &clock,
            [timeout(), PollOutcome::Unrecognized("Queued".to_string())],
        );
        assert!(result.is_none());
        assert_eq!(state.consecutive_errors, 0);
        assert_eq!(clock.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_attempt_cap_against_unreachable_host() {
        let (poller, clock) = poller(ClientSettings {
            polling_timeout_attempts: 4,
            max_consecutive_errors: 10,
            ..settings()
        });
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/status", listener.local_addr().unwrap());
        drop(listener);

        let err = poller.poll_url(&url).await.unwrap_err();
        assert!(matches!(err, PollError::TimedOut { attempts: 4 }));
        assert!(err.is_transient());
        // No sleep after the final attempt.
        assert_eq!(clock.sleeps().len(), 3);
    }

    #[tokio::test]
    async fn test_hung_status_endpoint_times_out_per_query() {
        let (poller, _) = poller(ClientSettings {
            timeout: Duration::from_secs(600),
            poll_timeout: Duration::from_millis(200),
            ..settings()
        });
        // Accepts connections but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/status", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let started = Instant::now();
        let outcome = poller.query(&url).await;
        server.abort();

        assert!(
            matches!(outcome, PollOutcome::TransportError(FaultKind::Timeout, _)),
            "unexpected outcome: {outcome:?}"
        );
        assert!(started.elapsed() < Duration::from_secs(30));
    }
}
