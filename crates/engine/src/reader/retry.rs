use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use fanfetch_types::{Env, Request, Response};
use rand::Rng;
use tracing::{debug, warn};

use super::ResponseReader;
use crate::error::ReaderError;

pub const DEFAULT_RETRY_STATUSES: &[u16] = &[500];
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
const MIN_BACKOFF: Duration = Duration::from_secs(1);

/// Re-issues a request while the response status is in `retry_on`.
///
/// Each retry sleeps a random duration in `[0, max_wait)`, never less than one
/// second. `max_attempts` counts the first call; `0` retries until a
/// non-triggering status arrives. When attempts run out the last response is
/// returned as-is.
pub struct RetryReader {
    rest: Arc<dyn ResponseReader>,
    retry_on: Vec<u16>,
    max_wait: Duration,
    max_attempts: u32,
}

impl RetryReader {
    pub fn new(rest: Arc<dyn ResponseReader>, retry_on: Vec<u16>, max_wait: Duration, max_attempts: u32) -> Self {
        Self {
            rest,
            retry_on,
            max_wait,
            max_attempts,
        }
    }

    fn should_retry(&self, response: &Response) -> bool {
        self.retry_on.contains(&response.status)
    }

    fn attempts_left(&self, attempts: u32) -> bool {
        self.max_attempts == 0 || attempts < self.max_attempts
    }

    fn backoff(&self) -> Duration {
        let bound = u64::try_from(self.max_wait.as_nanos()).unwrap_or(u64::MAX);
        let wait = if bound == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(rand::thread_rng().gen_range(0..bound))
        };
        wait.max(MIN_BACKOFF)
    }
}

#[async_trait]
impl ResponseReader for RetryReader {
    async fn read_response(&self, request: &Request, env: &Env) -> Result<(Response, Env), ReaderError> {
        let mut attempts = 1;
        let mut outcome = self.rest.read_response(request, env).await?;

        while self.should_retry(&outcome.0) {
            if !self.attempts_left(attempts) {
                warn!(
                    tag = %request.tag,
                    status = outcome.0.status,
                    attempts,
                    "retry attempts exhausted, returning last response"
                );
                break;
            }
            let wait = self.backoff();
            debug!(
                tag = %request.tag,
                status = outcome.0.status,
                attempt = attempts,
                wait_ms = wait.as_millis() as u64,
                "retrying request"
            );
            tokio::time::sleep(wait).await;
            attempts += 1;
            outcome = self.rest.read_response(request, env).await?;
        }

        Ok(outcome)
    }

    fn close(&self) -> Result<(), ReaderError> {
        self.rest.close()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use fanfetch_types::HttpMethod;

    use super::*;

    /// Replays a fixed status sequence, repeating the last one forever.
    struct Scripted {
        statuses: Vec<u16>,
        calls: AtomicUsize,
        closes: AtomicUsize,
        seen_at: Mutex<Vec<tokio::time::Instant>>,
    }

    impl Scripted {
        fn new(statuses: &[u16]) -> Arc<Self> {
            Arc::new(Self {
                statuses: statuses.to_vec(),
                calls: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                seen_at: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ResponseReader for Scripted {
        async fn read_response(&self, _request: &Request, _env: &Env) -> Result<(Response, Env), ReaderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_at.lock().expect("lock").push(tokio::time::Instant::now());
            let status = self.statuses.get(call).or(self.statuses.last()).copied().unwrap_or(200);
            Ok((Response::status_only(status), Env::empty()))
        }

        fn close(&self) -> Result<(), ReaderError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn request() -> Request {
        Request::new("flaky", HttpMethod::Get, "http://localhost/")
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_a_non_triggering_status() {
        let rest = Scripted::new(&[500, 500, 200]);
        let reader = RetryReader::new(rest.clone(), vec![500], Duration::from_millis(100), 0);

        let (response, _) = reader.read_response(&request(), &Env::empty()).await.expect("read");
        assert_eq!(response.status, 200);
        assert_eq!(rest.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_never_drops_below_one_second() {
        let rest = Scripted::new(&[503, 200]);
        let reader = RetryReader::new(rest.clone(), vec![503], Duration::from_millis(10), 0);

        reader.read_response(&request(), &Env::empty()).await.expect("read");
        let seen = rest.seen_at.lock().expect("lock").clone();
        assert_eq!(seen.len(), 2);
        assert!(seen[1] - seen[0] >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_return_the_last_response() {
        let rest = Scripted::new(&[500]);
        let reader = RetryReader::new(rest.clone(), vec![500], Duration::from_secs(2), 3);

        let (response, _) = reader.read_response(&request(), &Env::empty()).await.expect("read");
        assert_eq!(response.status, 500);
        assert_eq!(rest.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn untriggered_statuses_pass_straight_through() {
        let rest = Scripted::new(&[404]);
        let reader = RetryReader::new(rest.clone(), DEFAULT_RETRY_STATUSES.to_vec(), DEFAULT_MAX_WAIT, DEFAULT_MAX_ATTEMPTS);

        let (response, _) = reader.read_response(&request(), &Env::empty()).await.expect("read");
        assert_eq!(response.status, 404);
        assert_eq!(rest.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_is_forwarded_once() {
        let rest = Scripted::new(&[200]);
        RetryReader::new(rest.clone(), DEFAULT_RETRY_STATUSES.to_vec(), DEFAULT_MAX_WAIT, DEFAULT_MAX_ATTEMPTS).close().expect("close");
        assert_eq!(rest.closes.load(Ordering::SeqCst), 1);
    }
}
