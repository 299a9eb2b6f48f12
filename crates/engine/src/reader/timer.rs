use std::{
    fs::File,
    io::Write,
    sync::{Arc, Mutex},
    time::Instant,
};

use async_trait::async_trait;
use chrono::Local;
use fanfetch_types::{Env, Request, Response};
use regex::Regex;
use tracing::{info, warn};

use super::ResponseReader;
use crate::error::ReaderError;

/// Measures wall-clock latency of the wrapped reader.
///
/// Every timed call emits a `fanfetch::timer` event. When a log file is
/// configured a tab-separated line is appended as well:
/// `[start]\ttag\tnanos\tduration\tstatus`.
pub struct TimerReader {
    rest: Arc<dyn ResponseReader>,
    tag_pattern: Option<Regex>,
    log: Mutex<Option<File>>,
}

impl TimerReader {
    pub fn new(rest: Arc<dyn ResponseReader>, tag_pattern: Option<Regex>, log: Option<File>) -> Self {
        Self {
            rest,
            tag_pattern,
            log: Mutex::new(log),
        }
    }

    fn times(&self, tag: &str) -> bool {
        self.tag_pattern.as_ref().is_none_or(|pattern| pattern.is_match(tag))
    }

    fn append_line(&self, line: &str) {
        let Ok(mut guard) = self.log.lock() else {
            return;
        };
        if let Some(file) = guard.as_mut()
            && let Err(error) = file.write_all(line.as_bytes())
        {
            warn!(error = %error, "cannot append timer log line");
        }
    }
}

#[async_trait]
impl ResponseReader for TimerReader {
    async fn read_response(&self, request: &Request, env: &Env) -> Result<(Response, Env), ReaderError> {
        if !self.times(&request.tag) {
            return self.rest.read_response(request, env).await;
        }

        let started_at = Local::now();
        let start = Instant::now();
        let outcome = self.rest.read_response(request, env).await;
        let elapsed = start.elapsed();
        let status = outcome.as_ref().map(|(response, _)| response.status).ok();

        info!(
            target: "fanfetch::timer",
            tag = %request.tag,
            elapsed_ns = elapsed.as_nanos() as u64,
            status = ?status,
            "request timed"
        );
        let status_text = status.map_or_else(|| "error".to_string(), |code| code.to_string());
        self.append_line(&format!(
            "[{}]\t{}\t{}\t{:?}\tStatus{}\n",
            started_at.format("%Y-%m-%d %H:%M:%S%.3f"),
            request.tag,
            elapsed.as_nanos(),
            elapsed,
            status_text
        ));

        outcome
    }

    fn close(&self) -> Result<(), ReaderError> {
        let flushed = match self.log.lock() {
            Ok(mut guard) => match guard.take() {
                Some(mut file) => file.flush(),
                None => Ok(()),
            },
            Err(_) => Ok(()),
        };
        let closed = self.rest.close();
        flushed.map_err(|source| ReaderError::Io {
            plugin: "timer".into(),
            source,
        })?;
        closed
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs::OpenOptions,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use fanfetch_types::HttpMethod;

    use super::*;

    struct Echo {
        closes: AtomicUsize,
    }

    #[async_trait]
    impl ResponseReader for Echo {
        async fn read_response(&self, _request: &Request, _env: &Env) -> Result<(Response, Env), ReaderError> {
            Ok((Response::new(202, "ok"), Env::from_pairs([("seen", "yes")])))
        }

        fn close(&self) -> Result<(), ReaderError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn echo() -> Arc<Echo> {
        Arc::new(Echo {
            closes: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn timed_calls_are_logged_and_unchanged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("timer.log");
        let file = OpenOptions::new().create(true).append(true).open(&path).expect("open");
        let rest = echo();
        let timer = TimerReader::new(rest.clone(), None, Some(file));

        let request = Request::new("list-items", HttpMethod::Get, "http://localhost/");
        let (response, update) = timer.read_response(&request, &Env::empty()).await.expect("read");
        timer.close().expect("close");

        assert_eq!(response, Response::new(202, "ok"));
        assert_eq!(update.get("seen"), Some("yes"));
        assert_eq!(rest.closes.load(Ordering::SeqCst), 1);

        let log = std::fs::read_to_string(&path).expect("read log");
        let fields: Vec<&str> = log.trim_end().split('\t').collect();
        assert_eq!(fields.len(), 5);
        assert_eq!(fields[1], "list-items");
        assert_eq!(fields[4], "Status202");
    }

    #[tokio::test]
    async fn unmatched_tags_are_not_timed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("timer.log");
        let file = File::create(&path).expect("create");
        let timer = TimerReader::new(echo(), Some(Regex::new("^slow$").expect("regex")), Some(file));

        let request = Request::new("fast", HttpMethod::Get, "http://localhost/");
        timer.read_response(&request, &Env::empty()).await.expect("read");
        timer.close().expect("close");

        assert!(std::fs::read_to_string(&path).expect("read log").is_empty());
    }
}
