// src/api_handler.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, RETRY_AFTER, USER_AGENT};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::query_builder::QuerySpec;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Shared flag that aborts in-flight and pending fetches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("HTTP {status}: {body}")]
    Status {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },
    #[error("{0}")]
    Other(String),
    #[error("cancelled")]
    Cancelled,
}

impl TransportError {
    /// Timeouts, connection failures, rate limiting and server errors may
    /// succeed on a later attempt; everything else will not.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Timeout | TransportError::Connect(_) => true,
            TransportError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            TransportError::Other(_) | TransportError::Cancelled => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            TransportError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// A tabular data endpoint: takes a structured query, returns CSV text.
pub trait DataService: Send + Sync {
    fn fetch(&self, spec: &QuerySpec, cancel: &CancelToken) -> Result<String, TransportError>;
}

/// Bounded retry on transient transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        RetryPolicy {
            max_retries: config.max_retries,
            base_delay: config.retry_delay(),
        }
    }

    fn delay(&self, attempt: u32, err: &TransportError) -> Duration {
        err.retry_after()
            .unwrap_or(self.base_delay * attempt)
            .min(MAX_BACKOFF)
    }
}

/// Failure of a retried fetch together with the number of attempts made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub error: TransportError,
    pub attempts: u32,
}

/// Runs `spec` through `service`, retrying transient failures. A successful
/// response is returned as-is even when it holds no rows.
pub fn fetch_with_retry(
    service: &dyn DataService,
    spec: &QuerySpec,
    cancel: &CancelToken,
    policy: RetryPolicy,
) -> Result<String, FetchFailure> {
    let mut attempts = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(FetchFailure {
                error: TransportError::Cancelled,
                attempts,
            });
        }
        attempts += 1;

        match service.fetch(spec, cancel) {
            Ok(body) => return Ok(body),
            Err(error) if error.is_transient() && attempts <= policy.max_retries => {
                let wait = policy.delay(attempts, &error);
                warn!(
                    "{} failed ({}); retrying in {:?} (attempt {} of {})",
                    spec,
                    error,
                    wait,
                    attempts + 1,
                    policy.max_retries + 1
                );
                sleep_unless_cancelled(wait, cancel);
            }
            Err(error) => return Err(FetchFailure { error, attempts }),
        }
    }
}

fn sleep_unless_cancelled(wait: Duration, cancel: &CancelToken) {
    let deadline = Instant::now() + wait;
    while !cancel.is_cancelled() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

/// `DataService` over the IMPC Solr HTTP API.
#[derive(Debug, Clone)]
pub struct ApiHandler {
    client: Client,
    base_url: String,
}

impl ApiHandler {
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/csv"));
        let agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|e| TransportError::Other(format!("invalid user agent: {}", e)))?;
        headers.insert(USER_AGENT, agent);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self, spec: &QuerySpec) -> String {
        format!("{}/{}/select", self.base_url, spec.core().path())
    }

    /// One blocking request, bounded by the client timeout.
    fn get_csv(&self, spec: &QuerySpec) -> Result<String, TransportError> {
        let url = self.endpoint(spec);
        let params = spec.params();
        debug!("GET {} {:?}", url, params);

        let response = self.client.get(&url).query(&params).send().map_err(classify)?;
        let status = response.status();

        if status.is_success() {
            return response.text().map_err(classify);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
            retry_after,
        })
    }
}

impl DataService for ApiHandler {
    /// The request runs on a worker thread while this thread watches the
    /// cancel token; a cancelled request's late response is discarded.
    fn fetch(&self, spec: &QuerySpec, cancel: &CancelToken) -> Result<String, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let (tx, rx) = mpsc::channel();
        let handler = self.clone();
        let spec = spec.clone();
        thread::spawn(move || {
            let _ = tx.send(handler.get_csv(&spec));
        });

        loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) => {
                    if cancel.is_cancelled() {
                        warn!("Request cancelled while in flight");
                        return Err(TransportError::Cancelled);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TransportError::Other(
                        "request worker exited without a response".to_string(),
                    ))
                }
            }
        }
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PhenotypeSelection;
    use crate::query_builder::QueryBuilder;
    use std::net::TcpListener;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<Result<String, TransportError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(mut replies: Vec<Result<String, TransportError>>) -> Self {
            replies.reverse();
            Scripted {
                replies: Mutex::new(replies),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl DataService for Scripted {
        fn fetch(&self, _spec: &QuerySpec, _cancel: &CancelToken) -> Result<String, TransportError> {
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(TransportError::Other("script exhausted".to_string())))
        }
    }

    fn spec() -> QuerySpec {
        QueryBuilder::default()
            .experiment_query(&PhenotypeSelection {
                parameter_stable_id: "IMPC_HEM_002_001".to_string(),
                colony_id: "MEBV".to_string(),
            })
            .unwrap()
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn retries_transient_failures_up_to_the_limit() {
        let service = Scripted::new(vec![
            Err(TransportError::Timeout),
            Err(TransportError::Status { status: 503, body: String::new(), retry_after: None }),
            Ok("a,b\n1,2\n".to_string()),
        ]);
        let body = fetch_with_retry(&service, &spec(), &CancelToken::new(), fast_policy()).unwrap();
        assert_eq!(body, "a,b\n1,2\n");
        assert_eq!(service.calls(), 3);

        let service = Scripted::new(vec![
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
            Ok(String::new()),
        ]);
        let failure = fetch_with_retry(&service, &spec(), &CancelToken::new(), fast_policy()).unwrap_err();
        assert_eq!(failure.error, TransportError::Timeout);
        assert_eq!(failure.attempts, 3);
    }

    #[test]
    fn does_not_retry_client_errors_or_empty_tables() {
        let service = Scripted::new(vec![Err(TransportError::Status {
            status: 400,
            body: "undefined field".to_string(),
            retry_after: None,
        })]);
        let failure = fetch_with_retry(&service, &spec(), &CancelToken::new(), fast_policy()).unwrap_err();
        assert_eq!(failure.attempts, 1);

        let service = Scripted::new(vec![Ok("a,b\n".to_string())]);
        assert_eq!(
            fetch_with_retry(&service, &spec(), &CancelToken::new(), fast_policy()).unwrap(),
            "a,b\n"
        );
        assert_eq!(service.calls(), 1);
    }

    #[test]
    fn cancelled_token_stops_before_any_request() {
        let service = Scripted::new(vec![Ok("a\n".to_string())]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let failure = fetch_with_retry(&service, &spec(), &cancel, fast_policy()).unwrap_err();
        assert_eq!(failure.error, TransportError::Cancelled);
        assert_eq!(service.calls(), 0);
    }

    #[test]
    fn rate_limit_delay_is_capped() {
        let err = TransportError::Status {
            status: 429,
            body: String::new(),
            retry_after: Some(Duration::from_secs(600)),
        };
        assert!(err.is_transient());
        assert_eq!(fast_policy().delay(1, &err), MAX_BACKOFF);
        assert_eq!(fast_policy().delay(2, &TransportError::Timeout), Duration::from_millis(2));
    }

    #[test]
    fn endpoint_targets_the_query_core() {
        let config = Config {
            base_url: "http://localhost:8983/solr/".to_string(),
            ..Config::default()
        };
        let handler = ApiHandler::new(&config).unwrap();
        assert_eq!(handler.endpoint(&spec()), "http://localhost:8983/solr/experiment/select");
    }

    #[test]
    fn cancelling_abandons_a_request_in_flight() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accept the connection and never answer.
        thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                thread::sleep(Duration::from_secs(10));
                drop(stream);
            }
        });

        let config = Config {
            base_url: format!("http://127.0.0.1:{}", port),
            timeout_secs: 30,
            ..Config::default()
        };
        let handler = ApiHandler::new(&config).unwrap();
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            trigger.cancel();
        });

        let started = Instant::now();
        assert_eq!(handler.fetch(&spec(), &cancel), Err(TransportError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
