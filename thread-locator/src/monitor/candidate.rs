//! Polling state machine for a single candidate thread.
//!
//! A `CandidateMonitor` owns its whole lifecycle: it waits for its turn in
//! the [`RequestQueue`], fetches the candidate with the freshness token of
//! the previous response, judges the payload and either settles or sleeps
//! until the next attempt. It runs as its own task and is stopped through the
//! [`MonitorHandle`] returned alongside it.
//!
//! # States
//!
//! `Requesting -> Scheduled -> Requesting -> ...` until one of the terminal
//! states `Found`, `Exhausted`, `Dropped` or `Stopped` is reached.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use imageboard_api::{ThreadId, ThreadPayload};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::events::{MonitorEvent, MonitorEventBroadcaster};
use super::request_queue::RequestQueue;
use super::source::{FetchFailure, FetchOutcome, ThreadSource};
use crate::discovery::KeywordMatcher;

/// Why a candidate was given up on without being exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    /// The opening post does not match the keywords.
    OffTopic,
    /// The thread was pruned or never existed.
    NotFound,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::OffTopic => write!(f, "off topic"),
            DropReason::NotFound => write!(f, "thread not found"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Waiting for a queue slot or for the response.
    Requesting,
    /// Waiting out the update interval before the next attempt.
    Scheduled,
    Found,
    Exhausted,
    Dropped(DropReason),
    Stopped,
}

impl MonitorState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MonitorState::Requesting | MonitorState::Scheduled)
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorState::Requesting => write!(f, "requesting"),
            MonitorState::Scheduled => write!(f, "scheduled"),
            MonitorState::Found => write!(f, "found"),
            MonitorState::Exhausted => write!(f, "exhausted"),
            MonitorState::Dropped(reason) => write!(f, "dropped ({})", reason),
            MonitorState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Observable state of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorStatus {
    pub state: MonitorState,
    /// Fetches issued so far. Never decreases.
    pub attempts: u32,
    /// The opening post passed the keyword check. Never reset.
    pub validated: bool,
}

impl Default for MonitorStatus {
    fn default() -> Self {
        Self {
            state: MonitorState::Requesting,
            attempts: 0,
            validated: false,
        }
    }
}

/// Settings shared by every monitor of one engine run.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Delay between the end of one attempt and the next.
    pub update_interval: Duration,
    /// Upper bound on a released fetch.
    pub request_timeout: Duration,
    /// Maximum number of fetches, `0` for unlimited.
    pub retry_limit: u32,
    pub keywords: KeywordMatcher,
    /// Image MD5 marking the successor thread.
    pub marker: String,
}

/// Invoked once with the candidate id when the marker is found.
pub type FoundCallback = Box<dyn FnOnce(ThreadId) + Send + 'static>;

/// Handle for stopping and observing a running monitor.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    id: ThreadId,
    token: CancellationToken,
    status: watch::Receiver<MonitorStatus>,
}

impl MonitorHandle {
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Cancel any scheduled attempt and abort any in-flight fetch.
    ///
    /// Safe to call any number of times, from any state.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn status(&self) -> MonitorStatus {
        *self.status.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.status().state.is_terminal()
    }

    /// Receiver that is notified on every status change.
    pub fn watch(&self) -> watch::Receiver<MonitorStatus> {
        self.status.clone()
    }
}

enum Step {
    Retry(String),
    Finish(MonitorState),
}

pub struct CandidateMonitor {
    id: ThreadId,
    source: Arc<dyn ThreadSource>,
    queue: RequestQueue,
    settings: Arc<MonitorSettings>,
    events: MonitorEventBroadcaster,
    token: CancellationToken,
    status_tx: watch::Sender<MonitorStatus>,
    callbacks: Vec<FoundCallback>,
    state: MonitorState,
    attempts: u32,
    validated: bool,
    /// `Last-Modified` of the last fresh response.
    last_modified: Option<String>,
}

impl CandidateMonitor {
    pub fn new(
        id: ThreadId,
        source: Arc<dyn ThreadSource>,
        queue: RequestQueue,
        settings: Arc<MonitorSettings>,
        events: MonitorEventBroadcaster,
        token: CancellationToken,
    ) -> (Self, MonitorHandle) {
        let (status_tx, status_rx) = watch::channel(MonitorStatus::default());
        let handle = MonitorHandle {
            id,
            token: token.clone(),
            status: status_rx,
        };
        let monitor = Self {
            id,
            source,
            queue,
            settings,
            events,
            token,
            status_tx,
            callbacks: Vec::new(),
            state: MonitorState::Requesting,
            attempts: 0,
            validated: false,
            last_modified: None,
        };
        (monitor, handle)
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Register a callback for the `Found` transition.
    pub fn on_found<F>(&mut self, callback: F)
    where
        F: FnOnce(ThreadId) + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    /// Poll until a terminal state is reached. Returns the final status.
    pub async fn run(mut self) -> MonitorStatus {
        debug!("CandidateMonitor {} starting", self.id);
        self.events.publish(MonitorEvent::Started {
            thread_id: self.id,
            timestamp: Utc::now(),
        });

        let terminal = loop {
            let limit = self.settings.retry_limit;
            if limit > 0 && self.attempts >= limit {
                break MonitorState::Exhausted;
            }

            if self.attempts > 0 {
                self.set_state(MonitorState::Scheduled);
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => break MonitorState::Stopped,
                    _ = tokio::time::sleep(self.settings.update_interval) => {}
                }
            }

            self.set_state(MonitorState::Requesting);
            let ticket = self.queue.ticket();
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break MonitorState::Stopped,
                released = ticket => {
                    if released.is_err() {
                        // Queue stopped under us.
                        break MonitorState::Stopped;
                    }
                }
            }

            trace!(thread = %self.id, attempt = self.attempts + 1, "Fetching candidate");

            let since = self.last_modified.clone();
            let fetch = tokio::time::timeout(
                self.settings.request_timeout,
                self.source.fetch(self.id, since.as_deref()),
            );
            let outcome = tokio::select! {
                biased;
                _ = self.token.cancelled() => break MonitorState::Stopped,
                result = fetch => result.unwrap_or(FetchOutcome::Failed(FetchFailure::Timeout)),
            };

            // Only settled fetches count; an aborted one leaves the counter alone.
            self.attempts += 1;
            self.publish_status();

            match self.evaluate(outcome) {
                Step::Finish(state) => break state,
                Step::Retry(reason) => {
                    debug!(
                        thread = %self.id,
                        attempts = self.attempts,
                        reason = %reason,
                        "Candidate not settled, retrying"
                    );
                    self.events.publish(MonitorEvent::Retrying {
                        thread_id: self.id,
                        attempts: self.attempts,
                        reason,
                        timestamp: Utc::now(),
                    });
                }
            }
        };

        self.finish(terminal)
    }

    fn evaluate(&mut self, outcome: FetchOutcome) -> Step {
        let body = match outcome {
            FetchOutcome::Fresh {
                body,
                last_modified,
            } => {
                if last_modified.is_some() {
                    self.last_modified = last_modified;
                }
                body
            }
            FetchOutcome::NotModified => return Step::Retry("not modified".to_string()),
            FetchOutcome::Failed(failure) if failure.is_not_found() => {
                return Step::Finish(MonitorState::Dropped(DropReason::NotFound));
            }
            FetchOutcome::Failed(failure) => return Step::Retry(failure.to_string()),
        };

        let payload = match ThreadPayload::from_slice(&body) {
            Ok(payload) => payload,
            Err(e) => return Step::Retry(format!("malformed payload: {e}")),
        };
        let Some(first) = payload.posts.first() else {
            return Step::Retry("empty payload".to_string());
        };

        if !self.validated {
            if !self
                .settings
                .keywords
                .matches_post(first.sub.as_deref(), first.com.as_deref())
            {
                return Step::Finish(MonitorState::Dropped(DropReason::OffTopic));
            }
            self.validated = true;
            self.publish_status();
            self.events.publish(MonitorEvent::Validated {
                thread_id: self.id,
                timestamp: Utc::now(),
            });
        }

        let marker = self.settings.marker.as_str();
        if payload.posts.iter().any(|p| p.md5.as_deref() == Some(marker)) {
            return Step::Finish(MonitorState::Found);
        }

        Step::Retry("no marker".to_string())
    }

    fn finish(mut self, state: MonitorState) -> MonitorStatus {
        self.set_state(state);
        let thread_id = self.id;
        let timestamp = Utc::now();

        match state {
            MonitorState::Found => {
                debug!(thread = %thread_id, attempts = self.attempts, "Candidate carries the marker");
                self.events.publish(MonitorEvent::Found {
                    thread_id,
                    attempts: self.attempts,
                    timestamp,
                });
                for callback in std::mem::take(&mut self.callbacks) {
                    callback(thread_id);
                }
            }
            MonitorState::Exhausted => {
                debug!(thread = %thread_id, attempts = self.attempts, "Retry limit reached");
                self.events.publish(MonitorEvent::Exhausted {
                    thread_id,
                    attempts: self.attempts,
                    timestamp,
                });
            }
            MonitorState::Dropped(reason) => {
                debug!(thread = %thread_id, %reason, "Candidate dropped");
                self.events.publish(MonitorEvent::Dropped {
                    thread_id,
                    reason,
                    timestamp,
                });
            }
            MonitorState::Stopped => {
                debug!("CandidateMonitor {} stopped", thread_id);
                self.events.publish(MonitorEvent::Stopped {
                    thread_id,
                    attempts: self.attempts,
                    timestamp,
                });
            }
            MonitorState::Requesting | MonitorState::Scheduled => {}
        }

        self.status()
    }

    fn status(&self) -> MonitorStatus {
        MonitorStatus {
            state: self.state,
            attempts: self.attempts,
            validated: self.validated,
        }
    }

    fn set_state(&mut self, state: MonitorState) {
        self.state = state;
        self.publish_status();
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(self.status());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use tokio::time::sleep;

    const MARKER: &str = "ABC123";

    /// Replays scripted outcomes, then hangs on every further fetch.
    #[derive(Default)]
    struct ScriptedSource {
        outcomes: Mutex<VecDeque<FetchOutcome>>,
        calls: AtomicU32,
        tokens: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedSource {
        fn new(outcomes: impl IntoIterator<Item = FetchOutcome>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into_iter().collect()),
                ..Default::default()
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ThreadSource for ScriptedSource {
        async fn fetch(&self, _id: ThreadId, if_modified_since: Option<&str>) -> FetchOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.tokens.lock().push(if_modified_since.map(String::from));
            let next = self.outcomes.lock().pop_front();
            match next {
                Some(outcome) => outcome,
                None => std::future::pending().await,
            }
        }
    }

    fn fresh(json: &str, last_modified: Option<&str>) -> FetchOutcome {
        FetchOutcome::Fresh {
            body: Bytes::from(json.to_string()),
            last_modified: last_modified.map(String::from),
        }
    }

    fn settings(retry_limit: u32) -> Arc<MonitorSettings> {
        Arc::new(MonitorSettings {
            update_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            retry_limit,
            keywords: KeywordMatcher::new(["MLP General", "MLPG"]).unwrap(),
            marker: MARKER.to_string(),
        })
    }

    fn monitor(
        source: Arc<ScriptedSource>,
        retry_limit: u32,
    ) -> (CandidateMonitor, MonitorHandle, RequestQueue) {
        let queue = RequestQueue::new(Duration::from_secs(1));
        let (monitor, handle) = CandidateMonitor::new(
            ThreadId::new(555),
            source,
            queue.clone(),
            settings(retry_limit),
            MonitorEventBroadcaster::new(),
            CancellationToken::new(),
        );
        (monitor, handle, queue)
    }

    const ON_TOPIC_NO_MARKER: &str =
        r#"{"posts":[{"no":555,"sub":"MLP General","md5":"X"},{"no":556,"md5":"Y"}]}"#;

    #[tokio::test(start_paused = true)]
    async fn test_found_fires_callbacks_once() {
        let source = ScriptedSource::new([fresh(
            r#"{"posts":[{"no":555,"sub":"MLPG","md5":"X"},{"no":556,"md5":"Y"},{"no":557,"md5":"ABC123"}]}"#,
            None,
        )]);
        let (mut monitor, handle, _queue) = monitor(source.clone(), 0);

        let hits = Arc::new(Mutex::new(Vec::new()));
        let seen = hits.clone();
        monitor.on_found(move |id| seen.lock().push(id));

        let status = monitor.run().await;

        assert_eq!(status.state, MonitorState::Found);
        assert_eq!(status.attempts, 1);
        assert!(status.validated);
        assert_eq!(*hits.lock(), vec![ThreadId::new(555)]);
        assert_eq!(handle.status(), status);

        handle.stop();
        handle.stop();
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_off_topic_is_dropped_after_first_fetch() {
        let source = ScriptedSource::new([fresh(
            r#"{"posts":[{"no":555,"sub":"Cooking","md5":"ABC123"}]}"#,
            None,
        )]);
        let (mut monitor, handle, _queue) = monitor(source.clone(), 0);
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        monitor.on_found(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let status = monitor.run().await;
        assert_eq!(status.state, MonitorState::Dropped(DropReason::OffTopic));
        assert!(!status.validated);

        sleep(Duration::from_secs(120)).await;
        assert_eq!(source.calls(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_exhaust_retry_limit() {
        // Nothing scripted: every fetch hangs until the request timeout.
        let source = ScriptedSource::new([]);
        let (monitor, _handle, _queue) = monitor(source.clone(), 3);

        let status = monitor.run().await;
        assert_eq!(status.state, MonitorState::Exhausted);
        assert_eq!(status.attempts, 3);
        assert_eq!(source.calls(), 3);

        sleep(Duration::from_secs(600)).await;
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conditional_refetch_uses_last_token() {
        let source = ScriptedSource::new([
            fresh(ON_TOPIC_NO_MARKER, Some("Mon, 01 Jan 2024 00:00:00 GMT")),
            FetchOutcome::NotModified,
            fresh(ON_TOPIC_NO_MARKER, Some("Mon, 01 Jan 2024 00:05:00 GMT")),
        ]);
        let (monitor, _handle, _queue) = monitor(source.clone(), 4);

        let status = monitor.run().await;
        assert_eq!(status.state, MonitorState::Exhausted);
        assert_eq!(status.attempts, 4);
        assert_eq!(
            *source.tokens.lock(),
            vec![
                None,
                Some("Mon, 01 Jan 2024 00:00:00 GMT".to_string()),
                Some("Mon, 01 Jan 2024 00:00:00 GMT".to_string()),
                Some("Mon, 01 Jan 2024 00:05:00 GMT".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_is_sticky() {
        // Second payload's opening post no longer matches, but the candidate
        // was already validated.
        let source = ScriptedSource::new([
            fresh(ON_TOPIC_NO_MARKER, None),
            fresh(
                r#"{"posts":[{"no":555,"sub":"renamed"},{"no":600,"md5":"ABC123"}]}"#,
                None,
            ),
        ]);
        let (monitor, _handle, _queue) = monitor(source.clone(), 0);

        let status = monitor.run().await;
        assert_eq!(status.state, MonitorState::Found);
        assert_eq!(status.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_and_failed_fetches_are_retried() {
        let source = ScriptedSource::new([
            fresh("not json", None),
            fresh(r#"{"posts":[]}"#, None),
            FetchOutcome::Failed(FetchFailure::Status(503)),
            FetchOutcome::Failed(FetchFailure::Transport("reset".into())),
            fresh(
                r#"{"posts":[{"no":555,"sub":"MLPG"},{"no":556,"md5":"ABC123"}]}"#,
                None,
            ),
        ]);
        let (monitor, _handle, _queue) = monitor(source.clone(), 0);

        let status = monitor.run().await;
        assert_eq!(status.state, MonitorState::Found);
        assert_eq!(status.attempts, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_drops() {
        let source = ScriptedSource::new([FetchOutcome::Failed(FetchFailure::Status(404))]);
        let (monitor, _handle, _queue) = monitor(source.clone(), 0);

        let status = monitor.run().await;
        assert_eq!(status.state, MonitorState::Dropped(DropReason::NotFound));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_waiting_for_queue_does_not_count() {
        let source = ScriptedSource::new([]);
        let (monitor, handle, _queue) = monitor(source.clone(), 0);
        let task = tokio::spawn(monitor.run());

        // The queue has not released the first ticket yet.
        sleep(Duration::from_millis(500)).await;
        assert_eq!(handle.status().state, MonitorState::Requesting);
        handle.stop();

        let status = task.await.unwrap();
        assert_eq!(status.state, MonitorState::Stopped);
        assert_eq!(status.attempts, 0);
        assert_eq!(source.calls(), 0);

        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_fetch_does_not_count() {
        let source = ScriptedSource::new([]);
        let (monitor, handle, _queue) = monitor(source.clone(), 0);
        let task = tokio::spawn(monitor.run());

        // Ticket released at 1s, the fetch is now hanging.
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(source.calls(), 1);
        assert_eq!(handle.status().attempts, 0);
        handle.stop();

        let status = task.await.unwrap();
        assert_eq!(status.state, MonitorState::Stopped);
        assert_eq!(status.attempts, 0);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_scheduled() {
        let source = ScriptedSource::new([fresh(ON_TOPIC_NO_MARKER, None)]);
        let (monitor, handle, _queue) = monitor(source.clone(), 0);
        let task = tokio::spawn(monitor.run());

        sleep(Duration::from_secs(3)).await;
        assert_eq!(handle.status().state, MonitorState::Scheduled);
        handle.stop();

        let status = task.await.unwrap();
        assert_eq!(status.state, MonitorState::Stopped);
        assert_eq!(status.attempts, 1);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_queue_ends_monitor() {
        let source = ScriptedSource::new([]);
        let (monitor, _handle, queue) = monitor(source.clone(), 0);
        queue.stop();

        let status = monitor.run().await;
        assert_eq!(status.state, MonitorState::Stopped);
        assert_eq!(source.calls(), 0);
    }
}
