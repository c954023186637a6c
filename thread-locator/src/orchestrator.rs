//! Engine wiring for one watched thread.
//!
//! The [`Orchestrator`] reads the watched thread once, then reacts to its new
//! posts: it keeps the [`ThreadSnapshot`] current, collects cross-thread links
//! once the thread is over the image limit and, as soon as the marker shows up
//! in the watched thread, turns the collected links into candidate monitors.
//! The first candidate found to carry the marker ends the run.
//!
//! Every state change happens on the orchestrator's own task; monitors only
//! report back through a channel.

use std::sync::Arc;
use std::time::Duration;

use imageboard_api::ThreadId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::config::LocatorConfig;
use crate::discovery::{KeywordMatcher, LinkExtractor, PendingLinkCache, ThreadSnapshot};
use crate::monitor::{
    CandidateMonitor, MonitorEventBroadcaster, MonitorRegistry, MonitorSettings, RequestQueue,
    ThreadSource,
};
use crate::notification::Navigator;
use crate::page::{ContentUnit, PostFeed, ThreadPage};

/// Engine tunables, derived from [`LocatorConfig`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Image count at which the watched thread counts as full.
    pub image_limit: u32,
    /// Spacing of outbound candidate fetches.
    pub request_interval: Duration,
    pub monitor: Arc<MonitorSettings>,
}

impl EngineSettings {
    pub fn from_config(config: &LocatorConfig) -> Result<Self> {
        let keywords = KeywordMatcher::new(&config.thread_keywords)?;
        Ok(Self {
            image_limit: config.image_limit,
            request_interval: config.request_interval(),
            monitor: Arc::new(MonitorSettings {
                update_interval: config.thread_update_interval(),
                request_timeout: config.request_timeout(),
                retry_limit: config.thread_update_retry_limit,
                keywords,
                marker: config.marker_md5.clone(),
            }),
        })
    }
}

/// How an engine run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOutcome {
    /// The watched thread has neither the keywords nor the marker.
    Inactive,
    /// A successor was found and handed to the navigator.
    Found(ThreadId),
    /// The watched thread went away and no candidate was left to poll.
    FeedClosed,
    /// Cancelled from outside.
    Cancelled,
}

pub struct Orchestrator {
    page: Arc<dyn ThreadPage>,
    source: Arc<dyn ThreadSource>,
    navigator: Arc<dyn Navigator>,
    settings: EngineSettings,
    events: MonitorEventBroadcaster,
    cancellation_token: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        page: Arc<dyn ThreadPage>,
        source: Arc<dyn ThreadSource>,
        navigator: Arc<dyn Navigator>,
        settings: EngineSettings,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            page,
            source,
            navigator,
            settings,
            events: MonitorEventBroadcaster::new(),
            cancellation_token,
        }
    }

    /// Monitor events of this run. Subscribe before calling [`run`].
    ///
    /// [`run`]: Orchestrator::run
    pub fn events(&self) -> &MonitorEventBroadcaster {
        &self.events
    }

    /// Run until a successor is found, the watched thread is gone or the
    /// token is cancelled.
    ///
    /// Only the initial read of the watched thread can fail.
    pub async fn run(self) -> Result<EngineOutcome> {
        let state = self.page.read_state().await?;
        let snapshot = ThreadSnapshot::new(&state, self.settings.image_limit);

        if !snapshot.is_watchable() {
            info!(
                thread = %snapshot.id(),
                "Thread has neither the keywords nor the marker, nothing to do"
            );
            return Ok(EngineOutcome::Inactive);
        }

        info!(
            thread = %snapshot.id(),
            images = snapshot.images(),
            limit = snapshot.image_limit(),
            marker = snapshot.marker_seen(),
            "Watching thread"
        );

        let mut feed = self.page.subscribe();
        let (found_tx, mut found_rx) = mpsc::unbounded_channel();
        let mut engine = Engine::new(
            snapshot,
            self.source.clone(),
            self.settings.clone(),
            self.events.clone(),
            found_tx,
            self.cancellation_token.child_token(),
        );
        engine.start(&state.transcript);

        let mut feed_open = true;
        let outcome = loop {
            tokio::select! {
                biased;

                _ = self.cancellation_token.cancelled() => break EngineOutcome::Cancelled,

                // First report wins; later ones stay in the channel and are
                // dropped with it.
                Some(id) = found_rx.recv() => break EngineOutcome::Found(id),

                batch = feed.recv(), if feed_open => match batch {
                    Some(units) => engine.on_batch(&units),
                    None => {
                        info!("Watched thread is no longer updating");
                        feed_open = false;
                        if !engine.registry.has_pending_tasks() {
                            break EngineOutcome::FeedClosed;
                        }
                    }
                },

                Some(result) = engine.registry.join_next(), if engine.registry.has_pending_tasks() => {
                    engine.registry.handle_task_completion(result);
                    if !feed_open && !engine.registry.has_pending_tasks() {
                        break EngineOutcome::FeedClosed;
                    }
                }
            }
        };

        engine.teardown(&mut feed).await;

        if let EngineOutcome::Found(id) = outcome {
            info!(thread = %id, "Successor thread found");
            match self.navigator.announce(id).await {
                Ok(announcement) => debug!(?announcement, "Successor announced"),
                Err(e) => warn!(error = %e, "Failed to hand off successor thread"),
            }
        }

        Ok(outcome)
    }
}

/// Mutable engine state, only touched from the orchestrator task.
struct Engine {
    snapshot: ThreadSnapshot,
    extractor: LinkExtractor,
    cache: PendingLinkCache,
    queue: RequestQueue,
    registry: MonitorRegistry,
    source: Arc<dyn ThreadSource>,
    settings: EngineSettings,
    events: MonitorEventBroadcaster,
    found_tx: mpsc::UnboundedSender<ThreadId>,
    torn_down: bool,
}

impl Engine {
    fn new(
        snapshot: ThreadSnapshot,
        source: Arc<dyn ThreadSource>,
        settings: EngineSettings,
        events: MonitorEventBroadcaster,
        found_tx: mpsc::UnboundedSender<ThreadId>,
        token: CancellationToken,
    ) -> Self {
        Self {
            extractor: LinkExtractor::new(snapshot.id(), settings.image_limit),
            snapshot,
            cache: PendingLinkCache::new(),
            queue: RequestQueue::new(settings.request_interval),
            registry: MonitorRegistry::new(token),
            source,
            settings,
            events,
            found_tx,
            torn_down: false,
        }
    }

    /// Seed the cache from the existing transcript.
    fn start(&mut self, transcript: &[ContentUnit]) {
        if self.snapshot.over_threshold() {
            let refs = self
                .extractor
                .from_transcript(transcript, self.snapshot.images());
            let added = self.cache.push(refs);
            debug!(added, "Collected links from existing posts");
        }
        if self.snapshot.marker_seen() {
            self.promote();
        }
    }

    fn on_batch(&mut self, units: &[ContentUnit]) {
        let marker = self.settings.monitor.marker.as_str();

        for unit in units {
            if self.snapshot.apply(unit, marker) {
                info!(post = unit.post_no, "Marker posted in watched thread");
            }
            if self.snapshot.over_threshold() {
                let refs = self.extractor.from_unit(unit);
                if !refs.is_empty() {
                    let added = self.cache.push(refs);
                    debug!(post = unit.post_no, added, "Collected links");
                }
            }
        }

        if self.snapshot.marker_seen() {
            self.promote();
        }
    }

    /// Turn every cached link into a monitor, skipping known threads.
    fn promote(&mut self) {
        if self.torn_down {
            return;
        }

        for id in self.cache.drain_all() {
            if self.registry.contains(id) {
                continue;
            }

            let (mut monitor, handle) = CandidateMonitor::new(
                id,
                self.source.clone(),
                self.queue.clone(),
                self.settings.monitor.clone(),
                self.events.clone(),
                self.registry.child_token(),
            );
            let found_tx = self.found_tx.clone();
            monitor.on_found(move |id| {
                let _ = found_tx.send(id);
            });

            if let Err(e) = self.registry.spawn(monitor, handle) {
                debug!(error = %e, "Skipping candidate");
            }
        }
    }

    /// Stop the feed, every monitor and the queue. Runs once.
    async fn teardown(&mut self, feed: &mut PostFeed) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        feed.unsubscribe();
        self.registry.stop_all();
        self.queue.stop();
        self.registry.shutdown().await;
        debug!(candidates = self.registry.len(), "Engine torn down");
    }
}
