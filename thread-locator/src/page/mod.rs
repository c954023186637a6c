//! The watched thread, as seen by the engine.
//!
//! A [`ThreadPage`] gives a one-time read of the thread ([`PageState`]) and a
//! live feed of newly appended posts ([`PostFeed`]). The engine only ever
//! sees [`ContentUnit`]s, never the wire model.

mod api;

pub use api::ApiThreadPage;

use async_trait::async_trait;
use imageboard_api::{Post, ThreadId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Capacity of the mutation feed, in batches.
pub const DEFAULT_FEED_CAPACITY: usize = 64;

/// One post of the watched thread, reduced to what discovery needs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContentUnit {
    pub post_no: u64,
    /// False for anything that was appended to the thread but is not a post.
    pub is_post: bool,
    /// MD5 of the attached image, if any.
    pub image_hash: Option<String>,
    /// Other threads this post links to.
    pub thread_refs: Vec<ThreadId>,
}

impl ContentUnit {
    pub fn from_post(post: &Post, board: &str) -> Self {
        Self {
            post_no: post.no,
            is_post: true,
            image_hash: post.md5.clone(),
            thread_refs: post.thread_references(board),
        }
    }

    pub fn has_image(&self) -> bool {
        self.is_post && self.image_hash.is_some()
    }

    pub fn carries_marker(&self, marker: &str) -> bool {
        self.is_post && self.image_hash.as_deref() == Some(marker)
    }
}

/// One-time read of the watched thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageState {
    pub thread_id: ThreadId,
    pub post_count: u32,
    pub image_count: u32,
    /// Subject or first post matches a topical keyword.
    pub has_keywords: bool,
    /// Some post already carries the marker image.
    pub has_marker: bool,
    /// Every post, oldest first.
    pub transcript: Vec<ContentUnit>,
}

/// Source of the watched thread's state and of its new posts.
#[async_trait]
pub trait ThreadPage: Send + Sync {
    async fn read_state(&self) -> Result<PageState>;

    /// Start delivering batches of newly appended units.
    ///
    /// Called at most once per engine run. Dropping or unsubscribing the feed
    /// stops delivery.
    fn subscribe(&self) -> PostFeed;
}

/// Receiving end of the mutation feed.
#[derive(Debug)]
pub struct PostFeed {
    rx: mpsc::Receiver<Vec<ContentUnit>>,
    token: CancellationToken,
}

/// Producing end of the mutation feed.
#[derive(Debug, Clone)]
pub struct FeedPublisher {
    tx: mpsc::Sender<Vec<ContentUnit>>,
    token: CancellationToken,
}

impl PostFeed {
    pub fn channel(capacity: usize) -> (FeedPublisher, PostFeed) {
        let (tx, rx) = mpsc::channel(capacity);
        let token = CancellationToken::new();
        (
            FeedPublisher {
                tx,
                token: token.clone(),
            },
            PostFeed { rx, token },
        )
    }

    /// Next batch, `None` once the producer is gone or after unsubscribing.
    pub async fn recv(&mut self) -> Option<Vec<ContentUnit>> {
        if self.token.is_cancelled() {
            return None;
        }
        self.rx.recv().await
    }

    /// Stop the feed. Batches already in flight are discarded. Idempotent.
    pub fn unsubscribe(&mut self) {
        self.token.cancel();
        self.rx.close();
    }

    pub fn is_subscribed(&self) -> bool {
        !self.token.is_cancelled()
    }
}

impl Drop for PostFeed {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl FeedPublisher {
    /// Deliver a batch. Returns false once the subscriber is gone.
    pub async fn publish(&self, units: Vec<ContentUnit>) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.tx.send(units).await.is_ok()
    }

    /// Resolves when the subscriber unsubscribes or drops the feed.
    pub async fn closed(&self) {
        self.token.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled() || self.tx.is_closed()
    }
}
