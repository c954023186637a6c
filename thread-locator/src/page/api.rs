//! [`ThreadPage`] backed by the JSON API.
//!
//! The initial read is a plain fetch. The feed re-polls the thread with
//! conditional requests and publishes the posts numbered above the last one
//! seen.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use imageboard_api::{Client, ThreadId, ThreadPayload, ThreadResponse};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{ContentUnit, DEFAULT_FEED_CAPACITY, FeedPublisher, PageState, PostFeed, ThreadPage};
use crate::Result;
use crate::discovery::KeywordMatcher;

#[derive(Debug, Default)]
struct Cursor {
    last_post_no: u64,
    last_modified: Option<String>,
}

pub struct ApiThreadPage {
    client: Client,
    thread_id: ThreadId,
    keywords: KeywordMatcher,
    marker: String,
    refresh_interval: Duration,
    cursor: Arc<Mutex<Cursor>>,
}

impl ApiThreadPage {
    pub fn new(
        client: Client,
        thread_id: ThreadId,
        keywords: KeywordMatcher,
        marker: impl Into<String>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            client,
            thread_id,
            keywords,
            marker: marker.into(),
            refresh_interval,
            cursor: Arc::new(Mutex::new(Cursor::default())),
        }
    }

    fn state_from_payload(&self, payload: &ThreadPayload) -> PageState {
        let board = self.client.board();
        let transcript: Vec<ContentUnit> = payload
            .posts
            .iter()
            .map(|post| ContentUnit::from_post(post, board))
            .collect();

        let has_keywords = payload
            .op()
            .is_some_and(|op| self.keywords.matches_post(op.sub.as_deref(), op.com.as_deref()));
        let has_marker = transcript.iter().any(|u| u.carries_marker(&self.marker));
        let image_count = transcript.iter().filter(|u| u.has_image()).count();

        PageState {
            thread_id: self.thread_id,
            post_count: transcript.len() as u32,
            image_count: image_count as u32,
            has_keywords,
            has_marker,
            transcript,
        }
    }
}

#[async_trait]
impl ThreadPage for ApiThreadPage {
    async fn read_state(&self) -> Result<PageState> {
        let (payload, last_modified) = self.client.thread(self.thread_id).await?;
        let state = self.state_from_payload(&payload);

        {
            let mut cursor = self.cursor.lock();
            cursor.last_post_no = payload.posts.iter().map(|p| p.no).max().unwrap_or(0);
            cursor.last_modified = last_modified;
        }

        debug!(
            thread = %self.thread_id,
            posts = state.post_count,
            images = state.image_count,
            keywords = state.has_keywords,
            marker = state.has_marker,
            "Read watched thread"
        );
        Ok(state)
    }

    fn subscribe(&self) -> PostFeed {
        let (publisher, feed) = PostFeed::channel(DEFAULT_FEED_CAPACITY);
        let watcher = FeedWatcher {
            client: self.client.clone(),
            thread_id: self.thread_id,
            refresh_interval: self.refresh_interval,
            cursor: self.cursor.clone(),
            publisher,
        };
        tokio::spawn(watcher.run());
        feed
    }
}

struct FeedWatcher {
    client: Client,
    thread_id: ThreadId,
    refresh_interval: Duration,
    cursor: Arc<Mutex<Cursor>>,
    publisher: FeedPublisher,
}

impl FeedWatcher {
    async fn run(self) {
        debug!(thread = %self.thread_id, "Watching thread for new posts");

        loop {
            tokio::select! {
                biased;
                _ = self.publisher.closed() => break,
                _ = tokio::time::sleep(self.refresh_interval) => {}
            }

            let last_modified = self.cursor.lock().last_modified.clone();
            let response = tokio::select! {
                biased;
                _ = self.publisher.closed() => break,
                response = self.client.fetch_thread(self.thread_id, last_modified.as_deref()) => response,
            };

            let (body, last_modified) = match response {
                Ok(ThreadResponse::Fresh {
                    body,
                    last_modified,
                }) => (body, last_modified),
                Ok(ThreadResponse::NotModified) => continue,
                Err(e) if e.is_not_found() => {
                    info!(thread = %self.thread_id, "Watched thread is gone");
                    break;
                }
                Err(e) => {
                    warn!(thread = %self.thread_id, error = %e, "Failed to refresh watched thread");
                    continue;
                }
            };

            let payload = match ThreadPayload::from_slice(&body) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(thread = %self.thread_id, error = %e, "Unreadable thread payload");
                    continue;
                }
            };

            let units = {
                let mut cursor = self.cursor.lock();
                if last_modified.is_some() {
                    cursor.last_modified = last_modified;
                }
                let since = cursor.last_post_no;
                let fresh: Vec<ContentUnit> = payload
                    .posts
                    .iter()
                    .filter(|p| p.no > since)
                    .map(|p| ContentUnit::from_post(p, self.client.board()))
                    .collect();
                if let Some(max) = fresh.iter().map(|u| u.post_no).max() {
                    cursor.last_post_no = max;
                }
                fresh
            };

            if units.is_empty() {
                continue;
            }
            debug!(thread = %self.thread_id, new_posts = units.len(), "New posts");
            if !self.publisher.publish(units).await {
                break;
            }
        }

        debug!(thread = %self.thread_id, "Stopped watching thread");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageboard_api::Post;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const OPENING: &str = r#"{"posts":[{"no":100,"sub":"MLP General"},{"no":101,"md5":"A"}]}"#;
    const GROWN: &str = r#"{"posts":[{"no":100,"sub":"MLP General"},{"no":101,"md5":"A"},{"no":102,"md5":"M","com":"<a href=\"/mlp/thread/555#p556\" class=\"quotelink\">&gt;&gt;556</a>"}]}"#;
    const QUIET: Duration = Duration::from_millis(300);

    fn live_page(server: &MockServer) -> ApiThreadPage {
        let client = Client::builder("mlp")
            .api_base(server.uri())
            .timeout(Duration::from_millis(500))
            .build()
            .unwrap();
        ApiThreadPage::new(
            client,
            ThreadId::new(100),
            KeywordMatcher::new(["MLP General"]).unwrap(),
            "M",
            Duration::from_millis(50),
        )
    }

    /// Serve `first` once, then fall through to whatever is mounted next.
    async fn mount_opening(server: &MockServer, first: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path("/mlp/thread/100.json"))
            .respond_with(first)
            .up_to_n_times(1)
            .with_priority(1)
            .mount(server)
            .await;
    }

    async fn requests(server: &MockServer) -> usize {
        server.received_requests().await.map_or(0, |r| r.len())
    }

    #[tokio::test]
    async fn test_feed_publishes_only_newer_posts() {
        let server = MockServer::start().await;
        mount_opening(&server, ResponseTemplate::new(200).set_body_string(OPENING)).await;
        Mock::given(method("GET"))
            .and(path("/mlp/thread/100.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(GROWN))
            .mount(&server)
            .await;

        let page = live_page(&server);
        let state = page.read_state().await.unwrap();
        assert_eq!(state.post_count, 2);

        let mut feed = page.subscribe();
        let batch = tokio::time::timeout(Duration::from_secs(2), feed.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            batch,
            vec![ContentUnit {
                post_no: 102,
                is_post: true,
                image_hash: Some("M".to_string()),
                thread_refs: vec![ThreadId::new(555)],
            }]
        );

        // Later polls return the same posts, nothing new goes out.
        assert!(tokio::time::timeout(QUIET, feed.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_feed_sends_last_modified_and_skips_not_modified() {
        let server = MockServer::start().await;
        mount_opening(
            &server,
            ResponseTemplate::new(200)
                .insert_header("Last-Modified", "Sat, 18 Oct 2026 10:00:00 GMT")
                .set_body_string(OPENING),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/mlp/thread/100.json"))
            .and(header("If-Modified-Since", "Sat, 18 Oct 2026 10:00:00 GMT"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let page = live_page(&server);
        page.read_state().await.unwrap();
        let mut feed = page.subscribe();

        // A request without the token would hit no mock, get a 404 and
        // close the feed.
        assert!(tokio::time::timeout(QUIET, feed.recv()).await.is_err());
        assert!(feed.is_subscribed());

        let received = server.received_requests().await.unwrap();
        assert!(received.len() >= 2);
        for request in &received[1..] {
            assert_eq!(
                request
                    .headers
                    .get("if-modified-since")
                    .and_then(|v| v.to_str().ok()),
                Some("Sat, 18 Oct 2026 10:00:00 GMT")
            );
        }
    }

    #[tokio::test]
    async fn test_feed_closes_when_thread_is_gone() {
        let server = MockServer::start().await;
        mount_opening(&server, ResponseTemplate::new(200).set_body_string(OPENING)).await;
        Mock::given(method("GET"))
            .and(path("/mlp/thread/100.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let page = live_page(&server);
        page.read_state().await.unwrap();
        let mut feed = page.subscribe();

        let next = tokio::time::timeout(Duration::from_secs(2), feed.recv())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_polling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mlp/thread/100.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(OPENING))
            .mount(&server)
            .await;

        let page = live_page(&server);
        page.read_state().await.unwrap();
        let mut feed = page.subscribe();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(requests(&server).await > 1);

        feed.unsubscribe();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let settled = requests(&server).await;
        tokio::time::sleep(QUIET).await;
        assert_eq!(requests(&server).await, settled);
    }

    fn page() -> ApiThreadPage {
        let client = Client::new("mlp").unwrap();
        ApiThreadPage::new(
            client,
            ThreadId::new(100),
            KeywordMatcher::new(["MLP General"]).unwrap(),
            "MARK",
            Duration::from_secs(10),
        )
    }

    #[test]
    fn test_state_from_payload() {
        let payload = ThreadPayload {
            posts: vec![
                Post {
                    no: 100,
                    sub: Some("/mlp/ general".into()),
                    com: Some("The mlp general thread".into()),
                    md5: Some("A".into()),
                    ..Default::default()
                },
                Post {
                    no: 101,
                    resto: 100,
                    ..Default::default()
                },
                Post {
                    no: 102,
                    resto: 100,
                    md5: Some("MARK".into()),
                    ..Default::default()
                },
            ],
        };

        let state = page().state_from_payload(&payload);

        assert_eq!(state.thread_id, ThreadId::new(100));
        assert_eq!(state.post_count, 3);
        assert_eq!(state.image_count, 2);
        assert!(state.has_keywords);
        assert!(state.has_marker);
        assert_eq!(state.transcript.len(), 3);
    }

    #[test]
    fn test_state_without_keywords_or_marker() {
        let payload = ThreadPayload {
            posts: vec![Post {
                no: 100,
                sub: Some("Cooking thread".into()),
                ..Default::default()
            }],
        };

        let state = page().state_from_payload(&payload);
        assert!(!state.has_keywords);
        assert!(!state.has_marker);
    }
}
