use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{IF_MODIFIED_SINCE, LAST_MODIFIED, USER_AGENT};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::model::{ThreadId, ThreadPayload};

pub const DEFAULT_API_BASE: &str = "https://a.4cdn.org/";
pub const DEFAULT_SITE_BASE: &str = "https://boards.4chan.org/";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_UA: &str = concat!("thread-locator/", env!("CARGO_PKG_VERSION"));

/// Result of a thread fetch that produced a usable HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadResponse {
    /// `200 OK`. The body is left unparsed; `last_modified` is the freshness
    /// token to send back on the next conditional request.
    Fresh {
        body: Bytes,
        last_modified: Option<String>,
    },
    /// `304 Not Modified`.
    NotModified,
}

/// Client for the read-only thread endpoint of one board.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    api_base: Url,
    board: String,
    timeout: Duration,
}

pub struct ClientBuilder {
    api_base: String,
    board: String,
    timeout: Duration,
    http: Option<reqwest::Client>,
}

impl ClientBuilder {
    pub fn api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Result<Client> {
        let http = match self.http {
            Some(http) => http,
            None => reqwest::Client::builder().gzip(true).build()?,
        };
        Ok(Client {
            http,
            api_base: normalize_base(&self.api_base)?,
            board: self.board,
            timeout: self.timeout,
        })
    }
}

impl Client {
    pub fn builder(board: impl Into<String>) -> ClientBuilder {
        ClientBuilder {
            api_base: DEFAULT_API_BASE.to_string(),
            board: board.into(),
            timeout: DEFAULT_TIMEOUT,
            http: None,
        }
    }

    pub fn new(board: impl Into<String>) -> Result<Self> {
        Self::builder(board).build()
    }

    pub fn board(&self) -> &str {
        &self.board
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Endpoint for a thread, with a cache-busting query so intermediaries
    /// never answer from a stale copy.
    pub fn thread_url(&self, id: ThreadId) -> Result<Url> {
        let mut url = self
            .api_base
            .join(&format!("{}/thread/{}.json", self.board, id))?;
        url.set_query(Some(&chrono::Utc::now().timestamp_millis().to_string()));
        Ok(url)
    }

    /// Fetch a thread, optionally as a conditional request.
    ///
    /// Statuses other than `200` and `304` come back as [`Error::Status`].
    /// Dropping the returned future aborts the request.
    pub async fn fetch_thread(
        &self,
        id: ThreadId,
        if_modified_since: Option<&str>,
    ) -> Result<ThreadResponse> {
        let url = self.thread_url(id)?;
        let mut req = self
            .http
            .get(url.clone())
            .header(USER_AGENT, DEFAULT_UA)
            .timeout(self.timeout);

        if let Some(last_modified) = if_modified_since {
            req = req.header(IF_MODIFIED_SINCE, last_modified);
        }

        let response = req.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            debug!(url = %url, "Thread not modified");
            return Ok(ThreadResponse::NotModified);
        }

        if status != StatusCode::OK {
            debug!(url = %url, status = %status, "Thread fetch failed");
            return Err(Error::Status(status));
        }

        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;

        debug!(url = %url, bytes = body.len(), "Thread fetched");
        Ok(ThreadResponse::Fresh {
            body,
            last_modified,
        })
    }

    /// Unconditional fetch, parsed.
    pub async fn thread(&self, id: ThreadId) -> Result<(ThreadPayload, Option<String>)> {
        match self.fetch_thread(id, None).await? {
            ThreadResponse::Fresh {
                body,
                last_modified,
            } => Ok((ThreadPayload::from_slice(&body)?, last_modified)),
            // Only possible with a misbehaving server, no validator was sent.
            ThreadResponse::NotModified => Err(Error::Status(StatusCode::NOT_MODIFIED)),
        }
    }
}

fn normalize_base(base: &str) -> Result<Url> {
    if base.ends_with('/') {
        Ok(Url::parse(base)?)
    } else {
        Ok(Url::parse(&format!("{base}/"))?)
    }
}

/// Browser URL of a thread, anchored at its opening post.
pub fn thread_page_url(site_base: &str, board: &str, id: ThreadId) -> String {
    format!(
        "{}/{}/thread/{}#p{}",
        site_base.trim_end_matches('/'),
        board,
        id,
        id
    )
}
