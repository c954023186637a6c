//! Handing a discovered successor thread to the user.
//!
//! A [`Navigator`] receives the winning thread id exactly once per engine run.
//! [`BrowserNavigator`] opens it in the system browser, optionally after a
//! confirm prompt. [`PrintNavigator`] only prints the URL.

use async_trait::async_trait;
use imageboard_api::{ThreadId, thread_page_url};
use tracing::{info, warn};
use webbrowser::{Browser, BrowserOptions};

use crate::{Error, Result};

/// What happened to an announced thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
    /// Opened in the browser.
    Opened(String),
    /// The user declined the prompt.
    Declined(String),
    /// Printed without opening.
    Printed(String),
}

impl Announcement {
    pub fn url(&self) -> &str {
        match self {
            Announcement::Opened(url) | Announcement::Declined(url) | Announcement::Printed(url) => {
                url
            }
        }
    }
}

/// Builds browser URLs for threads on one board.
#[derive(Debug, Clone)]
pub struct NavigationTarget {
    site_base: String,
    board: String,
}

impl NavigationTarget {
    pub fn new(site_base: impl Into<String>, board: impl Into<String>) -> Self {
        Self {
            site_base: site_base.into(),
            board: board.into(),
        }
    }

    pub fn url(&self, thread_id: ThreadId) -> String {
        thread_page_url(&self.site_base, &self.board, thread_id)
    }
}

/// Receiver of the discovered successor.
#[async_trait]
pub trait Navigator: Send + Sync {
    /// Get the navigator type name.
    fn navigator_type(&self) -> &'static str;

    async fn announce(&self, thread_id: ThreadId) -> Result<Announcement>;
}

/// Opens the successor in the system browser.
#[derive(Debug, Clone)]
pub struct BrowserNavigator {
    target: NavigationTarget,
    /// Skip the confirm prompt.
    auto_open: bool,
    new_tab: bool,
}

impl BrowserNavigator {
    pub fn new(target: NavigationTarget, auto_open: bool, new_tab: bool) -> Self {
        Self {
            target,
            auto_open,
            new_tab,
        }
    }

    async fn confirm(url: &str) -> Result<bool> {
        let message = format!("New thread found: {url}\nGo to new thread?");
        tokio::task::spawn_blocking(move || {
            inquire::Confirm::new(&message)
                .with_default(true)
                .prompt()
        })
        .await
        .map_err(|e| Error::Other(format!("confirm prompt panicked: {e}")))?
        .map_err(Error::from)
    }

    async fn open(&self, url: String) -> Result<()> {
        let hint = if self.new_tab { "_blank" } else { "_self" };
        let target = url.clone();
        tokio::task::spawn_blocking(move || {
            let mut options = BrowserOptions::new();
            options.with_target_hint(hint);
            webbrowser::open_browser_with_options(Browser::Default, &target, &options)
        })
        .await
        .map_err(|e| Error::Other(format!("browser launch panicked: {e}")))?
        .map_err(|source| Error::navigation(url, source))
    }
}

#[async_trait]
impl Navigator for BrowserNavigator {
    fn navigator_type(&self) -> &'static str {
        "browser"
    }

    async fn announce(&self, thread_id: ThreadId) -> Result<Announcement> {
        let url = self.target.url(thread_id);

        if !self.auto_open && !Self::confirm(&url).await? {
            info!(%url, "Successor thread not opened");
            return Ok(Announcement::Declined(url));
        }

        info!(%url, "Opening successor thread");
        if let Err(e) = self.open(url.clone()).await {
            // Still tell the user where to go.
            warn!(error = %e, "Could not open browser");
            println!("{url}");
            return Err(e);
        }
        Ok(Announcement::Opened(url))
    }
}

/// Prints the successor URL to stdout.
#[derive(Debug, Clone)]
pub struct PrintNavigator {
    target: NavigationTarget,
}

impl PrintNavigator {
    pub fn new(target: NavigationTarget) -> Self {
        Self { target }
    }
}

#[async_trait]
impl Navigator for PrintNavigator {
    fn navigator_type(&self) -> &'static str {
        "print"
    }

    async fn announce(&self, thread_id: ThreadId) -> Result<Announcement> {
        let url = self.target.url(thread_id);
        println!("{url}");
        Ok(Announcement::Printed(url))
    }
}
