//! Command line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use imageboard_api::{ThreadId, parse_thread_url};
use tracing::warn;

use crate::Result;
use crate::config::LocatorConfig;

#[derive(Parser, Debug)]
#[command(name = "thread-locator", author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true, env = "THREAD_LOCATOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch a thread and open its successor once it is found
    Watch(WatchArgs),

    /// Show the configuration file location or its effective contents
    Config {
        /// Print the effective configuration as TOML
        #[arg(long)]
        show: bool,
    },
}

#[derive(clap::Args, Debug)]
pub struct WatchArgs {
    /// Thread URL (https://boards.4chan.org/<board>/thread/<no>) or thread number
    pub thread: String,

    /// Board of a bare thread number
    #[arg(short, long)]
    pub board: Option<String>,

    /// Image count at which links start being collected
    #[arg(long)]
    pub image_limit: Option<u32>,

    /// Polls per candidate before giving up (0 = unlimited)
    #[arg(long)]
    pub retry_limit: Option<u32>,

    /// Image MD5 (base64) marking the successor
    #[arg(long)]
    pub marker: Option<String>,

    /// Open the successor without asking
    #[arg(long)]
    pub auto_open: bool,

    /// Open the successor in the current tab instead of a new one
    #[arg(long)]
    pub same_tab: bool,

    /// Only print the successor URL
    #[arg(long)]
    pub dry_run: bool,
}

impl WatchArgs {
    /// Apply the flags that override configuration values.
    pub fn apply(&self, config: &mut LocatorConfig) {
        if let Some(limit) = self.image_limit {
            config.image_limit = limit;
        }
        if let Some(limit) = self.retry_limit {
            config.thread_update_retry_limit = limit;
        }
        if let Some(marker) = &self.marker {
            config.marker_md5 = marker.clone();
        }
        if self.auto_open {
            config.new_thread_auto_open = true;
        }
        if self.same_tab {
            config.new_thread_open_in_new_tab = false;
        }
    }

    /// Board and number of the thread to watch.
    ///
    /// A URL carries its own board; `--board` only applies to bare numbers.
    pub fn target(&self, default_board: &str) -> Result<(String, ThreadId)> {
        if let Ok(id) = self.thread.parse::<ThreadId>() {
            let board = self.board.as_deref().unwrap_or(default_board);
            return Ok((board.to_string(), id));
        }

        let (board, id) = parse_thread_url(&self.thread)?;
        if let Some(flag) = self.board.as_deref()
            && flag != board
        {
            warn!(url_board = %board, flag_board = %flag, "Ignoring --board for a thread URL");
        }
        Ok((board, id))
    }
}
