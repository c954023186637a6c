//! Read-only client for the imageboard JSON API.
//!
//! Covers what a thread watcher needs: fetching a thread with conditional
//! refresh (`If-Modified-Since` / `Last-Modified`), the post model, and
//! parsing cross-thread quote links out of comment HTML.

pub mod client;
pub mod error;
pub mod links;
pub mod model;

pub use client::{Client, ClientBuilder, ThreadResponse, thread_page_url};
pub use error::{Error, Result};
pub use links::{parse_thread_url, thread_references};
pub use model::{Post, ThreadId, ThreadPayload};
pub use reqwest::StatusCode;
