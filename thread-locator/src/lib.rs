//! thread-locator library crate.
//!
//! Watches an imageboard thread that is running out of room and finds the
//! successor thread its posters link to and mark with an agreed image.

pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod notification;
pub mod orchestrator;
pub mod page;

pub use error::{Error, Result};
