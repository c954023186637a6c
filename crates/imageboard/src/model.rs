use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::links::thread_references;

/// Number of a thread, i.e. the post number of its opening post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(u64);

impl ThreadId {
    pub const fn new(no: u64) -> Self {
        Self(no)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ThreadId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.parse::<u64>() {
            Ok(0) | Err(_) => Err(Error::InvalidThreadId(s.to_string())),
            Ok(no) => Ok(Self(no)),
        }
    }
}

impl From<u64> for ThreadId {
    fn from(no: u64) -> Self {
        Self(no)
    }
}

/// A single post as published by the thread endpoint.
///
/// Only the fields the locator reads are modelled; everything else in the
/// payload is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub no: u64,
    /// Thread the post belongs to, `0` for the opening post.
    #[serde(default)]
    pub resto: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Comment body, HTML.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub com: Option<String>,
    /// Base64 MD5 of the attached file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tim: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
    /// Image count of the thread, only present on the opening post.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<u32>,
    /// Reply count of the thread, only present on the opening post.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replies: Option<u32>,
}

impl Post {
    pub fn is_op(&self) -> bool {
        self.resto == 0
    }

    pub fn has_image(&self) -> bool {
        self.md5.is_some()
    }

    /// Threads on `board` referenced by quote links in the comment, in order
    /// of appearance, without duplicates.
    pub fn thread_references(&self, board: &str) -> Vec<ThreadId> {
        self.com
            .as_deref()
            .map(|com| thread_references(com, board))
            .unwrap_or_default()
    }
}

/// Body of `/<board>/thread/<no>.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadPayload {
    #[serde(default)]
    pub posts: Vec<Post>,
}

impl ThreadPayload {
    pub fn from_slice(body: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn op(&self) -> Option<&Post> {
        self.posts.first()
    }

    pub fn image_count(&self) -> usize {
        self.posts.iter().filter(|p| p.has_image()).count()
    }
}
