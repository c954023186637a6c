use regex::{Regex, RegexBuilder};

use crate::{Error, Result};

/// Case-insensitive "any of these keywords" test.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    regex: Regex,
}

impl KeywordMatcher {
    pub fn new<I, S>(keywords: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let alternatives: Vec<String> = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_string())
            .filter(|k| !k.is_empty())
            .map(|k| regex::escape(&k))
            .collect();

        if alternatives.is_empty() {
            return Err(Error::config("at least one thread keyword is required"));
        }

        let regex = RegexBuilder::new(&alternatives.join("|"))
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::config(format!("invalid keywords: {e}")))?;

        Ok(Self { regex })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// A post is on topic if either its subject or its comment matches.
    pub fn matches_post(&self, subject: Option<&str>, comment: Option<&str>) -> bool {
        subject.is_some_and(|s| self.is_match(s)) || comment.is_some_and(|c| self.is_match(c))
    }
}
