//! Quote-link and thread URL parsing.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::Error;
use crate::model::ThreadId;

static ANCHOR_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<a\s[^>]*>").unwrap());
static HREF_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href\s*=\s*"([^"]*)""#).unwrap());
static QUOTELINK_CLASS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"class\s*=\s*"[^"]*\bquotelink\b[^"]*""#).unwrap());
/// `123#p456`, `/mlp/thread/123#p456`, `/mlp/res/123.html#p456`, optionally host-qualified.
static QUOTE_HREF_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:https?:)?//[^/]+)?(?:/([a-z0-9]+)/(?:thread|res)/)?(\d+)").unwrap()
});
pub static THREAD_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https?://)?boards\.(?:4chan|4channel)\.org/([a-z0-9]+)/(?:thread|res)/(\d+)",
    )
    .unwrap()
});

/// Extracts the threads referenced by quote links in a comment.
///
/// In-thread quotes (`#p123`) and links to other boards are ignored. The
/// result keeps the order of first appearance and holds no duplicates.
pub fn thread_references(comment_html: &str, board: &str) -> Vec<ThreadId> {
    let mut ids: Vec<ThreadId> = Vec::new();

    for anchor in ANCHOR_REGEX.find_iter(comment_html) {
        let tag = anchor.as_str();
        if !QUOTELINK_CLASS_REGEX.is_match(tag) {
            continue;
        }
        let Some(href) = HREF_REGEX.captures(tag).and_then(|c| c.get(1)) else {
            continue;
        };
        let Some(id) = parse_quote_href(href.as_str(), board) else {
            continue;
        };
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    ids
}

fn parse_quote_href(href: &str, board: &str) -> Option<ThreadId> {
    let caps = QUOTE_HREF_REGEX.captures(href)?;
    if let Some(link_board) = caps.get(1)
        && link_board.as_str() != board
    {
        return None;
    }
    caps.get(2)?.as_str().parse().ok()
}

/// Splits a thread URL into its board and thread number.
pub fn parse_thread_url(url: &str) -> Result<(String, ThreadId), Error> {
    let caps = THREAD_URL_REGEX
        .captures(url.trim())
        .ok_or_else(|| Error::NotAThreadUrl(url.to_string()))?;
    let board = caps[1].to_string();
    let id = caps[2].parse()?;
    Ok((board, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_thread_link() {
        let com = r#"New thread <a href="/mlp/thread/4242#p4243" class="quotelink">&gt;&gt;4243</a>"#;
        assert_eq!(thread_references(com, "mlp"), vec![ThreadId::new(4242)]);
    }

    #[test]
    fn test_legacy_links() {
        let com = concat!(
            r#"<a href="555#p556" class="quotelink">&gt;&gt;556</a>"#,
            r#"<a href="/mlp/res/777.html#p778" class="quotelink">&gt;&gt;778</a>"#,
        );
        assert_eq!(
            thread_references(com, "mlp"),
            vec![ThreadId::new(555), ThreadId::new(777)]
        );
    }

    #[test]
    fn test_ignores_same_thread_and_other_boards() {
        let com = concat!(
            r##"<a href="#p100" class="quotelink">&gt;&gt;100</a>"##,
            r#"<a href="/b/thread/900#p901" class="quotelink">&gt;&gt;&gt;/b/901</a>"#,
            r#"<a href="https://example.com/123">link</a>"#,
        );
        assert!(thread_references(com, "mlp").is_empty());
    }

    #[test]
    fn test_deduplicates_within_comment() {
        let com = concat!(
            r#"<a href="/mlp/thread/42#p43" class="quotelink">&gt;&gt;43</a>"#,
            r#"<a href="/mlp/thread/42#p44" class="quotelink">&gt;&gt;44</a>"#,
        );
        assert_eq!(thread_references(com, "mlp"), vec![ThreadId::new(42)]);
    }

    #[test]
    fn test_parse_thread_url() {
        let (board, id) =
            parse_thread_url("https://boards.4chan.org/mlp/thread/123456/mlp-general").unwrap();
        assert_eq!(board, "mlp");
        assert_eq!(id, ThreadId::new(123456));

        let (board, id) = parse_thread_url("boards.4channel.org/mlp/res/99#p100").unwrap();
        assert_eq!(board, "mlp");
        assert_eq!(id.get(), 99);

        assert!(parse_thread_url("https://example.com/mlp/thread/1").is_err());
    }
}
