//! Finding candidate successor threads in the watched thread.

mod extractor;
mod keywords;
mod pending;
mod snapshot;

pub use extractor::LinkExtractor;
pub use keywords::KeywordMatcher;
pub use pending::PendingLinkCache;
pub use snapshot::ThreadSnapshot;
