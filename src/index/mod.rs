//! Index Module
//!
//! Optional search indexes over values, driven as observers of apply
//! events. Observers sit off the durability path: they see each change
//! after it is applied, in apply order, and are rebuilt from a full scan
//! of the recovered map at startup rather than persisted.

mod fulltext;
mod embedding;

pub use embedding::EmbeddingIndex;
pub use fulltext::FullTextIndex;

/// Receiver of post-apply notifications from the state engine.
///
/// `value` is `None` when the key was deleted. Implementations must
/// tolerate being re-driven from scratch via repeated `on_apply` calls.
pub trait ApplyObserver: Send + Sync {
    fn on_apply(&self, key: &str, value: Option<&str>);
}

/// Tokenization shared by both indexes: lowercase, split on
/// non-alphanumeric, drop empties.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}
