//! Full-text index
//!
//! Inverted index from word to key set. A query matches the keys whose
//! values contain every query word (AND semantics).

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;

use super::{tokenize, ApplyObserver};

#[derive(Default)]
struct Postings {
    /// word -> keys whose value contains the word
    word_to_keys: HashMap<String, BTreeSet<String>>,

    /// key -> words currently indexed for it, so reindexing a key does not
    /// require walking the whole vocabulary
    key_to_words: HashMap<String, BTreeSet<String>>,
}

/// Inverted word index over values
pub struct FullTextIndex {
    postings: RwLock<Postings>,
}

impl FullTextIndex {
    pub fn new() -> Self {
        FullTextIndex {
            postings: RwLock::new(Postings::default()),
        }
    }

    /// Index (or reindex) a key's value
    pub fn index_value(&self, key: &str, value: &str) {
        let words: BTreeSet<String> = tokenize(value).into_iter().collect();
        let mut postings = self.postings.write();
        remove_postings(&mut postings, key);
        for word in &words {
            postings
                .word_to_keys
                .entry(word.clone())
                .or_default()
                .insert(key.to_string());
        }
        postings.key_to_words.insert(key.to_string(), words);
    }

    /// Drop a key from the index
    pub fn remove_key(&self, key: &str) {
        let mut postings = self.postings.write();
        remove_postings(&mut postings, key);
        postings.key_to_words.remove(key);
    }

    /// Keys whose value contains all query words, sorted.
    /// An empty query matches nothing.
    pub fn search(&self, query: &str) -> Vec<String> {
        let words = tokenize(query);
        if words.is_empty() {
            return Vec::new();
        }

        let postings = self.postings.read();
        let mut result: Option<BTreeSet<String>> = None;
        for word in &words {
            let keys = match postings.word_to_keys.get(word) {
                Some(keys) => keys,
                None => return Vec::new(),
            };
            result = Some(match result {
                None => keys.clone(),
                Some(acc) => acc.intersection(keys).cloned().collect(),
            });
        }
        result.map(|set| set.into_iter().collect()).unwrap_or_default()
    }
}

impl Default for FullTextIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplyObserver for FullTextIndex {
    fn on_apply(&self, key: &str, value: Option<&str>) {
        match value {
            Some(value) => self.index_value(key, value),
            None => self.remove_key(key),
        }
    }
}

fn remove_postings(postings: &mut Postings, key: &str) {
    if let Some(words) = postings.key_to_words.get(key).cloned() {
        for word in words {
            if let Some(keys) = postings.word_to_keys.get_mut(&word) {
                keys.remove(key);
                if keys.is_empty() {
                    postings.word_to_keys.remove(&word);
                }
            }
        }
    }
}
