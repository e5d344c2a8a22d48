//! Tag index for bulk invalidation.
//!
//! Maps each tag to the set of keys carrying it, and each key back to its tags
//! so removal is proportional to the key's own tag count. A tag with no
//! remaining members is dropped.

use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default)]
pub struct TagIndex {
    by_tag: HashMap<String, BTreeSet<String>>,
    by_key: HashMap<String, BTreeSet<String>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `key` with exactly `tags`, replacing any previous association.
    pub fn insert(&mut self, key: &str, tags: &BTreeSet<String>) {
        self.remove(key);
        if tags.is_empty() {
            return;
        }
        for tag in tags {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.by_key.insert(key.to_string(), tags.clone());
    }

    /// Drop `key` from every tag it belongs to.
    pub fn remove(&mut self, key: &str) {
        let Some(tags) = self.by_key.remove(key) else {
            return;
        };
        for tag in tags {
            if let Some(keys) = self.by_tag.get_mut(&tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_tag.remove(&tag);
                }
            }
        }
    }

    /// Union of keys indexed under any of `tags`.
    pub fn keys_for_tags<S: AsRef<str>>(&self, tags: &[S]) -> BTreeSet<String> {
        tags.iter()
            .filter_map(|tag| self.by_tag.get(tag.as_ref()))
            .flat_map(|keys| keys.iter().cloned())
            .collect()
    }

    /// Every key carrying at least one tag.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.by_key.keys().map(String::as_str)
    }

    pub fn tag_count(&self) -> usize {
        self.by_tag.len()
    }

    pub fn clear(&mut self) {
        self.by_tag.clear();
        self.by_key.clear();
    }
}
