//! Tracks which tags vary between images of a dataset.

use std::collections::BTreeSet;

use crate::image::TagSet;

/// Incremental diff of every image's tags against the first image's.
///
/// A key is "changing" once any image has a different value for it, or lacks
/// or adds it relative to the first image. Keys never stop changing.
#[derive(Debug, Clone, Default)]
pub struct ChangingKeys {
    first: Option<TagSet>,
    changing: BTreeSet<String>,
}

impl ChangingKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare one image's tags against the reference.
    pub fn observe(&mut self, tags: &TagSet) {
        let Some(first) = &self.first else {
            self.first = Some(tags.clone());
            return;
        };
        for (key, value) in tags.iter() {
            if first.get(key) != Some(value) {
                self.changing.insert(key.clone());
            }
        }
        for key in first.keys() {
            if !tags.contains(key) {
                self.changing.insert(key.clone());
            }
        }
    }

    /// Keys whose value has changed, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.changing.iter().cloned().collect()
    }

    pub fn is_changing(&self, key: &str) -> bool {
        self.changing.contains(key)
    }

    /// Keys that have held the same value in every image seen.
    pub fn constant_keys(&self) -> Vec<String> {
        self.first
            .iter()
            .flat_map(|first| first.keys())
            .filter(|k| !self.changing.contains(k.as_str()))
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.first = None;
        self.changing.clear();
    }
}
