//! Folder-convention detection.
//!
//! A volume's files usually follow one layout, e.g. `Author/Title/file`.
//! Every observed path contributes its depth pattern to a histogram, and the
//! most frequent pattern is taken as the volume's format.

use serde::{Deserialize, Serialize};

/// Counts of path-depth patterns, kept in first-observed order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatHistogram {
    counts: Vec<(String, u64)>,
}

impl FormatHistogram {
    /// Creates an empty histogram.
    pub fn new() -> Self {
        Self::default()
    }

    /// Depth pattern of a path: each segment becomes a letter,
    /// so `/Austen/Emma/emma.epub` is `A/B/C`. Segments past `Z` repeat `Z`.
    pub fn pattern_of(path: &str) -> String {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .enumerate()
            .map(|(i, _)| char::from(b'A' + i.min(25) as u8).to_string())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Adds one occurrence of `label`.
    pub fn increment(&mut self, label: &str) {
        match self.counts.iter_mut().find(|(l, _)| l == label) {
            Some((_, count)) => *count += 1,
            None => self.counts.push((label.to_string(), 1)),
        }
    }

    /// Adds one occurrence of the pattern of `path`. Root-level noise
    /// (an empty pattern) is ignored.
    pub fn observe_path(&mut self, path: &str) {
        let pattern = Self::pattern_of(path);
        if !pattern.is_empty() {
            self.increment(&pattern);
        }
    }

    /// Occurrences of `label`.
    pub fn count(&self, label: &str) -> u64 {
        self.counts
            .iter()
            .find(|(l, _)| l == label)
            .map_or(0, |(_, c)| *c)
    }

    /// The most frequent label; ties go to the label observed first.
    pub fn dominant_format(&self) -> Option<&str> {
        let mut best: Option<&(String, u64)> = None;
        for entry in &self.counts {
            if best.is_none_or(|b| entry.1 > b.1) {
                best = Some(entry);
            }
        }
        best.map(|(label, _)| label.as_str())
    }

    /// Labels and counts in first-observed order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(l, c)| (l.as_str(), *c))
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
