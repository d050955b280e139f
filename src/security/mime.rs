//! Content-type classification

use std::collections::HashSet;
use std::fmt;

use crate::config::MimeTable;

/// Allowed media classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaClass {
    Image,
    Video,
    Audio,
}

impl MediaClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaClass::Image => "image",
            MediaClass::Video => "video",
            MediaClass::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Membership test over the configured MIME table
#[derive(Debug, Clone, Default)]
pub struct MimeClassifier {
    images: HashSet<String>,
    videos: HashSet<String>,
    audios: HashSet<String>,
}

impl MimeClassifier {
    pub fn new(table: &MimeTable) -> Self {
        let collect = |items: &[String]| -> HashSet<String> {
            items
                .iter()
                .map(|s| essence(s))
                .filter(|s| !s.is_empty())
                .collect()
        };
        Self {
            images: collect(&table.images),
            videos: collect(&table.videos),
            audios: collect(&table.audios),
        }
    }

    /// Class of `content_type`, ignoring parameters after `;`
    pub fn classify(&self, content_type: &str) -> Option<MediaClass> {
        let mime = essence(content_type);
        if mime.is_empty() {
            return None;
        }
        if self.images.contains(&mime) {
            Some(MediaClass::Image)
        } else if self.videos.contains(&mime) {
            Some(MediaClass::Video)
        } else if self.audios.contains(&mime) {
            Some(MediaClass::Audio)
        } else {
            None
        }
    }

    pub fn is_allowed(&self, content_type: &str) -> bool {
        self.classify(content_type).is_some()
    }

    /// Number of MIME strings in one class
    pub fn class_len(&self, class: MediaClass) -> usize {
        match class {
            MediaClass::Image => self.images.len(),
            MediaClass::Video => self.videos.len(),
            MediaClass::Audio => self.audios.len(),
        }
    }
}

/// MIME token before the first `;`, trimmed and lower-cased
pub fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
