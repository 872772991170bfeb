//! Transient user-facing notices
//!
//! Commands push a notice on success or failure; the UI drains or dismisses
//! them. Only the newest [`MAX_NOTICES`] are kept.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::CommandError;

pub const MAX_NOTICES: usize = 50;

/// Longest error description shown before truncation.
const MAX_DESCRIPTION_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeVariant {
    Success,
    Destructive,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub id: String,
    pub title: String,
    pub description: String,
    pub variant: NoticeVariant,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct Notices {
    queue: Mutex<VecDeque<Notice>>,
}

impl Notices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, title: &str, description: &str, variant: NoticeVariant) -> Notice {
        let notice = Notice {
            id: crate::util::new_id(),
            title: title.to_string(),
            description: description.to_string(),
            variant,
            created_at: Utc::now(),
        };
        let mut queue = self.queue.lock();
        queue.push_back(notice.clone());
        while queue.len() > MAX_NOTICES {
            queue.pop_front();
        }
        notice
    }

    pub fn success(&self, title: &str, description: &str) -> Notice {
        self.push(title, description, NoticeVariant::Success)
    }

    /// Destructive notice for a failed command.
    pub fn error(&self, title: &str, err: &CommandError) -> Notice {
        let description = if err.message.chars().count() > MAX_DESCRIPTION_CHARS {
            let cut: String = err.message.chars().take(MAX_DESCRIPTION_CHARS).collect();
            format!("{}...", cut)
        } else {
            err.message.clone()
        };
        log::warn!("{}: {}", title, err.message);
        self.push(title, &description, NoticeVariant::Destructive)
    }

    pub fn dismiss(&self, id: &str) -> bool {
        let mut queue = self.queue.lock();
        let before = queue.len();
        queue.retain(|n| n.id != id);
        queue.len() != before
    }

    /// Take every pending notice, oldest first.
    pub fn drain(&self) -> Vec<Notice> {
        self.queue.lock().drain(..).collect()
    }

    pub fn list(&self) -> Vec<Notice> {
        self.queue.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoardError;

    #[test]
    fn test_queue_keeps_newest() {
        let notices = Notices::new();
        for i in 0..(MAX_NOTICES + 5) {
            notices.success("Saved", &i.to_string());
        }
        let all = notices.list();
        assert_eq!(all.len(), MAX_NOTICES);
        assert_eq!(all[0].description, "5");
    }

    #[test]
    fn test_error_truncates_long_messages() {
        let notices = Notices::new();
        let err = CommandError::from(BoardError::validation("é".repeat(300)));
        let notice = notices.error("Could not save", &err);
        assert_eq!(notice.variant, NoticeVariant::Destructive);
        assert!(notice.description.ends_with("..."));
        assert_eq!(notice.description.chars().count(), MAX_DESCRIPTION_CHARS + 3);
    }

    #[test]
    fn test_dismiss_and_drain() {
        let notices = Notices::new();
        let first = notices.success("Upvoted", "");
        notices.success("Comment added", "");
        assert!(notices.dismiss(&first.id));
        assert!(!notices.dismiss(&first.id));
        let drained = notices.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].title, "Comment added");
        assert!(notices.is_empty());
    }
}
