//! Version archive diffing.
//!
//! A save produces archive rows from the stored state before the save and
//! the new values. Header and content are compared independently and each
//! changed field gets its own row carrying only that field.

/// The two archived rich-text fields of an article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub header: String,
    pub content: String,
}

impl Snapshot {
    pub fn new(header: &str, content: &str) -> Self {
        Self {
            header: header.to_string(),
            content: content.to_string(),
        }
    }
}

/// An archive row about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDraft {
    pub header: Option<String>,
    pub content: Option<String>,
}

/// Archive rows for a save. `previous` is `None` on creation, which always
/// yields one row holding both fields, empty or not.
pub fn versions_for_save(previous: Option<&Snapshot>, next: &Snapshot) -> Vec<VersionDraft> {
    let Some(previous) = previous else {
        return vec![VersionDraft {
            header: Some(next.header.clone()),
            content: Some(next.content.clone()),
        }];
    };

    let mut drafts = Vec::with_capacity(2);
    if previous.header != next.header {
        drafts.push(VersionDraft {
            header: Some(next.header.clone()),
            content: None,
        });
    }
    if previous.content != next.content {
        drafts.push(VersionDraft {
            header: None,
            content: Some(next.content.clone()),
        });
    }
    drafts
}
