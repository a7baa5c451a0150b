//! Tag notifications
//!
//! Entries produced by tagged transitions fan out into one pending
//! notification per (tag, recipient). Delivery is someone else's job; this
//! module only decides what gets queued.

use crate::db::Entry;
use crate::tree::Tag;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A notification waiting to be queued
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingNotification {
    pub tag: String,
    pub recipient: String,
    pub entry_id: i64,
}

/// Expand `tags` into one notification per recipient of each tag
///
/// Duplicate (tag, recipient) pairs collapse into one. Order follows the tags
/// and then each tag's recipient list.
pub fn notifications_for<'a>(
    entry: &Entry,
    tags: impl IntoIterator<Item = &'a Tag>,
) -> Vec<PendingNotification> {
    let mut seen = HashSet::new();
    let mut pending = Vec::new();
    for tag in tags {
        for recipient in &tag.recipients {
            if seen.insert((tag.name.as_str(), recipient.as_str())) {
                pending.push(PendingNotification {
                    tag: tag.name.clone(),
                    recipient: recipient.clone(),
                    entry_id: entry.id,
                });
            }
        }
    }
    pending
}
