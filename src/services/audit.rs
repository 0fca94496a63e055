use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Value};

use crate::db::models::{ThumbnailKind, VideoSnapshot};

/// Flattened, formatted view of a video as recorded in the audit log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoAuditView(BTreeMap<&'static str, Value>);

impl VideoAuditView {
    pub fn from_snapshot(snapshot: &VideoSnapshot) -> Self {
        let video = &snapshot.video;
        let mut fields = BTreeMap::new();
        fields.insert("video-id", json!(video.id));
        fields.insert("video-uuid", json!(video.uuid));
        fields.insert("video-name", json!(video.name));
        fields.insert("video-category", json!(video.category));
        fields.insert("video-licence", json!(video.licence));
        fields.insert("video-language", json!(video.language));
        fields.insert("video-privacy", json!(video.privacy()));
        fields.insert("video-nsfw", json!(video.nsfw));
        fields.insert("video-description", json!(video.description));
        fields.insert("video-support", json!(video.support));
        fields.insert("video-wait-transcoding", json!(video.wait_transcoding));
        fields.insert("video-comments-enabled", json!(video.comments_enabled));
        fields.insert("video-download-enabled", json!(video.download_enabled));
        fields.insert("video-published-at", json!(video.published_at));
        fields.insert(
            "video-originally-published-at",
            json!(video.originally_published_at),
        );
        fields.insert("video-channel-id", json!(snapshot.channel.id));
        fields.insert("video-channel-name", json!(snapshot.channel.name));
        fields.insert("video-tags", json!(snapshot.tags));
        fields.insert(
            "video-thumbnail",
            json!(snapshot.thumbnail(ThumbnailKind::Miniature).map(|t| &t.filename)),
        );
        fields.insert(
            "video-preview",
            json!(snapshot.thumbnail(ThumbnailKind::Preview).map(|t| &t.filename)),
        );
        fields.insert("video-blacklisted", json!(snapshot.is_blacklisted()));
        fields.insert(
            "video-schedule-update-at",
            json!(snapshot.schedule.as_ref().map(|s| s.update_at)),
        );
        fields.insert(
            "video-schedule-privacy",
            json!(snapshot.schedule.as_ref().and_then(|s| s.privacy)),
        );
        Self(fields)
    }

    pub fn changed_keys(&self, old: &VideoAuditView) -> Vec<&'static str> {
        self.0
            .iter()
            .filter(|(key, value)| old.0.get(*key) != Some(*value))
            .map(|(key, _)| *key)
            .collect()
    }
}

pub struct AuditLogger {
    domain: &'static str,
}

impl AuditLogger {
    pub fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Writes an update entry on the `audit` log target and returns it.
    pub fn update(&self, audit_id: &str, new: &VideoAuditView, old: &VideoAuditView) -> Value {
        let entry = json!({
            "domain": self.domain,
            "action": "update",
            "user": audit_id,
            "changed": new.changed_keys(old),
            "new": new,
            "old": old,
        });
        log::info!(target: "audit", "{}", entry);
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::fixtures;

    #[test]
    fn entry_lists_changed_keys() {
        let old = fixtures::public_video();
        let mut new = old.clone();
        new.video.name = "Renamed".to_string();
        new.tags.push("gamma".to_string());

        let entry = AuditLogger::new("videos").update(
            "alice",
            &VideoAuditView::from_snapshot(&new),
            &VideoAuditView::from_snapshot(&old),
        );

        assert_eq!(entry["user"], "alice");
        assert_eq!(entry["changed"], json!(["video-name", "video-tags"]));
        assert_eq!(entry["new"]["video-name"], "Renamed");
        assert_eq!(entry["old"]["video-name"], old.video.name.as_str());
    }

    #[test]
    fn identical_views_have_no_changes() {
        let snapshot = fixtures::public_video();
        let view = VideoAuditView::from_snapshot(&snapshot);
        assert!(view.changed_keys(&view.clone()).is_empty());
    }
}
