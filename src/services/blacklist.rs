use chrono::{DateTime, Utc};

use crate::db::models::{BlacklistType, NewVideoBlacklist, User, VideoSnapshot};

pub const AUTO_BLACKLIST_REASON: &str = "Auto-blacklisted. Moderator review required.";

/// Returns the blacklist row to insert when the moderation policy holds the
/// video back for review.
pub fn auto_blacklist_if_needed(
    snapshot: &VideoSnapshot,
    user: &User,
    enabled: bool,
    now: DateTime<Utc>,
) -> Option<NewVideoBlacklist> {
    if !needs_blacklist(snapshot, user, enabled) {
        return None;
    }

    log::info!(
        "Video {} auto-blacklisted after update by {}",
        snapshot.video.uuid,
        user.username
    );

    Some(NewVideoBlacklist {
        video_id: snapshot.video.id,
        reason: Some(AUTO_BLACKLIST_REASON.to_string()),
        unfederated: true,
        blacklist_type: BlacklistType::AutoBeforePublished as i16,
        created_at: now,
    })
}

fn needs_blacklist(snapshot: &VideoSnapshot, user: &User, enabled: bool) -> bool {
    if !enabled || snapshot.video.remote || snapshot.is_blacklisted() {
        return false;
    }

    !(user.can_manage_blacklist() || user.bypasses_auto_blacklist())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::fixtures;
    use crate::db::models::{BYPASS_VIDEO_AUTO_BLACKLIST, UserRole};

    #[test]
    fn regular_users_are_blacklisted_when_enabled() {
        let snapshot = fixtures::public_video();
        let user = fixtures::owner();

        let row = auto_blacklist_if_needed(&snapshot, &user, true, Utc::now()).unwrap();
        assert!(row.unfederated);
        assert_eq!(row.blacklist_type, BlacklistType::AutoBeforePublished as i16);
        assert!(auto_blacklist_if_needed(&snapshot, &user, false, Utc::now()).is_none());
    }

    #[test]
    fn moderators_and_bypass_flag_skip_the_policy() {
        let snapshot = fixtures::public_video();
        let mut moderator = fixtures::owner();
        moderator.role = UserRole::Moderator as i16;
        assert!(auto_blacklist_if_needed(&snapshot, &moderator, true, Utc::now()).is_none());

        let mut trusted = fixtures::owner();
        trusted.admin_flags = BYPASS_VIDEO_AUTO_BLACKLIST;
        assert!(auto_blacklist_if_needed(&snapshot, &trusted, true, Utc::now()).is_none());
    }

    #[test]
    fn already_blacklisted_or_remote_videos_are_left_alone() {
        let user = fixtures::owner();

        let mut remote = fixtures::public_video();
        remote.video.remote = true;
        assert!(auto_blacklist_if_needed(&remote, &user, true, Utc::now()).is_none());

        let mut blacklisted = fixtures::public_video();
        blacklisted.blacklist = Some(fixtures::blacklist(blacklisted.video.id, false));
        assert!(auto_blacklist_if_needed(&blacklisted, &user, true, Utc::now()).is_none());
    }
}
