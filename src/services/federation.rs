//! Outbox events emitted by the update path, and the rules deciding when a
//! video is announced to followers or to its channel's subscribers.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::db::models::{OutboxEvent, Video, VideoChannel, VideoPrivacy, VideoSnapshot, VideoState};

pub const AGGREGATE_VIDEO: &str = "video";

pub const DELETE_VIDEO: &str = "federation.video.delete";
pub const CREATE_VIDEO: &str = "federation.video.create";
pub const UPDATE_VIDEO: &str = "federation.video.update";
pub const CHANGE_CHANNEL_SHARE: &str = "federation.video.channel_share";
pub const NOTIFY_NEW_VIDEO: &str = "notification.video.published";
pub const NOTIFY_AUTO_BLACKLIST: &str = "notification.video.auto_blacklisted";

fn video_event(event_type: &str, video: &Video, payload: Value, now: DateTime<Utc>) -> OutboxEvent {
    OutboxEvent {
        id: Uuid::new_v4(),
        aggregate_type: AGGREGATE_VIDEO.to_string(),
        aggregate_id: video.uuid,
        event_type: event_type.to_string(),
        payload,
        metadata: Some(json!({ "video_id": video.id })),
        created_at: now,
        published_at: None,
        retry_count: 0,
        last_error: None,
    }
}

/// Tombstone sent when a video stops being eligible for federation.
pub fn tombstone(video: &Video, channel: &VideoChannel, now: DateTime<Utc>) -> OutboxEvent {
    video_event(
        DELETE_VIDEO,
        video,
        json!({
            "type": "Delete",
            "actor": channel.actor_url,
            "object": { "type": "Tombstone", "uuid": video.uuid },
        }),
        now,
    )
}

pub fn channel_share_changed(
    video: &Video,
    old_channel: &VideoChannel,
    new_channel: &VideoChannel,
    now: DateTime<Utc>,
) -> OutboxEvent {
    video_event(
        CHANGE_CHANNEL_SHARE,
        video,
        json!({
            "undo": { "type": "Announce", "actor": old_channel.actor_url },
            "announce": { "type": "Announce", "actor": new_channel.actor_url },
            "object": video.uuid,
        }),
        now,
    )
}

pub fn announce(snapshot: &VideoSnapshot, is_new_video: bool, now: DateTime<Utc>) -> OutboxEvent {
    let (event_type, activity) = if is_new_video {
        (CREATE_VIDEO, "Create")
    } else {
        (UPDATE_VIDEO, "Update")
    };
    video_event(
        event_type,
        &snapshot.video,
        json!({
            "type": activity,
            "actor": snapshot.channel.actor_url,
            "object": video_object(snapshot),
        }),
        now,
    )
}

pub fn new_video_notification(snapshot: &VideoSnapshot, now: DateTime<Utc>) -> OutboxEvent {
    video_event(
        NOTIFY_NEW_VIDEO,
        &snapshot.video,
        json!({
            "channel_id": snapshot.channel.id,
            "channel_name": snapshot.channel.name,
            "video_uuid": snapshot.video.uuid,
            "video_name": snapshot.video.name,
        }),
        now,
    )
}

pub fn auto_blacklist_notification(video: &Video, now: DateTime<Utc>) -> OutboxEvent {
    video_event(
        NOTIFY_AUTO_BLACKLIST,
        video,
        json!({ "video_uuid": video.uuid, "video_name": video.name }),
        now,
    )
}

/// Hook events carry the action name after the `hook.` prefix.
pub fn hook_event(action: &str, snapshot: &VideoSnapshot, body: &Value, now: DateTime<Utc>) -> OutboxEvent {
    video_event(
        &format!("hook.{}", action),
        &snapshot.video,
        json!({ "video": video_object(snapshot), "body": body }),
        now,
    )
}

/// Blacklisted videos stay federated only when the blacklist does not
/// unfederate them and the video is not being published for the first time.
pub fn is_federatable(snapshot: &VideoSnapshot, is_new_video: bool, federate_unlisted: bool) -> bool {
    let blacklist_allows = match &snapshot.blacklist {
        None => true,
        Some(blacklist) => !is_new_video && !blacklist.unfederated,
    };

    blacklist_allows
        && snapshot.video.has_privacy_for_federation(federate_unlisted)
        && snapshot.video.has_state_for_federation()
}

pub fn needs_new_video_notification(snapshot: &VideoSnapshot) -> bool {
    snapshot.video.privacy() == VideoPrivacy::Public
        && snapshot.video.state() == Some(VideoState::Published)
        && !snapshot.is_blacklisted()
}

fn video_object(snapshot: &VideoSnapshot) -> Value {
    let video = &snapshot.video;
    json!({
        "type": "Video",
        "uuid": video.uuid,
        "name": video.name,
        "category": video.category,
        "licence": video.licence,
        "language": video.language,
        "sensitive": video.nsfw,
        "content": video.description,
        "support": video.support,
        "waitTranscoding": video.wait_transcoding,
        "commentsEnabled": video.comments_enabled,
        "downloadEnabled": video.download_enabled,
        "published": video.published_at,
        "originallyPublishedAt": video.originally_published_at,
        "updated": video.updated_at,
        "tag": snapshot.tags,
        "attributedTo": snapshot.channel.actor_url,
    })
}
