use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i16", into = "i16")]
pub enum VideoPrivacy {
    Public = 1,
    Unlisted = 2,
    Private = 3,
    Internal = 4,
}

impl VideoPrivacy {
    pub fn is_confidential(self) -> bool {
        matches!(
            self,
            VideoPrivacy::Private | VideoPrivacy::Unlisted | VideoPrivacy::Internal
        )
    }

    pub fn is_for_federation(self, federate_unlisted: bool) -> bool {
        match self {
            VideoPrivacy::Public => true,
            VideoPrivacy::Unlisted => federate_unlisted,
            _ => false,
        }
    }
}

impl TryFrom<i16> for VideoPrivacy {
    type Error = String;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(VideoPrivacy::Public),
            2 => Ok(VideoPrivacy::Unlisted),
            3 => Ok(VideoPrivacy::Private),
            4 => Ok(VideoPrivacy::Internal),
            other => Err(format!("unknown video privacy {}", other)),
        }
    }
}

impl From<VideoPrivacy> for i16 {
    fn from(privacy: VideoPrivacy) -> Self {
        privacy as i16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VideoState {
    Published = 1,
    ToTranscode = 2,
    ToImport = 3,
    WaitingForLive = 4,
    LiveEnded = 5,
    ToMoveToExternalStorage = 6,
}

impl VideoState {
    pub fn from_db(value: i16) -> Option<Self> {
        match value {
            1 => Some(VideoState::Published),
            2 => Some(VideoState::ToTranscode),
            3 => Some(VideoState::ToImport),
            4 => Some(VideoState::WaitingForLive),
            5 => Some(VideoState::LiveEnded),
            6 => Some(VideoState::ToMoveToExternalStorage),
            _ => None,
        }
    }

    pub fn is_for_federation(self) -> bool {
        matches!(
            self,
            VideoState::Published | VideoState::WaitingForLive | VideoState::LiveEnded
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ThumbnailKind {
    Miniature = 1,
    Preview = 2,
}

impl ThumbnailKind {
    pub fn from_db(value: i16) -> Option<Self> {
        match value {
            1 => Some(ThumbnailKind::Miniature),
            2 => Some(ThumbnailKind::Preview),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UserRole {
    Administrator = 0,
    Moderator = 1,
    User = 2,
}

/// Admin flag letting a user's uploads skip the auto-blacklist.
pub const BYPASS_VIDEO_AUTO_BLACKLIST: i32 = 1 << 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlacklistType {
    AutoBeforePublished = 2,
}

#[derive(Debug, Serialize, Deserialize, Queryable, Selectable, Insertable, Clone, PartialEq)]
#[diesel(table_name = crate::db::schema::users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role: i16,
    pub admin_flags: i32,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn role(&self) -> UserRole {
        match self.role {
            0 => UserRole::Administrator,
            1 => UserRole::Moderator,
            _ => UserRole::User,
        }
    }

    pub fn can_update_any_video(&self) -> bool {
        matches!(self.role(), UserRole::Administrator | UserRole::Moderator)
    }

    pub fn can_manage_blacklist(&self) -> bool {
        matches!(self.role(), UserRole::Administrator | UserRole::Moderator)
    }

    pub fn bypasses_auto_blacklist(&self) -> bool {
        self.admin_flags & BYPASS_VIDEO_AUTO_BLACKLIST != 0
    }
}

#[derive(Debug, Serialize, Deserialize, Queryable, Selectable, Insertable, Clone, PartialEq)]
#[diesel(table_name = crate::db::schema::video_channels)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct VideoChannel {
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
    pub actor_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(
    Debug, Serialize, Deserialize, Queryable, Selectable, Insertable, AsChangeset, Clone, PartialEq,
)]
#[diesel(table_name = crate::db::schema::videos)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
pub struct Video {
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub category: Option<i32>,
    pub licence: Option<i32>,
    pub language: Option<String>,
    pub privacy: i16,
    pub nsfw: bool,
    pub description: Option<String>,
    pub support: Option<String>,
    pub wait_transcoding: bool,
    pub comments_enabled: bool,
    pub download_enabled: bool,
    pub state: i16,
    pub remote: bool,
    pub originally_published_at: Option<DateTime<Utc>>,
    pub published_at: DateTime<Utc>,
    pub channel_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Video {
    /// Unknown stored values are treated as private so they never federate.
    pub fn privacy(&self) -> VideoPrivacy {
        VideoPrivacy::try_from(self.privacy).unwrap_or(VideoPrivacy::Private)
    }

    pub fn state(&self) -> Option<VideoState> {
        VideoState::from_db(self.state)
    }

    pub fn has_privacy_for_federation(&self, federate_unlisted: bool) -> bool {
        self.privacy().is_for_federation(federate_unlisted)
    }

    pub fn has_state_for_federation(&self) -> bool {
        self.state().is_some_and(VideoState::is_for_federation)
    }

    pub fn is_confidential(&self) -> bool {
        self.privacy().is_confidential()
    }

    /// Leaving the private state counts as a fresh publication.
    pub fn set_privacy(&mut self, privacy: VideoPrivacy, now: DateTime<Utc>) {
        if self.privacy() == VideoPrivacy::Private && privacy != VideoPrivacy::Private {
            self.published_at = now;
        }
        self.privacy = privacy.into();
    }

    /// Equality on everything a caller can change, ignoring `updated_at`.
    pub fn same_content(&self, other: &Video) -> bool {
        Video {
            updated_at: other.updated_at,
            ..self.clone()
        } == *other
    }
}

#[derive(Debug, Serialize, Deserialize, Queryable, Selectable, Clone, PartialEq)]
#[diesel(table_name = crate::db::schema::thumbnails)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Thumbnail {
    pub id: i64,
    pub video_id: i64,
    pub kind: i16,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable, Clone, PartialEq)]
#[diesel(table_name = crate::db::schema::thumbnails)]
pub struct NewThumbnail {
    pub video_id: i64,
    pub kind: i16,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Queryable, Selectable, Clone, PartialEq)]
#[diesel(table_name = crate::db::schema::video_streaming_playlists)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct VideoStreamingPlaylist {
    pub id: i64,
    pub video_id: i64,
    pub playlist_url: String,
}

#[derive(
    Debug, Serialize, Deserialize, Queryable, Selectable, AsChangeset, Clone, PartialEq,
)]
#[diesel(table_name = crate::db::schema::video_files)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
pub struct VideoFile {
    pub id: i64,
    pub video_id: Option<i64>,
    pub playlist_id: Option<i64>,
    pub resolution: i32,
    pub size: i64,
    pub extname: String,
    pub torrent_filename: Option<String>,
    pub info_hash: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Progressive files plus the renditions of the adaptive-streaming playlist.
#[derive(Debug, Clone, Default)]
pub struct VideoFiles {
    pub progressive: Vec<VideoFile>,
    pub streaming: Vec<VideoFile>,
}

#[derive(Debug, Serialize, Deserialize, Queryable, Selectable, Clone, PartialEq)]
#[diesel(table_name = crate::db::schema::schedule_video_updates)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ScheduleVideoUpdate {
    pub id: i64,
    pub video_id: i64,
    pub update_at: DateTime<Utc>,
    pub privacy: Option<i16>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable, Clone, PartialEq)]
#[diesel(table_name = crate::db::schema::schedule_video_updates)]
pub struct NewScheduleVideoUpdate {
    pub video_id: i64,
    pub update_at: DateTime<Utc>,
    pub privacy: Option<i16>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Queryable, Selectable, Clone, PartialEq)]
#[diesel(table_name = crate::db::schema::video_blacklists)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct VideoBlacklist {
    pub id: i64,
    pub video_id: i64,
    pub reason: Option<String>,
    pub unfederated: bool,
    pub blacklist_type: i16,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable, Clone, PartialEq)]
#[diesel(table_name = crate::db::schema::video_blacklists)]
pub struct NewVideoBlacklist {
    pub video_id: i64,
    pub reason: Option<String>,
    pub unfederated: bool,
    pub blacklist_type: i16,
    pub created_at: DateTime<Utc>,
}

/// Event persisted in the outbox table and delivered after commit.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable, PartialEq)]
#[diesel(table_name = crate::db::schema::outbox_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub last_error: Option<String>,
}

/// A video loaded with the associations the update path reads.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoSnapshot {
    pub video: Video,
    pub channel: VideoChannel,
    pub tags: Vec<String>,
    pub thumbnails: Vec<Thumbnail>,
    pub blacklist: Option<VideoBlacklist>,
    pub schedule: Option<ScheduleVideoUpdate>,
}

impl VideoSnapshot {
    pub fn is_blacklisted(&self) -> bool {
        self.blacklist.is_some()
    }

    pub fn thumbnail(&self, kind: ThumbnailKind) -> Option<&Thumbnail> {
        self.thumbnails
            .iter()
            .find(|t| ThumbnailKind::from_db(t.kind) == Some(kind))
    }
}

/// Path segment identifying a video: numeric id or UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoIdentifier {
    Id(i64),
    Uuid(Uuid),
}

impl std::str::FromStr for VideoIdentifier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = s.parse::<i64>() {
            return Ok(VideoIdentifier::Id(id));
        }
        Uuid::parse_str(s)
            .map(VideoIdentifier::Uuid)
            .map_err(|_| format!("invalid video identifier: {}", s))
    }
}
