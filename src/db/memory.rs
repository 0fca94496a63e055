//! In-memory store used by unit tests. Writes go to a working copy that is
//! swapped in only when the whole plan applied, mirroring a rollback.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::db::models::{
    OutboxEvent, ScheduleVideoUpdate, Thumbnail, User, VideoBlacklist, VideoChannel, VideoFile,
    VideoFiles, VideoIdentifier, VideoSnapshot,
};
use crate::db::store::{CommittedUpdate, ScheduleChange, UpdatePlan, VideoStore};
use crate::error::{serialization_failure, AppError, AppResult};
use crate::services::outbox::OutboxRepository;

#[derive(Debug, Default, Clone)]
struct State {
    videos: HashMap<i64, VideoSnapshot>,
    channels: HashMap<i64, VideoChannel>,
    users: HashMap<i64, User>,
    files: HashMap<i64, VideoFiles>,
    outbox: Vec<OutboxEvent>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        1_000 + self.next_id
    }
}

#[derive(Debug, Default)]
struct Faults {
    transient_conflicts: u32,
    fail_at: Option<&'static str>,
    fail_enqueue: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    faults: Mutex<Faults>,
    journal: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn insert_video(&self, snapshot: VideoSnapshot) {
        let mut state = self.state.lock().unwrap();
        state
            .channels
            .insert(snapshot.channel.id, snapshot.channel.clone());
        state.videos.insert(snapshot.video.id, snapshot);
    }

    pub fn insert_channel(&self, channel: VideoChannel) {
        self.state.lock().unwrap().channels.insert(channel.id, channel);
    }

    pub fn insert_user(&self, user: User) {
        self.state.lock().unwrap().users.insert(user.id, user);
    }

    pub fn set_files(&self, video_id: i64, files: VideoFiles) {
        self.state.lock().unwrap().files.insert(video_id, files);
    }

    pub fn push_events(&self, events: Vec<OutboxEvent>) {
        self.state.lock().unwrap().outbox.extend(events);
    }

    pub fn snapshot(&self, video_id: i64) -> Option<VideoSnapshot> {
        self.state.lock().unwrap().videos.get(&video_id).cloned()
    }

    pub fn files(&self, video_id: i64) -> VideoFiles {
        self.state
            .lock()
            .unwrap()
            .files
            .get(&video_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<OutboxEvent> {
        self.state.lock().unwrap().outbox.clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.event_type).collect()
    }

    /// Committed writes in the order they were applied.
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    /// The next `count` transactions fail with a serialization conflict.
    pub fn fail_transiently(&self, count: u32) {
        self.faults.lock().unwrap().transient_conflicts = count;
    }

    /// Fails the transaction when it reaches the named write.
    pub fn fail_at(&self, write: &'static str) {
        self.faults.lock().unwrap().fail_at = Some(write);
    }

    pub fn fail_enqueue(&self) {
        self.faults.lock().unwrap().fail_enqueue = true;
    }

    fn check(&self, write: &str) -> AppResult<()> {
        if self.faults.lock().unwrap().fail_at == Some(write) {
            return Err(AppError::Database(diesel::result::Error::RollbackTransaction));
        }
        Ok(())
    }

    fn find_id(state: &State, video: VideoIdentifier) -> Option<i64> {
        match video {
            VideoIdentifier::Id(id) => state.videos.contains_key(&id).then_some(id),
            VideoIdentifier::Uuid(uuid) => state
                .videos
                .values()
                .find(|s| s.video.uuid == uuid)
                .map(|s| s.video.id),
        }
    }

    fn apply(&self, state: &mut State, plan: &UpdatePlan, journal: &mut Vec<String>) -> AppResult<()> {
        let video_id = plan.video.id;
        let now = Utc::now();

        self.check("withdrawals")?;
        for event in &plan.withdrawals {
            state.outbox.push(event.clone());
            journal.push(format!("event:{}", event.event_type));
        }

        self.check("video")?;
        let channel = state
            .channels
            .get(&plan.video.channel_id)
            .cloned()
            .ok_or(AppError::ChannelNotFound)?;
        let mut thumbnail_ids = Vec::new();
        for _ in &plan.thumbnails {
            thumbnail_ids.push(state.next_id());
        }
        let snapshot = state
            .videos
            .get_mut(&video_id)
            .ok_or(AppError::VideoNotFound)?;
        snapshot.video = plan.video.clone();
        snapshot.channel = channel;
        journal.push("video".to_string());

        self.check("thumbnails")?;
        for (thumbnail, id) in plan.thumbnails.iter().zip(thumbnail_ids) {
            snapshot.thumbnails.retain(|t| t.kind != thumbnail.kind);
            snapshot.thumbnails.push(Thumbnail {
                id,
                video_id,
                kind: thumbnail.kind,
                filename: thumbnail.filename.clone(),
                created_at: thumbnail.created_at,
                updated_at: thumbnail.updated_at,
            });
            snapshot.thumbnails.sort_by_key(|t| t.kind);
            journal.push(format!("thumbnail:{}", thumbnail.kind));
        }

        self.check("tags")?;
        if let Some(tags) = &plan.tags {
            let mut tags = tags.clone();
            tags.sort();
            snapshot.tags = tags;
            journal.push("tags".to_string());
        }

        self.check("schedule")?;
        match &plan.schedule {
            ScheduleChange::Keep => {}
            ScheduleChange::Upsert(row) => {
                let id = snapshot.schedule.as_ref().map_or(1, |s| s.id);
                let created_at = snapshot.schedule.as_ref().map_or(row.created_at, |s| s.created_at);
                snapshot.schedule = Some(ScheduleVideoUpdate {
                    id,
                    video_id,
                    update_at: row.update_at,
                    privacy: row.privacy,
                    created_at,
                    updated_at: row.updated_at,
                });
                journal.push("schedule:upsert".to_string());
            }
            ScheduleChange::Delete => {
                snapshot.schedule = None;
                journal.push("schedule:delete".to_string());
            }
        }

        self.check("blacklist")?;
        if let Some(row) = &plan.blacklist {
            if snapshot.blacklist.is_none() {
                snapshot.blacklist = Some(VideoBlacklist {
                    id: 1,
                    video_id,
                    reason: row.reason.clone(),
                    unfederated: row.unfederated,
                    blacklist_type: row.blacklist_type,
                    created_at: now,
                });
                journal.push("blacklist".to_string());
            }
        }

        self.check("events")?;
        for event in &plan.events {
            state.outbox.push(event.clone());
            journal.push(format!("event:{}", event.event_type));
        }

        Ok(())
    }
}

#[async_trait]
impl VideoStore for MemoryStore {
    async fn load_snapshot(&self, video: VideoIdentifier) -> AppResult<Option<VideoSnapshot>> {
        let state = self.state.lock().unwrap();
        Ok(Self::find_id(&state, video).and_then(|id| state.videos.get(&id).cloned()))
    }

    async fn load_channel(&self, channel_id: i64) -> AppResult<Option<VideoChannel>> {
        Ok(self.state.lock().unwrap().channels.get(&channel_id).cloned())
    }

    async fn load_user(&self, user_id: i64) -> AppResult<Option<User>> {
        Ok(self.state.lock().unwrap().users.get(&user_id).cloned())
    }

    async fn commit_update<F>(&self, video_id: i64, planner: F) -> AppResult<CommittedUpdate>
    where
        F: FnOnce(&VideoSnapshot) -> AppResult<UpdatePlan> + Send,
    {
        {
            let mut faults = self.faults.lock().unwrap();
            if faults.transient_conflicts > 0 {
                faults.transient_conflicts -= 1;
                return Err(serialization_failure());
            }
        }

        let mut state = self.state.lock().unwrap();
        let before = state
            .videos
            .get(&video_id)
            .cloned()
            .ok_or(AppError::VideoNotFound)?;
        let plan = planner(&before)?;

        let mut working = state.clone();
        let mut entries = Vec::new();
        self.apply(&mut working, &plan, &mut entries)?;

        let after = working
            .videos
            .get(&video_id)
            .cloned()
            .ok_or(AppError::VideoNotFound)?;
        *state = working;
        self.journal.lock().unwrap().extend(entries);

        Ok(CommittedUpdate {
            before,
            after,
            is_new_video: plan.is_new_video,
        })
    }

    async fn load_files(&self, video_id: i64) -> AppResult<VideoFiles> {
        Ok(self.files(video_id))
    }

    async fn save_file(&self, file: &VideoFile) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .files
            .values_mut()
            .flat_map(|files| files.progressive.iter_mut().chain(files.streaming.iter_mut()))
            .find(|f| f.id == file.id)
            .ok_or_else(|| AppError::Database(diesel::result::Error::NotFound))?;
        *stored = file.clone();
        self.journal.lock().unwrap().push(format!("file:{}", file.id));
        Ok(())
    }

    async fn enqueue_events(&self, events: &[OutboxEvent]) -> AppResult<()> {
        if self.faults.lock().unwrap().fail_enqueue {
            return Err(AppError::Pool("connection refused".to_string()));
        }
        self.state.lock().unwrap().outbox.extend_from_slice(events);
        Ok(())
    }
}

#[async_trait]
impl OutboxRepository for MemoryStore {
    async fn get_unpublished(&self, limit: i64, max_retries: i32) -> AppResult<Vec<OutboxEvent>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .outbox
            .iter()
            .filter(|e| e.published_at.is_none() && e.retry_count < max_retries)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, event_id: Uuid) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        let event = state
            .outbox
            .iter_mut()
            .find(|e| e.id == event_id)
            .ok_or(AppError::EventNotFound(event_id))?;
        event.published_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_failed(&self, event_id: Uuid, error: &str) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        let event = state
            .outbox
            .iter_mut()
            .find(|e| e.id == event_id)
            .ok_or(AppError::EventNotFound(event_id))?;
        event.retry_count += 1;
        event.last_error = Some(error.to_string());
        Ok(())
    }
}

pub mod fixtures {
    use chrono::{DateTime, TimeZone, Utc};
    use uuid::Uuid;

    use super::MemoryStore;
    use crate::db::models::{
        BlacklistType, ScheduleVideoUpdate, Thumbnail, ThumbnailKind, User, UserRole, Video,
        VideoBlacklist, VideoChannel, VideoFile, VideoPrivacy, VideoSnapshot, VideoState,
    };

    pub const VIDEO_ID: i64 = 100;
    pub const VIDEO_UUID: Uuid = Uuid::from_u128(0x9c9de5e8_0a1b_4b4c_8a3e_57d2f1e3c001);

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    fn user(id: i64, username: &str, role: UserRole) -> User {
        User {
            id,
            username: username.to_string(),
            role: role as i16,
            admin_flags: 0,
            created_at: at(1),
        }
    }

    pub fn owner() -> User {
        user(1, "alice", UserRole::User)
    }

    pub fn admin() -> User {
        user(2, "root", UserRole::Administrator)
    }

    pub fn stranger() -> User {
        user(3, "mallory", UserRole::User)
    }

    fn channel_of(id: i64, name: &str, owner_id: i64) -> VideoChannel {
        VideoChannel {
            id,
            name: name.to_string(),
            owner_id,
            actor_url: format!("https://videos.example.com/video-channels/{}", name),
            created_at: at(1),
        }
    }

    pub fn channel() -> VideoChannel {
        channel_of(10, "alice_channel", 1)
    }

    pub fn second_channel() -> VideoChannel {
        channel_of(11, "alice_music", 1)
    }

    pub fn foreign_channel() -> VideoChannel {
        channel_of(12, "mallory_channel", 3)
    }

    pub fn public_video() -> VideoSnapshot {
        let channel = channel();
        VideoSnapshot {
            video: Video {
                id: VIDEO_ID,
                uuid: VIDEO_UUID,
                name: "Old Title".to_string(),
                category: Some(2),
                licence: Some(1),
                language: Some("en".to_string()),
                privacy: VideoPrivacy::Public.into(),
                nsfw: false,
                description: Some("A video about things".to_string()),
                support: None,
                wait_transcoding: false,
                comments_enabled: true,
                download_enabled: true,
                state: VideoState::Published as i16,
                remote: false,
                originally_published_at: None,
                published_at: at(2),
                channel_id: channel.id,
                created_at: at(2),
                updated_at: at(3),
            },
            channel,
            tags: vec!["alpha".to_string(), "beta".to_string()],
            thumbnails: vec![Thumbnail {
                id: 1,
                video_id: VIDEO_ID,
                kind: ThumbnailKind::Miniature as i16,
                filename: "old-miniature.jpg".to_string(),
                created_at: at(2),
                updated_at: at(2),
            }],
            blacklist: None,
            schedule: None,
        }
    }

    pub fn blacklist(video_id: i64, unfederated: bool) -> VideoBlacklist {
        VideoBlacklist {
            id: 1,
            video_id,
            reason: Some("Spam".to_string()),
            unfederated,
            blacklist_type: BlacklistType::AutoBeforePublished as i16,
            created_at: at(4),
        }
    }

    pub fn schedule(video_id: i64) -> ScheduleVideoUpdate {
        ScheduleVideoUpdate {
            id: 1,
            video_id,
            update_at: at(20),
            privacy: Some(VideoPrivacy::Public.into()),
            created_at: at(4),
            updated_at: at(4),
        }
    }

    pub fn video_file(
        id: i64,
        video_id: Option<i64>,
        playlist_id: Option<i64>,
        resolution: i32,
    ) -> VideoFile {
        VideoFile {
            id,
            video_id,
            playlist_id,
            resolution,
            size: 1_048_576,
            extname: ".mp4".to_string(),
            torrent_filename: Some(format!("{}-{}.torrent", Uuid::new_v4(), resolution)),
            info_hash: Some("0".repeat(40)),
            updated_at: at(2),
        }
    }

    /// Store holding the public video, its owner, an admin and a few channels.
    pub fn store() -> MemoryStore {
        let store = MemoryStore::default();
        store.insert_video(public_video());
        store.insert_channel(second_channel());
        store.insert_channel(foreign_channel());
        store.insert_user(owner());
        store.insert_user(admin());
        store.insert_user(stranger());
        store
    }
}
