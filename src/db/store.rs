use async_trait::async_trait;
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};

use crate::db::models::{
    NewScheduleVideoUpdate, NewThumbnail, NewVideoBlacklist, OutboxEvent, ScheduleVideoUpdate,
    Thumbnail, User, Video, VideoBlacklist, VideoChannel, VideoFile, VideoFiles,
    VideoIdentifier, VideoSnapshot, VideoStreamingPlaylist,
};
use crate::db::schema::{
    outbox_events, schedule_video_updates, tags, thumbnails, users, video_blacklists,
    video_channels, video_files, video_streaming_playlists, video_tags, videos,
};
use crate::db::{connection, DbPool};
use crate::error::{AppError, AppResult};

/// What happens to the video's schedule row.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleChange {
    Keep,
    Upsert(NewScheduleVideoUpdate),
    Delete,
}

/// Every write of one update, computed from a snapshot loaded inside the
/// transaction. Persisted as a whole or not at all.
#[derive(Debug, Clone)]
pub struct UpdatePlan {
    pub video: Video,
    /// Written before the video row so receivers see the withdrawal first.
    pub withdrawals: Vec<OutboxEvent>,
    pub thumbnails: Vec<NewThumbnail>,
    pub tags: Option<Vec<String>>,
    pub schedule: ScheduleChange,
    pub blacklist: Option<NewVideoBlacklist>,
    pub events: Vec<OutboxEvent>,
    pub is_new_video: bool,
}

impl UpdatePlan {
    pub fn from_snapshot(snapshot: &VideoSnapshot) -> Self {
        Self {
            video: snapshot.video.clone(),
            withdrawals: Vec::new(),
            thumbnails: Vec::new(),
            tags: None,
            schedule: ScheduleChange::Keep,
            blacklist: None,
            events: Vec::new(),
            is_new_video: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommittedUpdate {
    /// State read under the row lock, before the plan was applied.
    pub before: VideoSnapshot,
    pub after: VideoSnapshot,
    pub is_new_video: bool,
}

#[async_trait]
pub trait VideoStore: Send + Sync {
    async fn load_snapshot(&self, video: VideoIdentifier) -> AppResult<Option<VideoSnapshot>>;

    async fn load_channel(&self, channel_id: i64) -> AppResult<Option<VideoChannel>>;

    async fn load_user(&self, user_id: i64) -> AppResult<Option<User>>;

    /// Opens a transaction, reloads the video under a row lock, asks `planner`
    /// for the writes and persists them. Nothing is written if any step fails.
    async fn commit_update<F>(&self, video_id: i64, planner: F) -> AppResult<CommittedUpdate>
    where
        F: FnOnce(&VideoSnapshot) -> AppResult<UpdatePlan> + Send;

    async fn load_files(&self, video_id: i64) -> AppResult<VideoFiles>;

    async fn save_file(&self, file: &VideoFile) -> AppResult<()>;

    /// Inserts the events in a transaction of their own.
    async fn enqueue_events(&self, events: &[OutboxEvent]) -> AppResult<()>;
}

pub struct PgVideoStore {
    pool: DbPool,
}

impl PgVideoStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VideoStore for PgVideoStore {
    async fn load_snapshot(&self, video: VideoIdentifier) -> AppResult<Option<VideoSnapshot>> {
        let mut conn = connection(&self.pool).await?;
        let id = match video {
            VideoIdentifier::Id(id) => Some(id),
            VideoIdentifier::Uuid(uuid) => videos::table
                .filter(videos::uuid.eq(uuid))
                .select(videos::id)
                .first::<i64>(&mut conn)
                .await
                .optional()?,
        };
        match id {
            Some(id) => load_snapshot(&mut conn, id, false).await,
            None => Ok(None),
        }
    }

    async fn load_channel(&self, channel_id: i64) -> AppResult<Option<VideoChannel>> {
        let mut conn = connection(&self.pool).await?;
        let channel = video_channels::table
            .find(channel_id)
            .select(VideoChannel::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(channel)
    }

    async fn load_user(&self, user_id: i64) -> AppResult<Option<User>> {
        let mut conn = connection(&self.pool).await?;
        let user = users::table
            .find(user_id)
            .select(User::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(user)
    }

    async fn commit_update<F>(&self, video_id: i64, planner: F) -> AppResult<CommittedUpdate>
    where
        F: FnOnce(&VideoSnapshot) -> AppResult<UpdatePlan> + Send,
    {
        let mut conn = connection(&self.pool).await?;
        let conn: &mut AsyncPgConnection = &mut conn;
        conn.transaction::<_, AppError, _>(|conn| {
            async move {
                let before = load_snapshot(conn, video_id, true)
                    .await?
                    .ok_or(AppError::VideoNotFound)?;
                let plan = planner(&before)?;
                write_plan(conn, &plan).await?;
                let after = load_snapshot(conn, video_id, false)
                    .await?
                    .ok_or(AppError::VideoNotFound)?;
                Ok(CommittedUpdate {
                    before,
                    after,
                    is_new_video: plan.is_new_video,
                })
            }
            .scope_boxed()
        })
        .await
    }

    async fn load_files(&self, video_id: i64) -> AppResult<VideoFiles> {
        let mut conn = connection(&self.pool).await?;
        let progressive = video_files::table
            .filter(video_files::video_id.eq(video_id))
            .order(video_files::resolution.desc())
            .select(VideoFile::as_select())
            .load(&mut conn)
            .await?;

        let playlist = video_streaming_playlists::table
            .filter(video_streaming_playlists::video_id.eq(video_id))
            .select(VideoStreamingPlaylist::as_select())
            .first(&mut conn)
            .await
            .optional()?;

        let streaming = match playlist {
            Some(playlist) => {
                video_files::table
                    .filter(video_files::playlist_id.eq(playlist.id))
                    .order(video_files::resolution.desc())
                    .select(VideoFile::as_select())
                    .load(&mut conn)
                    .await?
            }
            None => Vec::new(),
        };

        Ok(VideoFiles {
            progressive,
            streaming,
        })
    }

    async fn save_file(&self, file: &VideoFile) -> AppResult<()> {
        let mut conn = connection(&self.pool).await?;
        diesel::update(video_files::table.find(file.id))
            .set(file)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn enqueue_events(&self, events: &[OutboxEvent]) -> AppResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut conn = connection(&self.pool).await?;
        let conn: &mut AsyncPgConnection = &mut conn;
        conn.transaction::<_, AppError, _>(|conn| {
            async move {
                insert_events(conn, events).await?;
                Ok(())
            }
            .scope_boxed()
        })
        .await
    }
}

async fn load_snapshot(
    conn: &mut AsyncPgConnection,
    video_id: i64,
    lock: bool,
) -> AppResult<Option<VideoSnapshot>> {
    let video = if lock {
        videos::table
            .find(video_id)
            .select(Video::as_select())
            .for_update()
            .first(conn)
            .await
            .optional()?
    } else {
        videos::table
            .find(video_id)
            .select(Video::as_select())
            .first(conn)
            .await
            .optional()?
    };
    let Some(video) = video else {
        return Ok(None);
    };

    let channel = video_channels::table
        .find(video.channel_id)
        .select(VideoChannel::as_select())
        .first(conn)
        .await?;

    let tags = video_tags::table
        .inner_join(tags::table)
        .filter(video_tags::video_id.eq(video_id))
        .select(tags::name)
        .order(tags::name.asc())
        .load::<String>(conn)
        .await?;

    let thumbnails = thumbnails::table
        .filter(thumbnails::video_id.eq(video_id))
        .order(thumbnails::kind.asc())
        .select(Thumbnail::as_select())
        .load(conn)
        .await?;

    let blacklist = video_blacklists::table
        .filter(video_blacklists::video_id.eq(video_id))
        .select(VideoBlacklist::as_select())
        .first(conn)
        .await
        .optional()?;

    let schedule = schedule_video_updates::table
        .filter(schedule_video_updates::video_id.eq(video_id))
        .select(ScheduleVideoUpdate::as_select())
        .first(conn)
        .await
        .optional()?;

    Ok(Some(VideoSnapshot {
        video,
        channel,
        tags,
        thumbnails,
        blacklist,
        schedule,
    }))
}

async fn write_plan(conn: &mut AsyncPgConnection, plan: &UpdatePlan) -> AppResult<()> {
    let video_id = plan.video.id;

    insert_events(conn, &plan.withdrawals).await?;

    diesel::update(videos::table.find(video_id))
        .set(&plan.video)
        .execute(conn)
        .await?;

    for thumbnail in &plan.thumbnails {
        diesel::insert_into(thumbnails::table)
            .values(thumbnail)
            .on_conflict((thumbnails::video_id, thumbnails::kind))
            .do_update()
            .set((
                thumbnails::filename.eq(excluded(thumbnails::filename)),
                thumbnails::updated_at.eq(excluded(thumbnails::updated_at)),
            ))
            .execute(conn)
            .await?;
    }

    if let Some(names) = &plan.tags {
        set_video_tags(conn, video_id, names).await?;
    }

    match &plan.schedule {
        ScheduleChange::Keep => {}
        ScheduleChange::Upsert(schedule) => {
            diesel::insert_into(schedule_video_updates::table)
                .values(schedule)
                .on_conflict(schedule_video_updates::video_id)
                .do_update()
                .set((
                    schedule_video_updates::update_at
                        .eq(excluded(schedule_video_updates::update_at)),
                    schedule_video_updates::privacy.eq(excluded(schedule_video_updates::privacy)),
                    schedule_video_updates::updated_at
                        .eq(excluded(schedule_video_updates::updated_at)),
                ))
                .execute(conn)
                .await?;
        }
        ScheduleChange::Delete => {
            diesel::delete(
                schedule_video_updates::table.filter(schedule_video_updates::video_id.eq(video_id)),
            )
            .execute(conn)
            .await?;
        }
    }

    if let Some(blacklist) = &plan.blacklist {
        diesel::insert_into(video_blacklists::table)
            .values(blacklist)
            .on_conflict(video_blacklists::video_id)
            .do_nothing()
            .execute(conn)
            .await?;
    }

    insert_events(conn, &plan.events).await?;

    Ok(())
}

async fn set_video_tags(
    conn: &mut AsyncPgConnection,
    video_id: i64,
    names: &[String],
) -> AppResult<()> {
    diesel::delete(video_tags::table.filter(video_tags::video_id.eq(video_id)))
        .execute(conn)
        .await?;

    if names.is_empty() {
        return Ok(());
    }

    let new_tags: Vec<_> = names.iter().map(|name| tags::name.eq(name)).collect();
    diesel::insert_into(tags::table)
        .values(&new_tags)
        .on_conflict(tags::name)
        .do_nothing()
        .execute(conn)
        .await?;

    let tag_ids = tags::table
        .filter(tags::name.eq_any(names))
        .select(tags::id)
        .load::<i64>(conn)
        .await?;

    let links: Vec<_> = tag_ids
        .iter()
        .map(|tag_id| (video_tags::video_id.eq(video_id), video_tags::tag_id.eq(*tag_id)))
        .collect();
    diesel::insert_into(video_tags::table)
        .values(&links)
        .execute(conn)
        .await?;

    Ok(())
}

async fn insert_events(conn: &mut AsyncPgConnection, events: &[OutboxEvent]) -> AppResult<()> {
    if events.is_empty() {
        return Ok(());
    }
    diesel::insert_into(outbox_events::table)
        .values(events)
        .execute(conn)
        .await?;
    log::debug!("Inserted {} outbox events", events.len());
    Ok(())
}
