use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::config::AppConfig;
use crate::db::models::{User, VideoChannel, VideoSnapshot};
use crate::db::store::{CommittedUpdate, VideoStore};
use crate::error::AppResult;
use crate::services::audit::{AuditLogger, VideoAuditView};
use crate::services::federation;
use crate::services::hooks::VIDEO_UPDATED;
use crate::services::patch::{plan_update, PatchContext, UpdatePolicy, UpdateRequest};
use crate::services::retry::{retry_transaction, RetryPolicy};
use crate::services::thumbnails::PreparedThumbnails;
use crate::services::torrent::TorrentRegenerator;

/// Everything resolved and validated before the transaction opens.
pub struct UpdateCommand {
    pub video: VideoSnapshot,
    pub request: UpdateRequest,
    /// Body as received, handed to extension hooks.
    pub raw_body: Value,
    pub thumbnails: PreparedThumbnails,
    pub new_channel: Option<VideoChannel>,
    pub actor: User,
}

#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub video: VideoSnapshot,
    pub is_new_video: bool,
    /// Image files the committed update detached from the video.
    pub replaced_thumbnails: Vec<String>,
}

pub struct VideoUpdater<S> {
    store: Arc<S>,
    policy: UpdatePolicy,
    retry: RetryPolicy,
    torrents: TorrentRegenerator,
    audit: AuditLogger,
}

impl<S: VideoStore> VideoUpdater<S> {
    pub fn new(
        store: Arc<S>,
        policy: UpdatePolicy,
        retry: RetryPolicy,
        torrents: TorrentRegenerator,
    ) -> Self {
        Self {
            store,
            policy,
            retry,
            torrents,
            audit: AuditLogger::new("videos"),
        }
    }

    pub fn from_config(store: Arc<S>, config: &AppConfig) -> Self {
        Self::new(
            store,
            UpdatePolicy {
                federate_unlisted: config.federation.federate_unlisted,
                auto_blacklist: config.auto_blacklist.enabled,
            },
            RetryPolicy::from(&config.transaction),
            TorrentRegenerator::new(&config.storage.torrents_path),
        )
    }

    /// Applies `command` atomically, then propagates the change. Only a
    /// failure of the atomic part is returned.
    pub async fn update(&self, command: &UpdateCommand) -> AppResult<UpdateOutcome> {
        let video_id = command.video.video.id;
        let was_confidential = command.video.video.is_confidential();
        let had_privacy_for_federation = command
            .video
            .video
            .has_privacy_for_federation(self.policy.federate_unlisted);

        let store = &self.store;
        let policy = &self.policy;
        let committed = retry_transaction(&self.retry, move || async move {
            store
                .commit_update(video_id, move |snapshot| {
                    plan_update(&PatchContext {
                        snapshot,
                        request: &command.request,
                        thumbnails: &command.thumbnails,
                        new_channel: command.new_channel.as_ref(),
                        actor: &command.actor,
                        policy,
                        had_privacy_for_federation,
                        now: Utc::now(),
                    })
                })
                .await
        })
        .await
        .map_err(|e| {
            log::error!("Failed to update video {}: {}", command.video.video.uuid, e);
            e
        })?;

        self.audit.update(
            &command.actor.username,
            &VideoAuditView::from_snapshot(&committed.after),
            &VideoAuditView::from_snapshot(&committed.before),
        );
        log::info!(
            "Video {} updated by {}",
            committed.after.video.uuid,
            command.actor.username
        );

        self.propagate(command, &committed, was_confidential).await;

        Ok(UpdateOutcome {
            replaced_thumbnails: replaced_thumbnails(&committed.before, &committed.after),
            video: committed.after,
            is_new_video: committed.is_new_video,
        })
    }

    async fn propagate(&self, command: &UpdateCommand, committed: &CommittedUpdate, was_confidential: bool) {
        if command.request.name.is_some() {
            self.regenerate_torrents(&committed.after).await;
        }

        let after = &committed.after;
        let now = Utc::now();
        let mut events = Vec::new();

        if federation::is_federatable(after, committed.is_new_video, self.policy.federate_unlisted) {
            events.push(federation::announce(after, committed.is_new_video, now));
        }
        if was_confidential && federation::needs_new_video_notification(after) {
            events.push(federation::new_video_notification(after, now));
        }
        events.push(federation::hook_event(VIDEO_UPDATED, after, &command.raw_body, now));

        if let Err(e) = self.store.enqueue_events(&events).await {
            log::error!(
                "Failed to enqueue {} events for video {}: {}",
                events.len(),
                after.video.uuid,
                e
            );
        }
    }

    async fn regenerate_torrents(&self, snapshot: &VideoSnapshot) {
        let files = match self.store.load_files(snapshot.video.id).await {
            Ok(files) => files,
            Err(e) => {
                log::error!("Failed to load files of video {}: {}", snapshot.video.uuid, e);
                return;
            }
        };

        let variants = files
            .progressive
            .iter()
            .map(|file| (file, false))
            .chain(files.streaming.iter().map(|file| (file, true)));

        for (file, streaming) in variants {
            let updated = match self.torrents.regenerate(&snapshot.video, file, streaming).await {
                Ok(Some(updated)) => updated,
                Ok(None) => continue,
                Err(e) => {
                    log::error!("Failed to regenerate torrent of file {}: {}", file.id, e);
                    continue;
                }
            };
            if let Err(e) = self.store.save_file(&updated).await {
                log::error!("Failed to save file {}: {}", file.id, e);
            }
        }
    }
}

fn replaced_thumbnails(before: &VideoSnapshot, after: &VideoSnapshot) -> Vec<String> {
    before
        .thumbnails
        .iter()
        .filter(|old| !after.thumbnails.iter().any(|new| new.filename == old.filename))
        .map(|old| old.filename.clone())
        .collect()
}
