//! The partial update a client sends, and the ordered steps turning it into
//! an [`UpdatePlan`] against a snapshot loaded inside the transaction.
//!
//! Steps never mutate the snapshot. Each attempt of a retried transaction
//! starts again from a fresh snapshot and a fresh plan.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use validator::{Validate, ValidationError};

use crate::db::models::{
    NewScheduleVideoUpdate, NewThumbnail, User, VideoChannel, VideoPrivacy, VideoSnapshot,
};
use crate::db::store::{ScheduleChange, UpdatePlan};
use crate::error::{AppError, AppResult};
use crate::services::thumbnails::PreparedThumbnails;
use crate::services::{blacklist, federation};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    #[validate(length(min = 3, max = 120))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(
        default,
        with = "::serde_with::rust::double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub category: Option<Option<i32>>,

    #[serde(
        default,
        with = "::serde_with::rust::double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub licence: Option<Option<i32>>,

    #[serde(
        default,
        with = "::serde_with::rust::double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub language: Option<Option<String>>,

    #[serde(
        default,
        with = "::serde_with::rust::double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,

    #[serde(
        default,
        with = "::serde_with::rust::double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub support: Option<Option<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsfw: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_transcoding: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments_enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy: Option<VideoPrivacy>,

    #[validate(length(max = 5), custom(function = "validate_tags"))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<i64>,

    /// `null` is treated like an absent value.
    #[serde(
        default,
        deserialize_with = "iso_date::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub originally_published_at: Option<DateTime<Utc>>,

    /// Absent: keep the schedule. `null`: delete it. Object: upsert it.
    #[serde(
        default,
        with = "::serde_with::rust::double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub schedule_update: Option<Option<ScheduleUpdate>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleUpdate {
    #[serde(deserialize_with = "iso_date::required")]
    pub update_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy: Option<VideoPrivacy>,
}

/// Accepts a full date-time with offset, or a bare `YYYY-MM-DD` date read
/// as midnight UTC.
fn parse_iso_date(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = text.parse::<DateTime<Utc>>() {
        return Some(at);
    }
    let midnight = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&midnight))
}

mod iso_date {
    use super::*;

    pub fn required<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_iso_date(&text).ok_or_else(|| de::Error::custom(format!("invalid date: {}", text)))
    }

    pub fn optional<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(text) => parse_iso_date(&text)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("invalid date: {}", text))),
            None => Ok(None),
        }
    }
}

fn validate_tags(tags: &[String]) -> Result<(), ValidationError> {
    let valid = tags.iter().all(|tag| {
        let len = tag.trim().chars().count();
        (2..=30).contains(&len)
    });
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("tag_length"))
    }
}

fn check_length(field: &str, value: &Option<Option<String>>, min: usize, max: usize) -> AppResult<()> {
    if let Some(Some(text)) = value {
        let len = text.chars().count();
        if len < min || len > max {
            return Err(AppError::BadRequest(format!(
                "{} must be between {} and {} characters",
                field, min, max
            )));
        }
    }
    Ok(())
}

fn check_positive(field: &str, value: &Option<Option<i32>>) -> AppResult<()> {
    if let Some(Some(number)) = value {
        if *number < 1 {
            return Err(AppError::BadRequest(format!("{} is invalid", field)));
        }
    }
    Ok(())
}

impl UpdateRequest {
    /// Full request validation, run before any transaction is opened.
    pub fn check(&self) -> AppResult<()> {
        self.validate()?;
        check_length("description", &self.description, 3, 10_000)?;
        check_length("support", &self.support, 3, 1_000)?;
        check_length("language", &self.language, 2, 10)?;
        check_positive("category", &self.category)?;
        check_positive("licence", &self.licence)?;

        if let Some(Some(schedule)) = &self.schedule_update {
            if schedule.privacy.is_some_and(|p| p == VideoPrivacy::Private) {
                return Err(AppError::BadRequest("Schedule privacy is invalid".to_string()));
            }
        }
        Ok(())
    }
}

/// Moderation and federation settings the steps depend on.
#[derive(Debug, Clone, Default)]
pub struct UpdatePolicy {
    pub federate_unlisted: bool,
    pub auto_blacklist: bool,
}

pub struct PatchContext<'a> {
    /// Video as loaded under the row lock.
    pub snapshot: &'a VideoSnapshot,
    pub request: &'a UpdateRequest,
    pub thumbnails: &'a PreparedThumbnails,
    pub new_channel: Option<&'a VideoChannel>,
    pub actor: &'a User,
    pub policy: &'a UpdatePolicy,
    /// Computed from the video as it was before the transaction opened.
    pub had_privacy_for_federation: bool,
    pub now: DateTime<Utc>,
}

type PatchStep = fn(&PatchContext<'_>, &mut UpdatePlan) -> AppResult<()>;

pub const PATCH_STEPS: &[(&str, PatchStep)] = &[
    ("scalar_fields", apply_scalar_fields),
    ("originally_published_at", apply_originally_published_at),
    ("privacy", apply_privacy),
    ("refresh_timestamp", refresh_timestamp),
    ("thumbnails", apply_thumbnails),
    ("tags", apply_tags),
    ("channel", apply_channel),
    ("schedule", apply_schedule),
    ("auto_blacklist", apply_auto_blacklist),
];

pub fn plan_update(ctx: &PatchContext<'_>) -> AppResult<UpdatePlan> {
    let mut plan = UpdatePlan::from_snapshot(ctx.snapshot);
    for (name, step) in PATCH_STEPS {
        step(ctx, &mut plan)?;
        log::trace!("Applied patch step {} to video {}", name, plan.video.uuid);
    }
    Ok(plan)
}

fn apply_scalar_fields(ctx: &PatchContext<'_>, plan: &mut UpdatePlan) -> AppResult<()> {
    let request = ctx.request;
    let video = &mut plan.video;

    if let Some(name) = &request.name {
        video.name = name.clone();
    }
    if let Some(category) = request.category {
        video.category = category;
    }
    if let Some(licence) = request.licence {
        video.licence = licence;
    }
    if let Some(language) = &request.language {
        video.language = language.clone();
    }
    if let Some(nsfw) = request.nsfw {
        video.nsfw = nsfw;
    }
    if let Some(wait_transcoding) = request.wait_transcoding {
        video.wait_transcoding = wait_transcoding;
    }
    if let Some(support) = &request.support {
        video.support = support.clone();
    }
    if let Some(description) = &request.description {
        video.description = description.clone();
    }
    if let Some(comments_enabled) = request.comments_enabled {
        video.comments_enabled = comments_enabled;
    }
    if let Some(download_enabled) = request.download_enabled {
        video.download_enabled = download_enabled;
    }
    Ok(())
}

fn apply_originally_published_at(ctx: &PatchContext<'_>, plan: &mut UpdatePlan) -> AppResult<()> {
    if let Some(at) = ctx.request.originally_published_at {
        plan.video.originally_published_at = Some(at);
    }
    Ok(())
}

fn apply_privacy(ctx: &PatchContext<'_>, plan: &mut UpdatePlan) -> AppResult<()> {
    let Some(privacy) = ctx.request.privacy else {
        return Ok(());
    };
    let federate_unlisted = ctx.policy.federate_unlisted;

    plan.is_new_video = !plan.video.has_privacy_for_federation(federate_unlisted)
        && privacy.is_for_federation(federate_unlisted);
    plan.video.set_privacy(privacy, ctx.now);

    if ctx.had_privacy_for_federation && !plan.video.has_privacy_for_federation(federate_unlisted) {
        plan.withdrawals
            .push(federation::tombstone(&plan.video, &ctx.snapshot.channel, ctx.now));
    }
    Ok(())
}

/// The write always advances `updated_at`, even when nothing else changed.
fn refresh_timestamp(ctx: &PatchContext<'_>, plan: &mut UpdatePlan) -> AppResult<()> {
    let previous = ctx.snapshot.video.updated_at;
    if plan.video.same_content(&ctx.snapshot.video) {
        log::debug!("No field changed on video {}, refreshing it", plan.video.uuid);
    }
    plan.video.updated_at = if ctx.now > previous {
        ctx.now
    } else {
        previous + Duration::microseconds(1)
    };
    Ok(())
}

fn apply_thumbnails(ctx: &PatchContext<'_>, plan: &mut UpdatePlan) -> AppResult<()> {
    for image in ctx.thumbnails.iter() {
        plan.thumbnails.push(NewThumbnail {
            video_id: plan.video.id,
            kind: image.kind as i16,
            filename: image.filename.clone(),
            created_at: ctx.now,
            updated_at: ctx.now,
        });
    }
    Ok(())
}

fn apply_tags(ctx: &PatchContext<'_>, plan: &mut UpdatePlan) -> AppResult<()> {
    if let Some(tags) = &ctx.request.tags {
        let mut names: Vec<String> = Vec::with_capacity(tags.len());
        for tag in tags {
            let tag = tag.trim();
            if !names.iter().any(|existing| existing == tag) {
                names.push(tag.to_string());
            }
        }
        plan.tags = Some(names);
    }
    Ok(())
}

fn apply_channel(ctx: &PatchContext<'_>, plan: &mut UpdatePlan) -> AppResult<()> {
    let Some(channel) = ctx.new_channel else {
        return Ok(());
    };
    if channel.id == plan.video.channel_id {
        return Ok(());
    }

    plan.video.channel_id = channel.id;
    if ctx.had_privacy_for_federation {
        plan.events.push(federation::channel_share_changed(
            &plan.video,
            &ctx.snapshot.channel,
            channel,
            ctx.now,
        ));
    }
    Ok(())
}

fn apply_schedule(ctx: &PatchContext<'_>, plan: &mut UpdatePlan) -> AppResult<()> {
    plan.schedule = match &ctx.request.schedule_update {
        None => ScheduleChange::Keep,
        Some(None) => ScheduleChange::Delete,
        Some(Some(schedule)) => ScheduleChange::Upsert(NewScheduleVideoUpdate {
            video_id: plan.video.id,
            update_at: schedule.update_at,
            privacy: schedule.privacy.map(i16::from),
            created_at: ctx.now,
            updated_at: ctx.now,
        }),
    };
    Ok(())
}

fn apply_auto_blacklist(ctx: &PatchContext<'_>, plan: &mut UpdatePlan) -> AppResult<()> {
    if let Some(row) =
        blacklist::auto_blacklist_if_needed(ctx.snapshot, ctx.actor, ctx.policy.auto_blacklist, ctx.now)
    {
        plan.events
            .push(federation::auto_blacklist_notification(&plan.video, ctx.now));
        plan.blacklist = Some(row);
    }
    Ok(())
}
