use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};

use crate::api::auth::CallerId;
use crate::api::form;
use crate::db::models::{User, VideoChannel, VideoIdentifier, VideoSnapshot};
use crate::db::store::VideoStore;
use crate::error::{AppError, AppResult};
use crate::services::patch::UpdateRequest;
use crate::services::thumbnails::ThumbnailBuilder;
use crate::services::video_update::{UpdateCommand, VideoUpdater};

pub struct AppState<S> {
    pub store: Arc<S>,
    pub updater: VideoUpdater<S>,
    pub thumbnails: ThumbnailBuilder,
}

pub fn configure<S: VideoStore + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/videos").route("/{id}", web::put().to(update_video::<S>)));
}

fn ensure_can_manage(actor: &User, video: &VideoSnapshot) -> AppResult<()> {
    if video.video.remote {
        return Err(AppError::Forbidden(
            "Cannot manage a video of another server.".to_string(),
        ));
    }
    if actor.can_update_any_video() || video.channel.owner_id == actor.id {
        return Ok(());
    }
    Err(AppError::Forbidden(
        "Cannot manage a video of another user.".to_string(),
    ))
}

async fn resolve_channel<S: VideoStore>(
    store: &S,
    actor: &User,
    channel_id: i64,
) -> AppResult<VideoChannel> {
    let channel = store
        .load_channel(channel_id)
        .await?
        .ok_or(AppError::ChannelNotFound)?;

    if channel.owner_id != actor.id && !actor.can_update_any_video() {
        return Err(AppError::BadRequest(
            "Unknown video channel for this account.".to_string(),
        ));
    }
    Ok(channel)
}

pub async fn update_video<S: VideoStore + 'static>(
    req: HttpRequest,
    path: web::Path<String>,
    caller: CallerId,
    payload: web::Payload,
    state: web::Data<AppState<S>>,
) -> AppResult<HttpResponse> {
    let identifier: VideoIdentifier = path.parse().map_err(AppError::BadRequest)?;

    let actor = state
        .store
        .load_user(caller.0)
        .await?
        .ok_or(AppError::Unauthorized)?;
    let video = state
        .store
        .load_snapshot(identifier)
        .await?
        .ok_or(AppError::VideoNotFound)?;
    ensure_can_manage(&actor, &video)?;

    let raw = form::read_update(&req, payload, state.thumbnails.max_size()).await?;
    let request: UpdateRequest = serde_json::from_value(raw.body.clone())
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    request.check()?;

    let new_channel = match request.channel_id {
        Some(channel_id) => Some(resolve_channel(state.store.as_ref(), &actor, channel_id).await?),
        None => None,
    };

    let thumbnails = state.thumbnails.build(raw.images).await?;

    let command = UpdateCommand {
        video,
        request,
        raw_body: raw.body,
        thumbnails,
        new_channel,
        actor,
    };

    match state.updater.update(&command).await {
        Ok(outcome) => {
            log::debug!(
                "Video {} saved (first publication: {})",
                outcome.video.video.uuid,
                outcome.is_new_video
            );
            state.thumbnails.remove_stored(&outcome.replaced_thumbnails).await;
            Ok(HttpResponse::NoContent().finish())
        }
        Err(e) => {
            command.thumbnails.discard().await;
            Err(e)
        }
    }
}
