use actix_files::Files;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use std::sync::Arc;

mod api;
mod config;
mod db;
mod error;
mod services;

use api::videos::AppState;
use db::outbox::PgOutboxRepository;
use db::store::PgVideoStore;
use services::hooks::{HookRegistry, VIDEO_UPDATED};
use services::outbox::{DispatchingPublisher, OutboxProcessor, RelayPublisher};
use services::thumbnails::ThumbnailBuilder;
use services::video_update::VideoUpdater;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists
    dotenv().ok();

    // Initialize logger
    env_logger::init();

    // Load configuration
    let config = config::AppConfig::new().context("Failed to load configuration")?;
    let config = Arc::new(config);

    log::info!(
        "Starting server on {}:{}",
        config.server.host,
        config.server.port
    );

    for dir in [
        &config.storage.tmp_path,
        &config.storage.thumbnails_path,
        &config.storage.torrents_path,
    ] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create storage directory {}", dir))?;
    }

    // Create DB pool
    let pool = db::create_pool(&config.database).context("Failed to create database pool")?;

    let store = Arc::new(PgVideoStore::new(pool.clone()));
    let hooks = Arc::new(HookRegistry::default());
    hooks.register(
        VIDEO_UPDATED,
        Arc::new(|payload: &serde_json::Value| {
            log::debug!("Video updated: {}", payload["video"]["uuid"]);
            Ok(())
        }),
    );

    let relay = RelayPublisher::new(&config.federation).context("Failed to build HTTP client")?;
    let processor = OutboxProcessor::new(
        Arc::new(PgOutboxRepository::new(pool)),
        Arc::new(DispatchingPublisher::new(hooks, relay)),
        &config.outbox,
    );
    tokio::spawn(async move { processor.start().await });

    let state = web::Data::new(AppState {
        store: store.clone(),
        updater: VideoUpdater::from_config(store, &config),
        thumbnails: ThumbnailBuilder::new(&config.storage, &config.ffmpeg),
    });

    let thumbnails_path = config.storage.thumbnails_path.clone();
    // Start HTTP server
    HttpServer::new(move || {
        App::new()
            .service(Files::new("/static/thumbnails", &thumbnails_path))
            .app_data(state.clone())
            .wrap(actix_cors::Cors::permissive()) // Configure properly in production
            .configure(api::configure::<PgVideoStore>)
    })
    .bind((config.server.host.clone(), config.server.port))?
    .run()
    .await?;

    Ok(())
}
