// src/api/mod.rs
pub mod auth;
pub mod form;
pub mod health;
pub mod shared;
pub mod videos;

use actix_web::web;

use crate::db::store::VideoStore;

pub fn configure<S: VideoStore + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .configure(videos::configure::<S>)
            .configure(health::configure),
    );
}
