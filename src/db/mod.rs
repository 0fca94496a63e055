#[cfg(test)]
pub mod memory;
pub mod models;
pub mod outbox;
pub mod schema;
pub mod store;

use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;

use crate::config::DatabaseConfig;
use crate::error::{AppError, AppResult};

pub type DbPool = deadpool::managed::Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;
pub type DbConnection =
    deadpool::managed::Object<AsyncDieselConnectionManager<AsyncPgConnection>>;

pub fn create_pool(config: &DatabaseConfig) -> anyhow::Result<DbPool> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.url);
    let pool = Pool::builder(manager)
        .max_size(config.max_connections)
        .build()?;
    Ok(pool)
}

pub(crate) async fn connection(pool: &DbPool) -> AppResult<DbConnection> {
    pool.get().await.map_err(|e| {
        log::error!("Failed to get DB connection: {}", e);
        AppError::Pool(e.to_string())
    })
}
