use async_trait::async_trait;
use chrono::Utc;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::db::models::OutboxEvent;
use crate::db::schema::outbox_events;
use crate::db::{connection, DbPool};
use crate::error::{AppError, AppResult};
use crate::services::outbox::OutboxRepository;

pub struct PgOutboxRepository {
    pool: DbPool,
}

impl PgOutboxRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Deliverable events in insertion order. Events inserted by one statement
/// share `created_at`, so ordering relies on `seq`.
fn unpublished(limit: i64, max_retries: i32) -> outbox_events::BoxedQuery<'static, Pg> {
    outbox_events::table
        .filter(outbox_events::published_at.is_null())
        .filter(outbox_events::retry_count.lt(max_retries))
        .order(outbox_events::seq.asc())
        .limit(limit)
        .into_boxed()
}

#[async_trait]
impl OutboxRepository for PgOutboxRepository {
    async fn get_unpublished(&self, limit: i64, max_retries: i32) -> AppResult<Vec<OutboxEvent>> {
        let mut conn = connection(&self.pool).await?;
        let events = unpublished(limit, max_retries)
            .select(OutboxEvent::as_select())
            .load(&mut conn)
            .await?;

        log::debug!("Fetched {} unpublished events", events.len());
        Ok(events)
    }

    async fn mark_published(&self, event_id: Uuid) -> AppResult<()> {
        let mut conn = connection(&self.pool).await?;
        let updated = diesel::update(outbox_events::table.find(event_id))
            .set(outbox_events::published_at.eq(Some(Utc::now())))
            .execute(&mut conn)
            .await?;

        if updated == 0 {
            log::warn!("Event {} not found when marking as published", event_id);
            return Err(AppError::EventNotFound(event_id));
        }
        Ok(())
    }

    async fn mark_failed(&self, event_id: Uuid, error: &str) -> AppResult<()> {
        let mut conn = connection(&self.pool).await?;
        let updated = diesel::update(outbox_events::table.find(event_id))
            .set((
                outbox_events::retry_count.eq(outbox_events::retry_count + 1),
                outbox_events::last_error.eq(Some(error)),
            ))
            .execute(&mut conn)
            .await?;

        if updated == 0 {
            log::warn!("Event {} not found when marking as failed", event_id);
            return Err(AppError::EventNotFound(event_id));
        }
        log::warn!("Event {} marked as failed: {}", event_id, error);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::debug_query;

    #[test]
    fn unpublished_query_skips_exhausted_events_and_keeps_insertion_order() {
        let sql = debug_query::<Pg, _>(&unpublished(100, 5)).to_string();

        assert!(sql.contains(r#""outbox_events"."published_at" IS NULL"#));
        assert!(sql.contains(r#""outbox_events"."retry_count" < $1"#));
        assert!(sql.contains(r#"ORDER BY "outbox_events"."seq" ASC"#));
        assert!(!sql.contains(r#"ORDER BY "outbox_events"."created_at""#));
    }
}
