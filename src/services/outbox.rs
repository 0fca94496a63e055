//! Delivery side of the transactional outbox.
//!
//! Events are written in the same transaction as the video, then picked up
//! here and handed to a publisher. A failed delivery is retried on later
//! polls with exponential backoff until `max_retries` is reached.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::{FederationConfig, OutboxConfig};
use crate::db::models::OutboxEvent;
use crate::error::{AppError, AppResult};
use crate::services::hooks::HookRegistry;

const HOOK_PREFIX: &str = "hook.";
const MAX_BACKOFF_SECS: u64 = 300;

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Oldest unpublished events first, leaving out those that already
    /// failed `max_retries` times.
    async fn get_unpublished(&self, limit: i64, max_retries: i32) -> AppResult<Vec<OutboxEvent>>;

    async fn mark_published(&self, event_id: Uuid) -> AppResult<()>;

    async fn mark_failed(&self, event_id: Uuid, error: &str) -> AppResult<()>;
}

#[async_trait]
pub trait OutboxPublisher: Send + Sync {
    async fn publish(&self, event: &OutboxEvent) -> AppResult<()>;
}

/// Posts federation and notification events to the delivery endpoint.
pub struct RelayPublisher {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl RelayPublisher {
    pub fn new(config: &FederationConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.delivery_timeout_secs))
            .build()
            .map_err(|e| AppError::Publish(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.delivery_endpoint.clone(),
        })
    }
}

#[async_trait]
impl OutboxPublisher for RelayPublisher {
    async fn publish(&self, event: &OutboxEvent) -> AppResult<()> {
        let Some(endpoint) = &self.endpoint else {
            log::info!(
                "No delivery endpoint configured, dropping {} for {}",
                event.event_type,
                event.aggregate_id
            );
            return Ok(());
        };

        let response = self
            .client
            .post(endpoint)
            .json(event)
            .send()
            .await
            .map_err(|e| AppError::Publish(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::Publish(format!(
                "{} answered {}",
                endpoint,
                response.status()
            )));
        }

        log::debug!("Delivered {} ({})", event.event_type, event.id);
        Ok(())
    }
}

/// Runs `hook.*` events through the in-process hook registry and forwards
/// everything else.
pub struct DispatchingPublisher<P> {
    hooks: Arc<HookRegistry>,
    relay: P,
}

impl<P: OutboxPublisher> DispatchingPublisher<P> {
    pub fn new(hooks: Arc<HookRegistry>, relay: P) -> Self {
        Self { hooks, relay }
    }
}

#[async_trait]
impl<P: OutboxPublisher> OutboxPublisher for DispatchingPublisher<P> {
    async fn publish(&self, event: &OutboxEvent) -> AppResult<()> {
        match event.event_type.strip_prefix(HOOK_PREFIX) {
            // Hook failures are logged by the registry and never retried.
            Some(action) => {
                let ran = self.hooks.run_action(action, &event.payload);
                log::debug!("Ran {} handlers for {}", ran, action);
                Ok(())
            }
            None => self.relay.publish(event).await,
        }
    }
}

pub struct OutboxProcessor<R: OutboxRepository, P: OutboxPublisher> {
    repository: Arc<R>,
    publisher: Arc<P>,
    batch_size: i64,
    poll_interval: Duration,
    max_retries: i32,
}

impl<R: OutboxRepository, P: OutboxPublisher> OutboxProcessor<R, P> {
    pub fn new(repository: Arc<R>, publisher: Arc<P>, config: &OutboxConfig) -> Self {
        Self {
            repository,
            publisher,
            batch_size: config.batch_size,
            poll_interval: config.poll_interval(),
            max_retries: config.max_retries,
        }
    }

    /// Polls forever. Meant to be spawned as a background task.
    pub async fn start(&self) {
        log::info!(
            "Outbox processor starting (batch {}, every {:?}, {} retries)",
            self.batch_size,
            self.poll_interval,
            self.max_retries
        );

        loop {
            match self.process_batch().await {
                Ok(0) => log::trace!("No outbox events to publish"),
                Ok(count) => log::info!("Published {} outbox events", count),
                Err(e) => log::error!("Outbox processor error: {}", e),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Returns the number of events published.
    pub async fn process_batch(&self) -> AppResult<usize> {
        let events = self
            .repository
            .get_unpublished(self.batch_size, self.max_retries)
            .await?;
        let mut published = 0;

        for event in events {
            let backoff = calculate_backoff(event.retry_count);
            if !backoff.is_zero() {
                log::debug!("Backing off {:?} before retrying event {}", backoff, event.id);
                tokio::time::sleep(backoff).await;
            }

            match self.publisher.publish(&event).await {
                Ok(()) => match self.repository.mark_published(event.id).await {
                    Ok(()) => published += 1,
                    Err(e) => log::error!(
                        "Event {} was delivered but could not be marked published: {}",
                        event.id,
                        e
                    ),
                },
                Err(e) => {
                    log::error!(
                        "Failed to publish event {} ({}), attempt {}: {}",
                        event.id,
                        event.event_type,
                        event.retry_count + 1,
                        e
                    );
                    if let Err(mark_err) = self.repository.mark_failed(event.id, &e.to_string()).await {
                        log::error!("Failed to mark event {} as failed: {}", event.id, mark_err);
                    } else if event.retry_count + 1 >= self.max_retries {
                        log::warn!(
                            "Event {} ({}) gave up after {} attempts",
                            event.id,
                            event.event_type,
                            self.max_retries
                        );
                    }
                }
            }
        }

        Ok(published)
    }
}

/// No delay on the first attempt, then 1s, 2s, 4s... capped at five minutes.
pub fn calculate_backoff(retry_count: i32) -> Duration {
    if retry_count <= 0 {
        return Duration::ZERO;
    }
    let exponent = (retry_count - 1).min(16) as u32;
    Duration::from_secs(2u64.pow(exponent).min(MAX_BACKOFF_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{fixtures, MemoryStore};
    use crate::services::federation;
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        delivered: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl OutboxPublisher for RecordingPublisher {
        async fn publish(&self, event: &OutboxEvent) -> AppResult<()> {
            if self.fail {
                return Err(AppError::Publish("endpoint unreachable".to_string()));
            }
            self.delivered.lock().unwrap().push(event.event_type.clone());
            Ok(())
        }
    }

    fn config(max_retries: i32) -> OutboxConfig {
        OutboxConfig {
            batch_size: 10,
            poll_interval_secs: 1,
            max_retries,
        }
    }

    fn events() -> Vec<OutboxEvent> {
        let snapshot = fixtures::public_video();
        let now = Utc::now();
        vec![
            federation::tombstone(&snapshot.video, &snapshot.channel, now),
            federation::announce(&snapshot, false, now),
        ]
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        assert_eq!(calculate_backoff(0), Duration::ZERO);
        assert_eq!(calculate_backoff(1), Duration::from_secs(1));
        assert_eq!(calculate_backoff(3), Duration::from_secs(4));
        assert_eq!(calculate_backoff(12), Duration::from_secs(MAX_BACKOFF_SECS));
    }

    #[tokio::test]
    async fn publishes_in_insertion_order_and_marks_events() {
        let store = Arc::new(MemoryStore::default());
        store.push_events(events());
        let publisher = Arc::new(RecordingPublisher::default());
        let processor = OutboxProcessor::new(store.clone(), publisher.clone(), &config(5));

        assert_eq!(processor.process_batch().await.unwrap(), 2);
        assert_eq!(
            *publisher.delivered.lock().unwrap(),
            vec![federation::DELETE_VIDEO, federation::UPDATE_VIDEO]
        );
        assert!(store.get_unpublished(10, 5).await.unwrap().is_empty());
        assert_eq!(processor.process_batch().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_deliveries_are_recorded() {
        let store = Arc::new(MemoryStore::default());
        store.push_events(events());
        let publisher = Arc::new(RecordingPublisher {
            fail: true,
            ..Default::default()
        });
        let processor = OutboxProcessor::new(store.clone(), publisher, &config(5));

        assert_eq!(processor.process_batch().await.unwrap(), 0);
        let pending = store.get_unpublished(10, 5).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|e| e.retry_count == 1));
        assert_eq!(pending[0].last_error.as_deref(), Some("Publish failed: endpoint unreachable"));
    }

    #[tokio::test]
    async fn exhausted_events_do_not_block_newer_ones() {
        let store = Arc::new(MemoryStore::default());
        let snapshot = fixtures::public_video();
        let now = Utc::now();
        let mut queued: Vec<_> = (0..3)
            .map(|_| {
                let mut event = federation::tombstone(&snapshot.video, &snapshot.channel, now);
                event.retry_count = 5;
                event
            })
            .collect();
        queued.push(federation::announce(&snapshot, false, now));
        store.push_events(queued);

        let publisher = Arc::new(RecordingPublisher::default());
        let processor = OutboxProcessor::new(
            store.clone(),
            publisher.clone(),
            &OutboxConfig {
                batch_size: 3,
                ..config(5)
            },
        );

        assert_eq!(processor.process_batch().await.unwrap(), 1);
        assert_eq!(*publisher.delivered.lock().unwrap(), vec![federation::UPDATE_VIDEO]);
        assert!(store.get_unpublished(10, 5).await.unwrap().is_empty());
        assert_eq!(store.events().iter().filter(|e| e.published_at.is_none()).count(), 3);
    }

    #[tokio::test]
    async fn hook_events_run_registered_handlers() {
        let hooks = Arc::new(HookRegistry::default());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = calls.clone();
        hooks.register(
            crate::services::hooks::VIDEO_UPDATED,
            Arc::new(move |payload: &serde_json::Value| {
                seen.lock().unwrap().push(payload["body"]["name"].clone());
                Ok(())
            }),
        );

        let relay = RecordingPublisher::default();
        let publisher = DispatchingPublisher::new(hooks, relay);

        let snapshot = fixtures::public_video();
        let body = serde_json::json!({ "name": "Renamed" });
        let hook = federation::hook_event(
            crate::services::hooks::VIDEO_UPDATED,
            &snapshot,
            &body,
            Utc::now(),
        );
        publisher.publish(&hook).await.unwrap();
        publisher.publish(&events()[1]).await.unwrap();

        assert_eq!(*calls.lock().unwrap(), vec![serde_json::json!("Renamed")]);
        assert_eq!(
            *publisher.relay.delivered.lock().unwrap(),
            vec![federation::UPDATE_VIDEO]
        );
    }

    #[tokio::test]
    async fn relay_without_endpoint_accepts_events() {
        let relay = RelayPublisher::new(&FederationConfig::default()).unwrap();
        relay.publish(&events()[0]).await.unwrap();
    }
}
