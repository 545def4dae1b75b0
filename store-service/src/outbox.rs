use anyhow::Result;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use rdkafka::producer::{FutureProducer, FutureRecord};
use shared::OrderEvent;
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info};

use crate::db::DbPool;
use crate::error::ApiResult;
use crate::models::*;
use crate::schema::*;

/// Writes an order event into the outbox on the caller's connection, so it
/// commits or rolls back with the change that produced it.
pub async fn enqueue(conn: &mut AsyncPgConnection, event: &OrderEvent) -> ApiResult<()> {
    let row = NewOutboxEvent::try_from(event)?;
    diesel::insert_into(outbox_events::table)
        .values(&row)
        .execute(conn)
        .await?;
    debug!("Queued {} for order {}", row.event_type, row.aggregate_id);
    Ok(())
}

pub struct OutboxProcessor {
    pool: DbPool,
    producer: FutureProducer,
    topic: String,
    interval: Duration,
    batch_size: i64,
}

impl OutboxProcessor {
    pub fn new(pool: DbPool, producer: FutureProducer, topic: String, interval: Duration, batch_size: i64) -> Self {
        Self {
            pool,
            producer,
            topic,
            interval,
            batch_size,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.process_outbox_events().await {
                error!("Error processing outbox events: {}", e);
            }
        }
    }

    async fn process_outbox_events(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;

        let pending = outbox_events::table
            .filter(outbox_events::processed.eq(false))
            .order(outbox_events::created_at.asc())
            .limit(self.batch_size)
            .select(DbOutboxEvent::as_select())
            .load(&mut conn)
            .await?;

        for event in pending {
            if let Err(e) = self.publish_event(&event).await {
                // stop here so later events for the same order are not published ahead of this one
                error!("Failed to publish outbox event {}: {}", event.id, e);
                break;
            }

            diesel::update(outbox_events::table.find(event.id))
                .set((
                    outbox_events::processed.eq(true),
                    outbox_events::processed_at.eq(Some(Utc::now())),
                ))
                .execute(&mut conn)
                .await?;

            info!("Published {} event {}", event.event_type, event.id);
        }

        Ok(())
    }

    async fn publish_event(&self, event: &DbOutboxEvent) -> Result<()> {
        let json = serde_json::to_string(&event.event_data)?;
        let key = event.aggregate_id.to_string();
        let record = FutureRecord::to(&self.topic)
            .payload(&json)
            .key(&key)
            .headers(rdkafka::message::OwnedHeaders::new().insert(rdkafka::message::Header {
                key: "event_type",
                value: Some(event.event_type.as_str()),
            }));

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to publish event: {}", e))?;

        Ok(())
    }
}
