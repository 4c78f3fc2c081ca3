use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgListener, postgres::PgRow};
use tokio::sync::watch;
use uuid::Uuid;

use crate::{
    EventId, EventRecord, EventStoreError, EventStoreToken, Result, Version,
    store::{EventPage, EventStore, ExpectedVersion, advance_head, validate_append},
};

/// Channel carrying the head position after each committed append.
pub const APPEND_CHANNEL: &str = "events_appended";

/// Advisory lock key serializing appends, so position order equals commit order.
const APPEND_LOCK_KEY: i64 = 0x6576_656e_7473;

/// PostgreSQL-backed event store implementation.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
    head: Arc<watch::Sender<EventStoreToken>>,
}

fn to_i64(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store.
    pub fn new(pool: PgPool) -> Self {
        let (head, _) = watch::channel(EventStoreToken::Initial);
        Self {
            pool,
            head: Arc::new(head),
        }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Forwards append notifications from other processes into the head watch.
    ///
    /// Appends made through this handle notify local cursors directly; this
    /// is only needed when several processes write to the same database.
    pub async fn listen(&self) -> Result<tokio::task::JoinHandle<()>> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(APPEND_CHANNEL).await?;
        advance_head(&self.head, self.head_token().await?);

        let head = Arc::clone(&self.head);
        Ok(tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => match notification.payload().parse::<u64>() {
                        Ok(position) => {
                            advance_head(&head, EventStoreToken::from_position(position))
                        }
                        Err(_) => tracing::warn!(
                            payload = notification.payload(),
                            "ignoring malformed append notification"
                        ),
                    },
                    Err(e) => {
                        tracing::error!(error = %e, "append listener failed, retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }))
    }

    fn row_to_event(row: PgRow) -> Result<EventRecord> {
        let position: i64 = row.try_get("position")?;
        Ok(EventRecord {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
            event_type: row.try_get("event_type")?,
            format: row.try_get("format")?,
            body: row.try_get("body")?,
            stream_name: row.try_get("stream_name")?,
            stream_version: Version::new(row.try_get("stream_version")?),
            token: EventStoreToken::from_position(position as u64),
            timestamp: row.try_get("created_at")?,
        })
    }

    fn select_columns(load_body: bool) -> &'static str {
        if load_body {
            "position, event_id, event_type, format, body, stream_name, stream_version, created_at"
        } else {
            "position, event_id, event_type, format, NULL::bytea AS body, stream_name, stream_version, created_at"
        }
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    async fn add_to_stream(
        &self,
        stream_name: &str,
        events: &mut [EventRecord],
        expected: ExpectedVersion,
    ) -> Result<Version> {
        validate_append(stream_name, events)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let current: Option<i64> =
            sqlx::query_scalar("SELECT MAX(stream_version) FROM events WHERE stream_name = $1")
                .bind(stream_name)
                .fetch_one(&mut *tx)
                .await?;
        let current = Version::new(current.unwrap_or(0));
        expected.check(stream_name, current)?;

        // Identity is applied to the caller's records only after commit.
        let mut assigned = Vec::with_capacity(events.len());
        let mut version = current;
        for event in events.iter() {
            version = version.next();
            let position: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO events (event_id, stream_name, stream_version, event_type, format, body, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING position
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(stream_name)
            .bind(version.as_i64())
            .bind(&event.event_type)
            .bind(&event.format)
            .bind(&event.body)
            .bind(event.timestamp)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_stream_version")
                {
                    return EventStoreError::ConcurrencyConflict {
                        stream: stream_name.to_string(),
                        expected,
                        actual: current,
                    };
                }
                EventStoreError::Database(e)
            })?;
            assigned.push((version, EventStoreToken::from_position(position as u64)));
        }

        let head = assigned
            .last()
            .map(|(_, token)| *token)
            .unwrap_or_default();
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(APPEND_CHANNEL)
            .bind(head.position().unwrap_or(0).to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        for (event, (version, token)) in events.iter_mut().zip(assigned) {
            event.stream_name = stream_name.to_string();
            event.stream_version = version;
            event.token = token;
        }

        metrics::counter!("event_store_events_appended_total").increment(events.len() as u64);
        advance_head(&self.head, head);
        Ok(version)
    }

    async fn read_stream(
        &self,
        stream_name: &str,
        min_version: Version,
        max_count: usize,
        load_body: bool,
    ) -> Result<Vec<EventRecord>> {
        let sql = format!(
            "SELECT {} FROM events WHERE stream_name = $1 AND stream_version >= $2 ORDER BY stream_version ASC LIMIT $3",
            Self::select_columns(load_body)
        );
        let rows = sqlx::query(&sql)
            .bind(stream_name)
            .bind(min_version.as_i64())
            .bind(to_i64(max_count))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn get_all_events(
        &self,
        after: EventStoreToken,
        max_count: usize,
        load_body: bool,
    ) -> Result<EventPage> {
        let Some(after_position) = after.position() else {
            return Ok(EventPage {
                events: Vec::new(),
                next_token: self.head_token().await?,
                has_more: false,
            });
        };

        // Fetch one extra row to learn whether more events exist.
        let sql = format!(
            "SELECT {} FROM events WHERE position > $1 ORDER BY position ASC LIMIT $2",
            Self::select_columns(load_body)
        );
        let rows = sqlx::query(&sql)
            .bind(after_position as i64)
            .bind(to_i64(max_count).saturating_add(1))
            .fetch_all(&self.pool)
            .await?;

        let mut events = rows
            .into_iter()
            .map(Self::row_to_event)
            .collect::<Result<Vec<_>>>()?;
        let has_more = events.len() > max_count;
        events.truncate(max_count);
        let next_token = events.last().map(|e| e.token).unwrap_or(after);

        Ok(EventPage {
            events,
            next_token,
            has_more,
        })
    }

    async fn load_bodies(&self, events: &mut [EventRecord]) -> Result<()> {
        let positions: Vec<i64> = events
            .iter()
            .filter(|e| e.body.is_none())
            .filter_map(|e| e.token.position())
            .filter(|p| *p > 0)
            .map(|p| p as i64)
            .collect();
        if positions.is_empty() {
            return Ok(());
        }

        let rows = sqlx::query("SELECT position, body FROM events WHERE position = ANY($1)")
            .bind(&positions)
            .fetch_all(&self.pool)
            .await?;

        let mut bodies: HashMap<i64, Option<Vec<u8>>> = HashMap::with_capacity(rows.len());
        for row in rows {
            bodies.insert(row.try_get("position")?, row.try_get("body")?);
        }

        for event in events.iter_mut().filter(|e| e.body.is_none()) {
            if let Some(position) = event.token.position()
                && let Some(body) = bodies.remove(&(position as i64))
            {
                event.body = body;
            }
        }
        Ok(())
    }

    async fn stream_version(&self, stream_name: &str) -> Result<Version> {
        let current: Option<i64> =
            sqlx::query_scalar("SELECT MAX(stream_version) FROM events WHERE stream_name = $1")
                .bind(stream_name)
                .fetch_one(&self.pool)
                .await?;
        Ok(Version::new(current.unwrap_or(0)))
    }

    async fn head_token(&self) -> Result<EventStoreToken> {
        let head: Option<i64> = sqlx::query_scalar("SELECT MAX(position) FROM events")
            .fetch_one(&self.pool)
            .await?;
        Ok(EventStoreToken::from_position(head.unwrap_or(0) as u64))
    }

    fn subscribe_head(&self) -> watch::Receiver<EventStoreToken> {
        self.head.subscribe()
    }
}
