use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::Transaction;
use sqlx::types::Json;
use time::OffsetDateTime;

use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::models::{
    Booking, BookingDraft, BookingId, BookingPatch, DayOff, Precondition, PriceState, UserId,
    VoucherUsage, WeeklySchedule,
};
use crate::store::{BookingStore, PriceVersion, SwapOutcome};

pub async fn get_db_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        telegram_id BIGINT UNIQUE,
        name TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS streamer_schedules (
        streamer_id BIGINT PRIMARY KEY REFERENCES users(id),
        schedule JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS day_offs (
        streamer_id BIGINT NOT NULL REFERENCES users(id),
        day DATE NOT NULL,
        PRIMARY KEY (streamer_id, day)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS bookings (
        id BIGSERIAL PRIMARY KEY,
        client_id BIGINT NOT NULL REFERENCES users(id),
        streamer_id BIGINT NOT NULL REFERENCES users(id),
        start_time TIMESTAMPTZ NOT NULL,
        end_time TIMESTAMPTZ NOT NULL,
        timezone TEXT NOT NULL,
        price BIGINT NOT NULL,
        voucher_usage JSONB,
        status TEXT NOT NULL DEFAULT 'pending',
        items_received BOOLEAN NOT NULL DEFAULT false,
        items_received_at TIMESTAMPTZ,
        stream_link TEXT,
        payment_group_id TEXT,
        reason TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        CHECK (start_time < end_time)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS bookings_streamer_start_idx ON bookings (streamer_id, start_time)",
    r#"
    CREATE TABLE IF NOT EXISTS price_states (
        streamer_id BIGINT PRIMARY KEY REFERENCES users(id),
        current_price BIGINT NOT NULL,
        previous_price BIGINT,
        last_price_update TIMESTAMPTZ,
        discount_percentage INTEGER
    )
    "#,
];

pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(*statement).execute(pool).await?;
    }
    Ok(())
}

fn to_chrono(t: OffsetDateTime) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp(t.unix_timestamp(), t.nanosecond())
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", t)))
}

fn to_offset(t: DateTime<Utc>) -> Result<OffsetDateTime, StoreError> {
    let nanos = i128::from(t.timestamp()) * 1_000_000_000 + i128::from(t.timestamp_subsec_nanos());
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .map_err(|e| StoreError::Corrupt(format!("timestamp out of range: {}", e)))
}

fn to_offset_opt(t: Option<DateTime<Utc>>) -> Result<Option<OffsetDateTime>, StoreError> {
    t.map(to_offset).transpose()
}

fn to_naive_date(d: time::Date) -> Result<NaiveDate, StoreError> {
    NaiveDate::from_ymd_opt(d.year(), u32::from(u8::from(d.month())), u32::from(d.day()))
        .ok_or_else(|| StoreError::Corrupt(format!("invalid date: {}", d)))
}

fn to_time_date(d: NaiveDate) -> Result<time::Date, StoreError> {
    let month = time::Month::try_from(d.month() as u8)
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    time::Date::from_calendar_date(d.year(), month, d.day() as u8)
        .map_err(|e| StoreError::Corrupt(e.to_string()))
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: i64,
    client_id: i64,
    streamer_id: i64,
    start_time: OffsetDateTime,
    end_time: OffsetDateTime,
    timezone: String,
    price: i64,
    voucher_usage: Option<Json<VoucherUsage>>,
    status: String,
    items_received: bool,
    items_received_at: Option<OffsetDateTime>,
    stream_link: Option<String>,
    payment_group_id: Option<String>,
    reason: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            client_id: row.client_id,
            streamer_id: row.streamer_id,
            start_time: to_chrono(row.start_time)?,
            end_time: to_chrono(row.end_time)?,
            timezone: row.timezone,
            price: row.price,
            voucher_usage: row.voucher_usage.map(|v| v.0),
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            items_received: row.items_received,
            items_received_at: row.items_received_at.map(to_chrono).transpose()?,
            stream_link: row.stream_link,
            payment_group_id: row.payment_group_id,
            reason: row.reason,
            created_at: to_chrono(row.created_at)?,
            updated_at: to_chrono(row.updated_at)?,
        })
    }
}

fn into_bookings(rows: Vec<BookingRow>) -> Result<Vec<Booking>, StoreError> {
    rows.into_iter().map(Booking::try_from).collect()
}

#[derive(sqlx::FromRow)]
struct PriceRow {
    streamer_id: i64,
    current_price: i64,
    previous_price: Option<i64>,
    last_price_update: Option<OffsetDateTime>,
    discount_percentage: Option<i32>,
}

const ACTIVE_FILTER: &str = "status IN ('pending', 'accepted', 'live', 'reschedule_requested')";

/// Держит расписание стримера до конца транзакции.
async fn lock_streamer(tx: &mut Transaction<'_, Postgres>, streamer_id: UserId) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(streamer_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Postgres-хранилище. Все изменения брони - условные UPDATE по статусу,
/// перенос окна идёт под замком стримера.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn user_by_telegram(&self, telegram_id: i64) -> Result<Option<UserId>, StoreError> {
        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE telegram_id = $1")
            .bind(telegram_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn bookings_for_user(&self, user_id: UserId) -> Result<Vec<Booking>, StoreError> {
        let rows = sqlx::query_as::<_, BookingRow>(
            "SELECT * FROM bookings
             WHERE client_id = $1 OR streamer_id = $1
             ORDER BY start_time DESC
             LIMIT 20",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        into_bookings(rows)
    }

    /// Шаблон заменяется целиком.
    pub async fn save_weekly_schedule(
        &self,
        streamer_id: UserId,
        schedule: &WeeklySchedule,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(schedule)?;
        sqlx::query(
            "INSERT INTO streamer_schedules (streamer_id, schedule, updated_at)
             VALUES ($1, $2, NOW())
             ON CONFLICT (streamer_id) DO UPDATE
             SET schedule = $2, updated_at = NOW()",
        )
        .bind(streamer_id)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_day_off(&self, day_off: DayOff) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO day_offs (streamer_id, day) VALUES ($1, $2)
             ON CONFLICT (streamer_id, day) DO NOTHING",
        )
        .bind(day_off.streamer_id)
        .bind(to_time_date(day_off.date)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl BookingStore for PgStore {
    async fn load_weekly_schedule(&self, streamer_id: UserId) -> Result<Option<WeeklySchedule>, StoreError> {
        let value = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT schedule FROM streamer_schedules WHERE streamer_id = $1",
        )
        .bind(streamer_id)
        .fetch_optional(&self.pool)
        .await?;

        match value {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn load_day_offs(&self, streamer_id: UserId) -> Result<Vec<NaiveDate>, StoreError> {
        let days = sqlx::query_scalar::<_, time::Date>(
            "SELECT day FROM day_offs WHERE streamer_id = $1 ORDER BY day",
        )
        .bind(streamer_id)
        .fetch_all(&self.pool)
        .await?;

        days.into_iter().map(to_naive_date).collect()
    }

    async fn load_active_bookings(&self, streamer_id: UserId) -> Result<Vec<Booking>, StoreError> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT * FROM bookings WHERE streamer_id = $1 AND {} ORDER BY start_time",
            ACTIVE_FILTER
        ))
        .bind(streamer_id)
        .fetch_all(&self.pool)
        .await?;
        into_bookings(rows)
    }

    async fn load_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        let row = sqlx::query_as::<_, BookingRow>("SELECT * FROM bookings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Booking::try_from).transpose()
    }

    async fn create_bookings(
        &self,
        drafts: Vec<BookingDraft>,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<Booking>>, StoreError> {
        let streamer_id = match drafts.first() {
            Some(draft) => draft.streamer_id,
            None => return Ok(Some(Vec::new())),
        };
        let now = to_offset(now)?;

        let mut tx = self.pool.begin().await?;
        // брони одного стримера создаются по очереди
        lock_streamer(&mut tx, streamer_id).await?;

        let overlap_sql = format!(
            "SELECT EXISTS (
                SELECT 1 FROM bookings
                WHERE streamer_id = $1 AND {} AND start_time < $3 AND $2 < end_time
             )",
            ACTIVE_FILTER
        );

        let mut created = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let start = to_offset(draft.start_time)?;
            let end = to_offset(draft.end_time)?;

            let collides = sqlx::query_scalar::<_, bool>(&overlap_sql)
                .bind(draft.streamer_id)
                .bind(start)
                .bind(end)
                .fetch_one(&mut *tx)
                .await?;
            if collides {
                tx.rollback().await?;
                return Ok(None);
            }

            let row = sqlx::query_as::<_, BookingRow>(
                "INSERT INTO bookings
                    (client_id, streamer_id, start_time, end_time, timezone, price,
                     voucher_usage, status, payment_group_id, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9, $9)
                 RETURNING *",
            )
            .bind(draft.client_id)
            .bind(draft.streamer_id)
            .bind(start)
            .bind(end)
            .bind(draft.timezone)
            .bind(draft.price)
            .bind(draft.voucher_usage.map(Json))
            .bind(draft.payment_group_id)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
            created.push(Booking::try_from(row)?);
        }

        tx.commit().await?;
        Ok(Some(created))
    }

    async fn compare_and_swap(
        &self,
        id: BookingId,
        precondition: Precondition,
        patch: &BookingPatch,
        now: DateTime<Utc>,
    ) -> Result<SwapOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        if patch.moves_window() {
            let streamer_id =
                sqlx::query_scalar::<_, i64>("SELECT streamer_id FROM bookings WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?;
            let Some(streamer_id) = streamer_id else {
                return Ok(SwapOutcome::Stale);
            };
            // тот же замок, что и при создании броней
            lock_streamer(&mut tx, streamer_id).await?;

            let collides = sqlx::query_scalar::<_, bool>(&format!(
                "SELECT EXISTS (
                    SELECT 1 FROM bookings b, bookings target
                    WHERE target.id = $1 AND b.id <> $1
                      AND b.streamer_id = target.streamer_id AND b.{}
                      AND b.start_time < COALESCE($3, target.end_time)
                      AND COALESCE($2, target.start_time) < b.end_time
                 )",
                ACTIVE_FILTER
            ))
            .bind(id)
            .bind(to_offset_opt(patch.start_time)?)
            .bind(to_offset_opt(patch.end_time)?)
            .fetch_one(&mut *tx)
            .await?;
            if collides {
                tx.rollback().await?;
                return Ok(SwapOutcome::Overlap);
            }
        }

        let result = sqlx::query(
            "UPDATE bookings SET
                status = COALESCE($3, status),
                items_received = COALESCE($4, items_received),
                items_received_at = COALESCE($5, items_received_at),
                stream_link = COALESCE($6, stream_link),
                reason = COALESCE($7, reason),
                start_time = COALESCE($8, start_time),
                end_time = COALESCE($9, end_time),
                updated_at = $10
             WHERE id = $1 AND status = $2
               AND ($11::boolean IS NULL OR items_received = $11)",
        )
        .bind(id)
        .bind(precondition.status.as_str())
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.items_received)
        .bind(to_offset_opt(patch.items_received_at)?)
        .bind(patch.stream_link.clone())
        .bind(patch.reason.clone())
        .bind(to_offset_opt(patch.start_time)?)
        .bind(to_offset_opt(patch.end_time)?)
        .bind(to_offset(now)?)
        .bind(precondition.items_received)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(SwapOutcome::Stale);
        }
        tx.commit().await?;
        Ok(SwapOutcome::Applied)
    }

    async fn load_price_state(&self, streamer_id: UserId) -> Result<Option<PriceState>, StoreError> {
        let row = sqlx::query_as::<_, PriceRow>(
            "SELECT streamer_id, current_price, previous_price, last_price_update, discount_percentage
             FROM price_states WHERE streamer_id = $1",
        )
        .bind(streamer_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(PriceState {
                streamer_id: row.streamer_id,
                current_price: row.current_price,
                previous_price: row.previous_price,
                last_price_update: row.last_price_update.map(to_chrono).transpose()?,
                discount_percentage: row.discount_percentage,
            })),
            None => Ok(None),
        }
    }

    async fn commit_price_state(
        &self,
        streamer_id: UserId,
        expected: PriceVersion,
        next: &PriceState,
    ) -> Result<bool, StoreError> {
        // запись проходит, только если никто не успел поменять цену раньше
        let query = match expected {
            PriceVersion::Unset => sqlx::query(
                "INSERT INTO price_states
                    (streamer_id, current_price, previous_price, last_price_update, discount_percentage)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (streamer_id) DO NOTHING",
            ),
            PriceVersion::Updated(_) => sqlx::query(
                "UPDATE price_states SET
                    current_price = $2,
                    previous_price = $3,
                    last_price_update = $4,
                    discount_percentage = $5
                 WHERE streamer_id = $1
                   AND last_price_update IS NOT DISTINCT FROM $6::timestamptz",
            ),
        };

        let mut query = query
            .bind(streamer_id)
            .bind(next.current_price)
            .bind(next.previous_price)
            .bind(to_offset_opt(next.last_price_update)?)
            .bind(next.discount_percentage);
        if let PriceVersion::Updated(at) = expected {
            query = query.bind(to_offset_opt(at)?);
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }
}
