use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::models::{
    Booking, BookingDraft, BookingId, BookingPatch, BookingStatus, DayOff, Precondition, PriceState,
    UserId, WeeklySchedule,
};

/// Итог условного обновления брони.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    Applied,
    /// Строка уже не в ожидаемом состоянии.
    Stale,
    /// Новое окно брони пересекается с другой активной бронью стримера.
    Overlap,
}

/// Ожидаемая версия цены стримера для условной записи.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceVersion {
    /// Ставки ещё нет.
    Unset,
    /// Ставка есть, последнее изменение было в это время.
    Updated(Option<DateTime<Utc>>),
}

impl PriceVersion {
    pub fn of(state: Option<&PriceState>) -> Self {
        match state {
            Some(state) => PriceVersion::Updated(state.last_price_update),
            None => PriceVersion::Unset,
        }
    }
}

/// Хранилище, через которое движок читает и пишет состояние.
///
/// Любое изменение брони идёт через `compare_and_swap`: строка меняется,
/// только если всё ещё в ожидаемом состоянии. Если патч двигает окно брони,
/// проверка пересечений делается в той же записи.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn load_weekly_schedule(&self, streamer_id: UserId) -> Result<Option<WeeklySchedule>, StoreError>;

    async fn load_day_offs(&self, streamer_id: UserId) -> Result<Vec<NaiveDate>, StoreError>;

    /// Брони, занимающие расписание стримера.
    async fn load_active_bookings(&self, streamer_id: UserId) -> Result<Vec<Booking>, StoreError>;

    async fn load_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    /// Создаёт все брони одной заявки разом. `None`, если на момент записи
    /// какая-то из них пересеклась с активной бронью.
    async fn create_bookings(
        &self,
        drafts: Vec<BookingDraft>,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<Booking>>, StoreError>;

    async fn compare_and_swap(
        &self,
        id: BookingId,
        precondition: Precondition,
        patch: &BookingPatch,
        now: DateTime<Utc>,
    ) -> Result<SwapOutcome, StoreError>;

    async fn load_price_state(&self, streamer_id: UserId) -> Result<Option<PriceState>, StoreError>;

    async fn commit_price_state(
        &self,
        streamer_id: UserId,
        expected: PriceVersion,
        next: &PriceState,
    ) -> Result<bool, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    schedules: HashMap<UserId, WeeklySchedule>,
    day_offs: HashMap<UserId, Vec<NaiveDate>>,
    bookings: BTreeMap<BookingId, Booking>,
    prices: HashMap<UserId, PriceState>,
    next_id: BookingId,
}

/// Хранилище в памяти: один мьютекс на всё, поэтому чтение и запись атомарны.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub async fn set_schedule(&self, streamer_id: UserId, schedule: WeeklySchedule) {
        self.inner.lock().await.schedules.insert(streamer_id, schedule);
    }

    pub async fn add_day_off(&self, day_off: DayOff) {
        self.inner
            .lock()
            .await
            .day_offs
            .entry(day_off.streamer_id)
            .or_default()
            .push(day_off.date);
    }

    pub async fn set_price_state(&self, state: PriceState) {
        self.inner.lock().await.prices.insert(state.streamer_id, state);
    }

    pub async fn insert_booking(&self, mut booking: Booking) -> Booking {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        booking.id = inner.next_id;
        inner.bookings.insert(booking.id, booking.clone());
        booking
    }

    pub async fn bookings(&self) -> Vec<Booking> {
        self.inner.lock().await.bookings.values().cloned().collect()
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn load_weekly_schedule(&self, streamer_id: UserId) -> Result<Option<WeeklySchedule>, StoreError> {
        Ok(self.inner.lock().await.schedules.get(&streamer_id).cloned())
    }

    async fn load_day_offs(&self, streamer_id: UserId) -> Result<Vec<NaiveDate>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .day_offs
            .get(&streamer_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn load_active_bookings(&self, streamer_id: UserId) -> Result<Vec<Booking>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .bookings
            .values()
            .filter(|b| b.streamer_id == streamer_id && b.status.occupies_schedule())
            .cloned()
            .collect())
    }

    async fn load_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.inner.lock().await.bookings.get(&id).cloned())
    }

    async fn create_bookings(
        &self,
        drafts: Vec<BookingDraft>,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<Booking>>, StoreError> {
        let mut inner = self.inner.lock().await;

        let collides = drafts.iter().any(|draft| {
            inner.bookings.values().any(|b| {
                b.streamer_id == draft.streamer_id
                    && b.status.occupies_schedule()
                    && draft.overlaps(b)
            })
        });
        if collides {
            return Ok(None);
        }

        let mut created = Vec::with_capacity(drafts.len());
        for draft in drafts {
            inner.next_id += 1;
            let booking = Booking {
                id: inner.next_id,
                client_id: draft.client_id,
                streamer_id: draft.streamer_id,
                start_time: draft.start_time,
                end_time: draft.end_time,
                timezone: draft.timezone,
                price: draft.price,
                voucher_usage: draft.voucher_usage,
                status: BookingStatus::Pending,
                items_received: false,
                items_received_at: None,
                stream_link: None,
                payment_group_id: draft.payment_group_id,
                reason: None,
                created_at: now,
                updated_at: now,
            };
            inner.bookings.insert(booking.id, booking.clone());
            created.push(booking);
        }
        Ok(Some(created))
    }

    async fn compare_and_swap(
        &self,
        id: BookingId,
        precondition: Precondition,
        patch: &BookingPatch,
        now: DateTime<Utc>,
    ) -> Result<SwapOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        let mut updated = match inner.bookings.get(&id) {
            Some(booking) if precondition.holds(booking) => booking.clone(),
            _ => return Ok(SwapOutcome::Stale),
        };
        patch.apply(&mut updated, now);

        if patch.moves_window() {
            let collides = inner.bookings.values().any(|b| {
                b.id != id
                    && b.streamer_id == updated.streamer_id
                    && b.status.occupies_schedule()
                    && b.overlaps(updated.start_time, updated.end_time)
            });
            if collides {
                return Ok(SwapOutcome::Overlap);
            }
        }

        inner.bookings.insert(id, updated);
        Ok(SwapOutcome::Applied)
    }

    async fn load_price_state(&self, streamer_id: UserId) -> Result<Option<PriceState>, StoreError> {
        Ok(self.inner.lock().await.prices.get(&streamer_id).cloned())
    }

    async fn commit_price_state(
        &self,
        streamer_id: UserId,
        expected: PriceVersion,
        next: &PriceState,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        if PriceVersion::of(inner.prices.get(&streamer_id)) != expected {
            return Ok(false);
        }
        inner.prices.insert(streamer_id, next.clone());
        Ok(true)
    }
}
