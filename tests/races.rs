mod common;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use streambook::error::StoreError;
use streambook::models::{
    Booking, BookingDraft, BookingId, BookingPatch, BookingStatus, PriceState, Precondition,
    UserId, WeeklySchedule,
};
use streambook::store::{BookingStore, MemoryStore, PriceVersion, SwapOutcome};
use streambook::{EngineError, Event};

use common::*;

/// Другой клиент успевает забронировать 13:00-15:00 прямо перед записью переноса.
struct Interloper {
    inner: MemoryStore,
}

#[async_trait]
impl BookingStore for Interloper {
    async fn load_weekly_schedule(&self, streamer_id: UserId) -> Result<Option<WeeklySchedule>, StoreError> {
        self.inner.load_weekly_schedule(streamer_id).await
    }

    async fn load_day_offs(&self, streamer_id: UserId) -> Result<Vec<NaiveDate>, StoreError> {
        self.inner.load_day_offs(streamer_id).await
    }

    async fn load_active_bookings(&self, streamer_id: UserId) -> Result<Vec<Booking>, StoreError> {
        self.inner.load_active_bookings(streamer_id).await
    }

    async fn load_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        self.inner.load_booking(id).await
    }

    async fn create_bookings(
        &self,
        drafts: Vec<BookingDraft>,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<Booking>>, StoreError> {
        self.inner.create_bookings(drafts, now).await
    }

    async fn compare_and_swap(
        &self,
        id: BookingId,
        precondition: Precondition,
        patch: &BookingPatch,
        now: DateTime<Utc>,
    ) -> Result<SwapOutcome, StoreError> {
        if patch.moves_window() {
            self.inner
                .insert_booking(pending_booking(OTHER_CLIENT, monday_at(13), monday_at(15)))
                .await;
        }
        self.inner.compare_and_swap(id, precondition, patch, now).await
    }

    async fn load_price_state(&self, streamer_id: UserId) -> Result<Option<PriceState>, StoreError> {
        self.inner.load_price_state(streamer_id).await
    }

    async fn commit_price_state(
        &self,
        streamer_id: UserId,
        expected: PriceVersion,
        next: &PriceState,
    ) -> Result<bool, StoreError> {
        self.inner.commit_price_state(streamer_id, expected, next).await
    }
}

#[tokio::test]
async fn reschedule_loses_to_a_booking_made_meanwhile() {
    let (engine, _clock) = engine_with(Interloper {
        inner: seeded_store().await,
    });
    let booking = book_morning(&engine).await;

    engine
        .transition(
            booking.id,
            Event::RequestReschedule {
                reason: "после обеда".to_string(),
            },
            CLIENT,
        )
        .await
        .unwrap();
    engine.notifier().take().await;

    let err = engine
        .transition(
            booking.id,
            Event::ConfirmReschedule {
                start: monday_at(13),
                end: monday_at(15),
            },
            CLIENT,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::OverlapDetected));
    assert!(engine.notifier().sent().await.is_empty());

    let in_window: Vec<Booking> = engine
        .store()
        .inner
        .load_active_bookings(STREAMER)
        .await
        .unwrap()
        .into_iter()
        .filter(|b| b.overlaps(monday_at(13), monday_at(15)))
        .collect();
    assert_eq!(in_window.len(), 1);
    assert_eq!(in_window[0].client_id, OTHER_CLIENT);

    let original = engine.store().load_booking(booking.id).await.unwrap().unwrap();
    assert_eq!(original.status, BookingStatus::RescheduleRequested);
    assert_eq!(original.start_time, monday_at(9));
}

#[tokio::test]
async fn memory_store_checks_overlap_when_moving_a_window() {
    let store = MemoryStore::new();
    let moving = store
        .insert_booking(pending_booking(CLIENT, monday_at(9), monday_at(12)))
        .await;
    store
        .insert_booking(pending_booking(OTHER_CLIENT, monday_at(14), monday_at(16)))
        .await;

    let mut patch = BookingPatch {
        start_time: Some(monday_at(13)),
        end_time: Some(monday_at(15)),
        ..Default::default()
    };
    let precondition = Precondition::status(BookingStatus::Pending);
    let outcome = store
        .compare_and_swap(moving.id, precondition, &patch, sunday_morning())
        .await
        .unwrap();
    assert_eq!(outcome, SwapOutcome::Overlap);

    patch.start_time = Some(monday_at(10));
    patch.end_time = Some(monday_at(13));
    let outcome = store
        .compare_and_swap(moving.id, precondition, &patch, sunday_morning())
        .await
        .unwrap();
    assert_eq!(outcome, SwapOutcome::Applied);

    let outcome = store
        .compare_and_swap(
            moving.id,
            Precondition::status(BookingStatus::Accepted),
            &patch,
            sunday_morning(),
        )
        .await
        .unwrap();
    assert_eq!(outcome, SwapOutcome::Stale);
}

#[tokio::test]
async fn only_one_first_price_lands() {
    let store = MemoryStore::new();
    let first = PriceState::new(STREAMER, 100_000);
    let second = PriceState::new(STREAMER, 5_000_000);

    assert!(store
        .commit_price_state(STREAMER, PriceVersion::Unset, &first)
        .await
        .unwrap());
    assert!(!store
        .commit_price_state(STREAMER, PriceVersion::Unset, &second)
        .await
        .unwrap());

    let stored = store.load_price_state(STREAMER).await.unwrap().unwrap();
    assert_eq!(stored.current_price, 100_000);
}

#[tokio::test]
async fn concurrent_first_prices_have_one_winner() {
    let (engine, _clock) = engine_with(MemoryStore::new());

    let (first, second) = tokio::join!(
        engine.change_price(STREAMER, 100_000),
        engine.change_price(STREAMER, 5_000_000),
    );
    assert_eq!([first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(), 1);

    let winner = first.as_ref().or(second.as_ref()).unwrap().current_price;
    let stored = engine.store().load_price_state(STREAMER).await.unwrap().unwrap();
    assert_eq!(stored.current_price, winner);

    let err = first.err().or(second.err()).unwrap();
    assert!(matches!(
        err,
        EngineError::StatusConflict(_) | EngineError::RateLimited { .. }
    ));
}

#[tokio::test]
async fn first_price_starts_the_daily_window() {
    let (engine, clock) = engine_with(MemoryStore::new());

    let first = engine.change_price(STREAMER, 100_000).await.unwrap();
    assert_eq!(first.last_price_update, Some(sunday_morning()));

    clock.advance(Duration::hours(1));
    let err = engine.change_price(STREAMER, 110_000).await.unwrap_err();
    assert!(matches!(err, EngineError::RateLimited { .. }));

    clock.advance(Duration::hours(23));
    let next = engine.change_price(STREAMER, 110_000).await.unwrap();
    assert_eq!(next.previous_price, Some(100_000));
}

#[tokio::test]
async fn oversized_rates_are_refused_without_panicking() {
    let (engine, clock) = engine_with(MemoryStore::new());

    let err = engine.change_price(STREAMER, i64::MAX).await.unwrap_err();
    assert!(matches!(err, EngineError::PriceBound { min: 1, .. }));
    assert!(engine.store().load_price_state(STREAMER).await.unwrap().is_none());

    engine
        .store()
        .set_price_state(PriceState::new(STREAMER, i64::MAX))
        .await;
    clock.advance(Duration::hours(25));
    let err = engine.change_price(STREAMER, 100).await.unwrap_err();
    assert!(matches!(err, EngineError::PriceBound { .. }));
}
