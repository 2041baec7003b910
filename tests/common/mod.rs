#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use streambook::clock::FixedClock;
use streambook::models::{Booking, HourRange, PriceState, ShippingInfo, UserId, WeeklySchedule};
use streambook::notify::RecordingNotifier;
use streambook::selection::Selection;
use streambook::store::{BookingStore, MemoryStore};
use streambook::{BookingRequest, Engine, EngineSettings};

pub const STREAMER: UserId = 1;
pub const CLIENT: UserId = 2;
pub const OTHER_CLIENT: UserId = 3;
pub const RATE: i64 = 100_000;

pub type TestEngine<S = MemoryStore> = Engine<S, RecordingNotifier>;

/// 2026-10-18, воскресенье.
pub fn sunday_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 8, 0, 0).unwrap()
}

pub fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
}

pub fn monday_at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, hour, 0, 0).unwrap()
}

pub async fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store
        .set_schedule(
            STREAMER,
            WeeklySchedule::new().with_day(1, vec![HourRange::new(9, 17)]),
        )
        .await;
    store.set_price_state(PriceState::new(STREAMER, RATE)).await;
    store
}

pub fn engine_with<S: BookingStore>(store: S) -> (TestEngine<S>, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(sunday_morning()));
    let engine = Engine::new(
        store,
        RecordingNotifier::new(),
        clock.clone(),
        EngineSettings::default(),
    );
    (engine, clock)
}

pub async fn engine() -> (TestEngine, Arc<FixedClock>) {
    engine_with(seeded_store().await)
}

/// Кликает часы по очереди, как клиент в календаре.
pub async fn select<S: BookingStore>(
    engine: &TestEngine<S>,
    client_picks: &[(NaiveDate, u8)],
) -> Selection {
    let mut selection = Selection::new();
    for (date, hour) in client_picks {
        selection = engine
            .select_hour(&selection, STREAMER, *date, *hour)
            .await
            .unwrap();
    }
    selection
}

pub fn request(client_id: UserId, selection: Selection) -> BookingRequest {
    BookingRequest {
        client_id,
        streamer_id: STREAMER,
        selection,
        shipping: ShippingInfo::none(),
        timezone: None,
        voucher: None,
    }
}

/// Бронь на понедельник 9:00-12:00.
pub async fn book_morning<S: BookingStore>(engine: &TestEngine<S>) -> Booking {
    let selection = select(engine, &[(monday(), 9), (monday(), 12)]).await;
    let mut created = engine.submit_booking(request(CLIENT, selection)).await.unwrap();
    engine.notifier().take().await;
    created.remove(0)
}

pub fn pending_booking(client_id: UserId, start: DateTime<Utc>, end: DateTime<Utc>) -> Booking {
    Booking {
        id: 0,
        client_id,
        streamer_id: STREAMER,
        start_time: start,
        end_time: end,
        timezone: "Asia/Jakarta".to_string(),
        price: RATE * (end - start).num_hours(),
        voucher_usage: None,
        status: streambook::models::BookingStatus::Pending,
        items_received: false,
        items_received_at: None,
        stream_link: None,
        payment_group_id: None,
        reason: None,
        created_at: sunday_morning(),
        updated_at: sunday_morning(),
    }
}
