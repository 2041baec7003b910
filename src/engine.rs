use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::availability::DayAvailability;
use crate::bulk::{self, is_date_eligible, BulkRequest, BulkSelection};
use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::lifecycle::{self, Event};
use crate::models::{
    Booking, BookingDraft, BookingId, BulkMode, Notification, NotificationType, PriceState,
    ShippingInfo, UserId,
};
use crate::notify::Notifier;
use crate::pricing::{self, apply_voucher, booking_price};
use crate::selection::{self, Selection};
use crate::store::{BookingStore, PriceVersion, SwapOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Подсказка для отображения, сравнения всегда в UTC.
    pub default_timezone: String,
    pub price_window: Duration,
    pub default_bulk_mode: BulkMode,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            default_timezone: "Asia/Jakarta".to_string(),
            price_window: pricing::price_update_window(),
            default_bulk_mode: BulkMode::Week,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
    pub code: String,
    pub discount: i64,
}

/// Заявка клиента на бронирование выбранных часов.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub client_id: UserId,
    pub streamer_id: UserId,
    pub selection: Selection,
    pub shipping: ShippingInfo,
    pub timezone: Option<String>,
    pub voucher: Option<Voucher>,
}

pub struct Engine<S, N> {
    store: S,
    notifier: N,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl<S: BookingStore, N: Notifier> Engine<S, N> {
    pub fn new(store: S, notifier: N, clock: Arc<dyn Clock>, settings: EngineSettings) -> Self {
        Engine {
            store,
            notifier,
            clock,
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub async fn resolve_availability(
        &self,
        streamer_id: UserId,
        date: NaiveDate,
    ) -> EngineResult<DayAvailability> {
        let schedule = self.store.load_weekly_schedule(streamer_id).await?;
        let day_offs = self.store.load_day_offs(streamer_id).await?;
        let bookings = self.store.load_active_bookings(streamer_id).await?;

        Ok(DayAvailability::resolve(
            schedule.as_ref(),
            &day_offs,
            &bookings,
            date,
        ))
    }

    pub async fn select_hour(
        &self,
        selection: &Selection,
        streamer_id: UserId,
        date: NaiveDate,
        hour: u8,
    ) -> EngineResult<Selection> {
        let day = self.resolve_availability(streamer_id, date).await?;
        selection::select_hour(selection, &day, hour)
    }

    pub fn deselect_hour(
        &self,
        selection: &Selection,
        date: NaiveDate,
        hour: u8,
    ) -> EngineResult<Selection> {
        selection::deselect_hour(selection, date, hour)
    }

    pub async fn bulk_select(
        &self,
        streamer_id: UserId,
        request: &BulkRequest,
    ) -> EngineResult<BulkSelection> {
        let schedule = self.store.load_weekly_schedule(streamer_id).await?;
        let day_offs = self.store.load_day_offs(streamer_id).await?;
        let bookings = self.store.load_active_bookings(streamer_id).await?;

        let result = bulk::bulk_select(
            schedule.as_ref(),
            &day_offs,
            &bookings,
            request,
            self.clock.today(),
        );
        debug!(
            "bulk select for streamer {}: {} days selected, {} skipped",
            streamer_id,
            result.selected_days(),
            result.skipped_count()
        );
        Ok(result)
    }

    /// Создаёт по брони на каждую серию выбора. Все брони заявки попадают в
    /// одну платёжную группу, уведомление стример получает по первой из них.
    pub async fn submit_booking(&self, request: BookingRequest) -> EngineResult<Vec<Booking>> {
        // иначе роли в переходах неразличимы
        if request.client_id == request.streamer_id {
            return Err(EngineError::Unauthorized);
        }
        let runs = selection::bookable_runs(&request.selection)?;
        let today = self.clock.today();

        let schedule = self.store.load_weekly_schedule(request.streamer_id).await?;
        let day_offs = self.store.load_day_offs(request.streamer_id).await?;
        let active = self.store.load_active_bookings(request.streamer_id).await?;
        let rate = self
            .store
            .load_price_state(request.streamer_id)
            .await?
            .ok_or(EngineError::RateNotSet(request.streamer_id))?;

        let group_id = Uuid::new_v4().to_string();
        let timezone = request
            .timezone
            .clone()
            .unwrap_or_else(|| self.settings.default_timezone.clone());

        let mut drafts = Vec::with_capacity(runs.len());
        for (date, run) in &runs {
            if !is_date_eligible(*date, today, request.shipping) {
                return Err(EngineError::ScheduleUnavailable {
                    date: *date,
                    hour: run.first,
                });
            }

            let day = DayAvailability::resolve(schedule.as_ref(), &day_offs, &[], *date);
            if let Some(hour) = (run.first..=run.last).find(|h| !day.is_scheduled(*h)) {
                return Err(EngineError::ScheduleUnavailable { date: *date, hour });
            }

            let (start_time, end_time) = run.window(*date);
            let draft = BookingDraft {
                client_id: request.client_id,
                streamer_id: request.streamer_id,
                start_time,
                end_time,
                timezone: timezone.clone(),
                price: booking_price(rate.current_price, i64::from(run.span()))?,
                voucher_usage: None,
                payment_group_id: Some(group_id.clone()),
            };
            if active.iter().any(|b| draft.overlaps(b)) {
                debug!(
                    "booking {}..{} for streamer {} overlaps an active booking",
                    start_time, end_time, request.streamer_id
                );
                return Err(EngineError::OverlapDetected);
            }
            drafts.push(draft);
        }

        // ваучер списывается с первой брони группы
        if let (Some(voucher), Some(first)) = (&request.voucher, drafts.first_mut()) {
            first.voucher_usage = Some(apply_voucher(first.price, &voucher.code, voucher.discount));
        }

        let now = self.clock.now();
        let created = self
            .store
            .create_bookings(drafts, now)
            .await?
            .ok_or(EngineError::OverlapDetected)?;

        info!(
            "client {} booked streamer {}: {} booking(s) in group {}",
            request.client_id,
            request.streamer_id,
            created.len(),
            group_id
        );

        if let Some(primary) = created.first() {
            let notification =
                Notification::new(primary.streamer_id, NotificationType::NewBooking, primary);
            self.dispatch(vec![notification]).await;
        }

        Ok(created)
    }

    pub async fn transition(
        &self,
        booking_id: BookingId,
        event: Event,
        actor: UserId,
    ) -> EngineResult<Booking> {
        let booking = self
            .store
            .load_booking(booking_id)
            .await?
            .ok_or(EngineError::NotFound(booking_id))?;
        let now = self.clock.now();

        let transition = lifecycle::plan(&booking, &event, actor, now).map_err(|e| {
            debug!(
                "{} on booking {} by user {} refused: {}",
                event.name(),
                booking_id,
                actor,
                e
            );
            e
        })?;

        let outcome = self
            .store
            .compare_and_swap(booking_id, transition.precondition, &transition.patch, now)
            .await?;
        match outcome {
            SwapOutcome::Applied => {}
            SwapOutcome::Stale => {
                warn!(
                    "{} on booking {} lost a race: row is no longer {}",
                    event.name(),
                    booking_id,
                    transition.from
                );
                return Err(EngineError::status_conflict(booking_id, transition.from));
            }
            SwapOutcome::Overlap => {
                debug!(
                    "{} on booking {} refused: new window overlaps an active booking",
                    event.name(),
                    booking_id
                );
                return Err(EngineError::OverlapDetected);
            }
        }

        let mut updated = booking;
        transition.patch.apply(&mut updated, now);
        info!(
            "booking {}: {} -> {} ({} by user {})",
            booking_id,
            transition.from,
            updated.status,
            event.name(),
            actor
        );

        self.dispatch(transition.notifications).await;
        Ok(updated)
    }

    pub async fn change_price(&self, streamer_id: UserId, new_price: i64) -> EngineResult<PriceState> {
        let now = self.clock.now();
        let current = self.store.load_price_state(streamer_id).await?;

        let expected = PriceVersion::of(current.as_ref());
        let next = match &current {
            Some(state) => {
                pricing::evaluate_price_change(state, new_price, now, self.settings.price_window)?
            }
            None => pricing::first_price(streamer_id, new_price, now)?,
        };

        let committed = self
            .store
            .commit_price_state(streamer_id, expected, &next)
            .await?;
        if !committed {
            warn!("price change for streamer {} lost a race", streamer_id);
            return Err(EngineError::StatusConflict(format!(
                "price of streamer {} was changed concurrently",
                streamer_id
            )));
        }

        info!(
            "streamer {} price: {:?} -> {}",
            streamer_id, next.previous_price, next.current_price
        );
        Ok(next)
    }

    async fn dispatch(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            if let Err(e) = self.notifier.notify(&notification).await {
                error!(
                    "Failed to send {} to user {}: {}",
                    notification.kind.as_str(),
                    notification.user_id,
                    e
                );
                // переход уже записан, продолжаем
            }
        }
    }
}
