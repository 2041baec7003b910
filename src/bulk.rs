use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::availability::DayAvailability;
use crate::models::{Booking, BulkMode, ShippingInfo, WeeklySchedule};
use crate::selection::{RunSet, Selection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkRequest {
    pub mode: BulkMode,
    /// По умолчанию сегодня.
    pub start: Option<NaiveDate>,
    pub shipping: ShippingInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Дата раньше, чем успевают завтра плюс доставка.
    TooSoon,
    NoAvailability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDate {
    pub date: NaiveDate,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkSelection {
    pub selection: Selection,
    pub skipped: Vec<SkippedDate>,
}

impl BulkSelection {
    pub fn selected_days(&self) -> usize {
        self.selection.dates().count()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Самая ранняя дата, которую можно бронировать: завтра плюс дни на доставку товара.
pub fn earliest_eligible_date(today: NaiveDate, shipping: ShippingInfo) -> NaiveDate {
    today + Duration::days(1 + shipping.extra_lead_days())
}

pub fn is_date_eligible(date: NaiveDate, today: NaiveDate, shipping: ShippingInfo) -> bool {
    date >= earliest_eligible_date(today, shipping)
}

/// Берёт все свободные часы каждой подходящей даты окна.
/// Правила непрерывности и минимума здесь не применяются.
pub fn bulk_select(
    schedule: Option<&WeeklySchedule>,
    day_offs: &[NaiveDate],
    bookings: &[Booking],
    request: &BulkRequest,
    today: NaiveDate,
) -> BulkSelection {
    let start = request.start.unwrap_or(today);
    let mut result = BulkSelection::default();

    for offset in 0..request.mode.days() {
        let date = start + Duration::days(offset);

        if !is_date_eligible(date, today, request.shipping) {
            result.skipped.push(SkippedDate {
                date,
                reason: SkipReason::TooSoon,
            });
            continue;
        }

        let day = DayAvailability::resolve(schedule, day_offs, bookings, date);
        if day.is_empty() {
            result.skipped.push(SkippedDate {
                date,
                reason: SkipReason::NoAvailability,
            });
            continue;
        }

        result
            .selection
            .set_date(date, RunSet::from_hours(day.available.iter().copied()));
    }

    result
}
