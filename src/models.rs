use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type BookingId = i64;

/// Диапазон часов в недельном расписании, обе границы включительно.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourRange {
    pub start: u8,
    pub end: u8,
}

impl HourRange {
    pub fn new(start: u8, end: u8) -> Self {
        HourRange { start, end }
    }

    pub fn hours(&self) -> impl Iterator<Item = u8> {
        // часы за пределами суток отбрасываем
        let end = self.end.min(23);
        self.start..=end
    }
}

/// Недельный шаблон стримера: день недели (0 = воскресенье) -> список диапазонов.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeeklySchedule(pub BTreeMap<u8, Vec<HourRange>>);

impl WeeklySchedule {
    pub fn new() -> Self {
        WeeklySchedule(BTreeMap::new())
    }

    pub fn with_day(mut self, weekday: u8, ranges: Vec<HourRange>) -> Self {
        self.0.insert(weekday, ranges);
        self
    }

    pub fn ranges_for(&self, date: NaiveDate) -> &[HourRange] {
        let weekday = date.weekday().num_days_from_sunday() as u8;
        self.0.get(&weekday).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Выходной: весь день закрыт, что бы ни было в шаблоне.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayOff {
    pub streamer_id: UserId,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Accepted,
    Rejected,
    Live,
    Completed,
    Cancelled,
    RescheduleRequested,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Accepted => "accepted",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Live => "live",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::RescheduleRequested => "reschedule_requested",
        }
    }

    /// Занимает ли бронь время в расписании стримера.
    /// Запрошенный перенос держит исходный слот, пока его не подтвердят или не отменят.
    pub fn occupies_schedule(&self) -> bool {
        matches!(
            self,
            BookingStatus::Pending
                | BookingStatus::Accepted
                | BookingStatus::Live
                | BookingStatus::RescheduleRequested
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Rejected | BookingStatus::Completed | BookingStatus::Cancelled
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "🆕 Ожидает подтверждения",
            BookingStatus::Accepted => "✅ Подтверждена",
            BookingStatus::Rejected => "❌ Отклонена",
            BookingStatus::Live => "🔴 В эфире",
            BookingStatus::Completed => "✅ Завершена",
            BookingStatus::Cancelled => "❌ Отменена",
            BookingStatus::RescheduleRequested => "🔁 Запрошен перенос",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "accepted" => Ok(BookingStatus::Accepted),
            "rejected" => Ok(BookingStatus::Rejected),
            "live" => Ok(BookingStatus::Live),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "reschedule_requested" => Ok(BookingStatus::RescheduleRequested),
            other => Err(format!("unknown booking status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherUsage {
    pub code: String,
    pub discount: i64,
    pub final_price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub client_id: UserId,
    pub streamer_id: UserId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub timezone: String,
    pub price: i64,
    pub voucher_usage: Option<VoucherUsage>,
    pub status: BookingStatus,
    pub items_received: bool,
    pub items_received_at: Option<DateTime<Utc>>,
    pub stream_link: Option<String>,
    pub payment_group_id: Option<String>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Пересекается ли бронь с полуинтервалом [start, end).
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_time < end && start < self.end_time
    }

    pub fn covers(&self, instant: DateTime<Utc>) -> bool {
        self.start_time <= instant && instant < self.end_time
    }

    pub fn duration_hours(&self) -> i64 {
        (self.end_time - self.start_time).num_hours()
    }
}

/// Бронь, ещё не сохранённая в хранилище.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingDraft {
    pub client_id: UserId,
    pub streamer_id: UserId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub timezone: String,
    pub price: i64,
    pub voucher_usage: Option<VoucherUsage>,
    pub payment_group_id: Option<String>,
}

impl BookingDraft {
    pub fn overlaps(&self, other: &Booking) -> bool {
        other.overlaps(self.start_time, self.end_time)
    }
}

/// Ожидаемое состояние строки для условного обновления.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Precondition {
    pub status: BookingStatus,
    pub items_received: Option<bool>,
}

impl Precondition {
    pub fn status(status: BookingStatus) -> Self {
        Precondition {
            status,
            items_received: None,
        }
    }

    pub fn holds(&self, booking: &Booking) -> bool {
        booking.status == self.status
            && self
                .items_received
                .map_or(true, |expected| booking.items_received == expected)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingPatch {
    pub status: Option<BookingStatus>,
    pub items_received: Option<bool>,
    pub items_received_at: Option<DateTime<Utc>>,
    pub stream_link: Option<String>,
    pub reason: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl BookingPatch {
    pub fn moves_window(&self) -> bool {
        self.start_time.is_some() || self.end_time.is_some()
    }

    pub fn apply(&self, booking: &mut Booking, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            booking.status = status;
        }
        if let Some(received) = self.items_received {
            booking.items_received = received;
        }
        if self.items_received_at.is_some() {
            booking.items_received_at = self.items_received_at;
        }
        if self.stream_link.is_some() {
            booking.stream_link = self.stream_link.clone();
        }
        if self.reason.is_some() {
            booking.reason = self.reason.clone();
        }
        if let Some(start) = self.start_time {
            booking.start_time = start;
        }
        if let Some(end) = self.end_time {
            booking.end_time = end;
        }
        booking.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceState {
    pub streamer_id: UserId,
    pub current_price: i64,
    pub previous_price: Option<i64>,
    pub last_price_update: Option<DateTime<Utc>>,
    pub discount_percentage: Option<i32>,
}

impl PriceState {
    pub fn new(streamer_id: UserId, current_price: i64) -> Self {
        PriceState {
            streamer_id,
            current_price,
            previous_price: None,
            last_price_update: None,
            discount_percentage: None,
        }
    }

    pub fn next_available_update(&self, window: Duration) -> Option<DateTime<Utc>> {
        self.last_price_update.map(|last| last + window)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingInfo {
    pub requires_shipping: bool,
    pub same_city: bool,
}

impl ShippingInfo {
    pub fn none() -> Self {
        ShippingInfo::default()
    }

    /// Сколько дней сверх «завтра» нужно на доставку товара стримеру.
    pub fn extra_lead_days(&self) -> i64 {
        match (self.requires_shipping, self.same_city) {
            (false, _) => 0,
            (true, true) => 1,
            (true, false) => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BulkMode {
    Week,
    TwoWeeks,
    Month,
}

impl BulkMode {
    pub fn days(&self) -> i64 {
        match self {
            BulkMode::Week => 7,
            BulkMode::TwoWeeks => 14,
            BulkMode::Month => 30,
        }
    }
}

impl FromStr for BulkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "week" => Ok(BulkMode::Week),
            "twoWeeks" | "two_weeks" => Ok(BulkMode::TwoWeeks),
            "month" => Ok(BulkMode::Month),
            other => Err(format!("unknown bulk mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    NewBooking,
    BookingAccepted,
    BookingRejected,
    BookingCancelled,
    ItemReceived,
    StreamStarted,
    StreamEnded,
    RescheduleRequest,
    RescheduleCancelled,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::NewBooking => "new_booking",
            NotificationType::BookingAccepted => "booking_accepted",
            NotificationType::BookingRejected => "booking_rejected",
            NotificationType::BookingCancelled => "booking_cancelled",
            NotificationType::ItemReceived => "item_received",
            NotificationType::StreamStarted => "stream_started",
            NotificationType::StreamEnded => "stream_ended",
            NotificationType::RescheduleRequest => "reschedule_request",
            NotificationType::RescheduleCancelled => "reschedule_cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: UserId,
    pub kind: NotificationType,
    pub booking_id: BookingId,
    pub payment_group_id: Option<String>,
    pub reason: Option<String>,
    pub stream_link: Option<String>,
}

impl Notification {
    pub fn new(user_id: UserId, kind: NotificationType, booking: &Booking) -> Self {
        Notification {
            user_id,
            kind,
            booking_id: booking.id,
            payment_group_id: booking.payment_group_id.clone(),
            reason: None,
            stream_link: None,
        }
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    pub fn with_stream_link(mut self, link: Option<String>) -> Self {
        self.stream_link = link;
        self
    }
}
