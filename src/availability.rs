use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::models::{Booking, WeeklySchedule};

/// Начало часового слота `hour` на дату `date`, всегда в UTC.
pub fn slot_instant(date: NaiveDate, hour: u8) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(u32::from(hour.min(23)), 0, 0).unwrap_or(NaiveTime::MIN);
    date.and_time(time).and_utc()
}

/// Часы, открытые по недельному шаблону на дату. Выходной день закрывает дату целиком.
pub fn resolve_schedule_hours(
    schedule: &WeeklySchedule,
    date: NaiveDate,
    day_offs: &[NaiveDate],
) -> Vec<u8> {
    if day_offs.contains(&date) {
        return Vec::new();
    }

    // диапазоны могут пересекаться и идти вразнобой
    let hours: BTreeSet<u8> = schedule
        .ranges_for(date)
        .iter()
        .flat_map(|range| range.hours())
        .collect();

    hours.into_iter().collect()
}

/// Убирает часы, начало которых попадает в [start, end) любой брони, занимающей расписание.
pub fn filter_conflicts(date: NaiveDate, hours: &[u8], bookings: &[Booking]) -> Vec<u8> {
    let blocking: Vec<&Booking> = bookings
        .iter()
        .filter(|b| b.status.occupies_schedule())
        .collect();

    hours
        .iter()
        .copied()
        .filter(|&hour| {
            let instant = slot_instant(date, hour);
            !blocking.iter().any(|b| b.covers(instant))
        })
        .collect()
}

/// Расписание и свободные часы стримера на одну дату.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub scheduled: Vec<u8>,
    pub available: Vec<u8>,
}

impl DayAvailability {
    pub fn resolve(
        schedule: Option<&WeeklySchedule>,
        day_offs: &[NaiveDate],
        bookings: &[Booking],
        date: NaiveDate,
    ) -> Self {
        let scheduled = match schedule {
            Some(schedule) => resolve_schedule_hours(schedule, date, day_offs),
            None => Vec::new(),
        };
        let available = filter_conflicts(date, &scheduled, bookings);

        DayAvailability {
            date,
            scheduled,
            available,
        }
    }

    pub fn is_scheduled(&self, hour: u8) -> bool {
        self.scheduled.binary_search(&hour).is_ok()
    }

    pub fn is_available(&self, hour: u8) -> bool {
        self.available.binary_search(&hour).is_ok()
    }

    pub fn is_empty(&self) -> bool {
        self.available.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookingStatus, HourRange};
    use chrono::{Duration, TimeZone};

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn booking(start: DateTime<Utc>, hours: i64, status: BookingStatus) -> Booking {
        Booking {
            id: 1,
            client_id: 10,
            streamer_id: 20,
            start_time: start,
            end_time: start + Duration::hours(hours),
            timezone: "Asia/Jakarta".to_string(),
            price: 200_000,
            voucher_usage: None,
            status,
            items_received: false,
            items_received_at: None,
            stream_link: None,
            payment_group_id: None,
            reason: None,
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn expands_inclusive_range() {
        let schedule = WeeklySchedule::new().with_day(1, vec![HourRange::new(9, 17)]);
        let hours = resolve_schedule_hours(&schedule, monday(), &[]);
        assert_eq!(hours, (9..=17).collect::<Vec<u8>>());
    }

    #[test]
    fn merges_unsorted_overlapping_ranges() {
        let schedule = WeeklySchedule::new().with_day(
            1,
            vec![HourRange::new(14, 16), HourRange::new(9, 11), HourRange::new(10, 12)],
        );
        let hours = resolve_schedule_hours(&schedule, monday(), &[]);
        assert_eq!(hours, vec![9, 10, 11, 12, 14, 15, 16]);
    }

    #[test]
    fn missing_or_empty_weekday_is_closed() {
        let schedule = WeeklySchedule::new().with_day(2, vec![]);
        assert!(resolve_schedule_hours(&schedule, monday(), &[]).is_empty());
        let tuesday = monday().succ_opt().unwrap();
        assert!(resolve_schedule_hours(&schedule, tuesday, &[]).is_empty());
    }

    #[test]
    fn day_off_closes_whole_day() {
        let schedule = WeeklySchedule::new().with_day(1, vec![HourRange::new(9, 17)]);
        assert!(resolve_schedule_hours(&schedule, monday(), &[monday()]).is_empty());
    }

    #[test]
    fn active_bookings_remove_covered_hours() {
        let hours: Vec<u8> = (9..=17).collect();
        let start = Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap();
        let bookings = vec![booking(start, 2, BookingStatus::Accepted)];

        let free = filter_conflicts(monday(), &hours, &bookings);
        assert_eq!(free, vec![9, 12, 13, 14, 15, 16, 17]);
    }

    #[test]
    fn terminal_bookings_do_not_block() {
        let hours: Vec<u8> = (9..=12).collect();
        let start = Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap();
        let bookings = vec![
            booking(start, 2, BookingStatus::Rejected),
            booking(start, 2, BookingStatus::Cancelled),
            booking(start, 2, BookingStatus::Completed),
        ];
        assert_eq!(filter_conflicts(monday(), &hours, &bookings), hours);
    }

    #[test]
    fn pending_reschedule_still_blocks_original_slot() {
        let hours: Vec<u8> = (9..=12).collect();
        let start = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        let bookings = vec![booking(start, 2, BookingStatus::RescheduleRequested)];
        assert_eq!(filter_conflicts(monday(), &hours, &bookings), vec![11, 12]);
    }

    #[test]
    fn midnight_crossing_booking_blocks_early_hours() {
        let hours: Vec<u8> = (0..=3).collect();
        let start = Utc.with_ymd_and_hms(2026, 10, 18, 22, 0, 0).unwrap();
        let bookings = vec![booking(start, 4, BookingStatus::Pending)];
        assert_eq!(filter_conflicts(monday(), &hours, &bookings), vec![2, 3]);
    }

    #[test]
    fn fractional_booking_blocks_only_covered_hour_starts() {
        let hours: Vec<u8> = (9..=13).collect();
        let start = Utc.with_ymd_and_hms(2026, 10, 19, 10, 30, 0).unwrap();
        let bookings = vec![booking(start, 2, BookingStatus::Accepted)];
        // 10:30-12:30 накрывает начала 11:00 и 12:00
        assert_eq!(filter_conflicts(monday(), &hours, &bookings), vec![9, 10, 13]);
    }

    #[test]
    fn day_availability_reports_both_views() {
        let schedule = WeeklySchedule::new().with_day(1, vec![HourRange::new(9, 12)]);
        let start = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        let bookings = vec![booking(start, 1, BookingStatus::Live)];
        let day = DayAvailability::resolve(Some(&schedule), &[], &bookings, monday());

        assert!(day.is_scheduled(9));
        assert!(!day.is_available(9));
        assert!(day.is_available(10));
        assert!(!day.is_scheduled(13));
    }
}
