use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{EngineError, EngineResult};
use crate::models::{
    Booking, BookingPatch, BookingStatus, Notification, NotificationType, Precondition, UserId,
};
use crate::selection::MIN_SPAN_HOURS;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Accept,
    Reject { reason: String },
    MarkItemsReceived,
    StartStream { link: String },
    EndStream,
    Cancel { reason: String },
    RequestReschedule { reason: String },
    ConfirmReschedule {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    CancelReschedule { reason: String },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Accept => "accept",
            Event::Reject { .. } => "reject",
            Event::MarkItemsReceived => "mark_items_received",
            Event::StartStream { .. } => "start_stream",
            Event::EndStream => "end_stream",
            Event::Cancel { .. } => "cancel",
            Event::RequestReschedule { .. } => "request_reschedule",
            Event::ConfirmReschedule { .. } => "confirm_reschedule",
            Event::CancelReschedule { .. } => "cancel_reschedule",
        }
    }

    fn allowed_for(&self, role: Role) -> bool {
        match self {
            Event::Accept
            | Event::Reject { .. }
            | Event::MarkItemsReceived
            | Event::StartStream { .. }
            | Event::EndStream => role == Role::Streamer,
            Event::Cancel { .. } | Event::ConfirmReschedule { .. } | Event::CancelReschedule { .. } => {
                role == Role::Client
            }
            Event::RequestReschedule { .. } => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Streamer,
}

pub fn role_of(booking: &Booking, actor: UserId) -> Option<Role> {
    if actor == booking.streamer_id {
        Some(Role::Streamer)
    } else if actor == booking.client_id {
        Some(Role::Client)
    } else {
        None
    }
}

/// Вычисленный переход: что ожидаем в строке, что пишем, кого уведомляем.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: BookingStatus,
    pub to: BookingStatus,
    pub precondition: Precondition,
    pub patch: BookingPatch,
    pub notifications: Vec<Notification>,
}

impl Transition {
    fn new(booking: &Booking, to: BookingStatus) -> Self {
        Transition {
            from: booking.status,
            to,
            precondition: Precondition::status(booking.status),
            patch: BookingPatch {
                status: Some(to),
                ..BookingPatch::default()
            },
            notifications: Vec::new(),
        }
    }

    fn notify(mut self, notification: Notification) -> Self {
        self.notifications.push(notification);
        self
    }
}

pub fn validate_stream_link(link: &str) -> EngineResult<String> {
    let url = Url::parse(link.trim())
        .map_err(|e| EngineError::InvalidStreamLink(format!("{}: {}", link, e)))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(EngineError::InvalidStreamLink(link.to_string()));
    }
    Ok(url.to_string())
}

/// Новый интервал переноса: целые часы, не меньше двух.
pub fn validate_reschedule_range(start: DateTime<Utc>, end: DateTime<Utc>) -> EngineResult<()> {
    if start >= end {
        return Err(EngineError::InvalidRange(format!(
            "start {} is not before end {}",
            start, end
        )));
    }
    let on_hour = |t: DateTime<Utc>| t.minute() == 0 && t.second() == 0 && t.nanosecond() == 0;
    if !on_hour(start) || !on_hour(end) {
        return Err(EngineError::InvalidRange(
            "booking must start and end on a whole hour".to_string(),
        ));
    }
    if end - start < Duration::hours(i64::from(MIN_SPAN_HOURS)) {
        return Err(EngineError::BelowMinimumDuration);
    }
    Ok(())
}

fn counterparty(booking: &Booking, role: Role) -> UserId {
    match role {
        Role::Client => booking.streamer_id,
        Role::Streamer => booking.client_id,
    }
}

/// Чистое вычисление перехода. Ничего не пишет и никого не уведомляет.
pub fn plan(
    booking: &Booking,
    event: &Event,
    actor: UserId,
    now: DateTime<Utc>,
) -> EngineResult<Transition> {
    let role = role_of(booking, actor).ok_or(EngineError::Unauthorized)?;
    if !event.allowed_for(role) {
        return Err(EngineError::Unauthorized);
    }

    if booking.status.is_terminal() {
        return Err(EngineError::StatusConflict(format!(
            "booking {} is already {}",
            booking.id, booking.status
        )));
    }

    let client = booking.client_id;
    let streamer = booking.streamer_id;

    let transition = match (booking.status, event) {
        (BookingStatus::Pending, Event::Accept) => Transition::new(booking, BookingStatus::Accepted)
            .notify(Notification::new(client, NotificationType::BookingAccepted, booking)),

        (BookingStatus::Pending, Event::Reject { reason }) => {
            let mut t = Transition::new(booking, BookingStatus::Rejected);
            t.patch.reason = Some(reason.clone());
            t.notify(
                Notification::new(client, NotificationType::BookingRejected, booking)
                    .with_reason(Some(reason.clone())),
            )
        }

        (BookingStatus::Accepted, Event::MarkItemsReceived) => {
            if booking.items_received {
                return Err(EngineError::StatusConflict(format!(
                    "items for booking {} are already marked as received",
                    booking.id
                )));
            }
            let mut t = Transition::new(booking, BookingStatus::Accepted);
            t.precondition.items_received = Some(false);
            t.patch.status = None;
            t.patch.items_received = Some(true);
            t.patch.items_received_at = Some(now);
            t.notify(Notification::new(client, NotificationType::ItemReceived, booking))
        }

        (BookingStatus::Accepted, Event::StartStream { link }) => {
            if !booking.items_received {
                return Err(EngineError::ItemsNotReceived);
            }
            let link = validate_stream_link(link)?;
            let mut t = Transition::new(booking, BookingStatus::Live);
            t.precondition.items_received = Some(true);
            t.patch.stream_link = Some(link.clone());
            t.notify(
                Notification::new(client, NotificationType::StreamStarted, booking)
                    .with_stream_link(Some(link)),
            )
        }

        (BookingStatus::Live, Event::EndStream) => Transition::new(booking, BookingStatus::Completed)
            .notify(Notification::new(client, NotificationType::StreamEnded, booking)),

        (BookingStatus::Pending | BookingStatus::Accepted, Event::Cancel { reason }) => {
            let mut t = Transition::new(booking, BookingStatus::Cancelled);
            t.patch.reason = Some(reason.clone());
            t.notify(
                Notification::new(streamer, NotificationType::BookingCancelled, booking)
                    .with_reason(Some(reason.clone())),
            )
        }

        (BookingStatus::Pending | BookingStatus::Accepted, Event::RequestReschedule { reason }) => {
            let mut t = Transition::new(booking, BookingStatus::RescheduleRequested);
            t.patch.reason = Some(reason.clone());
            t.notify(
                Notification::new(
                    counterparty(booking, role),
                    NotificationType::RescheduleRequest,
                    booking,
                )
                .with_reason(Some(reason.clone())),
            )
        }

        (BookingStatus::RescheduleRequested, Event::ConfirmReschedule { start, end }) => {
            validate_reschedule_range(*start, *end)?;
            let mut t = Transition::new(booking, BookingStatus::Pending);
            t.patch.start_time = Some(*start);
            t.patch.end_time = Some(*end);
            t.notify(Notification::new(streamer, NotificationType::NewBooking, booking))
        }

        (BookingStatus::RescheduleRequested, Event::CancelReschedule { reason }) => {
            let mut t = Transition::new(booking, BookingStatus::Cancelled);
            t.patch.reason = Some(reason.clone());
            t.notify(
                Notification::new(streamer, NotificationType::RescheduleCancelled, booking)
                    .with_reason(Some(reason.clone())),
            )
        }

        (status, event) => {
            return Err(EngineError::StatusConflict(format!(
                "booking {} is {}, cannot {}",
                booking.id,
                status,
                event.name()
            )))
        }
    };

    Ok(transition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const CLIENT: UserId = 10;
    const STREAMER: UserId = 20;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap()
    }

    fn booking(status: BookingStatus) -> Booking {
        let start = Utc.with_ymd_and_hms(2026, 10, 21, 9, 0, 0).unwrap();
        Booking {
            id: 7,
            client_id: CLIENT,
            streamer_id: STREAMER,
            start_time: start,
            end_time: start + Duration::hours(2),
            timezone: "Asia/Jakarta".to_string(),
            price: 200_000,
            voucher_usage: None,
            status,
            items_received: false,
            items_received_at: None,
            stream_link: None,
            payment_group_id: Some("grp".to_string()),
            reason: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn all_events() -> Vec<Event> {
        let start = Utc.with_ymd_and_hms(2026, 10, 22, 9, 0, 0).unwrap();
        vec![
            Event::Accept,
            Event::Reject {
                reason: "busy".into(),
            },
            Event::MarkItemsReceived,
            Event::StartStream {
                link: "https://www.tiktok.com/@shop/live".into(),
            },
            Event::EndStream,
            Event::Cancel {
                reason: "changed plans".into(),
            },
            Event::RequestReschedule {
                reason: "sick".into(),
            },
            Event::ConfirmReschedule {
                start,
                end: start + Duration::hours(2),
            },
            Event::CancelReschedule {
                reason: "never mind".into(),
            },
        ]
    }

    fn actor_for(event: &Event) -> UserId {
        if event.allowed_for(Role::Streamer) {
            STREAMER
        } else {
            CLIENT
        }
    }

    #[test]
    fn pending_only_allows_accept_reject_cancel_and_reschedule() {
        let b = booking(BookingStatus::Pending);
        let legal: Vec<&str> = all_events()
            .iter()
            .filter(|e| plan(&b, e, actor_for(e), now()).is_ok())
            .map(|e| e.name())
            .collect();
        assert_eq!(legal, vec!["accept", "reject", "cancel", "request_reschedule"]);
    }

    #[test]
    fn start_stream_from_pending_is_status_conflict() {
        let b = booking(BookingStatus::Pending);
        let event = Event::StartStream {
            link: "https://shopee.co.id/live/1".into(),
        };
        assert!(matches!(
            plan(&b, &event, STREAMER, now()),
            Err(EngineError::StatusConflict(_))
        ));
    }

    #[test]
    fn start_stream_requires_items() {
        let mut b = booking(BookingStatus::Accepted);
        let event = Event::StartStream {
            link: "https://shopee.co.id/live/1".into(),
        };
        assert!(matches!(
            plan(&b, &event, STREAMER, now()),
            Err(EngineError::ItemsNotReceived)
        ));

        let received = plan(&b, &Event::MarkItemsReceived, STREAMER, now()).unwrap();
        received.patch.apply(&mut b, now());
        assert!(b.items_received);
        assert_eq!(b.items_received_at, Some(now()));
        assert_eq!(b.status, BookingStatus::Accepted);

        let t = plan(&b, &event, STREAMER, now()).unwrap();
        assert_eq!(t.to, BookingStatus::Live);
        assert_eq!(t.precondition.items_received, Some(true));
        assert_eq!(
            t.notifications[0].stream_link.as_deref(),
            Some("https://shopee.co.id/live/1")
        );
        assert_eq!(t.notifications[0].payment_group_id.as_deref(), Some("grp"));
    }

    #[test]
    fn marking_items_twice_conflicts() {
        let mut b = booking(BookingStatus::Accepted);
        b.items_received = true;
        assert!(matches!(
            plan(&b, &Event::MarkItemsReceived, STREAMER, now()),
            Err(EngineError::StatusConflict(_))
        ));
    }

    #[test]
    fn invalid_links_are_rejected() {
        let mut b = booking(BookingStatus::Accepted);
        b.items_received = true;
        for link in ["not a url", "ftp://example.com/live", "mailto:me@example.com"] {
            let event = Event::StartStream { link: link.into() };
            assert!(matches!(
                plan(&b, &event, STREAMER, now()),
                Err(EngineError::InvalidStreamLink(_))
            ));
        }
    }

    #[test]
    fn wrong_party_is_unauthorized() {
        let b = booking(BookingStatus::Pending);
        assert!(matches!(
            plan(&b, &Event::Accept, CLIENT, now()),
            Err(EngineError::Unauthorized)
        ));
        assert!(matches!(
            plan(&b, &Event::Accept, 999, now()),
            Err(EngineError::Unauthorized)
        ));
        let cancel = Event::Cancel {
            reason: "x".into(),
        };
        assert!(matches!(
            plan(&b, &cancel, STREAMER, now()),
            Err(EngineError::Unauthorized)
        ));
    }

    #[test]
    fn reschedule_notifies_counterparty() {
        let b = booking(BookingStatus::Accepted);
        let event = Event::RequestReschedule {
            reason: "flight delayed".into(),
        };

        let by_streamer = plan(&b, &event, STREAMER, now()).unwrap();
        assert_eq!(by_streamer.notifications[0].user_id, CLIENT);
        assert_eq!(by_streamer.to, BookingStatus::RescheduleRequested);

        let by_client = plan(&b, &event, CLIENT, now()).unwrap();
        assert_eq!(by_client.notifications[0].user_id, STREAMER);
        assert_eq!(
            by_client.notifications[0].reason.as_deref(),
            Some("flight delayed")
        );
    }

    #[test]
    fn confirm_reschedule_moves_back_to_pending() {
        let b = booking(BookingStatus::RescheduleRequested);
        let start = Utc.with_ymd_and_hms(2026, 10, 23, 13, 0, 0).unwrap();
        let event = Event::ConfirmReschedule {
            start,
            end: start + Duration::hours(3),
        };
        let t = plan(&b, &event, CLIENT, now()).unwrap();
        assert_eq!(t.to, BookingStatus::Pending);
        assert_eq!(t.patch.start_time, Some(start));
        assert_eq!(t.notifications[0].user_id, STREAMER);
        assert_eq!(t.notifications[0].kind, NotificationType::NewBooking);
    }

    #[test]
    fn reschedule_range_is_validated() {
        let start = Utc.with_ymd_and_hms(2026, 10, 23, 13, 0, 0).unwrap();
        assert!(matches!(
            validate_reschedule_range(start, start + Duration::hours(1)),
            Err(EngineError::BelowMinimumDuration)
        ));
        assert!(matches!(
            validate_reschedule_range(start, start),
            Err(EngineError::InvalidRange(_))
        ));
        assert!(matches!(
            validate_reschedule_range(start + Duration::minutes(30), start + Duration::hours(3)),
            Err(EngineError::InvalidRange(_))
        ));
        assert!(validate_reschedule_range(start, start + Duration::hours(2)).is_ok());
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for status in [
            BookingStatus::Rejected,
            BookingStatus::Completed,
            BookingStatus::Cancelled,
        ] {
            let b = booking(status);
            for event in all_events() {
                assert!(plan(&b, &event, actor_for(&event), now()).is_err());
            }
        }
    }

    #[test]
    fn live_only_ends() {
        let b = booking(BookingStatus::Live);
        let legal: Vec<&str> = all_events()
            .iter()
            .filter(|e| plan(&b, e, actor_for(e), now()).is_ok())
            .map(|e| e.name())
            .collect();
        assert_eq!(legal, vec!["end_stream"]);
    }
}
