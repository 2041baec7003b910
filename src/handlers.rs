use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use log::error;
use teloxide::{prelude::*, utils::command::BotCommands};

use crate::bulk::{BulkRequest, SkipReason};
use crate::db::PgStore;
use crate::engine::{BookingRequest, Engine};
use crate::error::EngineError;
use crate::lifecycle::Event;
use crate::models::{Booking, BulkMode, DayOff, HourRange, ShippingInfo, UserId, WeeklySchedule};
use crate::notify::TelegramNotifier;
use crate::pricing::display_price;
use crate::selection::{hour_label, parse_hour, Selection, MIN_SPAN_HOURS};

pub type BotEngine = Engine<PgStore, TelegramNotifier>;

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Команды бронирования эфиров:")]
pub enum Command {
    #[command(description = "показать этот список")]
    Help,
    #[command(description = "свободные часы: /slots <стример> <ГГГГ-ММ-ДД>")]
    Slots(String),
    #[command(description = "свободные дни: /bulk <стример> [week|twoWeeks|month]")]
    Bulk(String),
    #[command(description = "забронировать: /book <стример> <ГГГГ-ММ-ДД> <с> <до>")]
    Book(String),
    #[command(description = "мои брони")]
    Bookings,
    #[command(description = "подтвердить бронь: /accept <бронь>")]
    Accept(i64),
    #[command(description = "отклонить: /reject <бронь> <причина>")]
    Reject(String),
    #[command(description = "товары получены: /received <бронь>")]
    Received(i64),
    #[command(description = "начать эфир: /live <бронь> <ссылка>")]
    Live(String),
    #[command(description = "завершить эфир: /end <бронь>")]
    End(i64),
    #[command(description = "отменить свою бронь: /cancel <бронь> <причина>")]
    Cancel(String),
    #[command(description = "попросить перенос: /reschedule <бронь> <причина>")]
    Reschedule(String),
    #[command(description = "подтвердить перенос: /move <бронь> <ГГГГ-ММ-ДД> <с> <до>")]
    Move(String),
    #[command(description = "отменить вместо переноса: /drop <бронь> <причина>")]
    Drop(String),
    #[command(description = "изменить ставку за час: /price <сумма>")]
    Price(i64),
    #[command(description = "расписание: /schedule 1 9-17; 3 10-14, 18-21")]
    Schedule(String),
    #[command(description = "выходной: /dayoff <ГГГГ-ММ-ДД>")]
    Dayoff(String),
}

pub fn split_id(args: &str) -> Option<(i64, String)> {
    let args = args.trim();
    let (id, rest) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
    Some((id.parse().ok()?, rest.trim().to_string()))
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// `<дата> <с> <до>`, часы в формате `9` или `09:00`.
pub fn parse_day_range(args: &str) -> Option<(NaiveDate, u8, u8)> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    if parts.len() != 3 {
        return None;
    }
    let date = parse_date(parts[0])?;
    let from = parse_hour(parts[1])?;
    let to = parse_hour(parts[2])?;
    (from < to).then_some((date, from, to))
}

/// `1 9-17; 3 10-14, 18-21`: день недели (0 = воскресенье) и диапазоны часов.
pub fn parse_schedule(text: &str) -> Result<WeeklySchedule, String> {
    let mut schedule = WeeklySchedule::new();
    for entry in text.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (day, ranges) = entry
            .split_once(char::is_whitespace)
            .ok_or_else(|| format!("не понял «{}»", entry))?;
        let weekday: u8 = day
            .parse()
            .ok()
            .filter(|d| *d <= 6)
            .ok_or_else(|| format!("день недели должен быть от 0 до 6: «{}»", day))?;

        let mut parsed = Vec::new();
        for range in ranges.split(',').map(str::trim) {
            let (start, end) = range
                .split_once('-')
                .ok_or_else(|| format!("диапазон должен выглядеть как 9-17: «{}»", range))?;
            let start = parse_hour(start).ok_or_else(|| format!("неверный час: «{}»", start))?;
            let end = parse_hour(end).ok_or_else(|| format!("неверный час: «{}»", end))?;
            if start > end {
                return Err(format!("начало позже конца: «{}»", range));
            }
            parsed.push(HourRange::new(start, end));
        }
        schedule = schedule.with_day(weekday, parsed);
    }
    Ok(schedule)
}

/// Диапазон `/book` короче двух часов отклоняем, а не расширяем молча.
pub fn check_span(from: u8, to: u8) -> Result<(), EngineError> {
    if to < from || to - from < MIN_SPAN_HOURS {
        return Err(EngineError::BelowMinimumDuration);
    }
    Ok(())
}

fn describe(booking: &Booking) -> String {
    format!(
        "№{} {} {}-{} UTC, {} ({})",
        booking.id,
        booking.start_time.format("%d.%m.%Y"),
        booking.start_time.format("%H:%M"),
        booking.end_time.format("%H:%M"),
        booking.status.label(),
        display_price(booking.price)
    )
}

fn outcome(result: Result<Booking, EngineError>) -> String {
    match result {
        Ok(booking) => describe(&booking),
        Err(e) => format!("⚠️ {}", e),
    }
}

async fn current_user(engine: &BotEngine, msg: &Message) -> Option<UserId> {
    let user = msg.from.as_ref()?;
    match engine.store().user_by_telegram(user.id.0 as i64).await {
        Ok(id) => id,
        Err(e) => {
            error!("Error looking up user {}: {}", user.id, e);
            None
        }
    }
}

pub async fn answer(bot: Bot, msg: Message, cmd: Command, engine: Arc<BotEngine>) -> ResponseResult<()> {
    let reply = match cmd {
        Command::Help => Command::descriptions().to_string(),
        cmd => match current_user(&engine, &msg).await {
            Some(actor) => execute(&engine, actor, cmd).await,
            None => "Вы не зарегистрированы. Обратитесь к администратору.".to_string(),
        },
    };

    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

async fn execute(engine: &BotEngine, actor: UserId, cmd: Command) -> String {
    match cmd {
        Command::Help => Command::descriptions().to_string(),
        Command::Slots(args) => slots(engine, &args).await,
        Command::Bulk(args) => bulk(engine, &args).await,
        Command::Book(args) => book(engine, actor, &args).await,
        Command::Bookings => match engine.store().bookings_for_user(actor).await {
            Ok(bookings) if bookings.is_empty() => "У вас пока нет броней".to_string(),
            Ok(bookings) => bookings.iter().map(describe).collect::<Vec<_>>().join("\n"),
            Err(e) => {
                error!("Error loading bookings for user {}: {}", actor, e);
                "⚠️ Не удалось загрузить брони".to_string()
            }
        },
        Command::Accept(id) => outcome(engine.transition(id, Event::Accept, actor).await),
        Command::Received(id) => {
            outcome(engine.transition(id, Event::MarkItemsReceived, actor).await)
        }
        Command::End(id) => outcome(engine.transition(id, Event::EndStream, actor).await),
        Command::Reject(args) => with_id(&args, |reason| Event::Reject { reason }, engine, actor).await,
        Command::Live(args) => with_id(&args, |link| Event::StartStream { link }, engine, actor).await,
        Command::Cancel(args) => with_id(&args, |reason| Event::Cancel { reason }, engine, actor).await,
        Command::Reschedule(args) => {
            with_id(&args, |reason| Event::RequestReschedule { reason }, engine, actor).await
        }
        Command::Drop(args) => {
            with_id(&args, |reason| Event::CancelReschedule { reason }, engine, actor).await
        }
        Command::Move(args) => move_booking(engine, actor, &args).await,
        Command::Price(amount) => match engine.change_price(actor, amount).await {
            Ok(state) => format!(
                "Ставка обновлена: {} в час (клиенты видят {})",
                state.current_price,
                display_price(state.current_price)
            ),
            Err(e) => format!("⚠️ {}", e),
        },
        Command::Schedule(args) => match parse_schedule(&args) {
            Ok(schedule) => match engine.store().save_weekly_schedule(actor, &schedule).await {
                Ok(()) => "✅ Расписание сохранено".to_string(),
                Err(e) => {
                    error!("Error saving schedule for {}: {}", actor, e);
                    "⚠️ Не удалось сохранить расписание".to_string()
                }
            },
            Err(e) => format!("⚠️ {}", e),
        },
        Command::Dayoff(args) => match parse_date(&args) {
            Some(date) => {
                let day_off = DayOff {
                    streamer_id: actor,
                    date,
                };
                match engine.store().add_day_off(day_off).await {
                    Ok(()) => format!("✅ {} отмечен как выходной", date),
                    Err(e) => {
                        error!("Error saving day off for {}: {}", actor, e);
                        "⚠️ Не удалось сохранить выходной".to_string()
                    }
                }
            }
            None => "Дата должна быть в формате ГГГГ-ММ-ДД".to_string(),
        },
    }
}

async fn with_id<F>(args: &str, make: F, engine: &BotEngine, actor: UserId) -> String
where
    F: FnOnce(String) -> Event,
{
    match split_id(args) {
        Some((id, rest)) if !rest.is_empty() => outcome(engine.transition(id, make(rest), actor).await),
        _ => "Укажите номер брони и текст через пробел".to_string(),
    }
}

async fn slots(engine: &BotEngine, args: &str) -> String {
    let Some((streamer_id, date)) = split_id(args) else {
        return "Формат: /slots <стример> <ГГГГ-ММ-ДД>".to_string();
    };
    let Some(date) = parse_date(&date) else {
        return "Дата должна быть в формате ГГГГ-ММ-ДД".to_string();
    };

    match engine.resolve_availability(streamer_id, date).await {
        Ok(day) if day.is_empty() => format!("На {} свободных часов нет", date),
        Ok(day) => {
            let hours: Vec<String> = day.available.iter().map(|h| hour_label(*h)).collect();
            format!("Свободно {} (UTC): {}", date, hours.join(", "))
        }
        Err(e) => format!("⚠️ {}", e),
    }
}

async fn bulk(engine: &BotEngine, args: &str) -> String {
    let Some((streamer_id, mode)) = split_id(args) else {
        return "Формат: /bulk <стример> [week|twoWeeks|month]".to_string();
    };
    let mode = if mode.is_empty() {
        engine.settings().default_bulk_mode
    } else {
        match mode.parse::<BulkMode>() {
            Ok(mode) => mode,
            Err(e) => return format!("⚠️ {}", e),
        }
    };

    let request = BulkRequest {
        mode,
        start: None,
        shipping: ShippingInfo::none(),
    };
    match engine.bulk_select(streamer_id, &request).await {
        Ok(result) => {
            let mut lines: Vec<String> = result
                .selection
                .dates()
                .filter_map(|date| {
                    let set = result.selection.get(date)?;
                    let hours: Vec<String> = set.hours().map(hour_label).collect();
                    Some(format!("{}: {}", date, hours.join(", ")))
                })
                .collect();
            let too_soon = result
                .skipped
                .iter()
                .filter(|s| s.reason == SkipReason::TooSoon)
                .count();
            lines.push(format!(
                "Пропущено дней: {} (слишком рано: {})",
                result.skipped_count(),
                too_soon
            ));
            lines.join("\n")
        }
        Err(e) => format!("⚠️ {}", e),
    }
}

async fn book(engine: &BotEngine, client_id: UserId, args: &str) -> String {
    let Some((streamer_id, rest)) = split_id(args) else {
        return "Формат: /book <стример> <ГГГГ-ММ-ДД> <с> <до>".to_string();
    };
    let Some((date, from, to)) = parse_day_range(&rest) else {
        return "Формат: /book <стример> <ГГГГ-ММ-ДД> <с> <до>".to_string();
    };
    if let Err(e) = check_span(from, to) {
        return format!("⚠️ {}", e);
    }

    // первый час даёт минимальный блок, дальше продлеваем по часу
    let mut selection = Selection::new();
    for hour in from..=to {
        selection = match engine.select_hour(&selection, streamer_id, date, hour).await {
            Ok(next) => next,
            Err(e) => return format!("⚠️ {}", e),
        };
    }

    let request = BookingRequest {
        client_id,
        streamer_id,
        selection,
        shipping: ShippingInfo::none(),
        timezone: None,
        voucher: None,
    };
    match engine.submit_booking(request).await {
        Ok(bookings) => {
            let lines: Vec<String> = bookings.iter().map(describe).collect();
            format!("✅ Заявка отправлена стримеру\n{}", lines.join("\n"))
        }
        Err(e) => format!("⚠️ {}", e),
    }
}

async fn move_booking(engine: &BotEngine, actor: UserId, args: &str) -> String {
    let parsed = split_id(args).and_then(|(id, rest)| Some((id, parse_day_range(&rest)?)));
    let Some((id, (date, from, to))) = parsed else {
        return "Формат: /move <бронь> <ГГГГ-ММ-ДД> <с> <до>".to_string();
    };

    let at = |hour: u8| {
        let time = NaiveTime::from_hms_opt(u32::from(hour), 0, 0).unwrap_or(NaiveTime::MIN);
        date.and_time(time).and_utc()
    };
    let event = Event::ConfirmReschedule {
        start: at(from),
        end: at(to),
    };
    outcome(engine.transition(id, event, actor).await)
}
