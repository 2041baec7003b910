use chrono::{DateTime, Duration, Utc};

use crate::error::{EngineError, EngineResult};
use crate::models::{PriceState, UserId, VoucherUsage};

pub const PLATFORM_FEE_PERCENT: i64 = 30;
pub const LOWER_BOUND_PERCENT: i64 = 75;
pub const UPPER_BOUND_PERCENT: i64 = 125;
/// Потолок ставки за час.
pub const MAX_HOURLY_RATE: i64 = 1_000_000_000_000;

pub fn price_update_window() -> Duration {
    Duration::hours(24)
}

fn ceil_percent(value: i64, percent: i64) -> i64 {
    value.saturating_mul(percent).saturating_add(99).div_euclid(100)
}

/// Цена, которую видит клиент: базовая ставка плюс комиссия платформы.
pub fn display_price(base: i64) -> i64 {
    base.saturating_add(ceil_percent(base, PLATFORM_FEE_PERCENT))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceBounds {
    pub min: i64,
    pub max: i64,
}

impl PriceBounds {
    pub fn for_price(current: i64) -> Self {
        PriceBounds {
            min: ceil_percent(current, LOWER_BOUND_PERCENT),
            max: ceil_percent(current, UPPER_BOUND_PERCENT).min(MAX_HOURLY_RATE),
        }
    }

    pub fn contains(&self, price: i64) -> bool {
        self.min <= price && price <= self.max
    }
}

/// Первая ставка стримера: любая в пределах `1..=MAX_HOURLY_RATE`.
/// С неё же начинается окно до следующего изменения.
pub fn first_price(streamer_id: UserId, new_price: i64, now: DateTime<Utc>) -> EngineResult<PriceState> {
    if !(1..=MAX_HOURLY_RATE).contains(&new_price) {
        return Err(EngineError::PriceBound {
            min: 1,
            max: MAX_HOURLY_RATE,
        });
    }
    Ok(PriceState {
        last_price_update: Some(now),
        ..PriceState::new(streamer_id, new_price)
    })
}

/// Проверяет изменение ставки и возвращает новое состояние. Запись делает вызывающий.
pub fn evaluate_price_change(
    state: &PriceState,
    new_price: i64,
    now: DateTime<Utc>,
    window: Duration,
) -> EngineResult<PriceState> {
    if let Some(retry_at) = state.next_available_update(window) {
        if now < retry_at {
            return Err(EngineError::RateLimited { retry_at });
        }
    }

    let bounds = PriceBounds::for_price(state.current_price);
    if !bounds.contains(new_price) {
        return Err(EngineError::PriceBound {
            min: bounds.min,
            max: bounds.max,
        });
    }

    let previous = state.current_price;
    let discount_percentage = if new_price < previous && previous > 0 {
        let percent = (previous - new_price) as f64 / previous as f64 * 100.0;
        Some(percent.round() as i32)
    } else {
        None
    };

    Ok(PriceState {
        streamer_id: state.streamer_id,
        current_price: new_price,
        previous_price: Some(previous),
        last_price_update: Some(now),
        discount_percentage,
    })
}

/// Снимок цены брони: ставка за час на длительность.
pub fn booking_price(hourly_rate: i64, hours: i64) -> EngineResult<i64> {
    hourly_rate.checked_mul(hours).ok_or_else(|| {
        EngineError::InvalidRange(format!(
            "{} hours at {} per hour is out of range",
            hours, hourly_rate
        ))
    })
}

pub fn apply_voucher(price: i64, code: &str, discount: i64) -> VoucherUsage {
    let discount = discount.clamp(0, price.max(0));
    VoucherUsage {
        code: code.to_string(),
        discount,
        final_price: price - discount,
    }
}
