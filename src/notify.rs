use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sqlx::PgPool;
use teloxide::prelude::*;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::{Notification, NotificationType, UserId};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("User {0} has no Telegram chat")]
    UnknownRecipient(UserId),

    #[error("Notification failed: {0}")]
    Other(String),
}

/// Доставка уведомлений. Для движка это «отправил и забыл»: ошибка
/// логируется и не откатывает переход.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

pub fn render_message(notification: &Notification) -> String {
    let id = notification.booking_id;
    let mut text = match notification.kind {
        NotificationType::NewBooking => format!("🆕 Новая бронь №{}!\nПодтвердите или отклоните её: /accept {} или /reject {} причина", id, id, id),
        NotificationType::BookingAccepted => format!("✅ Стример подтвердил бронь №{} 🎉", id),
        NotificationType::BookingRejected => format!("❌ К сожалению, стример отклонил бронь №{} 😔", id),
        NotificationType::BookingCancelled => format!("❌ Клиент отменил бронь №{}", id),
        NotificationType::ItemReceived => format!("📦 Стример получил товары по брони №{}", id),
        NotificationType::StreamStarted => format!("🔴 Эфир по брони №{} начался!", id),
        NotificationType::StreamEnded => format!("✅ Эфир по брони №{} завершён", id),
        NotificationType::RescheduleRequest => format!("🔁 Запрошен перенос брони №{}", id),
        NotificationType::RescheduleCancelled => format!("❌ Бронь №{} отменена вместо переноса", id),
    };
    if let Some(reason) = &notification.reason {
        text.push_str(&format!("\nПричина: {}", reason));
    }
    if let Some(link) = &notification.stream_link {
        text.push_str(&format!("\nСсылка: {}", link));
    }
    text
}

/// Отправка в Telegram: id пользователя переводится в чат через таблицу users.
#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
    pool: PgPool,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, pool: PgPool) -> Self {
        TelegramNotifier { bot, pool }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let telegram_id =
            sqlx::query_scalar::<_, Option<i64>>("SELECT telegram_id FROM users WHERE id = $1")
                .bind(notification.user_id)
                .fetch_optional(&self.pool)
                .await?
                .flatten();

        let telegram_id = telegram_id.ok_or(NotifyError::UnknownRecipient(notification.user_id))?;

        self.bot
            .send_message(ChatId(telegram_id), render_message(notification))
            .await?;
        Ok(())
    }
}

/// Запоминает уведомления; может притворяться сломанным.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        RecordingNotifier::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }

    pub async fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.sent.lock().await)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Other("delivery is down".to_string()));
        }
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }
}
