use std::sync::Arc;

use streambook::clock::SystemClock;
use streambook::config::Config;
use streambook::db::{get_db_pool, init_schema, PgStore};
use streambook::engine::Engine;
use streambook::handlers::{answer, BotEngine, Command};
use streambook::notify::TelegramNotifier;
use teloxide::prelude::*;

extern crate pretty_env_logger;
#[macro_use] extern crate log;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let config = Config::from_env()?;

    let pool = get_db_pool(&config.database).await?;
    init_schema(&pool).await?;
    let bot = Bot::from_env();

    let engine: Arc<BotEngine> = Arc::new(Engine::new(
        PgStore::new(pool.clone()),
        TelegramNotifier::new(bot.clone(), pool),
        Arc::new(SystemClock),
        config.engine_settings(),
    ));
    info!(
        "Starting booking bot (timezone hint {})",
        engine.settings().default_timezone
    );

    let handler = Update::filter_message()
        .filter_command::<Command>()
        .endpoint(answer);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![engine])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
    Ok(())
}
