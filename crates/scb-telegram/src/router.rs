use std::sync::Arc;

use teloxide::{
    dispatching::Dispatcher as TgDispatcher,
    dptree,
    prelude::*,
    types::{CallbackQuery, Message},
};

use scb_core::Dispatcher;

use crate::convert::{callback_update, message_update};

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

/// Long-poll Telegram until ctrl-c, feeding every update to `dispatcher`.
///
/// teloxide already serializes updates per chat; the core's session slot
/// lock keeps that guarantee for callbacks and messages alike.
pub async fn run_polling(bot: Bot, dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
    match bot.get_me().await {
        Ok(me) => tracing::info!(username = %me.username(), "bot started"),
        Err(e) => tracing::warn!(error = %e, "get_me failed; continuing"),
    }

    let state = Arc::new(AppState { dispatcher });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handle_callback))
        .branch(Update::filter_message().endpoint(handle_message));

    TgDispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    tracing::info!("polling stopped");
    Ok(())
}

async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(update) = message_update(&msg) else {
        tracing::debug!(chat_id = msg.chat.id.0, "ignoring unsupported message");
        return Ok(());
    };
    state.dispatcher.handle(update).await;
    Ok(())
}

async fn handle_callback(bot: Bot, q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    match callback_update(&q) {
        Some(update) => {
            state.dispatcher.handle(update).await;
        }
        None => {
            // Still answer, or the client keeps spinning.
            if let Err(e) = bot.answer_callback_query(q.id).await {
                tracing::warn!(error = %e, "answer_callback_query failed");
            }
        }
    }
    Ok(())
}
