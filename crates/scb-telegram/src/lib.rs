//! Telegram adapter (teloxide).
//!
//! Implements the `scb-core` `ChatTransport` over the Telegram Bot API and
//! turns Telegram updates into core `IncomingUpdate`s.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{
        BotCommand, BotCommandScope, InlineKeyboardButton, InlineKeyboardMarkup, InputFile,
        ParseMode, Recipient,
    },
};

use tokio::time::sleep;

pub mod convert;
pub mod router;

use scb_core::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::ChatTransport,
        types::{
            FileKind, FileRef, InlineKeyboard, MenuCommand, MenuScope, MessagingCapabilities,
            TextFormat,
        },
    },
    Result,
};

const FILE_BASE_URL: &str = "https://api.telegram.org/file";

#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn from_token(token: impl Into<String>) -> Self {
        Self::new(Bot::new(token))
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::Transport(format!("telegram error: {e}"))
    }

    fn msg_ref(chat_id: ChatId, msg: &Message) -> MessageRef {
        MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        }
    }

    /// Run a request, retrying once when Telegram answers with RetryAfter.
    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(teloxide::RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    tracing::debug!(wait_secs = d.as_secs(), "telegram asked us to retry later");
                    sleep(d).await;
                }
                Err(other) => return Err(Self::map_err(other)),
            }
        }
    }
}

fn markup(keyboard: InlineKeyboard) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = keyboard
        .buttons
        .into_iter()
        .map(|b| vec![InlineKeyboardButton::callback(b.label, b.callback_data)])
        .collect();
    InlineKeyboardMarkup::new(rows)
}

fn bot_commands(commands: &[MenuCommand]) -> Vec<BotCommand> {
    commands
        .iter()
        .map(|c| BotCommand::new(c.command.clone(), c.description.clone()))
        .collect()
}

fn file_url(token: &str, path: &str) -> String {
    format!("{FILE_BASE_URL}/bot{token}/{path}")
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_html: true,
            supports_inline_keyboards: true,
            supports_polls: true,
            max_message_len: 4096,
            max_poll_options: 10,
        }
    }

    async fn send_text(&self, chat_id: ChatId, text: &str, format: TextFormat) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| {
                let req = self.bot.send_message(Self::tg_chat(chat_id), text.to_string());
                match format {
                    TextFormat::Html => req.parse_mode(ParseMode::Html),
                    TextFormat::Plain => req,
                }
            })
            .await?;
        Ok(Self::msg_ref(chat_id, &msg))
    }

    async fn send_file(
        &self,
        chat_id: ChatId,
        file: &FileRef,
        caption: Option<&str>,
    ) -> Result<MessageRef> {
        let msg = match file.kind {
            FileKind::Photo => {
                self.with_retry(|| {
                    let mut req = self
                        .bot
                        .send_photo(Self::tg_chat(chat_id), InputFile::file_id(file.file_id.clone()));
                    if let Some(c) = caption {
                        req = req.caption(c.to_string()).parse_mode(ParseMode::Html);
                    }
                    req
                })
                .await?
            }
            FileKind::Document => {
                self.with_retry(|| {
                    let mut req = self.bot.send_document(
                        Self::tg_chat(chat_id),
                        InputFile::file_id(file.file_id.clone()),
                    );
                    if let Some(c) = caption {
                        req = req.caption(c.to_string()).parse_mode(ParseMode::Html);
                    }
                    req
                })
                .await?
            }
        };
        Ok(Self::msg_ref(chat_id, &msg))
    }

    async fn send_choice(
        &self,
        chat_id: ChatId,
        prompt: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        let markup = markup(keyboard);
        let msg = self
            .with_retry(|| {
                self.bot
                    .send_message(Self::tg_chat(chat_id), prompt.to_string())
                    .parse_mode(ParseMode::Html)
                    .reply_markup(markup.clone())
            })
            .await?;
        Ok(Self::msg_ref(chat_id, &msg))
    }

    async fn send_poll(
        &self,
        chat_id: ChatId,
        question: &str,
        options: &[String],
    ) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| {
                self.bot
                    .send_poll(Self::tg_chat(chat_id), question.to_string(), options.to_vec())
                    .is_anonymous(false)
            })
            .await?;
        Ok(Self::msg_ref(chat_id, &msg))
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.with_retry(|| {
            let mut req = self.bot.answer_callback_query(callback_id.to_string());
            if let Some(t) = text {
                req = req.text(t.to_string());
            }
            req
        })
        .await?;
        Ok(())
    }

    async fn resolve_file_link(&self, file: &FileRef) -> Result<String> {
        let tg_file = self
            .with_retry(|| self.bot.get_file(file.file_id.clone()))
            .await?;
        Ok(file_url(self.bot.token(), &tg_file.path))
    }

    async fn set_command_menu(&self, scope: MenuScope, commands: &[MenuCommand]) -> Result<()> {
        let commands = bot_commands(commands);
        self.with_retry(|| {
            let req = self.bot.set_my_commands(commands.clone());
            match scope {
                MenuScope::Default => req,
                MenuScope::Chat(chat_id) => req.scope(BotCommandScope::Chat {
                    chat_id: Recipient::Id(Self::tg_chat(chat_id)),
                }),
            }
        })
        .await?;
        Ok(())
    }
}
