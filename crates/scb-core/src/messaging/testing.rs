//! In-crate transport fake used by the unit tests.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicI32, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::ChatTransport,
        types::{
            FileRef, InlineKeyboard, MenuCommand, MenuScope, MessagingCapabilities, TextFormat,
        },
    },
    Result,
};

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Sent {
    Text { chat_id: ChatId, text: String },
    File { chat_id: ChatId, file: FileRef, caption: Option<String> },
    Choice { chat_id: ChatId, prompt: String, keyboard: InlineKeyboard },
    Poll { chat_id: ChatId, question: String, options: Vec<String> },
    CallbackAnswer { callback_id: String, text: Option<String> },
    Menu { scope: MenuScope, commands: Vec<String> },
}

impl Sent {
    fn chat(&self) -> Option<ChatId> {
        match self {
            Sent::Text { chat_id, .. }
            | Sent::File { chat_id, .. }
            | Sent::Choice { chat_id, .. }
            | Sent::Poll { chat_id, .. } => Some(*chat_id),
            Sent::CallbackAnswer { .. } | Sent::Menu { .. } => None,
        }
    }
}

#[derive(Default)]
pub(crate) struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    failing: Mutex<HashSet<i64>>,
    stalled: Mutex<HashSet<i64>>,
    next_id: AtomicI32,
}

impl RecordingTransport {
    /// Every send to `chat_id` fails with a transport error.
    pub(crate) fn fail_for(&self, chat_id: ChatId) {
        self.failing.lock().unwrap().insert(chat_id.0);
    }

    /// Every send to `chat_id` hangs for an hour.
    pub(crate) fn stall_for(&self, chat_id: ChatId) {
        self.stalled.lock().unwrap().insert(chat_id.0);
    }

    pub(crate) fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn sent_to(&self, chat_id: ChatId) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|s| s.chat() == Some(chat_id))
            .collect()
    }

    pub(crate) fn texts_to(&self, chat_id: ChatId) -> Vec<String> {
        self.sent_to(chat_id)
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { text, .. } => Some(text),
                Sent::Choice { prompt, .. } => Some(prompt),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn last_text_to(&self, chat_id: ChatId) -> Option<String> {
        self.texts_to(chat_id).pop()
    }

    /// Command tokens of the last menu set for `scope`.
    pub(crate) fn menu_for(&self, scope: MenuScope) -> Option<Vec<String>> {
        self.sent().into_iter().rev().find_map(|s| match s {
            Sent::Menu { scope: s, commands } if s == scope => Some(commands),
            _ => None,
        })
    }

    pub(crate) fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    async fn deliver(&self, chat_id: ChatId, item: Sent) -> Result<MessageRef> {
        let stalled = self.stalled.lock().unwrap().contains(&chat_id.0);
        if stalled {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.failing.lock().unwrap().contains(&chat_id.0) {
            return Err(Error::Transport(format!("chat {chat_id} blocked the bot")));
        }
        self.sent.lock().unwrap().push(item);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(id),
        })
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_html: true,
            supports_inline_keyboards: true,
            supports_polls: true,
            max_message_len: 4096,
            max_poll_options: 10,
        }
    }

    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        _format: TextFormat,
    ) -> Result<MessageRef> {
        self.deliver(
            chat_id,
            Sent::Text {
                chat_id,
                text: text.to_string(),
            },
        )
        .await
    }

    async fn send_file(
        &self,
        chat_id: ChatId,
        file: &FileRef,
        caption: Option<&str>,
    ) -> Result<MessageRef> {
        self.deliver(
            chat_id,
            Sent::File {
                chat_id,
                file: file.clone(),
                caption: caption.map(|s| s.to_string()),
            },
        )
        .await
    }

    async fn send_choice(
        &self,
        chat_id: ChatId,
        prompt: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.deliver(
            chat_id,
            Sent::Choice {
                chat_id,
                prompt: prompt.to_string(),
                keyboard,
            },
        )
        .await
    }

    async fn send_poll(
        &self,
        chat_id: ChatId,
        question: &str,
        options: &[String],
    ) -> Result<MessageRef> {
        self.deliver(
            chat_id,
            Sent::Poll {
                chat_id,
                question: question.to_string(),
                options: options.to_vec(),
            },
        )
        .await
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.sent.lock().unwrap().push(Sent::CallbackAnswer {
            callback_id: callback_id.to_string(),
            text: text.map(|s| s.to_string()),
        });
        Ok(())
    }

    async fn resolve_file_link(&self, file: &FileRef) -> Result<String> {
        Ok(format!("https://files.example/{}", file.file_id))
    }

    async fn set_command_menu(&self, scope: MenuScope, commands: &[MenuCommand]) -> Result<()> {
        if let MenuScope::Chat(chat_id) = scope {
            if self.failing.lock().unwrap().contains(&chat_id.0) {
                return Err(Error::Transport(format!("chat {chat_id} blocked the bot")));
            }
        }
        self.sent.lock().unwrap().push(Sent::Menu {
            scope,
            commands: commands.iter().map(|c| c.command.clone()).collect(),
        });
        Ok(())
    }
}
