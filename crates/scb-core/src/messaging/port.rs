use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::types::{
        FileRef, InlineKeyboard, MenuCommand, MenuScope, MessagingCapabilities, TextFormat,
    },
    Result,
};

/// Outbound side of the chat transport.
///
/// Telegram is the only implementation today. Retries and rate limits belong
/// to the implementation (or to a decorator such as `ThrottledTransport`),
/// never to the callers in the core.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send_text(&self, chat_id: ChatId, text: &str, format: TextFormat)
        -> Result<MessageRef>;

    async fn send_file(
        &self,
        chat_id: ChatId,
        file: &FileRef,
        caption: Option<&str>,
    ) -> Result<MessageRef>;

    /// Send a prompt with buttons; the answer arrives later as a callback update.
    async fn send_choice(
        &self,
        chat_id: ChatId,
        prompt: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef>;

    async fn send_poll(&self, chat_id: ChatId, question: &str, options: &[String])
        -> Result<MessageRef>;

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()>;

    async fn resolve_file_link(&self, file: &FileRef) -> Result<String>;

    /// Replace the command menu shown to `scope`.
    async fn set_command_menu(&self, scope: MenuScope, commands: &[MenuCommand]) -> Result<()>;
}
