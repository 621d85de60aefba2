use crate::domain::{ChatId, MessageRef, UserId};

/// Messenger-agnostic inbound update.
///
/// Telegram-specific fields stay in the Telegram adapter.
#[derive(Clone, Debug)]
pub enum IncomingUpdate {
    Text(TextMessage),
    Photo(PhotoMessage),
    Document(DocumentMessage),
    Callback(CallbackQuery),
}

impl IncomingUpdate {
    pub fn chat_id(&self) -> ChatId {
        match self {
            IncomingUpdate::Text(m) => m.chat_id,
            IncomingUpdate::Photo(m) => m.chat_id,
            IncomingUpdate::Document(m) => m.chat_id,
            IncomingUpdate::Callback(q) => q.chat_id,
        }
    }

    pub fn sender(&self) -> &Sender {
        match self {
            IncomingUpdate::Text(m) => &m.sender,
            IncomingUpdate::Photo(m) => &m.sender,
            IncomingUpdate::Document(m) => &m.sender,
            IncomingUpdate::Callback(q) => &q.sender,
        }
    }

    /// Short label used in logs and audit events.
    pub fn kind(&self) -> &'static str {
        match self {
            IncomingUpdate::Text(_) => "TEXT",
            IncomingUpdate::Photo(_) => "PHOTO",
            IncomingUpdate::Document(_) => "DOCUMENT",
            IncomingUpdate::Callback(_) => "CALLBACK",
        }
    }
}

/// Who sent an update, as reported by the messenger.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sender {
    pub user_id: UserId,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub is_bot: bool,
}

impl Sender {
    pub fn display_name(&self) -> String {
        self.username
            .clone()
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[derive(Clone, Debug)]
pub struct TextMessage {
    pub chat_id: ChatId,
    pub sender: Sender,
    pub text: String,
}

#[derive(Clone, Debug)]
pub struct PhotoMessage {
    pub chat_id: ChatId,
    pub sender: Sender,
    pub file: FileRef,
    pub caption: Option<String>,
}

#[derive(Clone, Debug)]
pub struct DocumentMessage {
    pub chat_id: ChatId,
    pub sender: Sender,
    pub file: FileRef,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub caption: Option<String>,
}

#[derive(Clone, Debug)]
pub struct CallbackQuery {
    pub chat_id: ChatId,
    pub sender: Sender,
    pub callback_id: String,
    pub data: String,
    pub message: Option<MessageRef>,
}

/// Messenger-side handle of an uploaded file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRef {
    pub file_id: String,
    pub kind: FileKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Photo,
    Document,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Photo => "photo",
            FileKind::Document => "document",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "photo" => Some(FileKind::Photo),
            "document" => Some(FileKind::Document),
            _ => None,
        }
    }
}

/// How outgoing text should be interpreted by the messenger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextFormat {
    Plain,
    Html,
}

/// Inline keyboard (buttons) used for choice steps and immediate actions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub buttons: Vec<InlineButton>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(label: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            callback_data: callback_data.into(),
        }
    }
}

impl InlineKeyboard {
    pub fn new(buttons: Vec<InlineButton>) -> Self {
        Self { buttons }
    }

    /// Convenience for "one button per row" layouts; each option maps to
    /// `{prefix}:{value}`.
    pub fn one_per_row(prefix: &str, options: &[(&str, &str)], max_label_len: usize) -> Self {
        let mut buttons = Vec::new();
        for (value, label) in options {
            let label = if label.chars().count() > max_label_len {
                format!("{}...", label.chars().take(max_label_len).collect::<String>())
            } else {
                label.to_string()
            };
            buttons.push(InlineButton {
                label,
                callback_data: format!("{prefix}:{value}"),
            });
        }
        Self { buttons }
    }
}

/// One entry of the messenger's command menu (`/command - description`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MenuCommand {
    pub command: String,
    pub description: String,
}

impl MenuCommand {
    pub fn new(command: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            description: description.into(),
        }
    }
}

/// Who sees a command menu: every chat, or one chat overriding the default.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MenuScope {
    Default,
    Chat(ChatId),
}

/// Capabilities / feature flags of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub supports_html: bool,
    pub supports_inline_keyboards: bool,
    pub supports_polls: bool,
    pub max_message_len: usize,
    pub max_poll_options: usize,
}
