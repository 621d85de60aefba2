//! Telegram updates -> core `IncomingUpdate`s.
//!
//! Anything the bot doesn't handle (stickers, voice, service messages,
//! messages without a sender) maps to `None`.

use teloxide::types::{CallbackQuery as TgCallbackQuery, Message, User};

use scb_core::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    messaging::types::{
        CallbackQuery, DocumentMessage, FileKind, FileRef, IncomingUpdate, PhotoMessage, Sender,
        TextMessage,
    },
};

pub fn sender_from(user: &User) -> Sender {
    Sender {
        user_id: UserId(user.id.0 as i64),
        username: user.username.clone(),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        is_bot: user.is_bot,
    }
}

pub fn message_update(msg: &Message) -> Option<IncomingUpdate> {
    let sender = sender_from(msg.from()?);
    let chat_id = ChatId(msg.chat.id.0);

    if let Some(text) = msg.text() {
        return Some(IncomingUpdate::Text(TextMessage {
            chat_id,
            sender,
            text: text.to_string(),
        }));
    }

    // Largest size is last.
    if let Some(best) = msg.photo().and_then(|sizes| sizes.last()) {
        return Some(IncomingUpdate::Photo(PhotoMessage {
            chat_id,
            sender,
            file: FileRef {
                file_id: best.file.id.clone(),
                kind: FileKind::Photo,
            },
            caption: msg.caption().map(str::to_string),
        }));
    }

    if let Some(doc) = msg.document() {
        return Some(IncomingUpdate::Document(DocumentMessage {
            chat_id,
            sender,
            file: FileRef {
                file_id: doc.file.id.clone(),
                kind: FileKind::Document,
            },
            file_name: doc.file_name.clone(),
            mime_type: doc.mime_type.as_ref().map(|m| m.to_string()),
            caption: msg.caption().map(str::to_string),
        }));
    }

    None
}

/// Callbacks from messages too old for Telegram to include (no `message`)
/// carry no chat and can't be routed.
pub fn callback_update(q: &TgCallbackQuery) -> Option<IncomingUpdate> {
    let msg = q.message.as_ref()?;
    let chat_id = ChatId(msg.chat.id.0);
    Some(IncomingUpdate::Callback(CallbackQuery {
        chat_id,
        sender: sender_from(&q.from),
        callback_id: q.id.clone(),
        data: q.data.clone().unwrap_or_default(),
        message: Some(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        }),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn user() -> Value {
        json!({"id": 42, "is_bot": false, "first_name": "Ada", "last_name": "Lovelace", "username": "ada"})
    }

    fn message(extra: Value) -> Message {
        let mut base = json!({
            "message_id": 7,
            "date": 1_700_000_000,
            "chat": {"id": 42, "type": "private", "first_name": "Ada"},
            "from": user(),
        });
        if let (Some(obj), Some(add)) = (base.as_object_mut(), extra.as_object()) {
            for (k, v) in add {
                obj.insert(k.clone(), v.clone());
            }
        }
        serde_json::from_value(base).unwrap()
    }

    #[test]
    fn text_message_becomes_text_update() {
        let update = message_update(&message(json!({"text": "/start"}))).unwrap();
        let IncomingUpdate::Text(m) = update else {
            panic!("expected text");
        };
        assert_eq!(m.chat_id, ChatId(42));
        assert_eq!(m.text, "/start");
        assert_eq!(m.sender.user_id, UserId(42));
        assert_eq!(m.sender.username.as_deref(), Some("ada"));
        assert_eq!(m.sender.last_name.as_deref(), Some("Lovelace"));
    }

    #[test]
    fn photo_uses_largest_size() {
        let update = message_update(&message(json!({
            "photo": [
                {"file_id": "small", "file_unique_id": "s", "width": 90, "height": 90, "file_size": 100},
                {"file_id": "large", "file_unique_id": "l", "width": 800, "height": 800, "file_size": 9000}
            ],
            "caption": "wallet"
        })))
        .unwrap();
        let IncomingUpdate::Photo(p) = update else {
            panic!("expected photo");
        };
        assert_eq!(p.file.file_id, "large");
        assert_eq!(p.caption.as_deref(), Some("wallet"));
    }

    #[test]
    fn document_keeps_name_and_mime() {
        let update = message_update(&message(json!({
            "document": {
                "file_id": "doc-1",
                "file_unique_id": "d1",
                "file_name": "exams.pdf",
                "mime_type": "application/pdf",
                "file_size": 1234
            }
        })))
        .unwrap();
        let IncomingUpdate::Document(d) = update else {
            panic!("expected document");
        };
        assert_eq!(d.file, FileRef { file_id: "doc-1".to_string(), kind: FileKind::Document });
        assert_eq!(d.file_name.as_deref(), Some("exams.pdf"));
        assert_eq!(d.mime_type.as_deref(), Some("application/pdf"));
    }

    #[test]
    fn unsupported_messages_are_skipped() {
        let sticker_like = message(json!({"new_chat_title": "Council"}));
        assert!(message_update(&sticker_like).is_none());
    }

    #[test]
    fn callback_carries_chat_and_data() {
        let q: TgCallbackQuery = serde_json::from_value(json!({
            "id": "cb-1",
            "from": user(),
            "chat_instance": "ci",
            "data": "step:anonymous",
            "message": {
                "message_id": 9,
                "date": 1_700_000_000,
                "chat": {"id": 42, "type": "private", "first_name": "Ada"},
                "text": "Stay anonymous?"
            }
        }))
        .unwrap();
        let IncomingUpdate::Callback(c) = callback_update(&q).unwrap() else {
            panic!("expected callback");
        };
        assert_eq!(c.chat_id, ChatId(42));
        assert_eq!(c.callback_id, "cb-1");
        assert_eq!(c.data, "step:anonymous");
        assert_eq!(c.message.map(|m| m.message_id), Some(MessageId(9)));
    }
}
